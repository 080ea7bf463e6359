#![forbid(unsafe_code)]

//! Vendor timing-protocol lines.
//!
//! The timing mainboard broadcasts fixed-width records over its serial
//! radio bridge, one CR-terminated line per event. A line is only accepted
//! when every structural rule below holds; anything else is treated as
//! noise from the shared RS-232/TCP bridge and dropped upstream.
//!
//! # Line shape
//!
//! - ends in CR, optionally preceded by LF (the LF does not count as data)
//! - 19 to 23 data bytes
//! - alphabet `[A-Za-z0-9.: ]` plus the speed markers `\x01\x02\x03`
//! - spaces at columns 6 and 7
//! - speed markers only at column 8, at most once
//! - periods only at string indices 3, 4, 16, or 17
//!
//! # Record layout (0-based string indices)
//!
//! | Field | Indices | Notes |
//! |---|---|---|
//! | board id | 0 | only when the byte is `A`..=`J` |
//! | bib | 0..3 (1..4 with board id) | whitespace means none |
//! | event code | 3 | only on board-id-less ("rich") copies |
//! | time | 8..20 | trimmed of whitespace |
//! | rank | 20..22 | trimmed of whitespace |
//!
//! A board-id copy carries the same payload as the rich copy with the
//! event code dropped and the board id prefixed, so every field from the
//! time onward keeps its absolute position.

/// Carriage return: the protocol line terminator.
pub const EOL: u8 = 0x0D;

const DATA_LEN_MIN: usize = 19;
const DATA_LEN_MAX: usize = 23;
const SPEED_MARKER_INDEX: usize = 7;
const PERIOD_INDICES: [usize; 4] = [3, 4, 16, 17];

/// Strip the EOL (CR plus optional preceding LF) from a raw line.
///
/// Returns `None` when the line does not end in CR.
pub fn strip_eol(line: &[u8]) -> Option<&[u8]> {
    let data = line.strip_suffix(&[EOL])?;
    Some(data.strip_suffix(&[0x0A]).unwrap_or(data))
}

/// Structural check: could this raw line be a vendor timing record?
pub fn is_vendor_timing_line(line: &[u8]) -> bool {
    let Some(data) = strip_eol(line) else {
        return false;
    };
    if data.len() < DATA_LEN_MIN || data.len() > DATA_LEN_MAX {
        return false;
    }
    if !data.iter().all(|&b| {
        b.is_ascii_alphanumeric() || b == b'.' || b == b':' || b == b' ' || (0x01..=0x03).contains(&b)
    }) {
        return false;
    }
    if data[5] != b' ' || data[6] != b' ' {
        return false;
    }
    let mut speed_markers = data
        .iter()
        .enumerate()
        .filter(|&(_, &b)| (0x01..=0x03).contains(&b));
    if let Some((idx, _)) = speed_markers.next()
        && (idx != SPEED_MARKER_INDEX || speed_markers.next().is_some())
    {
        return false;
    }
    data.iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'.')
        .all(|(idx, _)| PERIOD_INDICES.contains(&idx))
}

/// How a record's event code classifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `A`: the first intermediate split of a run.
    FirstIntermediate,
    /// `B`: a second-or-later intermediate split.
    LaterIntermediate,
    /// `C` or `K`: a run time.
    RunTime,
    /// `D` or any other unrecognized code: a total time, or unknown.
    TotalOrUnknown,
}

/// The fields of one accepted vendor timing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingRecord {
    /// Board id prefix byte, when this is a duplicated per-board copy.
    pub board_id: Option<char>,
    /// Bib number with surrounding whitespace removed; may be empty.
    pub bib: String,
    /// Event code at column 4; only present on rich (board-id-less) copies
    /// and never a space.
    pub event_code: Option<char>,
    /// Time field with whitespace removed; may be empty.
    pub time: String,
    /// Rank field with whitespace removed; may be empty.
    pub rank: String,
    /// The clock is still running for this competitor.
    pub still_running: bool,
    /// Nothing but whitespace after the optional board id.
    pub blank: bool,
}

impl TimingRecord {
    /// Extract the record fields from validated line data (EOL already
    /// stripped). Out-of-range fields read as empty.
    pub fn parse(data: &str) -> Self {
        let bytes = data.as_bytes();
        let board_id = match bytes.first() {
            Some(&b) if b.is_ascii_uppercase() && b <= b'J' => Some(b as char),
            _ => None,
        };
        let shift = usize::from(board_id.is_some());

        let blank = data[shift.min(data.len())..]
            .chars()
            .all(char::is_whitespace);

        let field = |start: usize, end: usize| -> String {
            data.get(start..end.min(data.len()))
                .unwrap_or("")
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect()
        };

        let bib = field(shift, shift + 3);
        let event_code = if board_id.is_none() {
            bytes.get(3).map(|&b| b as char).filter(|&c| c != ' ')
        } else {
            None
        };
        let time = field(8, 20);
        let rank = field(20, 22);

        let still_running = if board_id.is_some() {
            bytes.get(16).is_some_and(|&b| b != b' ') && bytes.get(17) == Some(&b'.')
        } else {
            event_code == Some('.')
        };

        Self {
            board_id,
            bib,
            event_code,
            time,
            rank,
            still_running,
            blank,
        }
    }

    /// Classify the event code. Only meaningful on rich copies; board-id
    /// copies have no code and read as total/unknown.
    pub fn event_kind(&self) -> EventKind {
        match self.event_code {
            Some('A') => EventKind::FirstIntermediate,
            Some('B') => EventKind::LaterIntermediate,
            Some('C') | Some('K') => EventKind::RunTime,
            _ => EventKind::TotalOrUnknown,
        }
    }
}
