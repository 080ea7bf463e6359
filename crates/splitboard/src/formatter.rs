#![forbid(unsafe_code)]

//! Turns raw protocol messages into text orders.
//!
//! The formatter is stateful across a session of vendor-protocol
//! messages. The timing mainboard broadcasts every record twice over:
//! first a "rich" copy carrying the event-type code, then one duplicate
//! per configured board, prefixed with that board's id and stripped of
//! the code. Because the protocol only distinguishes "first intermediate"
//! from "later intermediate" and never numbers the splits, the formatter
//! counts them itself and drops the per-board duplicates once it has seen
//! a rich copy.

use splitboard_core::color::Color;
use splitboard_core::message::{Protocol, RawMessage};
use splitboard_core::order::{ScrollAxis, ScrollType, SpacedFont, TextOrder};
use splitboard_core::timing::{EventKind, TimingRecord};
use splitboard_core::wire;
use tracing::{debug, warn};

/// Shortest vendor line the formatter can extract a time field from.
const MIN_TIMING_DATA: usize = 20;

/// Display defaults applied to every order the formatter builds.
#[derive(Debug, Clone)]
pub struct FormatterDefaults {
    /// Font and letter spacing.
    pub spaced_font: SpacedFont,
    /// Text color.
    pub foreground: Color,
    /// Background color.
    pub background: Color,
    /// Velocity for free-scrolling text.
    pub velocity: f32,
    /// Scroll axis.
    pub axis: ScrollAxis,
    /// Scroll type.
    pub scroll_type: ScrollType,
    /// Draw origin.
    pub x_origin: i32,
    /// Draw origin.
    pub y_origin: i32,
    /// Pin finished times to the panel instead of scrolling them.
    pub no_velocity_for_fixed_times: bool,
}

impl Default for FormatterDefaults {
    fn default() -> Self {
        Self {
            spaced_font: SpacedFont::default(),
            foreground: Color::default_foreground(),
            background: Color::default_background(),
            velocity: 7.0,
            axis: ScrollAxis::Horizontal,
            scroll_type: ScrollType::Continuous,
            x_origin: 0,
            y_origin: 0,
            no_velocity_for_fixed_times: true,
        }
    }
}

/// Stateful message-to-order converter for one client session.
#[derive(Debug)]
pub struct MessageFormatter {
    defaults: FormatterDefaults,
    /// The stream has shown at least one rich copy, so board-id copies
    /// are duplicates.
    observed_event_type_char: bool,
    /// Board id of the previous message, space when none.
    last_board_id: char,
    /// Split number the next intermediate time will display.
    next_split_id: u32,
}

impl MessageFormatter {
    /// Create a formatter with the given display defaults.
    pub fn new(defaults: FormatterDefaults) -> Self {
        Self {
            defaults,
            observed_event_type_char: false,
            last_board_id: ' ',
            next_split_id: 1,
        }
    }

    /// Forget the per-stream duplicate-detection state; called when the
    /// active source changes.
    pub fn reset_session(&mut self) {
        self.observed_event_type_char = false;
        self.last_board_id = ' ';
        self.next_split_id = 1;
    }

    /// Convert a raw message into the order to display, or `None` when
    /// the message is dropped (duplicates, parse failures, commands).
    pub fn handle_message(&mut self, message: &RawMessage) -> Option<TextOrder> {
        match message.protocol {
            Protocol::VendorTiming => self.handle_timing(&message.data),
            Protocol::SimpleText => Some(self.base_order(&message.data, self.defaults.velocity)),
            Protocol::FormattedText => match wire::decode(&message.data) {
                Ok(order) => {
                    Some(order.origin(self.defaults.x_origin, self.defaults.y_origin))
                }
                Err(err) => {
                    warn!(%err, data = %message.data, "formatted-text message failed to decode");
                    None
                }
            },
            Protocol::Command | Protocol::Unknown => {
                warn!(
                    protocol = ?message.protocol,
                    data = %message.data,
                    "message kind cannot be formatted"
                );
                None
            }
        }
    }

    fn handle_timing(&mut self, data: &str) -> Option<TextOrder> {
        if data.len() < MIN_TIMING_DATA {
            warn!(len = data.len(), data = %data, "vendor line too short");
            return None;
        }
        let record = TimingRecord::parse(data);
        let drop_duplicate = self.update_split_state(&record);
        if drop_duplicate {
            debug!(board = ?record.board_id, "dropping per-board duplicate");
            return None;
        }

        if record.blank {
            return Some(self.base_order(" ", self.defaults.velocity));
        }

        let bib = normalize_bib(&record.bib);
        let time = normalize_time(&record.time);
        debug!(bib = %bib, time = %time, rank = %record.rank, "timing record");

        let fixed_velocity = if self.defaults.no_velocity_for_fixed_times {
            0.0
        } else {
            self.defaults.velocity
        };

        let (text, velocity) = if record.still_running {
            (format!("[ {time} ]"), self.defaults.velocity)
        } else {
            match record.event_kind() {
                EventKind::FirstIntermediate | EventKind::LaterIntermediate => {
                    (format!("{time} S{}", self.next_split_id), fixed_velocity)
                }
                EventKind::RunTime => {
                    let text = if record.rank.is_empty() {
                        time
                    } else {
                        format!("{time} R{}", record.rank)
                    };
                    (text, fixed_velocity)
                }
                EventKind::TotalOrUnknown => {
                    let text = if record.rank.is_empty() {
                        time
                    } else {
                        format!("{time}({})", record.rank)
                    };
                    (text, fixed_velocity)
                }
            }
        };

        Some(self.base_order(&text, velocity))
    }

    /// Run the duplicate-suppression state machine for one record.
    /// Returns true when the record is a per-board duplicate to drop.
    fn update_split_state(&mut self, record: &TimingRecord) -> bool {
        if !self.observed_event_type_char {
            if record.board_id.is_none() && record.event_code.is_some() {
                self.observed_event_type_char = true;
            }
        } else if let Some(id) = record.board_id
            && id == self.last_board_id
        {
            // Two board-id copies in a row: the rich copies stopped.
            self.observed_event_type_char = false;
        }

        self.last_board_id = record.board_id.unwrap_or(' ');

        if self.observed_event_type_char {
            match record.event_code {
                Some('A') => self.next_split_id = 1,
                Some('B') => self.next_split_id += 1,
                Some(code) if code != '.' => self.next_split_id = 1,
                _ => {}
            }
        }

        record.board_id.is_some() && self.observed_event_type_char
    }

    fn base_order(&self, text: &str, velocity: f32) -> TextOrder {
        TextOrder::with_font(self.defaults.spaced_font, text)
            .foreground(self.defaults.foreground)
            .background(self.defaults.background)
            .velocity(velocity)
            .axis(self.defaults.axis)
            .scroll_type(self.defaults.scroll_type)
            .origin(self.defaults.x_origin, self.defaults.y_origin)
    }
}

/// Strip leading zeros from a bib number, keeping at least one digit.
pub fn normalize_bib(bib: &str) -> String {
    if bib.len() > 1 {
        let stripped = bib.trim_start_matches('0');
        if stripped.is_empty() {
            return "0".to_string();
        }
        return stripped.to_string();
    }
    bib.to_string()
}

/// Shorten a raw time field for the panel: drop zero hours, drop a
/// leading zero on the first unit, and give bare seconds a `0:` prefix.
pub fn normalize_time(time: &str) -> String {
    let mut time = time.to_string();

    // Zero hours are noise: 00:01:23.456 -> 01:23.456.
    if time.starts_with("00:") && time[3..].contains(':') {
        time = time[3..].to_string();
    }

    // 01:23.456 -> 1:23.456.
    if time.len() > 2 && time.starts_with('0') && time.as_bytes()[2] == b':' {
        time = time[1..].to_string();
    }

    // Bare seconds become 0:SS, keeping any fraction.
    if !time.is_empty() && !time.contains(':') && time.chars().any(|c| c.is_ascii_digit()) {
        let (seconds, fraction) = match time.split_once('.') {
            Some((s, f)) => (s, Some(f)),
            None => (time.as_str(), None),
        };
        if let Ok(seconds) = seconds.parse::<u32>() {
            time = match fraction {
                Some(f) => format!("0:{seconds:02}.{f}"),
                None => format!("0:{seconds:02}"),
            };
        }
    }

    time
}
