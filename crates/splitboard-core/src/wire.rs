#![forbid(unsafe_code)]

//! The in-house FORMATTED_TEXT wire form.
//!
//! A formatted-text line is `~+/`, zero or more option tokens in any
//! order, `=`, the display text verbatim, and a carriage return:
//!
//! ```text
//! ~+/!0F ff0000B 000000V+007.0D1S1=1:23.456(2)<CR>
//! ```
//!
//! | Token | Meaning |
//! |-------|---------|
//! | `!d` | font registry index, one digit |
//! | `Frrggbb` | foreground color, six hex digits |
//! | `Brrggbb` | background color, six hex digits |
//! | `V±NN.N` | signed velocity, sign plus five fixed chars |
//! | `D{0\|1}` | axis: `1` horizontal, `0` vertical |
//! | `S{0\|1\|2}` | scroll type: continuous / single-on / single-onoff |
//!
//! Decoding fails closed: an unknown token code or a malformed known token
//! invalidates the whole message. The text after `=` is preserved verbatim
//! up to the terminator.

use crate::order::{FontId, ScrollAxis, ScrollType, SpacedFont, TextOrder};

/// Prefix identifying a formatted-text line.
pub const FORMATTED_PREFIX: &str = "~+/";

/// Why a line failed to decode as formatted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// The line does not start with [`FORMATTED_PREFIX`].
    MissingPrefix,
    /// A token code outside the documented set was seen.
    UnknownToken(char),
    /// A known token had a malformed payload.
    MalformedToken(char),
    /// The `=` separator before the text never appeared.
    MissingText,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "line does not carry the formatted-text prefix"),
            Self::UnknownToken(c) => write!(f, "unknown option token {c:?}"),
            Self::MalformedToken(c) => write!(f, "malformed payload for option token {c:?}"),
            Self::MissingText => write!(f, "missing '=' text separator"),
        }
    }
}

impl std::error::Error for WireError {}

/// Encode an order into its wire form, including the trailing CR.
///
/// Letter spacing and origin are not part of the wire form; the decoder
/// restores them to their defaults.
pub fn encode(order: &TextOrder) -> String {
    let fg = order.get_foreground();
    let bg = order.get_background();
    let axis_bit = match order.get_axis() {
        ScrollAxis::Horizontal => 1,
        ScrollAxis::Vertical => 0,
    };
    let scroll_digit = match order.get_scroll_type() {
        ScrollType::Continuous => 0,
        ScrollType::SingleOn => 1,
        ScrollType::SingleOnOff => 2,
    };
    format!(
        "{FORMATTED_PREFIX}!{}F{:02x}{:02x}{:02x}B{:02x}{:02x}{:02x}V{:+06.1}D{}S{}={}\r",
        order.get_spaced_font().font.0,
        fg.r,
        fg.g,
        fg.b,
        bg.r,
        bg.g,
        bg.b,
        order.get_velocity(),
        axis_bit,
        scroll_digit,
        order.get_text(),
    )
}

/// Decode a formatted-text line (with or without the trailing CR).
pub fn decode(line: &str) -> Result<TextOrder, WireError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let rest = line
        .strip_prefix(FORMATTED_PREFIX)
        .ok_or(WireError::MissingPrefix)?;

    let mut order = TextOrder::default();
    let mut chars = rest.char_indices();
    while let Some((idx, token)) = chars.next() {
        match token {
            '=' => {
                let text = &rest[idx + 1..];
                return Ok(order.text(text));
            }
            '!' => {
                let digit = next_payload(&mut chars, 1, '!')?;
                let index = digit
                    .parse::<usize>()
                    .map_err(|_| WireError::MalformedToken('!'))?;
                let spacing = order.get_spaced_font().letter_spacing;
                order = order.spaced_font(SpacedFont::new(FontId(index), spacing));
            }
            'F' => {
                let color = parse_hex_color(&next_payload(&mut chars, 6, 'F')?, 'F')?;
                order = order.foreground(color);
            }
            'B' => {
                let color = parse_hex_color(&next_payload(&mut chars, 6, 'B')?, 'B')?;
                order = order.background(color);
            }
            'V' => {
                let payload = next_payload(&mut chars, 6, 'V')?;
                if !payload.starts_with(['+', '-']) {
                    return Err(WireError::MalformedToken('V'));
                }
                let velocity = payload
                    .parse::<f32>()
                    .map_err(|_| WireError::MalformedToken('V'))?;
                order = order.velocity(velocity);
            }
            'D' => {
                let axis = match next_payload(&mut chars, 1, 'D')?.as_str() {
                    "1" => ScrollAxis::Horizontal,
                    "0" => ScrollAxis::Vertical,
                    _ => return Err(WireError::MalformedToken('D')),
                };
                order = order.axis(axis);
            }
            'S' => {
                let scroll = match next_payload(&mut chars, 1, 'S')?.as_str() {
                    "0" => ScrollType::Continuous,
                    "1" => ScrollType::SingleOn,
                    "2" => ScrollType::SingleOnOff,
                    _ => return Err(WireError::MalformedToken('S')),
                };
                order = order.scroll_type(scroll);
            }
            other => return Err(WireError::UnknownToken(other)),
        }
    }
    Err(WireError::MissingText)
}

/// Pull exactly `count` chars of token payload, failing as `token`.
fn next_payload(
    chars: &mut std::str::CharIndices<'_>,
    count: usize,
    token: char,
) -> Result<String, WireError> {
    let mut payload = String::with_capacity(count);
    for _ in 0..count {
        match chars.next() {
            Some((_, '=')) | None => return Err(WireError::MalformedToken(token)),
            Some((_, ch)) => payload.push(ch),
        }
    }
    Ok(payload)
}

fn parse_hex_color(payload: &str, token: char) -> Result<crate::color::Color, WireError> {
    let channel = |range: std::ops::Range<usize>| {
        payload
            .get(range)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .ok_or(WireError::MalformedToken(token))
    };
    Ok(crate::color::Color::new(
        channel(0..2)?,
        channel(2..4)?,
        channel(4..6)?,
    ))
}
