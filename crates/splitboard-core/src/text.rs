#![forbid(unsafe_code)]

//! Text sanitation for display and logging.
//!
//! Timing hardware occasionally sends control bytes inside otherwise
//! printable lines. Before a string reaches the panel every non-printable
//! character is replaced with `&`; before it reaches the log stream it is
//! escaped as `\xHH` so log files stay greppable.

/// The substitution character used on the panel for non-printable input.
pub const SUBSTITUTE_CHAR: char = '&';

/// True for characters the panel font can render: printable ASCII.
#[inline]
pub fn is_displayable(ch: char) -> bool {
    ch == ' ' || ch.is_ascii_graphic()
}

/// Replace every non-printable character with [`SUBSTITUTE_CHAR`].
///
/// Returns the input unchanged (no allocation beyond the output string)
/// when everything is already printable.
pub fn sanitize_for_display(text: &str) -> String {
    text.chars()
        .map(|ch| if is_displayable(ch) { ch } else { SUBSTITUTE_CHAR })
        .collect()
}

/// Escape non-printable bytes as `\xHH` for logging.
pub fn escape_nonprintable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b == b' ' || b.is_ascii_graphic() {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02X}"));
        }
    }
    out
}
