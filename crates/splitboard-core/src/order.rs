#![forbid(unsafe_code)]

//! Text change orders: the fully specified rendering requests handed to
//! the animation engine.
//!
//! An order is immutable by convention once dispatched: the formatter or a
//! connected client builds it with the fluent setters, the displayer only
//! reads it. Fonts are referenced by index into the process-wide registry
//! so that orders stay `Copy`-light values with no font data inside.

use crate::color::Color;

/// Velocities with a magnitude at or below this threshold do not scroll.
const SCROLL_EPSILON: f32 = 1e-4;

/// Handle into the process-wide font registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FontId(pub usize);

/// Maximum number of registrable fonts; the wire form encodes the index
/// as a single decimal digit.
pub const MAX_FONTS: usize = 10;

/// A font handle paired with the letter spacing it is drawn with.
///
/// Two spaced fonts are equal when they name the same registry entry and
/// the same spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpacedFont {
    /// Registry handle. Index 0 is the built-in default font.
    pub font: FontId,
    /// Extra pixels between letters; may be negative.
    pub letter_spacing: i32,
}

impl SpacedFont {
    /// Letter spacing associated with the built-in default font.
    pub const DEFAULT_LETTER_SPACING: i32 = -1;

    /// Create a spaced font.
    #[inline]
    pub const fn new(font: FontId, letter_spacing: i32) -> Self {
        Self {
            font,
            letter_spacing,
        }
    }
}

impl Default for SpacedFont {
    fn default() -> Self {
        Self::new(FontId(0), Self::DEFAULT_LETTER_SPACING)
    }
}

/// Scroll axis of a moving order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollAxis {
    /// Text moves along the x axis.
    #[default]
    Horizontal,
    /// Text moves along the y axis.
    Vertical,
}

/// What happens when scrolling text reaches the edge of its travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollType {
    /// Loop forever, wrapping around the panel.
    Continuous,
    /// Scroll in and stop at the origin.
    SingleOn,
    /// Scroll across and off; the panel ends empty.
    #[default]
    SingleOnOff,
}

/// A rendering request: font, colors, motion, origin, and text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextOrder {
    spaced_font: SpacedFont,
    foreground: Color,
    background: Color,
    /// Characters per second; the sign selects the scroll direction.
    velocity: f32,
    axis: ScrollAxis,
    scroll_type: ScrollType,
    x_origin: i32,
    y_origin: i32,
    text: String,
}

impl Default for TextOrder {
    fn default() -> Self {
        Self {
            spaced_font: SpacedFont::default(),
            foreground: Color::default_foreground(),
            background: Color::default_background(),
            velocity: 0.0,
            axis: ScrollAxis::Horizontal,
            scroll_type: ScrollType::SingleOnOff,
            x_origin: 0,
            y_origin: 0,
            text: String::new(),
        }
    }
}

impl TextOrder {
    /// An order with the given text and defaults for everything else.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// An order with an explicit font and text.
    pub fn with_font(spaced_font: SpacedFont, text: impl Into<String>) -> Self {
        Self {
            spaced_font,
            text: text.into(),
            ..Self::default()
        }
    }

    // ── Fluent setters ───────────────────────────────────────────────

    /// Set the spaced font.
    pub fn spaced_font(mut self, spaced_font: SpacedFont) -> Self {
        self.spaced_font = spaced_font;
        self
    }

    /// Set the foreground color.
    pub fn foreground(mut self, color: Color) -> Self {
        self.foreground = color;
        self
    }

    /// Set the background color.
    pub fn background(mut self, color: Color) -> Self {
        self.background = color;
        self
    }

    /// Set the velocity in characters per second (sign = direction).
    pub fn velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    /// Set the scroll axis.
    pub fn axis(mut self, axis: ScrollAxis) -> Self {
        self.axis = axis;
        self
    }

    /// Set the scroll type.
    pub fn scroll_type(mut self, scroll_type: ScrollType) -> Self {
        self.scroll_type = scroll_type;
        self
    }

    /// Set the draw origin.
    pub fn origin(mut self, x: i32, y: i32) -> Self {
        self.x_origin = x;
        self.y_origin = y;
        self
    }

    /// Replace the text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// The spaced font.
    #[inline]
    pub fn get_spaced_font(&self) -> SpacedFont {
        self.spaced_font
    }

    /// The foreground color.
    #[inline]
    pub fn get_foreground(&self) -> Color {
        self.foreground
    }

    /// The background color.
    #[inline]
    pub fn get_background(&self) -> Color {
        self.background
    }

    /// The velocity in characters per second.
    #[inline]
    pub fn get_velocity(&self) -> f32 {
        self.velocity
    }

    /// The scroll axis.
    #[inline]
    pub fn get_axis(&self) -> ScrollAxis {
        self.axis
    }

    /// The scroll type.
    #[inline]
    pub fn get_scroll_type(&self) -> ScrollType {
        self.scroll_type
    }

    /// The x origin.
    #[inline]
    pub fn get_x_origin(&self) -> i32 {
        self.x_origin
    }

    /// The y origin.
    #[inline]
    pub fn get_y_origin(&self) -> i32 {
        self.y_origin
    }

    /// The text to display.
    #[inline]
    pub fn get_text(&self) -> &str {
        &self.text
    }

    /// True when the order is in motion: the velocity magnitude is above
    /// the epsilon threshold.
    #[inline]
    pub fn is_scrolling(&self) -> bool {
        self.velocity.abs() > SCROLL_EPSILON
    }

    /// True when the final state of rendering this order leaves the panel
    /// empty: nothing to draw, or the text scrolls fully off.
    pub fn order_done_has_empty_display(&self) -> bool {
        self.text.is_empty() || (self.is_scrolling() && self.scroll_type == ScrollType::SingleOnOff)
    }
}
