#![forbid(unsafe_code)]

//! The single-owner animation engine.
//!
//! The displayer owns the canvas for the process lifetime. It accepts one
//! [`TextOrder`] at a time and advances it frame by frame on each
//! [`Displayer::step`] call: fill, draw, pace, swap, advance. Scroll
//! pacing uses absolute deadlines on the monotonic clock so render-time
//! jitter does not accumulate into the scroll speed.
//!
//! # Corner markers
//!
//! Four pixels, one per panel corner, signal service state without
//! disturbing the current text: the disconnect color when no source is
//! active, the idle color when the panel has been empty for a while.
//! Markers draw on the live plane; a running animation repaints its own
//! overlay each frame instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use splitboard_core::color::Color;
use splitboard_core::order::{ScrollAxis, ScrollType, TextOrder};
use splitboard_core::text::sanitize_for_display;
use tracing::debug;

use crate::canvas::Canvas;
use crate::fonts::FontRegistry;

/// PWM depth used when brightness is 100% and both colors are fully
/// saturated; a single bit doubles the panel refresh rate.
const EXTREME_COLORS_PWM_BITS: u8 = 1;

/// Seconds of empty display before the idle markers appear.
const IDLE_MARKER_DELAY: Duration = Duration::from_secs(5);

/// Idle markers: saturated green.
pub const IDLE_MARKER_COLOR: Color = Color::new(0, 255, 0);

/// Disconnect markers: saturated red.
pub const DISCONNECT_MARKER_COLOR: Color = Color::new(255, 0, 0);

/// Animation engine over a double-buffered canvas.
pub struct Displayer<C: Canvas> {
    canvas: C,
    fonts: Arc<FontRegistry>,
    default_pwm_bits: u8,

    order: TextOrder,
    done: bool,

    x: i32,
    y: i32,
    scroll_dir: i32,
    frame_delay: Duration,
    next_frame: Option<Instant>,

    idle: bool,
    allow_idle_markers: bool,
    disconnected: bool,
    marked_disconnect: bool,
    last_change: Instant,
}

impl<C: Canvas> Displayer<C> {
    /// Take ownership of the canvas. The display starts done and empty.
    pub fn new(canvas: C, fonts: Arc<FontRegistry>) -> Self {
        let default_pwm_bits = canvas.pwm_bits();
        Self {
            canvas,
            fonts,
            default_pwm_bits,
            order: TextOrder::default(),
            done: true,
            x: 0,
            y: 0,
            scroll_dir: -1,
            frame_delay: Duration::ZERO,
            next_frame: None,
            idle: false,
            allow_idle_markers: true,
            disconnected: false,
            marked_disconnect: false,
            last_change: Instant::now(),
        }
    }

    /// The order currently being rendered.
    pub fn current_order(&self) -> &TextOrder {
        &self.order
    }

    /// True once the current order has reached its terminal state. A
    /// continuous scroll reports done after its first full cycle but
    /// keeps moving.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// True while `step` still renders frames: the order is unfinished,
    /// or it scrolls continuously and never settles.
    pub fn is_animating(&self) -> bool {
        !self.done
            || (self.order.is_scrolling() && self.order.get_scroll_type() == ScrollType::Continuous)
    }

    /// Enable or disable the idle corner markers.
    pub fn set_allow_idle_markers(&mut self, allow: bool) {
        self.allow_idle_markers = allow;
    }

    /// Tell the engine whether an active source exists; drives the
    /// disconnect corner markers.
    pub fn set_disconnected(&mut self, disconnected: bool) {
        self.disconnected = disconnected;
    }

    /// Read access to the canvas (panel geometry, test inspection).
    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    /// Replace the current order and prime the animation state.
    pub fn start_order(&mut self, order: TextOrder) {
        let text = sanitize_for_display(order.get_text());
        self.order = order.text(text);

        self.update_pwm_bits();

        self.next_frame = None;
        self.scroll_dir = if self.order.get_velocity() > 0.0 { 1 } else { -1 };

        let font = Arc::clone(self.fonts.get(self.order.get_spaced_font().font));
        let spacing = self.order.get_spaced_font().letter_spacing;
        let reference_width = font.character_width('W');

        self.frame_delay = if !self.order.is_scrolling() || reference_width <= 0 {
            Duration::ZERO
        } else {
            let micros = 1_000_000.0 / self.order.get_velocity().abs() / reference_width as f32;
            Duration::from_micros(micros as u64)
        };

        let (xo, yo) = (self.order.get_x_origin(), self.order.get_y_origin());
        (self.x, self.y) = if !self.order.is_scrolling() {
            (xo, yo)
        } else {
            match (self.order.get_axis(), self.scroll_dir) {
                (ScrollAxis::Horizontal, dir) if dir > 0 => {
                    (-font.measure(self.order.get_text(), spacing), yo)
                }
                (ScrollAxis::Horizontal, _) => (self.canvas.width(), yo),
                (ScrollAxis::Vertical, dir) if dir > 0 => (xo, -font.height()),
                (ScrollAxis::Vertical, _) => (xo, self.canvas.height()),
            }
        };

        self.done = false;
        self.idle = false;
        self.last_change = Instant::now();
        debug!(
            text = self.order.get_text(),
            velocity = self.order.get_velocity(),
            x = self.x,
            y = self.y,
            "order started"
        );
    }

    /// Advance one frame if work remains, then maintain the corner
    /// markers. Non-blocking apart from the scroll pacing sleep.
    pub fn step(&mut self) {
        let scrolling = self.order.is_scrolling();
        let continuous = scrolling && self.order.get_scroll_type() == ScrollType::Continuous;

        if !self.done || continuous {
            self.canvas.fill(self.order.get_background());

            let font = Arc::clone(self.fonts.get(self.order.get_spaced_font().font));
            let spacing = self.order.get_spaced_font().letter_spacing;
            let length = font.draw_text(
                &mut self.canvas,
                self.x,
                self.y + font.baseline(),
                self.order.get_foreground(),
                self.order.get_text(),
                spacing,
            );

            // Keep render-time delays out of the scroll speed: absolute
            // deadlines on the monotonic clock, no wait on the first frame.
            if scrolling {
                match self.next_frame {
                    None => self.next_frame = Some(Instant::now()),
                    Some(deadline) => {
                        let deadline = deadline + self.frame_delay;
                        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                        self.next_frame = Some(deadline);
                    }
                }
            }

            if self.disconnected {
                self.draw_corner_dots_offscreen(DISCONNECT_MARKER_COLOR);
            }
            self.marked_disconnect = self.disconnected;

            self.canvas.swap_on_vsync();

            if scrolling {
                self.advance(length, font.height());
            } else {
                // Text appeared; nothing further to animate.
                self.done = true;
            }
        }

        self.maintain_markers();
    }

    /// Cursor advance and wrap/stop handling for one frame.
    fn advance(&mut self, length: i32, font_height: i32) {
        let dir = self.scroll_dir;
        let horizontal = self.order.get_axis() == ScrollAxis::Horizontal;
        if horizontal {
            self.x += dir;
        } else {
            self.y += dir;
        }

        let (cursor, origin, limit, extent) = if horizontal {
            (
                &mut self.x,
                self.order.get_x_origin(),
                self.canvas.width(),
                length,
            )
        } else {
            (
                &mut self.y,
                self.order.get_y_origin(),
                self.canvas.height(),
                font_height,
            )
        };

        match self.order.get_scroll_type() {
            ScrollType::Continuous => {
                if (dir < 0 && *cursor + extent < 0) || (dir > 0 && *cursor > limit) {
                    *cursor = origin + if dir > 0 { -extent } else { limit };
                    // One full cycle completed.
                    self.done = true;
                }
            }
            ScrollType::SingleOn => {
                if (dir < 0 && *cursor <= origin) || (dir > 0 && *cursor >= origin) {
                    *cursor = origin;
                    self.done = true;
                }
            }
            ScrollType::SingleOnOff => {
                if (dir < 0 && *cursor < -extent) || (dir > 0 && *cursor > limit) {
                    // Park off-screen.
                    *cursor = limit + 1;
                    self.done = true;
                }
            }
        }
    }

    /// Idle and disconnect corner dots, drawn on the live plane once the
    /// animation has settled.
    fn maintain_markers(&mut self) {
        if !self.done {
            return;
        }

        if self.disconnected != self.marked_disconnect {
            let color = if self.disconnected {
                DISCONNECT_MARKER_COLOR
            } else {
                self.order.get_background()
            };
            self.draw_corner_dots_live(color);
            self.marked_disconnect = self.disconnected;
        }

        if self.allow_idle_markers
            && !self.idle
            && self.order.order_done_has_empty_display()
            && self.last_change.elapsed() >= IDLE_MARKER_DELAY
        {
            self.draw_corner_dots_live(IDLE_MARKER_COLOR);
            self.idle = true;
        }
    }

    fn update_pwm_bits(&mut self) {
        let extreme = self.canvas.brightness() == 100
            && self.order.get_foreground().is_fully_saturated()
            && self.order.get_background().is_fully_saturated();
        let target = if extreme {
            EXTREME_COLORS_PWM_BITS
        } else {
            self.default_pwm_bits
        };
        if self.canvas.pwm_bits() != target {
            self.canvas.set_pwm_bits(target);
        }
    }

    fn draw_corner_dots_live(&mut self, color: Color) {
        let (w, h) = (self.canvas.width(), self.canvas.height());
        for (x, y) in [(0, 0), (0, h - 1), (w - 1, 0), (w - 1, h - 1)] {
            self.canvas.set_live_pixel(x, y, color);
        }
    }

    fn draw_corner_dots_offscreen(&mut self, color: Color) {
        let (w, h) = (self.canvas.width(), self.canvas.height());
        for (x, y) in [(0, 0), (0, h - 1), (w - 1, 0), (w - 1, h - 1)] {
            self.canvas.set_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{BuiltinFont, HeadlessCanvas};
    use proptest::prelude::*;
    use splitboard_core::order::{FontId, SpacedFont};

    const BLACK: Color = Color::new(0, 0, 0);

    fn small_fonts() -> Arc<FontRegistry> {
        // 4x6 cells keep scroll travel short in tests.
        let mut registry = FontRegistry::with_default();
        registry
            .register(Arc::new(BuiltinFont::with_metrics(4, 6, 5)))
            .expect("register");
        Arc::new(registry)
    }

    fn small_font() -> SpacedFont {
        SpacedFont::new(FontId(1), 0)
    }

    fn displayer(width: i32, height: i32) -> Displayer<HeadlessCanvas> {
        Displayer::new(HeadlessCanvas::new(width, height), small_fonts())
    }

    #[test]
    fn static_order_is_done_after_one_step() {
        let mut d = displayer(32, 8);
        d.start_order(TextOrder::with_font(small_font(), "hi"));
        assert!(!d.is_done());
        d.step();
        assert!(d.is_done());
        assert!(d.canvas().live_lit_count(BLACK) > 0);
    }

    #[test]
    fn repeated_steps_after_done_do_not_redraw() {
        let mut d = displayer(32, 8);
        d.start_order(TextOrder::with_font(small_font(), "hi"));
        d.step();
        let swaps = d.canvas().swap_count();
        d.step();
        d.step();
        assert_eq!(d.canvas().swap_count(), swaps);
    }

    #[test]
    fn nonprintable_text_is_substituted() {
        let mut d = displayer(32, 8);
        d.start_order(TextOrder::with_font(small_font(), "a\x02b"));
        assert_eq!(d.current_order().get_text(), "a&b");
    }

    #[test]
    fn scroll_on_stops_at_origin() {
        let mut d = displayer(16, 8);
        d.start_order(
            TextOrder::with_font(small_font(), "ab")
                .velocity(-40.0)
                .scroll_type(ScrollType::SingleOn),
        );
        // Entry point for leftward scroll is the right panel edge.
        let mut guard = 0;
        while !d.is_done() {
            d.step();
            guard += 1;
            assert!(guard < 100, "scroll-on never finished");
        }
        // Text landed on the panel and stays there.
        assert!(d.canvas().live_lit_count(BLACK) > 0);
        let swaps = d.canvas().swap_count();
        d.step();
        assert_eq!(d.canvas().swap_count(), swaps);
    }

    #[test]
    fn scroll_onoff_ends_with_empty_panel() {
        let mut d = displayer(16, 8);
        d.start_order(
            TextOrder::with_font(small_font(), "ab")
                .velocity(-40.0)
                .scroll_type(ScrollType::SingleOnOff),
        );
        let mut guard = 0;
        while !d.is_done() {
            d.step();
            guard += 1;
            assert!(guard < 200, "scroll-through never finished");
        }
        assert_eq!(d.canvas().live_lit_count(BLACK), 0);
    }

    #[test]
    fn continuous_scroll_keeps_moving_after_done() {
        let mut d = displayer(16, 8);
        d.start_order(
            TextOrder::with_font(small_font(), "ab")
                .velocity(-40.0)
                .scroll_type(ScrollType::Continuous),
        );
        let mut guard = 0;
        while !d.is_done() {
            d.step();
            guard += 1;
            assert!(guard < 200, "continuous scroll never wrapped");
        }
        // Done after one full cycle, but frames keep rendering.
        assert!(d.is_animating());
        let swaps = d.canvas().swap_count();
        d.step();
        assert_eq!(d.canvas().swap_count(), swaps + 1);
    }

    #[test]
    fn settled_orders_stop_animating() {
        let mut d = displayer(32, 8);
        d.start_order(TextOrder::with_font(small_font(), "hi"));
        assert!(d.is_animating());
        d.step();
        assert!(!d.is_animating());
    }

    #[test]
    fn rightward_scroll_enters_from_the_left() {
        let mut d = displayer(16, 8);
        d.start_order(
            TextOrder::with_font(small_font(), "ab")
                .velocity(40.0)
                .scroll_type(ScrollType::SingleOn),
        );
        // First frame: text is still off-canvas to the left.
        d.step();
        assert_eq!(d.canvas().live_lit_count(BLACK), 0);
        let mut guard = 0;
        while !d.is_done() {
            d.step();
            guard += 1;
            assert!(guard < 100, "rightward scroll never finished");
        }
        assert!(d.canvas().live_pixel(0, 0) != BLACK);
    }

    #[test]
    fn vertical_scroll_finishes() {
        let mut d = displayer(16, 12);
        d.start_order(
            TextOrder::with_font(small_font(), "a")
                .velocity(40.0)
                .axis(ScrollAxis::Vertical)
                .scroll_type(ScrollType::SingleOnOff),
        );
        let mut guard = 0;
        while !d.is_done() {
            d.step();
            guard += 1;
            assert!(guard < 200, "vertical scroll never finished");
        }
        assert_eq!(d.canvas().live_lit_count(BLACK), 0);
    }

    #[test]
    fn vertical_continuous_scroll_wraps_and_keeps_going() {
        let mut d = displayer(16, 12);
        d.start_order(
            TextOrder::with_font(small_font(), "a")
                .velocity(-40.0)
                .axis(ScrollAxis::Vertical)
                .scroll_type(ScrollType::Continuous),
        );
        let mut guard = 0;
        while !d.is_done() {
            d.step();
            guard += 1;
            assert!(guard < 200, "vertical wrap never happened");
        }
        assert!(d.is_animating());
    }

    #[test]
    fn extreme_colors_drop_to_one_pwm_bit() {
        let mut d = displayer(16, 8);
        d.start_order(TextOrder::with_font(small_font(), "x"));
        assert_eq!(d.canvas().pwm_bits(), EXTREME_COLORS_PWM_BITS);
        d.start_order(
            TextOrder::with_font(small_font(), "x").foreground(Color::new(200, 10, 10)),
        );
        assert_eq!(d.canvas().pwm_bits(), HeadlessCanvas::DEFAULT_PWM_BITS);
    }

    #[test]
    fn disconnect_markers_toggle_on_live_plane() {
        let mut d = displayer(16, 8);
        d.start_order(TextOrder::with_font(small_font(), ""));
        d.step();
        assert!(d.is_done());

        d.set_disconnected(true);
        d.step();
        assert_eq!(d.canvas().live_pixel(0, 0), DISCONNECT_MARKER_COLOR);
        assert_eq!(d.canvas().live_pixel(15, 7), DISCONNECT_MARKER_COLOR);

        d.set_disconnected(false);
        d.step();
        assert_eq!(d.canvas().live_pixel(0, 0), BLACK);
    }

    #[test]
    fn disconnect_markers_ride_along_while_scrolling() {
        let mut d = displayer(16, 8);
        d.set_disconnected(true);
        d.start_order(
            TextOrder::with_font(small_font(), "ab")
                .velocity(-40.0)
                .scroll_type(ScrollType::Continuous),
        );
        d.step();
        assert_eq!(d.canvas().live_pixel(0, 7), DISCONNECT_MARKER_COLOR);
    }

    #[test]
    fn idle_markers_appear_after_the_delay() {
        let mut d = displayer(16, 8);
        d.start_order(TextOrder::with_font(small_font(), ""));
        d.step();
        // Not yet: the delay has not elapsed.
        assert_ne!(d.canvas().live_pixel(0, 0), IDLE_MARKER_COLOR);
        // Rewind the change clock instead of sleeping five seconds.
        d.last_change = Instant::now() - IDLE_MARKER_DELAY;
        d.step();
        assert_eq!(d.canvas().live_pixel(0, 0), IDLE_MARKER_COLOR);
        assert_eq!(d.canvas().live_pixel(15, 0), IDLE_MARKER_COLOR);
    }

    #[test]
    fn idle_markers_respect_nonempty_display() {
        let mut d = displayer(16, 8);
        d.start_order(TextOrder::with_font(small_font(), "up"));
        d.step();
        d.last_change = Instant::now() - IDLE_MARKER_DELAY;
        d.step();
        assert_ne!(d.canvas().live_pixel(0, 0), IDLE_MARKER_COLOR);
    }

    #[test]
    fn idle_markers_can_be_disabled() {
        let mut d = displayer(16, 8);
        d.set_allow_idle_markers(false);
        d.start_order(TextOrder::with_font(small_font(), ""));
        d.step();
        d.last_change = Instant::now() - IDLE_MARKER_DELAY;
        d.step();
        assert_ne!(d.canvas().live_pixel(0, 0), IDLE_MARKER_COLOR);
    }

    proptest! {
        #[test]
        fn static_orders_finish_in_one_step(
            text in "[ -~]{0,12}",
            x in -8i32..8,
            y in -4i32..4,
        ) {
            let mut d = displayer(32, 8);
            d.start_order(TextOrder::with_font(small_font(), text).origin(x, y));
            d.step();
            prop_assert!(d.is_done());
        }
    }

    #[test]
    fn scroll_pacing_tracks_frame_delay() {
        let mut d = displayer(16, 8);
        // 4px reference glyph at 250 cps: 1e6 / 250 / 4 = 1000us per frame.
        d.start_order(
            TextOrder::with_font(small_font(), "ab")
                .velocity(-250.0)
                .scroll_type(ScrollType::Continuous),
        );
        assert_eq!(d.frame_delay, Duration::from_micros(1000));

        // First step starts the timer without waiting.
        let t0 = Instant::now();
        d.step();
        assert!(t0.elapsed() < Duration::from_millis(50));

        let t1 = Instant::now();
        for _ in 0..5 {
            d.step();
        }
        let elapsed = t1.elapsed();
        assert!(elapsed >= Duration::from_micros(4500), "paced too fast: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(200), "paced too slow: {elapsed:?}");
    }
}
