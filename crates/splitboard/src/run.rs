#![forbid(unsafe_code)]

//! The render-thread loop.
//!
//! Pops messages from the receiver's active outbox, formats them into
//! orders, advances the displayer one frame at a time, and reports what
//! the panel shows so echo subscribers stay current. When no source can
//! drive the panel the disconnect corner markers appear; when a source
//! comes (back) online a short "Connected" banner shows before the
//! previous picture is restored.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use splitboard_core::message::Protocol;
use splitboard_core::order::{ScrollType, TextOrder};
use splitboard_net::Receiver;
use splitboard_render::canvas::Canvas;
use splitboard_render::displayer::Displayer;
use tracing::{debug, info};

use crate::formatter::MessageFormatter;

/// Loop pause when a frame was rendered or a message handled.
const ACTIVE_SLEEP: Duration = Duration::from_millis(15);

/// Loop pause when no source exists and nothing is animating.
const IDLE_SLEEP: Duration = Duration::from_secs(3);

/// Banner shown when a source connects after a disconnected spell.
const CONNECTED_BANNER: &str = "Connected";

/// How long the banner owns the panel before the previous picture
/// returns.
const BANNER_HOLD: Duration = Duration::from_secs(1);

/// Render-loop settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Draw the disconnect corner markers when no source is active.
    pub disconnect_markers: bool,
    /// Exit after this long; `None` runs until a signal arrives.
    pub exit_after: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            disconnect_markers: true,
            exit_after: None,
        }
    }
}

/// Drive the panel until `shutdown` is set (or `exit_after` elapses).
pub fn run<C: Canvas>(
    receiver: &Receiver,
    displayer: &mut Displayer<C>,
    formatter: &mut MessageFormatter,
    shutdown: &Arc<AtomicBool>,
    options: &RunOptions,
) {
    let started = Instant::now();
    let mut was_disconnected = receiver.no_active_source_or_pending();
    let mut restore: Option<(TextOrder, Instant)> = None;
    displayer.set_disconnected(options.disconnect_markers && was_disconnected);

    while !shutdown.load(Ordering::Relaxed) {
        if let Some(limit) = options.exit_after
            && started.elapsed() >= limit
        {
            info!("exit-after limit reached");
            break;
        }

        // Source-presence transitions drive the corner markers and the
        // banner; a freshly popped message below always wins over both.
        let no_source = receiver.no_active_source_or_pending();
        if no_source != was_disconnected {
            was_disconnected = no_source;
            if no_source {
                displayer.set_disconnected(options.disconnect_markers);
            } else {
                displayer.set_disconnected(false);
                restore = restorable(displayer.current_order()).map(|o| (o, Instant::now()));
                displayer.start_order(banner(displayer.current_order()));
            }
        }

        let mut worked = false;
        if let Some(message) = receiver.pop_pending_message() {
            worked = true;
            if message.protocol == Protocol::SimpleText && message.data.is_empty() {
                // Every source hand-over starts with an empty clear; the
                // split-counter state belongs to the previous stream.
                formatter.reset_session();
            }
            if let Some(order) = formatter.handle_message(&message) {
                restore = None;
                displayer.start_order(order);
                receiver.report_displayed(displayer.current_order());
            }
        } else if let Some((order, since)) = restore.take() {
            if displayer.is_done() && since.elapsed() >= BANNER_HOLD {
                debug!("restoring previous order after banner");
                displayer.start_order(order);
                receiver.report_displayed(displayer.current_order());
            } else {
                restore = Some((order, since));
            }
        }

        displayer.step();

        // A paced animation provides its own frame delay inside step().
        if !worked && !displayer.is_animating() {
            if no_source && restore.is_none() {
                // Nothing to scroll, nobody connected: nap in small
                // slices so shutdown stays prompt.
                let deadline = Instant::now() + IDLE_SLEEP;
                while Instant::now() < deadline
                    && !shutdown.load(Ordering::Relaxed)
                    && !receiver.has_pending_message()
                {
                    std::thread::sleep(ACTIVE_SLEEP);
                }
            } else {
                std::thread::sleep(ACTIVE_SLEEP);
            }
        }
    }
}

/// What to put back on the panel after the "Connected" banner: scrolled-in
/// text is redrawn in place, continuous tickers resume, scroll-through
/// text stays gone.
fn restorable(order: &TextOrder) -> Option<TextOrder> {
    if order.get_text().is_empty() {
        return None;
    }
    match order.get_scroll_type() {
        ScrollType::SingleOnOff if order.is_scrolling() => None,
        ScrollType::SingleOn if order.is_scrolling() => Some(order.clone().velocity(0.0)),
        _ => Some(order.clone()),
    }
}

/// The transient banner announcing a source, styled like the current
/// order.
fn banner(current: &TextOrder) -> TextOrder {
    current
        .clone()
        .text(CONNECTED_BANNER)
        .velocity(0.0)
        .scroll_type(ScrollType::SingleOnOff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitboard_core::order::ScrollAxis;

    #[test]
    fn scroll_through_orders_are_not_restored() {
        let order = TextOrder::new("gone")
            .velocity(5.0)
            .scroll_type(ScrollType::SingleOnOff);
        assert!(restorable(&order).is_none());
    }

    #[test]
    fn scrolled_in_orders_restore_without_motion() {
        let order = TextOrder::new("kept")
            .velocity(5.0)
            .scroll_type(ScrollType::SingleOn);
        let restored = restorable(&order).expect("restorable");
        assert!(!restored.is_scrolling());
        assert_eq!(restored.get_text(), "kept");
    }

    #[test]
    fn continuous_orders_resume_scrolling() {
        let order = TextOrder::new("ticker")
            .velocity(5.0)
            .axis(ScrollAxis::Horizontal)
            .scroll_type(ScrollType::Continuous);
        let restored = restorable(&order).expect("restorable");
        assert!(restored.is_scrolling());
    }

    #[test]
    fn static_orders_restore_unchanged() {
        let order = TextOrder::new("static");
        assert_eq!(restorable(&order), Some(order));
    }

    #[test]
    fn empty_orders_are_not_restored() {
        assert!(restorable(&TextOrder::new("")).is_none());
    }

    #[test]
    fn banner_is_static_and_transient() {
        let current = TextOrder::new("1:23.456(2)").velocity(7.0);
        let b = banner(&current);
        assert_eq!(b.get_text(), CONNECTED_BANNER);
        assert!(!b.is_scrolling());
        assert_eq!(b.get_scroll_type(), ScrollType::SingleOnOff);
    }
}
