#![forbid(unsafe_code)]

//! Service entry point: bootstrap, signals, and wiring.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use tracing::{info, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use splitboard::cli;
use splitboard::formatter::{FormatterDefaults, MessageFormatter};
use splitboard::run::{self, RunOptions};
use splitboard_core::order::{FontId, ScrollAxis, SpacedFont, TextOrder};
use splitboard_net::{Receiver, ReceiverConfig, local_addresses};
use splitboard_render::canvas::HeadlessCanvas;
use splitboard_render::displayer::Displayer;
use splitboard_render::fonts::FontRegistry;

fn main() {
    let opts = cli::Opts::parse();
    init_tracing();

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            eprintln!("Failed to register signal handler: {err}");
            std::process::exit(1);
        }
    }

    let fonts = Arc::new(FontRegistry::with_default());
    if let Some(path) = &opts.font_file {
        // The bdf loader is an external capability wired in hardware
        // builds; the metrics-only fallback keeps the service usable.
        warn!(path = %path, "font files need a font backend, using the built-in font");
    }
    let spaced_font = SpacedFont::new(FontId(0), opts.letter_spacing);

    let canvas = HeadlessCanvas::from_panel(&opts.panel);
    let mut displayer = Displayer::new(canvas, Arc::clone(&fonts));

    let axis = if opts.vertical {
        ScrollAxis::Vertical
    } else {
        ScrollAxis::Horizontal
    };

    // Put the initial text up before the first client connects.
    displayer.start_order(
        TextOrder::with_font(spaced_font, opts.text.clone())
            .foreground(opts.foreground)
            .background(opts.background)
            .velocity(opts.speed)
            .axis(axis)
            .scroll_type(opts.scroll_type)
            .origin(opts.x_origin, opts.y_origin),
    );

    let mut receiver = Receiver::new(ReceiverConfig {
        port: opts.port,
        ..ReceiverConfig::default()
    });
    receiver.start();

    let addresses = local_addresses();
    info!(
        port = opts.port,
        addresses = %addresses.join(", "),
        "splitboard up; point timing hardware at this host"
    );

    let mut formatter = MessageFormatter::new(FormatterDefaults {
        spaced_font,
        foreground: opts.foreground,
        background: opts.background,
        velocity: opts.speed,
        axis,
        scroll_type: opts.scroll_type,
        x_origin: opts.x_origin,
        y_origin: opts.y_origin,
        ..FormatterDefaults::default()
    });

    let options = RunOptions {
        exit_after: (opts.exit_after_ms > 0)
            .then(|| Duration::from_millis(opts.exit_after_ms)),
        ..RunOptions::default()
    };
    run::run(&receiver, &mut displayer, &mut formatter, &shutdown, &options);

    receiver.stop();
    info!("shut down");
}

/// Stderr subscriber; `SPLITBOARD_LOG` takes a tracing `Targets` filter.
fn init_tracing() {
    let filter = std::env::var("SPLITBOARD_LOG")
        .ok()
        .and_then(|spec| spec.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_default(LevelFilter::INFO));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}
