//! Whole-pipeline tests: TCP bytes in, panel pixels out.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use splitboard::formatter::{FormatterDefaults, MessageFormatter};
use splitboard::run::{self, RunOptions};
use splitboard_core::color::Color;
use splitboard_core::order::{FontId, SpacedFont};
use splitboard_net::{Receiver, ReceiverConfig};
use splitboard_render::canvas::{BuiltinFont, HeadlessCanvas};
use splitboard_render::displayer::Displayer;
use splitboard_render::fonts::FontRegistry;

const WAIT: Duration = Duration::from_secs(2);

fn wait_for<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = f() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn test_displayer() -> Displayer<HeadlessCanvas> {
    let mut registry = FontRegistry::with_default();
    registry
        .register(std::sync::Arc::new(BuiltinFont::with_metrics(4, 6, 5)))
        .expect("register");
    Displayer::new(HeadlessCanvas::new(96, 16), Arc::new(registry))
}

fn test_formatter() -> MessageFormatter {
    MessageFormatter::new(FormatterDefaults {
        spaced_font: SpacedFont::new(FontId(1), 0),
        ..FormatterDefaults::default()
    })
}

fn start_receiver() -> (Receiver, u16) {
    let mut receiver = Receiver::new(ReceiverConfig {
        port: 0,
        ..ReceiverConfig::default()
    });
    receiver.start();
    let port = wait_for(WAIT, || receiver.local_port()).expect("listener never bound");
    (receiver, port)
}

/// Pump the render side by hand: pop, format, display, report.
fn pump(
    receiver: &Receiver,
    displayer: &mut Displayer<HeadlessCanvas>,
    formatter: &mut MessageFormatter,
) -> bool {
    let Some(message) =
        wait_for(WAIT, || receiver.pop_pending_message())
    else {
        return false;
    };
    if let Some(order) = formatter.handle_message(&message) {
        displayer.start_order(order);
        receiver.report_displayed(displayer.current_order());
    }
    displayer.step();
    true
}

#[test]
fn vendor_total_time_lights_the_panel() {
    let (receiver, port) = start_receiver();
    let mut displayer = test_displayer();
    let mut formatter = test_formatter();

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    client
        .write_all(b"007D    00:01:23.456 2\r")
        .expect("write");

    assert!(pump(&receiver, &mut displayer, &mut formatter));
    assert_eq!(displayer.current_order().get_text(), "1:23.456(2)");
    assert_eq!(displayer.current_order().get_velocity(), 0.0);
    assert!(displayer.is_done());
    assert!(displayer.canvas().live_lit_count(Color::new(0, 0, 0)) > 0);
}

#[test]
fn running_time_keeps_the_default_velocity() {
    let (receiver, port) = start_receiver();
    let mut displayer = test_displayer();
    let mut formatter = test_formatter();

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    client.write_all(b"   .    00:00:05.67 \r").expect("write");

    assert!(pump(&receiver, &mut displayer, &mut formatter));
    assert_eq!(displayer.current_order().get_text(), "[ 0:05.67 ]");
    assert_eq!(displayer.current_order().get_velocity(), 7.0);
}

#[test]
fn intermediate_sequence_and_duplicate_suppression() {
    let (receiver, port) = start_receiver();
    let mut displayer = test_displayer();
    let mut formatter = test_formatter();

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    client.write_all(b"   A    00:00:10.00 \r").expect("write");
    assert!(pump(&receiver, &mut displayer, &mut formatter));
    assert_eq!(displayer.current_order().get_text(), "0:10.00 S1");

    client.write_all(b"   B    00:00:20.50 \r").expect("write");
    assert!(pump(&receiver, &mut displayer, &mut formatter));
    assert_eq!(displayer.current_order().get_text(), "0:20.50 S2");

    // The board-id duplicate is dropped; the panel keeps showing S2.
    client.write_all(b"A       00:00:20.50 \r").expect("write");
    assert!(pump(&receiver, &mut displayer, &mut formatter));
    assert_eq!(displayer.current_order().get_text(), "0:20.50 S2");
}

#[test]
fn run_loop_displays_and_echoes() {
    let (receiver, port) = start_receiver();
    let mut displayer = test_displayer();
    let mut formatter = test_formatter();

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("timeout");
    client.write_all(b"~+/=trackside\r~)'&1\r").expect("write");

    let shutdown = Arc::new(AtomicBool::new(false));
    let options = RunOptions {
        exit_after: Some(Duration::from_millis(600)),
        ..RunOptions::default()
    };
    run::run(
        &receiver,
        &mut displayer,
        &mut formatter,
        &shutdown,
        &options,
    );

    assert_eq!(displayer.current_order().get_text(), "trackside");

    // The echo subscription saw the displayed order's wire form.
    let mut echoed = Vec::new();
    let mut byte = [0u8; 1];
    while let Ok(n) = client.read(&mut byte) {
        if n == 0 {
            break;
        }
        echoed.push(byte[0]);
        if byte[0] == 0x0D {
            break;
        }
    }
    let echoed = String::from_utf8_lossy(&echoed);
    assert!(echoed.starts_with("=~+/"), "echo line: {echoed:?}");
    assert!(echoed.contains("=trackside"), "echo line: {echoed:?}");
}
