#![forbid(unsafe_code)]

//! Timing-device simulator.
//!
//! Connects to a running splitboard service and replays a simulated race
//! in the vendor timing protocol: a ticking running time, two
//! intermediate splits, and a final total with rank. Useful for bench
//! tests without the timing mainboard attached.
//!
//! ```sh
//! cargo run -p splitboard --bin timing-sim -- 127.0.0.1:21967
//! ```

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

const HELP_TEXT: &str = "\
timing-sim — replay a simulated race against a splitboard service

USAGE:
    timing-sim [OPTIONS] [<host:port>]

OPTIONS:
    --bib=N        Bib number of the simulated competitor (default: 7)
    --rank=N       Final rank reported with the total time (default: 2)
    --ticks=N      Running-time updates per phase (default: 10)
    --period-ms=N  Delay between lines in milliseconds (default: 200)
    --loop         Restart the race after the total time
    -h, --help     Show this help message

The default target is 127.0.0.1:21967.";

struct SimOpts {
    target: String,
    bib: u32,
    rank: u32,
    ticks: u32,
    period: Duration,
    repeat: bool,
}

impl Default for SimOpts {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:21967".to_string(),
            bib: 7,
            rank: 2,
            ticks: 10,
            period: Duration::from_millis(200),
            repeat: false,
        }
    }
}

impl SimOpts {
    fn parse() -> Self {
        let mut opts = Self::default();
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--help" | "-h" => {
                    println!("{HELP_TEXT}");
                    std::process::exit(0);
                }
                "--loop" => opts.repeat = true,
                other => {
                    if let Some(val) = other.strip_prefix("--bib=") {
                        opts.bib = parse_or_exit(val, "--bib");
                    } else if let Some(val) = other.strip_prefix("--rank=") {
                        opts.rank = parse_or_exit(val, "--rank");
                    } else if let Some(val) = other.strip_prefix("--ticks=") {
                        opts.ticks = parse_or_exit(val, "--ticks");
                    } else if let Some(val) = other.strip_prefix("--period-ms=") {
                        opts.period = Duration::from_millis(parse_or_exit(val, "--period-ms"));
                    } else if other.starts_with('-') {
                        eprintln!("Unknown argument: {other}");
                        std::process::exit(1);
                    } else {
                        opts.target = other.to_string();
                    }
                }
            }
        }
        opts
    }
}

fn parse_or_exit<T: std::str::FromStr>(val: &str, flag: &str) -> T {
    val.parse().unwrap_or_else(|_| {
        eprintln!("Invalid {flag} value: {val}");
        std::process::exit(1);
    })
}

/// One fixed-width record: bib, event code, twelve-char time, rank.
///
/// The time field always spells out zero hours so the period lands in
/// the column the receiving end validates.
fn vendor_line(bib: &str, event: char, centis: u32, rank: &str) -> String {
    let (minutes, seconds, hundredths) =
        (centis / 6000, (centis / 100) % 60, centis % 100);
    format!(
        "{bib:>3}{event}    00:{minutes:02}:{seconds:02}.{hundredths:02}{rank:>2}\r"
    )
}

fn run_race(stream: &mut TcpStream, opts: &SimOpts) -> std::io::Result<()> {
    let bib = opts.bib.to_string();
    let rank = opts.rank.to_string();
    let splits = [2450, 5130];
    let total = 7725;

    let mut send = |line: String| -> std::io::Result<()> {
        print!("> {}", line.trim_end());
        println!();
        stream.write_all(line.as_bytes())?;
        std::thread::sleep(opts.period);
        Ok(())
    };

    // Phase 1: clock running to the first split.
    for tick in 1..=opts.ticks {
        send(vendor_line("   ", '.', splits[0] * tick / opts.ticks, "  "))?;
    }
    send(vendor_line("   ", 'A', splits[0], "  "))?;

    // Phase 2: on to the second split.
    for tick in 1..=opts.ticks {
        let centis = splits[0] + (splits[1] - splits[0]) * tick / opts.ticks;
        send(vendor_line("   ", '.', centis, "  "))?;
    }
    send(vendor_line("   ", 'B', splits[1], "  "))?;

    // Phase 3: the finish.
    for tick in 1..=opts.ticks {
        let centis = splits[1] + (total - splits[1]) * tick / opts.ticks;
        send(vendor_line("   ", '.', centis, "  "))?;
    }
    send(vendor_line(&bib, 'D', total, &rank))?;

    Ok(())
}

fn main() {
    let opts = SimOpts::parse();
    println!("Connecting to {}...", opts.target);
    let mut stream = match TcpStream::connect(&opts.target) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("Could not connect to {}: {err}", opts.target);
            std::process::exit(1);
        }
    };
    println!("Connected; replaying race.");

    loop {
        if let Err(err) = run_race(&mut stream, &opts) {
            eprintln!("Connection lost: {err}");
            std::process::exit(1);
        }
        if !opts.repeat {
            break;
        }
        std::thread::sleep(Duration::from_secs(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitboard_core::message::{Protocol, classify_line};

    #[test]
    fn generated_lines_classify_as_vendor_timing() {
        let line = vendor_line("  7", 'D', 7725, " 2");
        assert_eq!(classify_line(line.as_bytes()), Protocol::VendorTiming);
        let line = vendor_line("   ", '.', 123, "  ");
        assert_eq!(classify_line(line.as_bytes()), Protocol::VendorTiming);
        let line = vendor_line("   ", 'A', 2450, "  ");
        assert_eq!(classify_line(line.as_bytes()), Protocol::VendorTiming);
    }

    #[test]
    fn time_field_spells_out_zero_hours() {
        let line = vendor_line("  7", 'D', 7725, " 2");
        // 7725 hundredths = 1:17.25.
        assert_eq!(&line, "  7D    00:01:17.25 2\r");
    }
}
