#![forbid(unsafe_code)]

//! Command-line argument parsing.
//!
//! Parses args manually (no external dependencies) to keep the binary
//! lean. Supports environment variable overrides via the `SPLITBOARD_*`
//! prefix, applied before explicit flags.

use std::env;
use std::process;

use splitboard_core::color::{Color, parse_color};
use splitboard_core::order::ScrollType;
use splitboard_net::TCP_PORT_DEFAULT;
use splitboard_render::canvas::PanelOptions;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP_TEXT: &str = "\
splitboard — networked LED matrix scoreboard for sports timing equipment

USAGE:
    splitboard [OPTIONS] [<text>...]

OPTIONS:
    -s <speed>          Approximate letters per second.
                        Positive: scroll right to left; negative: left to
                        right; zero: no scrolling (default: 7.0)
    -x <x-origin>       Shift x-origin of displayed text (default: 0)
    -y <y-origin>       Shift y-origin of displayed text (default: 0)
    -f <font-file>      Path to a *.bdf font (needs a font backend;
                        falls back to the built-in 10x20 font)
    -t <track-spacing>  Pixels between letters, may be negative (default: 0)
    -v <0|1>            Scroll axis: 0 horizontal, 1 = vertical (default: 0)
    -i <scroll-type>    0 continuous, 1 scroll-on, 2 scroll-on-off
                        (default: 0)
    -C <r,g,b>          Text color (default: 255,255,255)
    -B <r,g,b>          Background color (default: 0,0,0)
    -p <portnumber>     TCP port number (default: 21967)
    -Q                  Quick preset: rows 16, cols 32, chain 3,
                        parallel 1, GPIO slowdown 2, adafruit-hat-pwm
                        mapping, built-in font, red text, track spacing
                        -1, y-origin -2, speed 0
    -h, --help          Show this help message
    -V, --version       Show version

Positional arguments join into the text shown before any client connects.

ENVIRONMENT VARIABLES:
    SPLITBOARD_PORT            Override -p
    SPLITBOARD_LOG             tracing target filter (default: info)
    SPLITBOARD_EXIT_AFTER_MS   Auto-quit after N milliseconds (for testing)";

/// Parsed command-line options.
#[derive(Debug, Clone, PartialEq)]
pub struct Opts {
    /// Scroll speed in letters per second; sign selects the direction.
    pub speed: f32,
    /// X origin of displayed text.
    pub x_origin: i32,
    /// Y origin of displayed text.
    pub y_origin: i32,
    /// Optional bdf font path.
    pub font_file: Option<String>,
    /// Letter spacing in pixels.
    pub letter_spacing: i32,
    /// Vertical scroll axis when true.
    pub vertical: bool,
    /// Scroll type for displayed orders.
    pub scroll_type: ScrollType,
    /// Foreground color.
    pub foreground: Color,
    /// Background color.
    pub background: Color,
    /// TCP port to listen on.
    pub port: u16,
    /// Panel geometry and driver settings.
    pub panel: PanelOptions,
    /// Initial text shown before any client connects.
    pub text: String,
    /// Auto-exit after this many milliseconds (0 = disabled).
    pub exit_after_ms: u64,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            speed: 7.0,
            x_origin: 0,
            y_origin: 0,
            font_file: None,
            letter_spacing: 0,
            vertical: false,
            scroll_type: ScrollType::Continuous,
            foreground: Color::new(255, 255, 255),
            background: Color::new(0, 0, 0),
            port: TCP_PORT_DEFAULT,
            panel: PanelOptions::default(),
            text: String::new(),
            exit_after_ms: 0,
        }
    }
}

impl Opts {
    /// Parse process arguments and environment variables; exits with a
    /// usage message on malformed input.
    pub fn parse() -> Self {
        let args: Vec<String> = env::args().skip(1).collect();
        match Self::parse_from(&args) {
            Ok(opts) => opts,
            Err(message) => {
                eprintln!("{message}");
                eprintln!("Run with --help for usage information.");
                process::exit(1);
            }
        }
    }

    /// Parse an explicit argument list (environment applied first).
    pub fn parse_from(args: &[String]) -> Result<Self, String> {
        let mut opts = Self::default();

        if let Ok(val) = env::var("SPLITBOARD_PORT")
            && let Ok(port) = val.parse()
        {
            opts.port = port;
        }
        if let Ok(val) = env::var("SPLITBOARD_EXIT_AFTER_MS")
            && let Ok(ms) = val.parse()
        {
            opts.exit_after_ms = ms;
        }

        let mut words: Vec<&str> = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    println!("{HELP_TEXT}");
                    process::exit(0);
                }
                "--version" | "-V" => {
                    println!("splitboard {VERSION}");
                    process::exit(0);
                }
                "-Q" => opts.apply_quick_preset(),
                flag if flag.starts_with('-') && flag.len() == 2 && !is_number(flag) => {
                    let letter = flag.as_bytes()[1] as char;
                    let value = iter
                        .next()
                        .ok_or_else(|| format!("Missing value for -{letter}"))?;
                    opts.apply_flag(letter, value)?;
                }
                word => words.push(word),
            }
        }

        if !words.is_empty() {
            opts.text = words.join(" ");
        }
        Ok(opts)
    }

    fn apply_flag(&mut self, letter: char, value: &str) -> Result<(), String> {
        let bad = |what: &str| format!("Invalid -{letter} value: {what}");
        match letter {
            's' => self.speed = value.parse().map_err(|_| bad(value))?,
            'x' => self.x_origin = value.parse().map_err(|_| bad(value))?,
            'y' => self.y_origin = value.parse().map_err(|_| bad(value))?,
            'f' => self.font_file = Some(value.to_string()),
            't' => self.letter_spacing = value.parse().map_err(|_| bad(value))?,
            'v' => self.vertical = value.parse::<i32>().map_err(|_| bad(value))? != 0,
            'i' => {
                self.scroll_type = match value {
                    "0" => ScrollType::Continuous,
                    "1" => ScrollType::SingleOn,
                    "2" => ScrollType::SingleOnOff,
                    other => return Err(bad(other)),
                }
            }
            'C' => self.foreground = parse_color(value).ok_or_else(|| bad(value))?,
            'B' => self.background = parse_color(value).ok_or_else(|| bad(value))?,
            'p' => self.port = value.parse().map_err(|_| bad(value))?,
            other => return Err(format!("Unknown flag: -{other}")),
        }
        Ok(())
    }

    /// `-Q`: the 16x32x3 track-side panel this service usually drives.
    fn apply_quick_preset(&mut self) {
        self.panel = PanelOptions {
            rows: 16,
            cols: 32,
            chain_length: 3,
            parallel: 1,
            hardware_mapping: "adafruit-hat-pwm".to_string(),
            gpio_slowdown: 2,
            brightness: 100,
        };
        self.font_file = None;
        self.foreground = Color::new(255, 0, 0);
        self.letter_spacing = -1;
        self.y_origin = -2;
        self.speed = 0.0;
    }
}

/// Negative numbers are positional text, not flags.
fn is_number(arg: &str) -> bool {
    arg[1..].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Opts::parse_from(&args).expect("parse")
    }

    #[test]
    fn defaults_match_the_service() {
        let opts = parse(&[]);
        assert_eq!(opts.speed, 7.0);
        assert_eq!(opts.port, TCP_PORT_DEFAULT);
        assert_eq!(opts.scroll_type, ScrollType::Continuous);
        assert!(!opts.vertical);
        assert_eq!(opts.text, "");
    }

    #[test]
    fn parses_flags_with_values() {
        let opts = parse(&[
            "-s", "-3.5", "-x", "4", "-y", "-2", "-t", "1", "-p", "9000", "-C", "0,255,0", "-B",
            "10,10,10", "-i", "2", "-v", "1",
        ]);
        assert_eq!(opts.speed, -3.5);
        assert_eq!(opts.x_origin, 4);
        assert_eq!(opts.y_origin, -2);
        assert_eq!(opts.letter_spacing, 1);
        assert_eq!(opts.port, 9000);
        assert_eq!(opts.foreground, Color::new(0, 255, 0));
        assert_eq!(opts.background, Color::new(10, 10, 10));
        assert_eq!(opts.scroll_type, ScrollType::SingleOnOff);
        assert!(opts.vertical);
    }

    #[test]
    fn axis_zero_is_horizontal() {
        assert!(!parse(&["-v", "0"]).vertical);
        assert!(parse(&["-v", "1"]).vertical);
    }

    #[test]
    fn positionals_become_the_initial_text() {
        let opts = parse(&["-s", "0", "Lane", "4", "ready"]);
        assert_eq!(opts.text, "Lane 4 ready");
    }

    #[test]
    fn quick_preset_configures_the_track_panel() {
        let opts = parse(&["-Q"]);
        assert_eq!(opts.panel.rows, 16);
        assert_eq!(opts.panel.cols, 32);
        assert_eq!(opts.panel.chain_length, 3);
        assert_eq!(opts.panel.hardware_mapping, "adafruit-hat-pwm");
        assert_eq!(opts.panel.gpio_slowdown, 2);
        assert_eq!(opts.foreground, Color::new(255, 0, 0));
        assert_eq!(opts.letter_spacing, -1);
        assert_eq!(opts.y_origin, -2);
        assert_eq!(opts.speed, 0.0);
        assert_eq!(opts.panel.width(), 96);
        assert_eq!(opts.panel.height(), 16);
    }

    #[test]
    fn rejects_malformed_values() {
        let args = vec!["-p".to_string(), "notaport".to_string()];
        assert!(Opts::parse_from(&args).is_err());
        let args = vec!["-C".to_string(), "1,2".to_string()];
        assert!(Opts::parse_from(&args).is_err());
        let args = vec!["-s".to_string()];
        assert!(Opts::parse_from(&args).is_err());
    }

    #[test]
    fn help_text_covers_every_flag() {
        for flag in ["-s", "-x", "-y", "-f", "-t", "-v", "-i", "-C", "-B", "-p", "-Q"] {
            assert!(HELP_TEXT.contains(flag), "missing {flag} in help");
        }
    }
}
