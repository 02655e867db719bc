//! Colored stderr logger behind the `log` facade.

use std::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::constants::LOG_ENV;

/// Wrap `args` in an ANSI color escape sequence.
macro_rules! with_color {
    ($args: ident, $color_code: ident) => {
        format_args!("\u{1B}[{}m{}\u{1B}[0m", $color_code, $args)
    };
}

fn print_in_color(args: fmt::Arguments, color_code: u8) {
    eprintln!("{}", with_color!(args, color_code));
}

struct SimLogger;

impl Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        print_in_color(
            format_args!(
                "[{:>5}][{}] {}",
                record.level(),
                record.module_path().unwrap_or("?"),
                record.args()
            ),
            color,
        );
    }

    fn flush(&self) {}
}

/// Parse a level name as accepted in the `LOG` environment variable.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_uppercase().as_str() {
        "OFF" => Some(LevelFilter::Off),
        "ERROR" => Some(LevelFilter::Error),
        "WARN" => Some(LevelFilter::Warn),
        "INFO" => Some(LevelFilter::Info),
        "DEBUG" => Some(LevelFilter::Debug),
        "TRACE" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// Install the logger. `LOG` in the environment takes precedence over `default`.
///
/// The level is applied even when another logger is already installed, in
/// which case that error is returned.
pub fn init(default: LevelFilter) -> Result<(), SetLoggerError> {
    static LOGGER: SimLogger = SimLogger;
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|name| parse_level(&name))
        .unwrap_or(default);
    log::set_max_level(level);
    log::set_logger(&LOGGER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("WARN"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_second_init_reports_existing_logger() {
        let _ = init(LevelFilter::Warn);
        assert!(init(LevelFilter::Warn).is_err());
    }
}
