//! Leveled stderr logging with macros.
//!
//! Records are prefixed with the time elapsed since the first record and a
//! level tag. `debug!` output is dropped unless [`VERBOSE`] is set, and every
//! macro is silent under `cfg(test)` so test output stays readable.

use std::fmt::Display;
use std::io::Write;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Debug => write!(f, "DEBUG"),
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

/// Enables `debug!` records.
pub static VERBOSE: AtomicBool = AtomicBool::new(false);
pub static SHOW_UPTIME: AtomicBool = AtomicBool::new(true);

static START: OnceLock<Instant> = OnceLock::new();

/// Formats an uptime as `sssss.mmm`.
fn format_uptime(elapsed: Duration) -> String {
    format!("{:5}.{:03}", elapsed.as_secs(), elapsed.subsec_millis())
}

/// Whether a record at `level` would be written.
pub fn enabled(level: Level) -> bool {
    level > Level::Debug || VERBOSE.load(Ordering::Relaxed)
}

/// Internal logging function. Use the `debug!`, `info!`, `warn!` or `error!`
/// macros instead.
#[doc(hidden)]
pub fn log(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    let start = *START.get_or_init(Instant::now);

    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let mut spec = ColorSpec::new();
    match level {
        Level::Debug => {
            spec.set_dimmed(true);
        }
        Level::Info => {}
        Level::Warn => {
            spec.set_fg(Some(Color::Yellow)).set_bold(true);
        }
        Level::Error => {
            spec.set_fg(Some(Color::Red)).set_bold(true);
        }
    }
    let _ = stderr.set_color(&spec);

    if SHOW_UPTIME.load(Ordering::Relaxed) {
        let _ = write!(stderr, "[{}] ", format_uptime(start.elapsed()));
    }
    let _ = writeln!(stderr, "{:5} {}", level, message);
    let _ = stderr.reset();
}

/// Logs a debug-level message (only when [`VERBOSE`](crate::utils::log::VERBOSE) is set).
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) && $crate::utils::log::enabled($crate::utils::log::Level::Debug) {
            $crate::utils::log::log($crate::utils::log::Level::Debug, &format!($($arg)*));
        }
    }};
}

/// Logs an info-level message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Info, &format!($($arg)*));
        }
    }};
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Warn, &format!($($arg)*));
        }
    }};
}

/// Logs an error-level message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Error, &format!($($arg)*));
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn level_display() {
        assert_eq!(format!("{}", Level::Debug), "DEBUG");
        assert_eq!(format!("{}", Level::Warn), "WARN");
    }

    #[test]
    fn debug_requires_verbose() {
        assert!(enabled(Level::Info));
        assert!(enabled(Level::Error));
        VERBOSE.store(false, Ordering::Relaxed);
        assert!(!enabled(Level::Debug));
    }

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(Duration::from_millis(0)), "    0.000");
        assert_eq!(format_uptime(Duration::from_millis(12_345)), "   12.345");
    }
}
