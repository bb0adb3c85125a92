//! Structured logging shared by every subsystem.
//!
//! A process-wide [`Logger`] is installed once with [`set_logger`] and looked
//! up with [`get_logger`]; the `log_*!` macros capture the call site and
//! forward a formatted message to it. This mirrors how `onca_logging`
//! separates "where did this happen" ([`LogLocation`]) from "how bad is it"
//! ([`LogLevel`]) from "who logged it" ([`LogCategory`]), but is built on
//! stable Rust instead of thread-local nightly APIs.

use std::fmt::{self, Display};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// Severity of a log line, ordered from most to least severe.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    /// Will likely be followed by a crash or a hard emulator failure.
    Severe,
    /// Recoverable error (an architectural trap, a cosim mismatch, ...).
    Error,
    /// Noteworthy but not wrong (e.g. a GDB packet with an unknown opcode).
    Warning,
    /// General informational message (emulator start/stop, mode selected).
    Info,
    /// Verbose informational message (per-frame renderer stats).
    Verbose,
    /// Debug trace (per-instruction trace mode).
    Debug,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Severe => f.write_str("\x1B[1m\x1B[41m\x1B[30m[SEVERE ]\x1B[0m"),
            LogLevel::Error => f.write_str("\x1B[91m[ERROR  ]\x1B[0m"),
            LogLevel::Warning => f.write_str("\x1B[93m[WARNING]\x1B[0m"),
            LogLevel::Info => f.write_str("\x1B[37m[INFO   ]\x1B[0m"),
            LogLevel::Verbose => f.write_str("\x1B[90m[VERBOSE]\x1B[0m"),
            LogLevel::Debug => f.write_str("\x1B[94m[DEBUG  ]\x1B[0m"),
        }
    }
}

/// Names the subsystem a log line came from, e.g. `cpu`, `mmu`, `cosim`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LogCategory {
    category: &'static str,
    sub_category: Option<&'static str>,
}

impl LogCategory {
    pub const fn new(name: &'static str) -> Self {
        Self { category: name, sub_category: None }
    }

    pub const fn new_with_sub(name: &'static str, sub_name: &'static str) -> Self {
        Self { category: name, sub_category: Some(sub_name) }
    }
}

impl Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_category {
            Some(sub) => write!(f, "{}({sub})", self.category),
            None => write!(f, "{}", self.category),
        }
    }
}

/// Where (and roughly when) a log call happened.
pub struct LogLocation {
    file: &'static str,
    line: u32,
    func: &'static str,
    millis_since_epoch: u128,
}

impl LogLocation {
    pub fn new(file: &'static str, line: u32, func: &'static str) -> Self {
        let millis_since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self { file, line, func, millis_since_epoch }
    }

    pub fn file(&self) -> &str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn function(&self) -> &str {
        self.func
    }

    pub fn millis_since_epoch(&self) -> u128 {
        self.millis_since_epoch
    }
}

/// Receives formatted log lines. Implementations decide where they go
/// (stderr, a file, an in-memory ring buffer for tests).
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, category: LogCategory, loc: &LogLocation, message: &str);

    /// Minimum level this logger is interested in; levels below this are
    /// dropped before `log` is even called, so `Debug`-level per-instruction
    /// traces cost nothing when disabled.
    fn min_level(&self) -> LogLevel {
        LogLevel::Verbose
    }
}

/// Default logger: writes to stderr with the location attached for
/// `Severe`/`Error`/`Debug` lines, matching `onca_logging`'s formatter which
/// omits the location for the quieter levels.
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, level: LogLevel, category: LogCategory, loc: &LogLocation, message: &str) {
        match level {
            LogLevel::Warning | LogLevel::Info | LogLevel::Verbose => {
                eprintln!("{level} [{category}] {message}");
            }
            LogLevel::Severe | LogLevel::Error | LogLevel::Debug => {
                eprintln!(
                    "{level} [{category}] {message} ({}:{}: {})",
                    loc.file(),
                    loc.line(),
                    loc.function()
                );
            }
        }
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

fn logger_cell() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(ConsoleLogger::default())))
}

/// Install the process-wide logger, replacing whatever was installed before
/// (including the default `ConsoleLogger`).
pub fn set_logger(logger: Box<dyn Logger>) {
    *logger_cell().write() = logger;
}

/// Log through the installed logger (or the default console logger if none
/// was installed yet) if `level` passes its `min_level` filter.
#[doc(hidden)]
pub fn log_impl(level: LogLevel, category: LogCategory, loc: LogLocation, args: fmt::Arguments) {
    let guard = logger_cell().read();
    if level <= guard.min_level() {
        guard.log(level, category, &loc, &args.to_string());
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $category:expr, $($arg:tt)*) => {
        $crate::logging::log_impl(
            $level,
            $category,
            $crate::logging::LogLocation::new(file!(), line!(), module_path!()),
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_severe {
    ($category:expr, $($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Severe, $category, $($arg)*) };
}
#[macro_export]
macro_rules! log_error {
    ($category:expr, $($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Error, $category, $($arg)*) };
}
#[macro_export]
macro_rules! log_warning {
    ($category:expr, $($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Warning, $category, $($arg)*) };
}
#[macro_export]
macro_rules! log_info {
    ($category:expr, $($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Info, $category, $($arg)*) };
}
#[macro_export]
macro_rules! log_verbose {
    ($category:expr, $($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Verbose, $category, $($arg)*) };
}
#[macro_export]
macro_rules! log_debug {
    ($category:expr, $($arg:tt)*) => { $crate::log_at!($crate::logging::LogLevel::Debug, $category, $($arg)*) };
}

/// In-memory logger used by tests that want to assert on emitted messages.
pub struct CapturingLogger {
    lines: parking_lot::Mutex<Vec<String>>,
    min_level: LogLevel,
}

impl CapturingLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { lines: parking_lot::Mutex::new(Vec::new()), min_level }
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.lines.lock())
    }
}

impl Logger for CapturingLogger {
    fn log(&self, _level: LogLevel, category: LogCategory, _loc: &LogLocation, message: &str) {
        self.lines.lock().push(format!("[{category}] {message}"));
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_severity() {
        assert!(LogLevel::Severe < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Warning);
        assert!(LogLevel::Debug > LogLevel::Verbose);
    }

    #[test]
    fn category_display_includes_sub_category() {
        let cat = LogCategory::new_with_sub("cpu", "mmu");
        assert_eq!(cat.to_string(), "cpu(mmu)");
        assert_eq!(LogCategory::new("cpu").to_string(), "cpu");
    }
}
