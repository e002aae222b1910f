//! Logging abstraction for testable output.
//!
//! Trait-based rather than a global log facade so tests can assert on what
//! was logged without process-wide state. `warn` and `error` are always
//! visible; `verbose` and `debug` are gated by the `-v` count.

use std::io::Write;
use std::sync::{Arc, RwLock};

/// Verbosity level for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Normal output (always shown), including warnings and errors.
    Normal,
    /// Verbose output (-v).
    Verbose,
    /// Debug output (-vv).
    Debug,
}

impl Verbosity {
    /// Create verbosity from a CLI flag count.
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    }
}

/// Trait for logging output.
///
/// Implementations must be thread-safe; the coordinator and auxiliary
/// threads may log concurrently.
pub trait Logger: Send + Sync {
    /// Log a message at the given verbosity level.
    fn log(&self, level: Verbosity, message: &str);

    /// Informational message, always visible.
    fn info(&self, message: &str) {
        self.log(Verbosity::Normal, message);
    }

    /// Warning, always visible.
    fn warn(&self, message: &str) {
        self.log(Verbosity::Normal, &format!("warning: {message}"));
    }

    /// Error, always visible. Does not itself abort anything.
    fn error(&self, message: &str) {
        self.log(Verbosity::Normal, &format!("error: {message}"));
    }

    /// Shown with -v.
    fn verbose(&self, message: &str) {
        self.log(Verbosity::Verbose, message);
    }

    /// Shown with -vv.
    fn debug(&self, message: &str) {
        self.log(Verbosity::Debug, message);
    }
}

/// Logger writing to stderr.
#[derive(Debug, Clone, Copy)]
pub struct StderrLogger {
    level: Verbosity,
}

impl StderrLogger {
    /// Create a stderr logger showing messages up to `level`.
    pub fn new(level: Verbosity) -> Self {
        Self { level }
    }
}

impl Logger for StderrLogger {
    fn log(&self, level: Verbosity, message: &str) {
        if level <= self.level {
            let _ = writeln!(std::io::stderr(), "{message}");
        }
    }
}

/// A captured log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Verbosity,
    pub message: String,
}

/// Mock logger that captures every message regardless of level.
#[derive(Debug, Clone, Default)]
pub struct MockLogger {
    entries: Arc<RwLock<Vec<LogEntry>>>,
}

impl MockLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured entries.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Just the message text, in order.
    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    /// True if any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }

    /// Number of captured messages.
    pub fn count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Discard captured messages.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

impl Logger for MockLogger {
    fn log(&self, level: Verbosity, message: &str) {
        self.entries.write().unwrap().push(LogEntry {
            level,
            message: message.to_string(),
        });
    }
}

/// Logger that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl NullLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for NullLogger {
    fn log(&self, _level: Verbosity, _message: &str) {}
}
