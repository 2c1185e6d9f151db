//! Run log shared by the runner and every execution context of a run

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// One timestamped line of the run log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.message
        )
    }
}

/// In-memory buffer of everything a run logged
///
/// Lines are always buffered. They are mirrored to the `log` facade at
/// `info` when verbose and at `debug` otherwise. Clones share the buffer.
#[derive(Debug, Clone)]
pub struct RunLog {
    environment: String,
    verbose: bool,
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl RunLog {
    pub fn new(environment: impl Into<String>, verbose: bool) -> Self {
        Self {
            environment: environment.into(),
            verbose,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn push(&self, message: impl Into<String>) {
        let line = LogLine {
            timestamp: Utc::now(),
            message: message.into(),
        };

        if self.verbose {
            log::info!("[{}] {}", self.environment, line.message);
        } else {
            log::debug!("[{}] {}", self.environment, line.message);
        }

        self.guard().push(line);
    }

    /// Copy of every buffered line, oldest first
    pub fn lines(&self) -> Vec<LogLine> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    // A panic while holding the lock leaves the buffer usable
    fn guard(&self) -> MutexGuard<'_, Vec<LogLine>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_buffered_in_order() {
        let log = RunLog::new("dev", false);
        log.push("first");
        log.push(String::from("second"));

        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "first");
        assert_eq!(lines[1].message, "second");
        assert!(lines[0].timestamp <= lines[1].timestamp);
    }

    #[test]
    fn test_clones_share_buffer() {
        let log = RunLog::new("dev", true);
        let clone = log.clone();
        clone.push("from clone");
        assert_eq!(log.len(), 1);
        assert!(log.is_verbose());
    }

    #[test]
    fn test_line_display() {
        let log = RunLog::new("dev", false);
        log.push("hello");
        let rendered = log.lines()[0].to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] hello"));
    }
}
