//! Injected structured logging sink
//!
//! Components never configure a global logger. Each one receives a
//! [`CallbackLogger`] at construction and reports every attempt, fuzz round,
//! poll tick and lifecycle change as a [`LogRecord`]. The surrounding
//! application decides where records go (console, audit file, GUI table);
//! tests install a callback that collects them.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Component that emitted a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Component {
    Client,
    Simulator,
    Fuzzer,
    Monitor,
    Analyzer,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Client => "client",
            Component::Simulator => "simulator",
            Component::Fuzzer => "fuzzer",
            Component::Monitor => "monitor",
            Component::Analyzer => "analyzer",
        };
        f.write_str(name)
    }
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    Failure,
    Started,
    Stopped,
    AlreadyRunning,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Started => "started",
            Outcome::Stopped => "stopped",
            Outcome::AlreadyRunning => "already running",
        };
        f.write_str(name)
    }
}

/// One structured log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: Component,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub detail: String,
}

impl LogRecord {
    pub fn new<S: Into<String>>(level: LogLevel, component: Component, outcome: Outcome, detail: S) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component,
            outcome,
            address: None,
            value: None,
            attempt: None,
            detail: detail.into(),
        }
    }

    pub fn address(mut self, address: u16) -> Self {
        self.address = Some(address);
        self
    }

    pub fn value(mut self, value: u16) -> Self {
        self.value = Some(value);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Render as a single JSON line for audit logs
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level.as_str(),
            self.component,
            self.outcome
        )?;
        if let Some(address) = self.address {
            write!(f, " address={}", address)?;
        }
        if let Some(value) = self.value {
            write!(f, " value={}", value)?;
        }
        if let Some(attempt) = self.attempt {
            write!(f, " attempt={}", attempt)?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// Type alias for log callback functions
pub type LogCallback = Box<dyn Fn(&LogRecord) + Send + Sync>;

/// Logger that hands structured records to a callback
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|record| match record.level {
            LogLevel::Error | LogLevel::Warn => eprintln!("{}", record),
            LogLevel::Info | LogLevel::Debug => println!("{}", record),
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Create a logger that appends every record to a shared buffer
    ///
    /// Returns the logger and the buffer; used to replay fuzz evidence and in tests.
    pub fn collecting() -> (Self, Arc<Mutex<Vec<LogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = records.clone();
        let callback: LogCallback = Box::new(move |record| {
            if let Ok(mut records) = sink.lock() {
                records.push(record.clone());
            }
        });
        (Self::new(Some(callback), LogLevel::Debug), records)
    }

    /// Deliver a record if its level passes the filter
    pub fn emit(&self, record: LogRecord) {
        if self.should_log(record.level) {
            if let Some(ref callback) = self.callback {
                callback(&record);
            }
        }
    }

    /// Build and deliver a record without register fields
    pub fn log<S: Into<String>>(&self, level: LogLevel, component: Component, outcome: Outcome, detail: S) {
        if self.should_log(level) {
            self.emit(LogRecord::new(level, component, outcome, detail));
        }
    }

    /// Check if a message at the given level should be logged
    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("enabled", &self.callback.is_some())
            .field("min_level", &self.min_level)
            .finish()
    }
}

/// Initialize the `log` facade for tests
pub fn init_test_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filtering() {
        let (logger, records) = CallbackLogger::collecting();
        logger.log(LogLevel::Debug, Component::Client, Outcome::Success, "kept");

        let refuse: LogCallback = Box::new(|_| panic!("filtered record delivered"));
        let quiet = CallbackLogger::new(Some(refuse), LogLevel::Warn);
        quiet.log(LogLevel::Info, Component::Client, Outcome::Success, "dropped");

        assert_eq!(records.lock().unwrap().len(), 1);
        CallbackLogger::disabled().log(LogLevel::Error, Component::Fuzzer, Outcome::Failure, "nowhere");
    }

    #[test]
    fn test_record_rendering() {
        let record = LogRecord::new(LogLevel::Warn, Component::Client, Outcome::Failure, "connection refused")
            .address(12)
            .attempt(2);
        let text = record.to_string();
        assert!(text.contains("WARN client failure address=12 attempt=2"));

        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(json["component"], "Client");
        assert_eq!(json["address"], 12);
        assert!(json.get("value").is_none());
    }
}
