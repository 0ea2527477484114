//! # Probe Error Handling
//!
//! Every fallible operation in this crate returns [`ProbeResult`]. The error
//! enumeration is split into three families:
//!
//! ### Caller Errors
//! - **InvalidValue / InvalidQuantity / InvalidRange / InvalidConfig**: the
//!   caller supplied out-of-contract input. These fail immediately and are
//!   never retried.
//!
//! ### Transport Errors
//! - **Io / Connection / Timeout / Frame / Exception**: a single request
//!   attempt failed. The client's retry loop absorbs these up to its budget.
//!
//! ### Surfaced Failures
//! - **ReadFailed / WriteFailed**: the retry budget is exhausted. They carry
//!   the address, the attempt count and the last transport error so a fuzz or
//!   monitor log can be diagnosed without re-running.
//! - **BindFailed**: the simulator could not acquire its listening endpoint.
//! - **EmptySegment**: a trace had no samples beyond the trigger threshold.
//!
//! ## Usage Example
//!
//! ```rust
//! use modbus_probe::{ProbeError, ProbeResult};
//!
//! fn report(result: ProbeResult<Vec<u16>>) {
//!     match result {
//!         Ok(values) => println!("read {:?}", values),
//!         Err(ProbeError::ReadFailed { address, attempts, .. }) => {
//!             println!("address {} gave up after {} attempts", address, attempts);
//!         }
//!         Err(error) if error.is_caller_error() => println!("bad input: {}", error),
//!         Err(error) => println!("other failure: {}", error),
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Error taxonomy for the probe core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Register value outside `[0, 65535]`
    #[error("Invalid register value {value}: must be within 0..=65535")]
    InvalidValue { value: i64 },

    /// Register quantity outside the Read Holding Registers limit
    #[error("Invalid register quantity {count}: must be within 1..=125")]
    InvalidQuantity { count: u16 },

    /// Address range with `start > end`
    #[error("Invalid address range: start={start} is greater than end={end}")]
    InvalidRange { start: u16, end: u16 },

    /// Configuration that violates its invariants
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Read retries exhausted
    #[error("Read of address {address} failed after {attempts} attempt(s): {last_error}")]
    ReadFailed {
        address: u16,
        attempts: u32,
        last_error: String,
    },

    /// Write retries exhausted
    #[error("Write of {value} to address {address} failed after {attempts} attempt(s): {last_error}")]
    WriteFailed {
        address: u16,
        value: u16,
        attempts: u32,
        last_error: String,
    },

    /// Simulator could not bind its listener
    #[error("Failed to bind {address}: {message}")]
    BindFailed { address: String, message: String },

    /// A trace segment needed for a mean contains no samples
    #[error("Empty {segment} segment: no sample crossed the trigger threshold {threshold}")]
    EmptySegment {
        segment: &'static str,
        threshold: f64,
    },

    /// I/O errors on the socket
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or loss
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An operation exceeded its timeout
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed, truncated or mismatching frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Modbus exception response from the remote device
    #[error("Modbus exception: function={function:02X}, code={code:02X}")]
    Exception { function: u8, code: u8 },

    /// Internal errors (task join failures, closed channels)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ProbeError {
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception { function, code }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if a retry of the same request might succeed
    ///
    /// Transport failures and device exceptions are worth another attempt;
    /// caller errors and already-surfaced failures are not.
    ///
    /// ```rust
    /// use modbus_probe::ProbeError;
    ///
    /// assert!(ProbeError::timeout("read response header", 3000).is_recoverable());
    /// assert!(!ProbeError::InvalidValue { value: 70000 }.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::Frame { .. }
                | Self::Exception { .. }
        )
    }

    /// Check if the caller supplied out-of-contract input
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidValue { .. }
                | Self::InvalidQuantity { .. }
                | Self::InvalidRange { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Short machine-readable name of the variant, used in log records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "InvalidValue",
            Self::InvalidQuantity { .. } => "InvalidQuantity",
            Self::InvalidRange { .. } => "InvalidRange",
            Self::InvalidConfig { .. } => "InvalidConfig",
            Self::ReadFailed { .. } => "ReadFailed",
            Self::WriteFailed { .. } => "WriteFailed",
            Self::BindFailed { .. } => "BindFailed",
            Self::EmptySegment { .. } => "EmptySegment",
            Self::Io { .. } => "Io",
            Self::Connection { .. } => "Connection",
            Self::Timeout { .. } => "Timeout",
            Self::Frame { .. } => "Frame",
            Self::Exception { .. } => "Exception",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Number of network attempts spent before this error surfaced
    pub fn attempts(&self) -> u32 {
        match self {
            Self::ReadFailed { attempts, .. } | Self::WriteFailed { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ProbeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

impl From<serde_yml::Error> for ProbeError {
    fn from(err: serde_yml::Error) -> Self {
        Self::invalid_config(format!("YAML error: {}", err))
    }
}
