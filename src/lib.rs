//! # Modbus Probe - Fault Probing Toolkit for Modbus/TCP Devices
//!
//! Async building blocks for exercising a Modbus/TCP device and looking for
//! misbehaviour: a retrying register client, a randomized write driver, a
//! periodic register monitor, a loopback server simulator for closed-loop
//! testing, and a synthetic EM trace analyzer that contrasts a clean signal
//! with a degraded one.
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client | Simulator |
//! |------|----------|--------|-----------|
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//!
//! Any other function code is answered by the simulator with exception 0x01.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modbus_probe::{CallbackLogger, ConnectionConfig, FuzzDriver, RegisterClient, ServerSimulator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = CallbackLogger::console();
//!
//!     let mut simulator = ServerSimulator::new(&ConnectionConfig::new("127.0.0.1", 0), logger.clone());
//!     simulator.start().await?;
//!     let port = simulator.local_addr().map(|addr| addr.port()).unwrap_or(5020);
//!
//!     let client = Arc::new(RegisterClient::new(ConnectionConfig::new("127.0.0.1", port), logger.clone())?);
//!     client.write_register(10, 0x1234).await?;
//!     println!("Read back: {:?}", client.read_register(10, 1).await?);
//!
//!     let outcomes = FuzzDriver::new(client, logger).run(0, 10, 20).await?;
//!     println!("{} of {} writes succeeded", outcomes.iter().filter(|o| o.success).count(), outcomes.len());
//!
//!     simulator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ┌─────────────────┐     ┌──────────────────┐
//! │  FuzzDriver  │  │ RegisterMonitor │     │ ServerSimulator  │
//! └──────────────┘  └─────────────────┘     │  (owning task)   │
//!         │                  │              └──────────────────┘
//! ┌───────────────────────────────────┐              │
//! │   RegisterClient + RetryPolicy    │     ┌──────────────────┐
//! └───────────────────────────────────┘     │  Register Bank   │
//!                   │                       └──────────────────┘
//! ┌───────────────────────────────────┐              │
//! │     TcpTransport (MBAP / PDU)     │◄──── TCP ────┘
//! └───────────────────────────────────┘
//! ```
//!
//! Every component reports to an injected [`CallbackLogger`]; the `log`
//! macros carry internal diagnostics only.

/// Error taxonomy and result alias
pub mod error;

/// YAML-backed connection and signal configuration
pub mod config;

/// Structured log records and the injected callback sink
pub mod logging;

/// Modbus/TCP framing for the supported function codes
pub mod protocol;

/// Single-exchange transports
pub mod transport;

/// Bounded retry with fixed backoff
pub mod retry;

/// Retrying holding-register client
pub mod client;

/// Simulator register storage
pub mod register_bank;

/// Loopback Modbus/TCP server
pub mod simulator;

/// Randomized write driver
pub mod fuzz;

/// Periodic register polling
pub mod monitor;

/// Synthetic EM trace generation and analysis
pub mod signal;

// Re-export main types for convenience
pub use client::{RegisterClient, RegisterOutcome};
pub use config::{ConnectionConfig, ProbeConfig, SignalConfig};
pub use error::{ProbeError, ProbeResult};
pub use fuzz::FuzzDriver;
pub use logging::{CallbackLogger, Component, LogCallback, LogLevel, LogRecord, Outcome};
pub use monitor::RegisterMonitor;
pub use protocol::{ModbusException, ModbusFunction, ModbusRequest, ModbusResponse};
pub use register_bank::RegisterBank;
pub use retry::RetryPolicy;
pub use signal::{SignalAnalysis, SignalAnalyzer, SignalComparison, Trace};
pub use simulator::{ServerSimulator, SimulatorStats};
pub use transport::{ModbusTransport, TcpTransport, TransportStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Probe v{} - Modbus/TCP fault probing toolkit", VERSION)
}
