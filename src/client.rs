/// Resilient holding-register client
///
/// [`RegisterClient`] wraps one remote endpoint. Every operation is driven by
/// a [`RetryPolicy`] built from the connection configuration, and every
/// attempt is reported to the injected [`CallbackLogger`] with its attempt
/// number, address and outcome, so fuzz runs can be replayed from the log.
///
/// The transport sits behind an async mutex: concurrent callers sharing one
/// client (for example a fuzz run and a monitor) are serialized per attempt
/// and never interleave frames on one connection.

use tokio::sync::Mutex;

use crate::config::ConnectionConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::logging::{CallbackLogger, Component, LogLevel, LogRecord, Outcome};
use crate::protocol::{ModbusRequest, ModbusResponse, MAX_READ_REGISTERS};
use crate::retry::{Attempted, RetryPolicy, DEFAULT_BACKOFF};
use crate::transport::{ModbusTransport, TcpTransport, TransportStats};

/// Result of one register operation, as reported by the fuzz driver and monitor
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterOutcome {
    pub address: u16,
    /// Written value for writes; read value for successful reads
    pub value: Option<u16>,
    pub success: bool,
    pub attempts_used: u32,
    pub error: Option<ProbeError>,
}

impl RegisterOutcome {
    fn from_result(address: u16, value: Option<u16>, result: ProbeResult<Attempted<Option<u16>>>) -> Self {
        match result {
            Ok(attempted) => Self {
                address,
                value: attempted.value.or(value),
                success: true,
                attempts_used: attempted.attempts,
                error: None,
            },
            Err(error) => Self {
                address,
                value,
                success: false,
                attempts_used: error.attempts(),
                error: Some(error),
            },
        }
    }
}

/// Holding-register client with retry and value validation
pub struct RegisterClient<T: ModbusTransport = TcpTransport> {
    config: ConnectionConfig,
    policy: RetryPolicy,
    transport: Mutex<T>,
    logger: CallbackLogger,
}

impl RegisterClient<TcpTransport> {
    /// Create a client for the configured endpoint
    ///
    /// No connection is opened here; each attempt connects on demand.
    pub fn new(config: ConnectionConfig, logger: CallbackLogger) -> ProbeResult<Self> {
        config.validate()?;
        let transport = TcpTransport::new(config.host.clone(), config.port, config.timeout());
        Ok(Self::with_transport(config, transport, logger))
    }
}

impl<T: ModbusTransport> RegisterClient<T> {
    /// Create a client over an existing transport
    pub fn with_transport(config: ConnectionConfig, transport: T, logger: CallbackLogger) -> Self {
        let policy = RetryPolicy::new(config.max_retries, DEFAULT_BACKOFF);
        Self {
            config,
            policy,
            transport: Mutex::new(transport),
            logger,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn transport_stats(&self) -> TransportStats {
        self.transport.lock().await.get_stats()
    }

    /// Close the underlying connection if one is held open
    pub async fn close(&self) -> ProbeResult<()> {
        self.transport.lock().await.close().await
    }

    /// Read `count` holding registers starting at `address`
    pub async fn read_register(&self, address: u16, count: u16) -> ProbeResult<Vec<u16>> {
        self.read_attempted(address, count).await.map(|attempted| attempted.value)
    }

    /// Write one holding register after validating `0 <= value <= 65535`
    pub async fn write_register(&self, address: u16, value: i64) -> ProbeResult<()> {
        self.write_attempted(address, value).await.map(|_| ())
    }

    /// Read one register and describe the result as an outcome
    pub async fn poll_register(&self, address: u16) -> RegisterOutcome {
        let result = self
            .read_attempted(address, 1)
            .await
            .map(|attempted| Attempted {
                value: attempted.value.first().copied(),
                attempts: attempted.attempts,
            });
        RegisterOutcome::from_result(address, None, result)
    }

    /// Write one register and describe the result as an outcome
    pub async fn probe_write(&self, address: u16, value: u16) -> RegisterOutcome {
        let result = self
            .write_attempted(address, i64::from(value))
            .await
            .map(|attempted| Attempted {
                value: None,
                attempts: attempted.attempts,
            });
        RegisterOutcome::from_result(address, Some(value), result)
    }

    async fn read_attempted(&self, address: u16, count: u16) -> ProbeResult<Attempted<Vec<u16>>> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(ProbeError::InvalidQuantity { count });
        }
        let request = &ModbusRequest::ReadHoldingRegisters { address, quantity: count };

        self.policy
            .run(|attempt| async move {
                let result = match self.execute(request).await {
                    Ok(ModbusResponse::ReadHoldingRegisters(values)) if !values.is_empty() => Ok(values),
                    Ok(other) => Err(unexpected_response(other)),
                    Err(error) => Err(error),
                };
                self.report_attempt(attempt, address, None, &result);
                result
            })
            .await
            .map_err(|exhausted| ProbeError::ReadFailed {
                address,
                attempts: exhausted.attempts,
                last_error: exhausted.last_error_message(),
            })
    }

    async fn write_attempted(&self, address: u16, value: i64) -> ProbeResult<Attempted<()>> {
        let value = u16::try_from(value).map_err(|_| {
            self.logger.emit(
                LogRecord::new(
                    LogLevel::Error,
                    Component::Client,
                    Outcome::Failure,
                    format!("Invalid value {} for Modbus register", value),
                )
                .address(address),
            );
            ProbeError::InvalidValue { value }
        })?;
        let request = &ModbusRequest::WriteSingleRegister { address, value };

        self.policy
            .run(|attempt| async move {
                let result = match self.execute(request).await {
                    Ok(ModbusResponse::WriteSingleRegister { address: echoed, value: echoed_value })
                        if echoed == address && echoed_value == value =>
                    {
                        Ok(())
                    }
                    Ok(ModbusResponse::WriteSingleRegister { address: echoed, value: echoed_value }) => {
                        Err(ProbeError::frame(format!(
                            "Write echo mismatch: sent {}={}, echoed {}={}",
                            address, value, echoed, echoed_value
                        )))
                    }
                    Ok(other) => Err(unexpected_response(other)),
                    Err(error) => Err(error),
                };
                self.report_attempt(attempt, address, Some(value), &result);
                result
            })
            .await
            .map_err(|exhausted| ProbeError::WriteFailed {
                address,
                value,
                attempts: exhausted.attempts,
                last_error: exhausted.last_error_message(),
            })
    }

    async fn execute(&self, request: &ModbusRequest) -> ProbeResult<ModbusResponse> {
        let mut transport = self.transport.lock().await;
        transport.request(request).await
    }

    fn report_attempt<V>(&self, attempt: u32, address: u16, value: Option<u16>, result: &ProbeResult<V>) {
        let (level, outcome, detail) = match result {
            Ok(_) => (LogLevel::Debug, Outcome::Success, format!("attempt {} of {}", attempt, self.policy.max_attempts)),
            Err(error) => (
                LogLevel::Warn,
                Outcome::Failure,
                format!("attempt {} of {} failed: {}", attempt, self.policy.max_attempts, error),
            ),
        };
        let mut record = LogRecord::new(level, Component::Client, outcome, detail)
            .address(address)
            .attempt(attempt);
        if let Some(value) = value {
            record = record.value(value);
        }
        self.logger.emit(record);
    }
}

fn unexpected_response(response: ModbusResponse) -> ProbeError {
    match response {
        ModbusResponse::Exception { function, code } => ProbeError::exception(function, code),
        ModbusResponse::ReadHoldingRegisters(values) if values.is_empty() => {
            ProbeError::frame("Empty register response")
        }
        other => ProbeError::frame(format!("Unexpected response {:?}", other)),
    }
}
