/// Loopback Modbus/TCP server simulator
///
/// [`ServerSimulator`] binds a listener and spawns exactly one background task
/// that owns the listener and the [`RegisterBank`]. Connection handlers never
/// touch the bank: they forward each request PDU to the owning task over an
/// mpsc channel and write back whatever it answers. The same task runs the
/// activity ticker that keeps registers 0 and 1 moving, so the bank has a
/// single writer.
///
/// Shutdown is a broadcast stop channel observed by the owning task and by
/// every connection handler.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::config::ConnectionConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::logging::{CallbackLogger, Component, LogLevel, LogRecord, Outcome};
use crate::protocol::{
    encode_frame, MbapHeader, ModbusAddress, ModbusRequest, ModbusResponse, ModbusValue, MBAP_HEADER_SIZE,
};
use crate::register_bank::RegisterBank;

/// Grace period for the background task after the stop signal
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Period of the register activity writes
pub const DEFAULT_ACTIVITY_INTERVAL: Duration = Duration::from_secs(1);

/// Registers overwritten on every activity tick
pub const DEFAULT_ACTIVITY_REGISTERS: [(ModbusAddress, ModbusValue); 2] = [(0, 123), (1, 456)];

/// Idle time after which a silent connection is dropped
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const COMMAND_QUEUE_DEPTH: usize = 64;

/// Simulator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub connections_accepted: u64,
    pub requests_handled: u64,
    pub exceptions_sent: u64,
    pub activity_ticks: u64,
}

/// Messages from connection handlers and the public API to the owning task
enum BankCommand {
    Process {
        pdu: Vec<u8>,
        reply: oneshot::Sender<ModbusResponse>,
    },
    Snapshot {
        reply: oneshot::Sender<BTreeMap<ModbusAddress, ModbusValue>>,
    },
    Stats {
        reply: oneshot::Sender<SimulatorStats>,
    },
}

struct RunningSimulator {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    commands: mpsc::Sender<BankCommand>,
    handle: JoinHandle<()>,
}

/// Modbus/TCP server simulator with a start/stop lifecycle
pub struct ServerSimulator {
    host: String,
    port: u16,
    bank: RegisterBank,
    activity_registers: Vec<(ModbusAddress, ModbusValue)>,
    logger: CallbackLogger,
    running: Option<RunningSimulator>,
}

impl ServerSimulator {
    /// Create a stopped simulator for the configured host and port
    ///
    /// Port 0 binds an ephemeral port; read it back with [`local_addr`](Self::local_addr).
    pub fn new(config: &ConnectionConfig, logger: CallbackLogger) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            bank: RegisterBank::new(),
            activity_registers: DEFAULT_ACTIVITY_REGISTERS.to_vec(),
            logger,
            running: None,
        }
    }

    /// Pre-seed registers for the next start
    pub fn with_registers<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (ModbusAddress, ModbusValue)>,
    {
        self.bank.seed(values);
        self
    }

    /// Limit the addressable registers; seeded values beyond the limit are dropped
    pub fn with_register_count(mut self, register_count: u32) -> Self {
        let mut bank = RegisterBank::with_register_count(register_count);
        bank.seed(self.bank.snapshot());
        self.bank = bank;
        self
    }

    /// Replace the registers written on every activity tick (empty disables them)
    pub fn with_activity_registers(mut self, registers: Vec<(ModbusAddress, ModbusValue)>) -> Self {
        self.activity_registers = registers;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Bind and spawn the background task
    ///
    /// Starting a running simulator is a no-op reported as "already running".
    pub async fn start(&mut self) -> ProbeResult<()> {
        if let Some(running) = &self.running {
            warn!("Simulator already running on {}", running.local_addr);
            self.logger.emit(LogRecord::new(
                LogLevel::Warn,
                Component::Simulator,
                Outcome::AlreadyRunning,
                format!("simulator already running on {}", running.local_addr),
            ));
            return Ok(());
        }

        let endpoint = format!("{}:{}", self.host, self.port);
        let listener = match TcpListener::bind((self.host.as_str(), self.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind simulator to {}: {}", endpoint, e);
                self.logger.log(
                    LogLevel::Error,
                    Component::Simulator,
                    Outcome::Failure,
                    format!("bind {} failed: {}", endpoint, e),
                );
                return Err(ProbeError::BindFailed {
                    address: endpoint,
                    message: e.to_string(),
                });
            }
        };
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let task = SimulatorTask {
            listener,
            bank: self.bank.clone(),
            stats: SimulatorStats::default(),
            activity_registers: self.activity_registers.clone(),
            shutdown_tx: shutdown_tx.clone(),
            command_tx: command_tx.clone(),
            logger: self.logger.clone(),
        };
        let shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(task.run(shutdown_rx, command_rx));

        self.running = Some(RunningSimulator {
            local_addr,
            shutdown_tx,
            commands: command_tx,
            handle,
        });

        info!("Modbus simulator listening on {}", local_addr);
        self.logger.log(
            LogLevel::Info,
            Component::Simulator,
            Outcome::Started,
            format!("listening on {}", local_addr),
        );
        Ok(())
    }

    /// Signal the background task and wait for it; a no-op when stopped
    pub async fn stop(&mut self) -> ProbeResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(());
        let mut handle = running.handle;
        match timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Simulator task ended abnormally: {}", e),
            Err(_) => {
                warn!("Simulator task did not stop within {:?}, aborting", STOP_TIMEOUT);
                handle.abort();
            }
        }

        info!("Modbus simulator on {} stopped", running.local_addr);
        self.logger.log(
            LogLevel::Info,
            Component::Simulator,
            Outcome::Stopped,
            format!("stopped listening on {}", running.local_addr),
        );
        Ok(())
    }

    /// Copy of every written register, taken by the owning task
    pub async fn snapshot(&self) -> ProbeResult<BTreeMap<ModbusAddress, ModbusValue>> {
        self.query(|reply| BankCommand::Snapshot { reply }).await
    }

    pub async fn stats(&self) -> ProbeResult<SimulatorStats> {
        self.query(|reply| BankCommand::Stats { reply }).await
    }

    async fn query<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> BankCommand) -> ProbeResult<R> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| ProbeError::internal("simulator is not running"))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        running
            .commands
            .send(command(reply_tx))
            .await
            .map_err(|_| ProbeError::internal("simulator task is gone"))?;
        reply_rx
            .await
            .map_err(|_| ProbeError::internal("simulator task dropped the reply"))
    }
}

impl Drop for ServerSimulator {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            running.handle.abort();
        }
    }
}

/// State owned by the background task
struct SimulatorTask {
    listener: TcpListener,
    bank: RegisterBank,
    stats: SimulatorStats,
    activity_registers: Vec<(ModbusAddress, ModbusValue)>,
    shutdown_tx: broadcast::Sender<()>,
    command_tx: mpsc::Sender<BankCommand>,
    logger: CallbackLogger,
}

impl SimulatorTask {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>, mut commands: mpsc::Receiver<BankCommand>) {
        let mut ticker = interval(DEFAULT_ACTIVITY_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received, simulator task exiting");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            self.stats.connections_accepted += 1;
                            debug!("Accepted connection from {}", peer);
                            tokio::spawn(handle_client(
                                stream,
                                peer,
                                self.command_tx.clone(),
                                self.shutdown_tx.subscribe(),
                            ));
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                Some(command) = commands.recv() => self.apply(command),
                _ = ticker.tick() => {
                    for &(address, value) in &self.activity_registers {
                        if let Err(e) = self.bank.write(address, value) {
                            debug!("Activity write to {} skipped: {}", address, e);
                        }
                    }
                    self.stats.activity_ticks += 1;
                }
            }
        }
    }

    fn apply(&mut self, command: BankCommand) {
        match command {
            BankCommand::Process { pdu, reply } => {
                let response = self.process_request(&pdu);
                let _ = reply.send(response);
            }
            BankCommand::Snapshot { reply } => {
                let _ = reply.send(self.bank.snapshot());
            }
            BankCommand::Stats { reply } => {
                let _ = reply.send(self.stats.clone());
            }
        }
    }

    /// Answer one request PDU against the bank
    fn process_request(&mut self, pdu: &[u8]) -> ModbusResponse {
        self.stats.requests_handled += 1;
        let function = pdu.first().copied().unwrap_or_default();

        let response = match ModbusRequest::decode_pdu(pdu) {
            Err(exception) => ModbusResponse::exception(function, exception),
            Ok(ModbusRequest::ReadHoldingRegisters { address, quantity }) => match self.bank.read(address, quantity) {
                Ok(values) => ModbusResponse::ReadHoldingRegisters(values),
                Err(exception) => ModbusResponse::exception(function, exception),
            },
            Ok(ModbusRequest::WriteSingleRegister { address, value }) => match self.bank.write(address, value) {
                Ok(()) => {
                    self.logger.emit(
                        LogRecord::new(LogLevel::Debug, Component::Simulator, Outcome::Success, "register written")
                            .address(address)
                            .value(value),
                    );
                    ModbusResponse::WriteSingleRegister { address, value }
                }
                Err(exception) => ModbusResponse::exception(function, exception),
            },
        };

        if let ModbusResponse::Exception { function, code } = &response {
            self.stats.exceptions_sent += 1;
            debug!("Answering function 0x{:02X} with exception 0x{:02X}", function, code);
        }
        response
    }
}

/// Serve one client connection until it closes or the simulator stops
async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    commands: mpsc::Sender<BankCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown signal received for client {}", peer);
                break;
            }
            result = timeout(REQUEST_TIMEOUT, read_request(&mut stream)) => {
                let (header, pdu) = match result {
                    Ok(Ok(Some(request))) => request,
                    Ok(Ok(None)) => {
                        debug!("Client {} disconnected", peer);
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!("Dropping client {}: {}", peer, e);
                        break;
                    }
                    Err(_) => {
                        debug!("Client {} idle, closing", peer);
                        break;
                    }
                };

                let (reply_tx, reply_rx) = oneshot::channel();
                if commands.send(BankCommand::Process { pdu, reply: reply_tx }).await.is_err() {
                    break;
                }
                let Ok(response) = reply_rx.await else {
                    break;
                };

                let frame = encode_frame(header.transaction_id, header.unit_id, &response.encode_pdu());
                if let Err(e) = stream.write_all(&frame).await {
                    error!("Failed to send response to {}: {}", peer, e);
                    break;
                }
            }
        }
    }
}

/// Read one framed request; `None` on a clean close before a new frame
async fn read_request(stream: &mut TcpStream) -> ProbeResult<Option<(MbapHeader, Vec<u8>)>> {
    let mut header_buf = [0u8; MBAP_HEADER_SIZE + 1];
    match stream.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = MbapHeader::parse(&header_buf)?;
    let mut pdu = vec![0u8; header.pdu_len()];
    stream.read_exact(&mut pdu).await?;
    Ok(Some((header, pdu)))
}
