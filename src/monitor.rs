/// Periodic register polling
///
/// [`RegisterMonitor`] owns at most one background polling task. Each pass
/// reads every configured address in order and reports the result to the
/// logger, then sleeps once for the interval. Stop is cooperative: the stop
/// channel is checked at the top of every pass and raced against the sleep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::client::RegisterClient;
use crate::error::{ProbeError, ProbeResult};
use crate::logging::{CallbackLogger, Component, LogLevel, LogRecord, Outcome};
use crate::transport::{ModbusTransport, TcpTransport};

/// Grace period for the polling task after the stop signal
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningMonitor {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RegisterMonitor<T: ModbusTransport + 'static = TcpTransport> {
    client: Arc<RegisterClient<T>>,
    logger: CallbackLogger,
    passes: Arc<AtomicU64>,
    running: Option<RunningMonitor>,
}

impl<T: ModbusTransport + 'static> RegisterMonitor<T> {
    pub fn new(client: Arc<RegisterClient<T>>, logger: CallbackLogger) -> Self {
        Self {
            client,
            logger,
            passes: Arc::new(AtomicU64::new(0)),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Number of full passes over the address list since construction
    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Spawn the polling task
    ///
    /// A zero interval is rejected. Starting a running monitor is a no-op
    /// reported as "already running".
    pub fn start(&mut self, addresses: Vec<u16>, interval: Duration) -> ProbeResult<()> {
        if interval.is_zero() {
            return Err(ProbeError::invalid_config("monitor interval must be greater than zero"));
        }
        if self.running.is_some() {
            warn!("Register monitor already running");
            self.logger.log(
                LogLevel::Warn,
                Component::Monitor,
                Outcome::AlreadyRunning,
                "monitor already running",
            );
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.logger.log(
            LogLevel::Info,
            Component::Monitor,
            Outcome::Started,
            format!("polling {:?} every {:?}", addresses, interval),
        );
        let handle = tokio::spawn(poll_loop(
            self.client.clone(),
            self.logger.clone(),
            self.passes.clone(),
            addresses,
            interval,
            shutdown_rx,
        ));
        self.running = Some(RunningMonitor { shutdown_tx, handle });
        Ok(())
    }

    /// Signal the polling task and wait for it; a no-op when stopped
    pub async fn stop(&mut self) -> ProbeResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(());
        let mut handle = running.handle;
        match timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Monitor task ended abnormally: {}", e),
            Err(_) => {
                warn!("Monitor task did not stop within {:?}, aborting", STOP_TIMEOUT);
                handle.abort();
            }
        }

        info!("Register monitor stopped after {} passes", self.passes_completed());
        self.logger.log(
            LogLevel::Info,
            Component::Monitor,
            Outcome::Stopped,
            format!("stopped after {} passes", self.passes_completed()),
        );
        Ok(())
    }
}

impl<T: ModbusTransport + 'static> Drop for RegisterMonitor<T> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(());
            running.handle.abort();
        }
    }
}

async fn poll_loop<T: ModbusTransport>(
    client: Arc<RegisterClient<T>>,
    logger: CallbackLogger,
    passes: Arc<AtomicU64>,
    addresses: Vec<u16>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        // Any state other than "nothing sent yet" means stop
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        for &address in &addresses {
            let outcome = client.poll_register(address).await;
            let record = match (outcome.value, &outcome.error) {
                (Some(value), None) => LogRecord::new(
                    LogLevel::Info,
                    Component::Monitor,
                    Outcome::Success,
                    format!("Address {}: {}", address, value),
                )
                .value(value),
                (_, error) => LogRecord::new(
                    LogLevel::Warn,
                    Component::Monitor,
                    Outcome::Failure,
                    match error {
                        Some(error) => format!("Address {}: {}", address, error),
                        None => format!("Address {}: no value", address),
                    },
                ),
            };
            logger.emit(record.address(address).attempt(outcome.attempts_used));
        }
        passes.fetch_add(1, Ordering::SeqCst);

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep(interval) => {}
        }
    }
    debug!("Monitor polling loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::protocol::{ModbusRequest, ModbusResponse};
    use crate::transport::TransportStats;
    use async_trait::async_trait;

    /// Answers every read with the address itself
    struct AddressEcho;

    #[async_trait]
    impl ModbusTransport for AddressEcho {
        async fn request(&mut self, request: &ModbusRequest) -> ProbeResult<ModbusResponse> {
            Ok(ModbusResponse::ReadHoldingRegisters(vec![request.address()]))
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&mut self) -> ProbeResult<()> {
            Ok(())
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    fn client() -> Arc<RegisterClient<AddressEcho>> {
        Arc::new(RegisterClient::with_transport(
            ConnectionConfig::default(),
            AddressEcho,
            CallbackLogger::disabled(),
        ))
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let mut monitor = RegisterMonitor::new(client(), CallbackLogger::disabled());
        let err = monitor.start(vec![0], Duration::ZERO).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidConfig { .. }));
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passes_report_addresses_in_order() {
        let (logger, records) = CallbackLogger::collecting();
        let mut monitor = RegisterMonitor::new(client(), logger);
        monitor.start(vec![5, 2, 9], Duration::from_secs(1)).unwrap();

        // Two full passes with one sleep in between
        sleep(Duration::from_millis(1500)).await;
        monitor.stop().await.unwrap();
        assert_eq!(monitor.passes_completed(), 2);

        let records = records.lock().unwrap();
        let polled: Vec<(u16, u16)> = records
            .iter()
            .filter(|r| r.component == Component::Monitor && r.outcome == Outcome::Success)
            .map(|r| (r.address.unwrap(), r.value.unwrap()))
            .collect();
        assert_eq!(polled, vec![(5, 5), (2, 2), (9, 9), (5, 5), (2, 2), (9, 9)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_reported_not_spawned() {
        let (logger, records) = CallbackLogger::collecting();
        let mut monitor = RegisterMonitor::new(client(), logger);
        monitor.start(vec![1], Duration::from_secs(10)).unwrap();
        monitor.start(vec![1, 2], Duration::from_secs(10)).unwrap();
        sleep(Duration::from_millis(10)).await;
        monitor.stop().await.unwrap();
        monitor.stop().await.unwrap();

        let records = records.lock().unwrap();
        let already = records.iter().filter(|r| r.outcome == Outcome::AlreadyRunning).count();
        assert_eq!(already, 1);
        // Only the first task ran: one pass over one address
        assert_eq!(monitor.passes_completed(), 1);
        let polls = records
            .iter()
            .filter(|r| r.component == Component::Monitor && r.outcome == Outcome::Success)
            .count();
        assert_eq!(polls, 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_sleep() {
        let mut monitor = RegisterMonitor::new(client(), CallbackLogger::disabled());
        monitor.start(vec![3], Duration::from_secs(30)).unwrap();
        while monitor.passes_completed() < 1 {
            sleep(Duration::from_millis(5)).await;
        }

        // Real clock: the task is parked in its 30 s sleep
        let started = std::time::Instant::now();
        monitor.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "stop took {:?}", started.elapsed());
        assert_eq!(monitor.passes_completed(), 1);
        assert!(!monitor.is_running());
    }
}
