/// Randomized register write driver
///
/// Each round draws an address uniformly from `[start, end]` and a value from
/// the full 16-bit range, writes it through the shared client and records the
/// outcome. A failing write is evidence, not an error: the run always
/// completes all rounds.

use std::sync::Arc;

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::client::{RegisterClient, RegisterOutcome};
use crate::error::{ProbeError, ProbeResult};
use crate::logging::{CallbackLogger, Component, LogLevel, LogRecord, Outcome};
use crate::transport::{ModbusTransport, TcpTransport};

pub struct FuzzDriver<T: ModbusTransport = TcpTransport> {
    client: Arc<RegisterClient<T>>,
    rng: ChaCha8Rng,
    logger: CallbackLogger,
}

impl<T: ModbusTransport> FuzzDriver<T> {
    /// Driver with an entropy-seeded random source
    pub fn new(client: Arc<RegisterClient<T>>, logger: CallbackLogger) -> Self {
        Self {
            client,
            rng: ChaCha8Rng::from_entropy(),
            logger,
        }
    }

    /// Driver whose address/value sequence is reproducible from `seed`
    pub fn with_seed(client: Arc<RegisterClient<T>>, logger: CallbackLogger, seed: u64) -> Self {
        Self {
            client,
            rng: ChaCha8Rng::seed_from_u64(seed),
            logger,
        }
    }

    /// Run `iterations` random writes and collect every outcome
    pub async fn run(&mut self, start: u16, end: u16, iterations: usize) -> ProbeResult<Vec<RegisterOutcome>> {
        let mut outcomes = Vec::with_capacity(iterations);
        self.run_with(start, end, iterations, |outcome| outcomes.push(outcome.clone()))
            .await?;
        Ok(outcomes)
    }

    /// Run `iterations` random writes, reporting each outcome as it is produced
    ///
    /// Returns the number of successful writes.
    pub async fn run_with<F>(&mut self, start: u16, end: u16, iterations: usize, mut on_outcome: F) -> ProbeResult<usize>
    where
        F: FnMut(&RegisterOutcome),
    {
        if start > end {
            return Err(ProbeError::InvalidRange { start, end });
        }

        self.logger.log(
            LogLevel::Info,
            Component::Fuzzer,
            Outcome::Started,
            format!("{} writes over [{}, {}]", iterations, start, end),
        );

        let mut succeeded = 0;
        for round in 0..iterations {
            let address = self.rng.gen_range(start..=end);
            let value: u16 = self.rng.gen();
            debug!("fuzz round {}: {} <- {}", round + 1, address, value);

            let outcome = self.client.probe_write(address, value).await;
            let record = match &outcome.error {
                None => {
                    succeeded += 1;
                    LogRecord::new(
                        LogLevel::Info,
                        Component::Fuzzer,
                        Outcome::Success,
                        format!("Successfully wrote value {} to address {}", value, address),
                    )
                }
                Some(error) => LogRecord::new(
                    LogLevel::Error,
                    Component::Fuzzer,
                    Outcome::Failure,
                    format!("Failed to write value {} to address {}: {}", value, address, error),
                ),
            };
            self.logger.emit(
                record
                    .address(address)
                    .value(value)
                    .attempt(outcome.attempts_used),
            );
            on_outcome(&outcome);
        }

        info!("Fuzz run finished: {}/{} writes succeeded", succeeded, iterations);
        self.logger.log(
            LogLevel::Info,
            Component::Fuzzer,
            Outcome::Stopped,
            format!("{}/{} writes succeeded", succeeded, iterations),
        );
        Ok(succeeded)
    }
}
