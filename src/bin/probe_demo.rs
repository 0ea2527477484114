/// Modbus Probe Demo
///
/// Runs the whole probe against a local simulator:
/// start the simulator, fuzz a register range, monitor a few registers,
/// then compare a normal and a crash EM trace.
///
/// Usage: `probe_demo [config.yml]`

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::signal;
use tokio::time::sleep;

use modbus_probe::{
    CallbackLogger, ConnectionConfig, FuzzDriver, ProbeConfig, RegisterClient, RegisterMonitor, ServerSimulator,
    SignalAnalyzer,
};

const MONITOR_WINDOW: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🔎 {}", modbus_probe::info());
    println!("=============================");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            ProbeConfig::load(&path)?
        }
        None => ProbeConfig::default(),
    };
    let logger = CallbackLogger::console();

    // Simulator
    let mut simulator = ServerSimulator::new(&config.modbus, logger.clone());
    simulator.start().await?;
    let port = simulator
        .local_addr()
        .map(|addr| addr.port())
        .unwrap_or(config.modbus.port);

    let client_config = ConnectionConfig {
        port,
        ..config.modbus.clone()
    };
    let client = Arc::new(RegisterClient::new(client_config, logger.clone())?);

    // Fuzz run
    println!("\n🎲 Fuzzing registers 0..=10 with 20 writes");
    let outcomes = FuzzDriver::new(client.clone(), logger.clone()).run(0, 10, 20).await?;
    let failed = outcomes.iter().filter(|o| !o.success).count();
    println!("   {} writes, {} failed", outcomes.len(), failed);

    // Monitor
    println!("\n📡 Monitoring registers 0, 1, 2 for {:?} (Ctrl+C to skip)", MONITOR_WINDOW);
    let mut monitor = RegisterMonitor::new(client.clone(), logger.clone());
    monitor.start(vec![0, 1, 2], Duration::from_secs(1))?;
    tokio::select! {
        _ = sleep(MONITOR_WINDOW) => {}
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    }
    monitor.stop().await?;
    println!("   {} polling passes completed", monitor.passes_completed());

    if let Ok(stats) = simulator.stats().await {
        println!(
            "   simulator: {} connections, {} requests, {} exceptions",
            stats.connections_accepted, stats.requests_handled, stats.exceptions_sent
        );
    }
    simulator.stop().await?;

    // Signal analysis
    println!("\n📈 EM signal comparison");
    let analyzer = SignalAnalyzer::new(config.signal.clone())?;
    match analyzer.compare(rand::random()) {
        Ok(comparison) => {
            println!("   normal: {:?}", comparison.normal);
            println!("   crash:  {:?}", comparison.crash);
            println!(
                "   rms ratio {:.3}, snr delta {:.2} dB, peak-to-peak delta {:.3}",
                comparison.rms_ratio, comparison.snr_delta_db, comparison.peak_to_peak_delta
            );
        }
        Err(e) => error!("Signal analysis failed: {}", e),
    }

    println!("\n✅ Demo finished");
    Ok(())
}
