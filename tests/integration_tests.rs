//! Integration Tests for Modbus Probe
//!
//! Closed-loop scenarios: the client, fuzz driver and monitor talk to a real
//! simulator bound on an ephemeral loopback port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;

use modbus_probe::logging::init_test_logger;
use modbus_probe::protocol::encode_frame;
use modbus_probe::*;

/// Start a simulator on an ephemeral port with the activity ticker disabled
async fn start_simulator(logger: CallbackLogger, register_count: u32) -> (ServerSimulator, ConnectionConfig) {
    init_test_logger();
    let mut simulator = ServerSimulator::new(&ConnectionConfig::new("127.0.0.1", 0), logger)
        .with_register_count(register_count)
        .with_activity_registers(Vec::new());
    simulator.start().await.unwrap();
    let port = simulator.local_addr().unwrap().port();
    let config = ConnectionConfig::new("127.0.0.1", port).with_timeout(Duration::from_secs(1));
    (simulator, config)
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_write_then_read_round_trip() {
    let (mut simulator, config) = start_simulator(CallbackLogger::disabled(), 65536).await;
    let client = RegisterClient::new(config, CallbackLogger::disabled()).unwrap();

    client.write_register(40, 65535).await.unwrap();
    client.write_register(41, 0).await.unwrap();
    client.write_register(42, 1234).await.unwrap();
    assert_eq!(client.read_register(40, 3).await.unwrap(), vec![65535, 0, 1234]);

    // Each attempt opened and closed its own connection
    let stats = client.transport_stats().await;
    assert_eq!(stats.connections_opened, 4);
    assert_eq!(stats.errors, 0);

    simulator.stop().await.unwrap();
}

#[tokio::test]
async fn test_fuzz_run_against_simulator() {
    let (mut simulator, config) = start_simulator(CallbackLogger::disabled(), 65536).await;
    let (logger, records) = CallbackLogger::collecting();
    let client = Arc::new(RegisterClient::new(config, logger.clone()).unwrap());

    let outcomes = FuzzDriver::with_seed(client, logger, 2024).run(0, 10, 20).await.unwrap();
    assert_eq!(outcomes.len(), 20);
    assert!(outcomes.iter().all(|o| o.success && o.address <= 10 && o.attempts_used == 1));

    // The bank holds the last value written to each touched address
    let snapshot = simulator.snapshot().await.unwrap();
    for outcome in &outcomes {
        let last = outcomes.iter().rev().find(|o| o.address == outcome.address).unwrap();
        assert_eq!(snapshot.get(&outcome.address).copied(), last.value);
    }

    let fuzz_successes = records
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.component == Component::Fuzzer && r.outcome == Outcome::Success)
        .count();
    assert_eq!(fuzz_successes, 20);

    simulator.stop().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_address_answers_exception() {
    let (mut simulator, config) = start_simulator(CallbackLogger::disabled(), 100).await;

    let mut transport = TcpTransport::new("127.0.0.1", config.port, config.timeout());
    let response = transport
        .request(&ModbusRequest::ReadHoldingRegisters { address: 200, quantity: 1 })
        .await
        .unwrap();
    assert_eq!(response, ModbusResponse::Exception { function: 0x03, code: 0x02 });

    let response = transport
        .request(&ModbusRequest::WriteSingleRegister { address: 100, value: 1 })
        .await
        .unwrap();
    assert_eq!(response, ModbusResponse::Exception { function: 0x06, code: 0x02 });

    // The client treats the exception as a failed attempt and retries
    let client = RegisterClient::new(config.with_max_retries(2), CallbackLogger::disabled()).unwrap();
    let err = client.read_register(200, 1).await.unwrap_err();
    assert!(matches!(err, ProbeError::ReadFailed { address: 200, attempts: 2, .. }));

    let stats = simulator.stats().await.unwrap();
    assert_eq!(stats.exceptions_sent, 4);
    simulator.stop().await.unwrap();
}

#[tokio::test]
async fn test_monitor_polls_simulator() {
    init_test_logger();
    let mut simulator = ServerSimulator::new(&ConnectionConfig::new("127.0.0.1", 0), CallbackLogger::disabled())
        .with_registers([(0, 11), (1, 22), (2, 33)])
        .with_activity_registers(Vec::new());
    simulator.start().await.unwrap();
    let port = simulator.local_addr().unwrap().port();

    let (logger, records) = CallbackLogger::collecting();
    let client = Arc::new(RegisterClient::new(ConnectionConfig::new("127.0.0.1", port), logger.clone()).unwrap());
    let mut monitor = RegisterMonitor::new(client, logger);
    monitor.start(vec![2, 0, 1], Duration::from_millis(100)).unwrap();

    while monitor.passes_completed() < 2 {
        sleep(Duration::from_millis(20)).await;
    }
    monitor.stop().await.unwrap();
    simulator.stop().await.unwrap();

    let polled: Vec<(u16, u16)> = records
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.component == Component::Monitor && r.outcome == Outcome::Success)
        .map(|r| (r.address.unwrap(), r.value.unwrap()))
        .collect();
    assert!(polled.len() >= 6);
    assert_eq!(&polled[..6], &[(2, 33), (0, 11), (1, 22), (2, 33), (0, 11), (1, 22)]);
}

#[tokio::test]
async fn test_activity_registers_visible_to_client() {
    init_test_logger();
    let mut simulator = ServerSimulator::new(&ConnectionConfig::new("127.0.0.1", 0), CallbackLogger::disabled());
    simulator.start().await.unwrap();
    let port = simulator.local_addr().unwrap().port();
    sleep(Duration::from_millis(50)).await;

    let client = RegisterClient::new(ConnectionConfig::new("127.0.0.1", port), CallbackLogger::disabled()).unwrap();
    assert_eq!(client.read_register(0, 2).await.unwrap(), vec![123, 456]);
    simulator.stop().await.unwrap();
}

#[tokio::test]
async fn test_double_start_keeps_one_listener() {
    let (logger, records) = CallbackLogger::collecting();
    let (mut simulator, config) = start_simulator(logger, 65536).await;
    let first = simulator.local_addr();

    simulator.start().await.unwrap();
    assert_eq!(simulator.local_addr(), first);

    let client = RegisterClient::new(config, CallbackLogger::disabled()).unwrap();
    client.write_register(3, 3).await.unwrap();

    simulator.stop().await.unwrap();
    simulator.stop().await.unwrap();

    let records = records.lock().unwrap();
    let count = |outcome: Outcome| records.iter().filter(|r| r.outcome == outcome).count();
    assert_eq!(count(Outcome::Started), 1);
    assert_eq!(count(Outcome::AlreadyRunning), 1);
    assert_eq!(count(Outcome::Stopped), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_exhausts_retries() {
    init_test_logger();
    let port = closed_port().await;
    let (logger, records) = CallbackLogger::collecting();
    let config = ConnectionConfig::new("127.0.0.1", port)
        .with_timeout(Duration::from_millis(500))
        .with_max_retries(3);
    let client = RegisterClient::new(config, logger).unwrap();

    let started = Instant::now();
    let outcome = client.probe_write(7, 99).await;
    assert!(!outcome.success);
    assert_eq!(outcome.attempts_used, 3);
    assert_eq!(outcome.value, Some(99));
    assert!(matches!(outcome.error, Some(ProbeError::WriteFailed { attempts: 3, .. })));
    // Two backoff gaps between three attempts
    assert!(started.elapsed() >= Duration::from_millis(200));

    let attempts: Vec<u32> = records.lock().unwrap().iter().filter_map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_keep_alive_reconnects_within_retry_budget() {
    init_test_logger();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // A device that hangs up after answering one request per connection
    let peer = tokio::spawn(async move {
        for value in [10u16, 20] {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            let pdu = ModbusResponse::ReadHoldingRegisters(vec![value]).encode_pdu();
            let tid = u16::from_be_bytes([request[0], request[1]]);
            socket.write_all(&encode_frame(tid, request[6], &pdu)).await.unwrap();
        }
    });

    let config = ConnectionConfig::new("127.0.0.1", port)
        .with_timeout(Duration::from_secs(1))
        .with_max_retries(2);
    let transport = TcpTransport::new("127.0.0.1", port, config.timeout()).with_keep_alive(true);
    let client = RegisterClient::with_transport(config, transport, CallbackLogger::disabled());

    let first = client.poll_register(0).await;
    assert_eq!((first.value, first.attempts_used), (Some(10), 1));

    // First attempt hits the closed kept stream, the retry reconnects
    let second = client.poll_register(0).await;
    assert!(second.success);
    assert_eq!((second.value, second.attempts_used), (Some(20), 2));

    let stats = client.transport_stats().await;
    assert_eq!(stats.connections_opened, 2);
    assert_eq!(stats.errors, 1);
    peer.await.unwrap();
}

#[tokio::test]
async fn test_config_file_drives_client() {
    let (mut simulator, config) = start_simulator(CallbackLogger::disabled(), 65536).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yml");
    let yaml = format!(
        "modbus:\n  host: 127.0.0.1\n  port: {}\n  timeout: 1\n  retries: 2\nsignal:\n  sample_rate: 1000\n  duration: 1.0\n  trigger_threshold: 0.3\n  noise_threshold: 0.1\n",
        config.port
    );
    std::fs::write(&path, yaml).unwrap();

    let loaded = ProbeConfig::load(&path).unwrap();
    let client = RegisterClient::new(loaded.modbus, CallbackLogger::disabled()).unwrap();
    assert_eq!(client.policy().max_attempts, 2);
    client.write_register(9, 900).await.unwrap();
    assert_eq!(client.read_register(9, 1).await.unwrap(), vec![900]);

    let comparison = SignalAnalyzer::new(loaded.signal).unwrap().compare(1).unwrap();
    assert!(comparison.crash.rms < comparison.normal.rms);

    simulator.stop().await.unwrap();
}
