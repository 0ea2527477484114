//! # Modbus Transport Layer
//!
//! A transport performs exactly one request/response exchange per call. It
//! does not retry: retry policy lives in [`crate::retry`] and is applied by
//! [`crate::client::RegisterClient`].
//!
//! ## Connection Lifecycle
//!
//! [`TcpTransport`] opens its connection lazily at the start of an exchange.
//! The stream lives in a local for the duration of the exchange, so any early
//! return (timeout, refused connection, malformed frame) drops it and closes
//! the socket. After a successful exchange the stream is put back only when
//! `keep_alive` is enabled; the default closes it, matching the auto-open /
//! auto-close behaviour of the desktop tool this crate serves.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use modbus_probe::transport::{ModbusTransport, TcpTransport};
//! use modbus_probe::protocol::ModbusRequest;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::new("127.0.0.1", 5020, Duration::from_secs(3));
//!     let request = ModbusRequest::ReadHoldingRegisters { address: 0, quantity: 2 };
//!     let response = transport.request(&request).await?;
//!     println!("Response: {:?}", response);
//!     println!("Requests sent: {}", transport.get_stats().requests_sent);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProbeError, ProbeResult};
use crate::protocol::{encode_frame, MbapHeader, ModbusRequest, ModbusResponse, DEFAULT_UNIT_ID, MBAP_HEADER_SIZE};

/// Single-exchange transport abstraction
///
/// Implementations must be `Send + Sync`; the client serializes access behind
/// an async mutex, so `request` is never called concurrently on one instance.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    /// Send a request and wait for its response
    ///
    /// An exception response is returned as `Ok(ModbusResponse::Exception)`;
    /// the caller decides whether it counts as a failed attempt.
    async fn request(&mut self, request: &ModbusRequest) -> ProbeResult<ModbusResponse>;

    /// Check if the transport currently holds an open connection
    fn is_connected(&self) -> bool;

    /// Close any open connection
    async fn close(&mut self) -> ProbeResult<()>;

    /// Get communication statistics
    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub connections_opened: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
}

/// Modbus TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    keep_alive: bool,
    stream: Option<TcpStream>,
    transaction_id: u16,
    stats: TransportStats,
}

impl TcpTransport {
    /// Create a transport; no connection is opened until the first request
    pub fn new<S: Into<String>>(host: S, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            keep_alive: false,
            stream: None,
            transaction_id: 0,
            stats: TransportStats::default(),
        }
    }

    /// Keep the connection open between successful exchanges
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Get next transaction ID
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    async fn connect(&mut self) -> ProbeResult<TcpStream> {
        let endpoint = self.endpoint();
        let stream = match timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ProbeError::connection(format!("Failed to connect to {}: {}", endpoint, e)));
            }
            Err(_) => return Err(ProbeError::timeout(format!("connect to {}", endpoint), self.timeout_ms())),
        };
        self.stats.connections_opened += 1;
        debug!("Connected to {}", endpoint);
        Ok(stream)
    }

    /// One request/response exchange over an owned stream
    async fn exchange(&mut self, stream: &mut TcpStream, request: &ModbusRequest) -> ProbeResult<ModbusResponse> {
        let transaction_id = self.next_transaction_id();
        let frame = encode_frame(transaction_id, DEFAULT_UNIT_ID, &request.encode_pdu());
        self.stats.requests_sent += 1;
        debug!("send {} -> {}", self.endpoint(), hex::encode(&frame));

        match timeout(self.timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ProbeError::io(format!("send request: {}", e))),
            Err(_) => return Err(ProbeError::timeout("send request", self.timeout_ms())),
        }

        let mut header_buf = [0u8; MBAP_HEADER_SIZE + 1];
        match timeout(self.timeout, stream.read_exact(&mut header_buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ProbeError::io(format!("read response header: {}", e))),
            Err(_) => return Err(ProbeError::timeout("read response header", self.timeout_ms())),
        }

        let header = MbapHeader::parse(&header_buf)?;
        let mut pdu = vec![0u8; header.pdu_len()];
        match timeout(self.timeout, stream.read_exact(&mut pdu)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ProbeError::io(format!("read response data: {}", e))),
            Err(_) => return Err(ProbeError::timeout("read response data", self.timeout_ms())),
        }

        self.stats.responses_received += 1;
        debug!(
            "receive {} <- {}{}",
            self.endpoint(),
            hex::encode(header_buf),
            hex::encode(&pdu)
        );

        if header.transaction_id != transaction_id {
            return Err(ProbeError::frame(format!(
                "Transaction ID mismatch: sent {}, received {}",
                transaction_id, header.transaction_id
            )));
        }

        ModbusResponse::decode_pdu(request, &pdu)
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn request(&mut self, request: &ModbusRequest) -> ProbeResult<ModbusResponse> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let result = self.exchange(&mut stream, request).await;
        match &result {
            Ok(_) if self.keep_alive => self.stream = Some(stream),
            Ok(_) => {
                let _ = stream.shutdown().await;
            }
            // Dropping the stream closes the socket
            Err(_) => self.stats.errors += 1,
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ProbeResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_refused_connection_is_connection_error() {
        // Bind then drop to get a port that is very likely closed
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_millis(500));
        let request = ModbusRequest::ReadHoldingRegisters { address: 0, quantity: 1 };
        let err = transport.request(&request).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_exchange_against_scripted_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let peer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            // Echo the transaction id, answer two registers
            let pdu = ModbusResponse::ReadHoldingRegisters(vec![7, 8]).encode_pdu();
            let tid = u16::from_be_bytes([request[0], request[1]]);
            socket.write_all(&encode_frame(tid, request[6], &pdu)).await.unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        let request = ModbusRequest::ReadHoldingRegisters { address: 0, quantity: 2 };
        let response = transport.request(&request).await.unwrap();
        assert_eq!(response, ModbusResponse::ReadHoldingRegisters(vec![7, 8]));

        // Default transport closes after each exchange
        assert!(!transport.is_connected());
        let stats = transport.get_stats();
        assert_eq!(stats.connections_opened, 1);
        assert_eq!(stats.responses_received, 1);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_kept_stream_dropped_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Each connection answers a single request, then the peer hangs up
        let peer = tokio::spawn(async move {
            for value in [1u16, 2] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = [0u8; 12];
                socket.read_exact(&mut request).await.unwrap();
                let pdu = ModbusResponse::ReadHoldingRegisters(vec![value]).encode_pdu();
                let tid = u16::from_be_bytes([request[0], request[1]]);
                socket.write_all(&encode_frame(tid, request[6], &pdu)).await.unwrap();
            }
        });

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1)).with_keep_alive(true);
        let request = ModbusRequest::ReadHoldingRegisters { address: 0, quantity: 1 };
        assert_eq!(
            transport.request(&request).await.unwrap(),
            ModbusResponse::ReadHoldingRegisters(vec![1])
        );
        assert!(transport.is_connected());

        // The kept stream is stale: the exchange fails and the stream is released
        assert!(transport.request(&request).await.is_err());
        assert!(!transport.is_connected());

        assert_eq!(
            transport.request(&request).await.unwrap(),
            ModbusResponse::ReadHoldingRegisters(vec![2])
        );
        let stats = transport.get_stats();
        assert_eq!(stats.connections_opened, 2);
        assert_eq!(stats.errors, 1);
        peer.await.unwrap();
    }
}
