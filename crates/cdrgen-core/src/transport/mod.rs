//! Transport Endpoints
//!
//! The capability set a channel writes through, plus the stock openers:
//! - **stdout** / `-`: console echo, each line tagged with device and time
//! - **tcp://host:port**: TCP client (collector behind a terminal server)
//! - `/dev/tty*`, `/dev/cu.*`, `COM*`: serial line opened with the port's
//!   baud rate, data bits, parity and stop bits (see [`serial`])
//! - anything else: file or character device opened for writing
//!
//! Every transport marks itself closed on the first write or flush I/O
//! failure. A closed transport is the channel's cue to reconnect.

pub mod mock;
pub mod serial;

use crate::config::PortConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

pub const TCP_SCHEME: &str = "tcp://";

/// One open output endpoint, exclusively owned by a channel
#[async_trait]
pub trait Transport: Send {
    /// Write the whole buffer, returning the byte count
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Wait until buffered output has been handed to the device
    async fn flush(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    fn identity(&self) -> &str;
}

/// Opens (and re-opens) the transport for an endpoint
#[async_trait]
pub trait TransportOpener: Send + Sync {
    async fn open(&self, port: &PortConfig) -> Result<Box<dyn Transport>, TransportError>;
}

/// Endpoint kind derived from the configured device string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Stdout,
    Tcp(String),
    Serial(String),
    Device(String),
}

impl Endpoint {
    pub fn parse(device: &str) -> Self {
        if device == "stdout" || device == "-" {
            Endpoint::Stdout
        } else if let Some(addr) = device.strip_prefix(TCP_SCHEME) {
            Endpoint::Tcp(addr.to_string())
        } else if serial::is_serial_device(device) {
            Endpoint::Serial(device.to_string())
        } else {
            Endpoint::Device(device.to_string())
        }
    }
}

/// Default opener used by the binary
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceOpener;

#[async_trait]
impl TransportOpener for DeviceOpener {
    async fn open(&self, port: &PortConfig) -> Result<Box<dyn Transport>, TransportError> {
        let identity = port.device.clone();
        debug!(device = %identity, baud_rate = port.baud_rate, "opening transport");

        match Endpoint::parse(&port.device) {
            Endpoint::Stdout => Ok(Box::new(ConsoleTransport::new(identity))),
            Endpoint::Tcp(addr) => {
                if addr.is_empty() {
                    return Err(TransportError::Unsupported(identity));
                }
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|source| TransportError::Open {
                        identity: identity.clone(),
                        source,
                    })?;
                // Records are small and latency matters more than packing
                let _ = stream.set_nodelay(true);
                Ok(Box::new(StreamTransport::new(identity, stream)))
            }
            Endpoint::Serial(_) => Ok(Box::new(serial::open(port)?)),
            Endpoint::Device(path) => {
                let is_dev = path.starts_with("/dev/");
                let file = OpenOptions::new()
                    .write(true)
                    .append(!is_dev)
                    .create(!is_dev)
                    .open(&path)
                    .await
                    .map_err(|source| TransportError::Open {
                        identity: identity.clone(),
                        source,
                    })?;
                Ok(Box::new(StreamTransport::<File>::new(identity, file)))
            }
        }
    }
}

// ============================================================================
// Stream transport (files, devices, TCP)
// ============================================================================

/// Any async byte sink treated as an endpoint
pub struct StreamTransport<W> {
    identity: String,
    writer: Option<W>,
}

impl<W> StreamTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(identity: impl Into<String>, writer: W) -> Self {
        Self {
            identity: identity.into(),
            writer: Some(writer),
        }
    }

    fn io_error(&mut self, source: std::io::Error) -> TransportError {
        // Drop the handle; the channel reopens a fresh one
        self.writer = None;
        TransportError::Io {
            identity: self.identity.clone(),
            source,
        }
    }
}

#[async_trait]
impl<W> Transport for StreamTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(TransportError::Closed(self.identity.clone()));
        };
        let result = writer.write_all(data).await;
        match result {
            Ok(()) => Ok(data.len()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(TransportError::Closed(self.identity.clone()));
        };
        let result = writer.flush().await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.shutdown().await.map_err(|source| TransportError::Io {
            identity: self.identity.clone(),
            source,
        })
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

// ============================================================================
// Console transport
// ============================================================================

/// Echoes records to stdout as `[device][HH:MM:SS.mmm] line`
pub struct ConsoleTransport {
    identity: String,
    open: bool,
}

impl ConsoleTransport {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            open: true,
        }
    }

    fn decorate(&self, data: &[u8]) -> String {
        let stamp = Local::now().format("%H:%M:%S%.3f");
        let text = String::from_utf8_lossy(data);
        let mut out = String::with_capacity(text.len() + 32);
        for line in text.lines() {
            out.push_str(&format!("[{}][{}] {}\n", self.identity, stamp, line));
        }
        out
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.identity.clone()));
        }
        let text = self.decorate(data);
        let mut stdout = tokio::io::stdout();
        if let Err(source) = stdout.write_all(text.as_bytes()).await {
            self.open = false;
            return Err(TransportError::Io {
                identity: self.identity.clone(),
                source,
            });
        }
        Ok(data.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed(self.identity.clone()));
        }
        tokio::io::stdout().flush().await.map_err(|source| {
            self.open = false;
            TransportError::Io {
                identity: self.identity.clone(),
                source,
            }
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(Endpoint::parse("stdout"), Endpoint::Stdout);
        assert_eq!(Endpoint::parse("-"), Endpoint::Stdout);
        assert_eq!(
            Endpoint::parse("tcp://10.0.0.5:4001"),
            Endpoint::Tcp("10.0.0.5:4001".to_string())
        );
        assert_eq!(
            Endpoint::parse("/dev/ttyUSB0"),
            Endpoint::Serial("/dev/ttyUSB0".to_string())
        );
        assert_eq!(
            Endpoint::parse("/var/spool/cdr.out"),
            Endpoint::Device("/var/spool/cdr.out".to_string())
        );
    }

    #[test]
    fn test_console_decoration() {
        let console = ConsoleTransport::new("stdout");
        let out = console.decorate(b"first\nsecond\n");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[stdout]["));
        assert!(lines[0].ends_with("] first"));
        assert!(lines[1].ends_with("] second"));
    }

    #[tokio::test]
    async fn test_file_transport_appends() {
        let path = std::env::temp_dir().join(format!("cdrgen-transport-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let port = PortConfig::new(path.to_string_lossy(), "vesta", "synthetic");

        for payload in [&b"one\n"[..], &b"two\n"[..]] {
            let mut transport = DeviceOpener.open(&port).await.unwrap();
            assert!(transport.is_open());
            assert_eq!(transport.write(payload).await.unwrap(), payload.len());
            transport.flush().await.unwrap();
            transport.close().await.unwrap();
            assert!(!transport.is_open());
        }

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "one\ntwo\n");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_device_is_not_created() {
        let port = PortConfig::new("/dev/cdrgen-no-such-tty", "vesta", "synthetic");
        let err = DeviceOpener.open(&port).await.err().unwrap();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[tokio::test]
    async fn test_write_after_close_reports_closed() {
        let mut transport = StreamTransport::new("sink", tokio::io::sink());
        transport.close().await.unwrap();
        let err = transport.write(b"late").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed(id) if id == "sink"));
    }

    #[tokio::test]
    async fn test_tcp_transport_delivers_bytes() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reader = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let port = PortConfig::new(format!("tcp://{}", addr), "viper", "synthetic");
        let mut transport = DeviceOpener.open(&port).await.unwrap();
        transport.write(b"===== CDR END =====\n").await.unwrap();
        transport.flush().await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(reader.await.unwrap(), b"===== CDR END =====\n");
    }
}
