//! FIX session transport
//!
//! Owns the byte stream to the exchange:
//! - TCP connect with timeout and TCP_NODELAY
//! - Optional TLS via rustls with the platform's native root certificates
//! - Framing of inbound bytes into `FixMessage`s (`FixReader`)
//! - A writer task draining pre-encoded frames in order (`run_writer`)

use crate::fix::{FixMessage, FixParseError, FixParser};
use crate::infrastructure::config::SessionConfig;
use crate::log_session;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tracing::Level;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection state reported by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, logon not yet acknowledged
    Connected,
    /// Logon acknowledged
    LoggedOn,
    /// Socket closed or failed
    Disconnected,
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connect timeout")]
    Timeout,
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Framing error: {0}")]
    Framing(#[from] FixParseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Writer closed")]
    WriterClosed,
}

/// Connect to the exchange gateway
///
/// Returns the framed reader and the raw write half.
pub async fn connect(config: &SessionConfig) -> Result<(FixReader<BoxedReader>, BoxedWriter), TransportError> {
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = timeout(config.connect_timeout(), TcpStream::connect(&addr))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;

    // Disable Nagle's algorithm - session messages are small and latency-bound
    tcp.set_nodelay(true)?;

    if config.tls {
        let server_name = config.server_name.as_deref().unwrap_or(&config.host);
        let stream = connect_tls(tcp, server_name).await?;
        log_session!(Level::INFO, %addr, server_name, "TLS session transport connected");
        let (r, w) = tokio::io::split(stream);
        Ok((FixReader::new(Box::new(r)), Box::new(w)))
    } else {
        log_session!(Level::INFO, %addr, "plain TCP session transport connected");
        let (r, w) = tcp.into_split();
        Ok((FixReader::new(Box::new(r)), Box::new(w)))
    }
}

async fn connect_tls(
    tcp: TcpStream,
    server_name: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        log_session!(Level::WARN, error = %err, "failed to load a native root certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    log_session!(Level::DEBUG, added, ignored, "loaded native root certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    TlsConnector::from(Arc::new(tls_config))
        .connect(name, tcp)
        .await
        .map_err(|e| TransportError::Tls(e.to_string()))
}

/// Framed reader over any byte stream
pub struct FixReader<R> {
    inner: R,
    parser: FixParser,
}

impl<R: AsyncRead + Unpin> FixReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            parser: FixParser::new(),
        }
    }

    /// Next complete message; `Ok(None)` on clean end of stream
    pub async fn next_message(&mut self) -> Result<Option<FixMessage>, TransportError> {
        loop {
            if let Some(msg) = self.parser.get_message()? {
                return Ok(Some(msg));
            }
            let n = self.inner.read_buf(self.parser.buffer_mut()).await?;
            if n == 0 {
                if self.parser.pending_len() > 0 {
                    log_session!(Level::WARN, pending = self.parser.pending_len(), "stream closed mid-frame");
                }
                return Ok(None);
            }
        }
    }
}

/// Drain encoded frames to the socket until the channel closes or a write fails
pub async fn run_writer<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) -> Result<(), TransportError> {
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await?;
        writer.flush().await?;
    }
    let _ = writer.shutdown().await;
    Ok(())
}
