//! Framed connections
//!
//! A `Connection` owns one TCP (or TLS-upgraded) stream, the codec for its
//! framing, and its own resumable decode buffer. Route-hint traversal and
//! the transport-security upgrade both happen inside `connect`, before any
//! protocol bytes are exchanged.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use thiserror::Error;
use tracing::{debug, info, trace};

use tapwire_protocol::{Frame, FrameCodec, FramingError, LayerError, LayerTag, StreamDecoder};

use crate::tls::TlsContext;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol violation: expected '{expected}' frame, got '{got}'")]
    ProtocolViolation { expected: String, got: String },

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("layer error: {0}")]
    Layer(#[from] LayerError),

    #[error("route refused by intermediate router: {0}")]
    RouteRefused(String),

    #[error("transport security upgrade failed: {0}")]
    TlsUpgrade(String),
}

/// Which end of a relayed conversation this connection faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// An address path through an intermediate routing hop. The traversal
/// request is sent to the router before anything else, TLS included.
#[derive(Debug, Clone)]
pub struct RouteHint {
    /// Address of the first-hop router.
    pub router: String,
    /// Traversal string handed to the router verbatim.
    pub path: String,
}

/// Everything needed to open a connection.
#[derive(Clone)]
pub struct ConnectConfig {
    pub addr: String,
    /// Top-level layer tag riding this connection.
    pub variant: LayerTag,
    pub route: Option<RouteHint>,
    pub tls: Option<TlsContext>,
    pub codec: FrameCodec,
    pub process_label: String,
    pub hostname_label: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ConnectConfig {
    pub fn new(addr: impl Into<String>, variant: LayerTag) -> Self {
        Self {
            addr: addr.into(),
            variant,
            route: None,
            tls: None,
            codec: FrameCodec::new(),
            process_label: "tapwire".to_string(),
            hostname_label: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_route(mut self, route: RouteHint) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_labels(
        mut self,
        process_label: impl Into<String>,
        hostname_label: impl Into<String>,
    ) -> Self {
        self.process_label = process_label.into();
        self.hostname_label = hostname_label.into();
        self
    }
}

#[derive(Debug)]
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    async fn read_buf(&mut self, buf: &mut bytes::BytesMut) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read_buf(buf).await,
            Stream::Tls(s) => s.read_buf(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.write_all(data).await,
            Stream::Tls(s) => s.write_all(data).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.shutdown().await,
            Stream::Tls(s) => s.shutdown().await,
        }
    }
}

/// One framed connection with its exclusive decode buffer.
#[derive(Debug)]
pub struct Connection {
    stream: Stream,
    decoder: StreamDecoder,
    codec: FrameCodec,
    pub variant: LayerTag,
    pub role: Role,
    pub state: ConnectionState,
    pub peer: SocketAddr,
    pub route: Option<RouteHint>,
    pub process_label: String,
    pub hostname_label: String,
    read_timeout: Duration,
}

impl Connection {
    /// Open a connection: dial, traverse the route hint when present, then
    /// perform the transport-security upgrade before any protocol bytes.
    pub async fn connect(config: &ConnectConfig) -> Result<Self, ConnectionError> {
        let dial = config
            .route
            .as_ref()
            .map(|r| r.router.as_str())
            .unwrap_or(config.addr.as_str());

        let mut tcp = timeout(config.connect_timeout, TcpStream::connect(dial))
            .await
            .map_err(|_| ConnectionError::Timeout(config.connect_timeout))??;
        tcp.set_nodelay(true)?;
        let peer = tcp.peer_addr()?;

        if let Some(route) = &config.route {
            traverse_route(&mut tcp, route, &config.codec, config.read_timeout).await?;
            info!(router = %route.router, "route traversal acknowledged");
        }

        let stream = match &config.tls {
            Some(tls) => {
                let upgraded = tls.upgrade(tcp).await?;
                debug!(peer = %peer, "transport security established");
                Stream::Tls(Box::new(upgraded))
            }
            None => Stream::Plain(tcp),
        };

        debug!(peer = %peer, variant = config.variant, "connection established");

        Ok(Self {
            stream,
            decoder: StreamDecoder::new(),
            codec: config.codec.clone(),
            variant: config.variant,
            role: Role::Client,
            state: ConnectionState::Open,
            peer,
            route: config.route.clone(),
            process_label: config.process_label.clone(),
            hostname_label: config.hostname_label.clone(),
            read_timeout: config.read_timeout,
        })
    }

    /// Wrap an already-accepted stream (server side of a conversation).
    pub fn from_stream(
        tcp: TcpStream,
        variant: LayerTag,
        codec: FrameCodec,
        role: Role,
    ) -> Result<Self, ConnectionError> {
        let peer = tcp.peer_addr()?;
        Ok(Self {
            stream: Stream::Plain(tcp),
            decoder: StreamDecoder::new(),
            codec,
            variant,
            role,
            state: ConnectionState::Open,
            peer,
            route: None,
            process_label: String::new(),
            hostname_label: String::new(),
            read_timeout: Duration::from_secs(30),
        })
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Read one complete frame. `Ok(None)` is a clean end-of-stream; a
    /// close mid-frame surfaces the framing error instead.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                trace!(peer = %self.peer, len = frame.len(), "frame received");
                return Ok(Some(frame));
            }

            let n = timeout(
                self.read_timeout,
                self.stream.read_buf(self.decoder.buffer_mut()),
            )
            .await
            .map_err(|_| ConnectionError::Timeout(self.read_timeout))??;

            if n == 0 {
                self.state = ConnectionState::Closed;
                self.decoder.finish()?;
                return Ok(None);
            }
        }
    }

    /// Frame `payload` and write it out.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        let wire = self.codec.encode(payload)?;
        self.stream.write_all(&wire).await?;
        trace!(peer = %self.peer, len = payload.len(), "frame sent");
        Ok(())
    }

    /// Emit the keep-alive probe.
    pub async fn send_probe(&mut self) -> Result<(), ConnectionError> {
        let wire = self.codec.encode_probe();
        self.stream.write_all(&wire).await?;
        trace!(peer = %self.peer, "keep-alive probe sent");
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Open {
            self.stream.shutdown().await?;
            self.state = ConnectionState::Closed;
            debug!(peer = %self.peer, "connection closed");
        }
        Ok(())
    }
}

/// Ask the router to extend the connection along `route.path`. The router
/// acknowledges with an empty frame; anything else is a refusal carrying
/// the router's reason.
async fn traverse_route(
    tcp: &mut TcpStream,
    route: &RouteHint,
    codec: &FrameCodec,
    read_timeout: Duration,
) -> Result<(), ConnectionError> {
    let request = codec.encode(route.path.as_bytes())?;
    tcp.write_all(&request).await?;

    let mut decoder = StreamDecoder::new();
    let reply = timeout(read_timeout, async {
        loop {
            if let Some(frame) = decoder.next_frame()? {
                return Ok::<Frame, ConnectionError>(frame);
            }
            let n = tcp.read_buf(decoder.buffer_mut()).await?;
            if n == 0 {
                decoder.finish()?;
                return Err(ConnectionError::Closed);
            }
        }
    })
    .await
    .map_err(|_| ConnectionError::Timeout(read_timeout))??;

    if reply.is_empty() {
        Ok(())
    } else {
        Err(ConnectionError::RouteRefused(
            String::from_utf8_lossy(&reply.payload).into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_config_defaults() {
        let config = ConnectConfig::new("db.example:39015", "sql");
        assert_eq!(config.addr, "db.example:39015");
        assert!(config.route.is_none());
        assert!(config.tls.is_none());
        assert_eq!(config.process_label, "tapwire");
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_connect_config_builders() {
        let config = ConnectConfig::new("db.example:39015", "sql")
            .with_route(RouteHint {
                router: "router.example:3299".to_string(),
                path: "/H/db.example/S/39015".to_string(),
            })
            .with_labels("hdbsql", "workstation-7")
            .with_read_timeout(Duration::from_secs(5));

        assert_eq!(config.route.as_ref().unwrap().router, "router.example:3299");
        assert_eq!(config.process_label, "hdbsql");
        assert_eq!(config.hostname_label, "workstation-7");
        assert_eq!(config.read_timeout, Duration::from_secs(5));
    }
}
