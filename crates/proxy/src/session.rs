//! Proxy sessions
//!
//! One session owns a client connection and the target connection opened
//! for it, and relays frames in both directions. Each direction runs as an
//! independent relay future; whichever ends first wins the select and the
//! other side is closed with it. Keep-alive probes are forwarded verbatim
//! without touching the hooks, so both peers' idle timers stay alive.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use tapwire_protocol::{
    CompositionRegistry, Frame, FrameCodec, FramingError, LayerError, LayerTag, StreamDecoder,
};

use crate::hooks::{Direction, HookAction, TransformHook};

#[derive(Error, Debug)]
pub enum ProxyRelayError {
    #[error("I/O error on {direction}: {source}")]
    Io {
        direction: Direction,
        source: std::io::Error,
    },

    #[error("framing error on {direction}: {source}")]
    Framing {
        direction: Direction,
        source: FramingError,
    },

    #[error("layer error on {direction}: {source}")]
    Layer {
        direction: Direction,
        source: LayerError,
    },
}

/// Lifecycle of one relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    Relaying,
    Closing,
    Closed,
}

/// How a relay direction came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayEnd {
    /// The reading side reached end-of-stream.
    Eof,
    /// A hook asked for the session to end.
    Terminated,
}

/// One client-to-target relay instance.
pub struct ProxySession {
    pub id: u64,
    pub state: SessionState,
    client: TcpStream,
    target: TcpStream,
    variant: LayerTag,
    codec: FrameCodec,
    registry: Arc<CompositionRegistry>,
    hook: Arc<dyn TransformHook>,
    shutdown: watch::Receiver<bool>,
}

impl ProxySession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        client: TcpStream,
        target: TcpStream,
        variant: LayerTag,
        codec: FrameCodec,
        registry: Arc<CompositionRegistry>,
        hook: Arc<dyn TransformHook>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            state: SessionState::Accepted,
            client,
            target,
            variant,
            codec,
            registry,
            hook,
            shutdown,
        }
    }

    /// Relay until either side ends, a hook terminates the session, or the
    /// external stop signal fires. Both sockets are closed on the way out.
    pub async fn run(mut self) -> Result<(), ProxyRelayError> {
        self.state = SessionState::Relaying;
        info!(session = self.id, "relaying");

        let (client_read, mut client_write) = self.client.into_split();
        let (target_read, mut target_write) = self.target.into_split();

        let c2t = relay_direction(
            Direction::ClientToTarget,
            client_read,
            &mut target_write,
            self.variant,
            &self.codec,
            &self.registry,
            &self.hook,
        );
        let t2c = relay_direction(
            Direction::TargetToClient,
            target_read,
            &mut client_write,
            self.variant,
            &self.codec,
            &self.registry,
            &self.hook,
        );

        let mut shutdown = self.shutdown;
        let outcome = tokio::select! {
            end = c2t => end.map(|e| (Direction::ClientToTarget, e)),
            end = t2c => end.map(|e| (Direction::TargetToClient, e)),
            _ = shutdown.changed() => {
                debug!(session = self.id, "external stop signal");
                Ok((Direction::ClientToTarget, RelayEnd::Eof))
            }
        };

        // Closing: whichever direction survived is dropped here, and both
        // write halves are shut down so the peers see end-of-stream.
        self.state = SessionState::Closing;
        let _ = client_write.shutdown().await;
        let _ = target_write.shutdown().await;
        self.state = SessionState::Closed;

        match outcome {
            Ok((direction, RelayEnd::Eof)) => {
                info!(session = self.id, %direction, "session closed on end-of-stream");
                Ok(())
            }
            Ok((direction, RelayEnd::Terminated)) => {
                info!(session = self.id, %direction, "session terminated by hook");
                Ok(())
            }
            Err(e) => {
                warn!(session = self.id, error = %e, "session closed on relay error");
                Err(e)
            }
        }
    }
}

/// Relay frames from `read` to `write` until end-of-stream or a hook stops
/// the session. Loss is bounded to the frame in flight: everything before
/// the last fully forwarded frame has been written out.
async fn relay_direction(
    direction: Direction,
    mut read: OwnedReadHalf,
    write: &mut OwnedWriteHalf,
    variant: LayerTag,
    codec: &FrameCodec,
    registry: &CompositionRegistry,
    hook: &Arc<dyn TransformHook>,
) -> Result<RelayEnd, ProxyRelayError> {
    let mut decoder = StreamDecoder::new();

    loop {
        let frame = match read_one_frame(&mut read, &mut decoder, direction).await? {
            Some(frame) => frame,
            None => return Ok(RelayEnd::Eof),
        };

        if codec.is_probe(&frame) {
            trace!(%direction, "forwarding keep-alive probe");
            write_frame(write, codec, &frame.payload, direction).await?;
            continue;
        }

        let tree = registry
            .decode_tree(variant, &frame.payload)
            .map_err(|source| ProxyRelayError::Layer { direction, source })?;

        let action = match direction {
            Direction::ClientToTarget => hook.client_to_target(tree),
            Direction::TargetToClient => hook.target_to_client(tree),
        };

        match action {
            HookAction::Forward(tree) => {
                let payload = registry
                    .encode_tree(&tree)
                    .map_err(|source| ProxyRelayError::Layer { direction, source })?;
                write_frame(write, codec, &payload, direction).await?;
                trace!(%direction, len = payload.len(), "message forwarded");
            }
            HookAction::Drop => {
                debug!(%direction, "hook dropped message");
            }
            HookAction::Terminate => {
                return Ok(RelayEnd::Terminated);
            }
        }
    }
}

async fn read_one_frame(
    read: &mut OwnedReadHalf,
    decoder: &mut StreamDecoder,
    direction: Direction,
) -> Result<Option<Frame>, ProxyRelayError> {
    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => return Ok(Some(frame)),
            Ok(None) => {}
            Err(source) => return Err(ProxyRelayError::Framing { direction, source }),
        }

        let n = read
            .read_buf(decoder.buffer_mut())
            .await
            .map_err(|source| ProxyRelayError::Io { direction, source })?;

        if n == 0 {
            decoder
                .finish()
                .map_err(|source| ProxyRelayError::Framing { direction, source })?;
            return Ok(None);
        }
    }
}

async fn write_frame(
    write: &mut OwnedWriteHalf,
    codec: &FrameCodec,
    payload: &[u8],
    direction: Direction,
) -> Result<(), ProxyRelayError> {
    let wire = codec
        .encode(payload)
        .map_err(|source| ProxyRelayError::Framing { direction, source })?;
    write
        .write_all(&wire)
        .await
        .map_err(|source| ProxyRelayError::Io { direction, source })
}
