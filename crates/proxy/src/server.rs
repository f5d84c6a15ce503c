//! Proxy server
//!
//! Accepts client connections on the listen address and opens one target
//! connection per client. Every accepted client becomes an independent
//! `ProxySession` task; sessions share nothing but the composition
//! registry and the stop signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tapwire_protocol::{CompositionRegistry, FrameCodec, LayerTag};

use crate::hooks::TransformHook;
use crate::session::ProxySession;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Addresses and framing for a proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen: String,
    pub target: String,
    /// Top-level layer tag riding proxied connections.
    pub variant: LayerTag,
    pub codec: FrameCodec,
}

impl ProxyConfig {
    pub fn new(listen: impl Into<String>, target: impl Into<String>, variant: LayerTag) -> Self {
        Self {
            listen: listen.into(),
            target: target.into(),
            variant,
            codec: FrameCodec::new(),
        }
    }
}

/// Intercepting proxy between a listen address and a target.
pub struct ProxyServer {
    config: ProxyConfig,
    registry: Arc<CompositionRegistry>,
    hook: Arc<dyn TransformHook>,
    sessions: Arc<DashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl ProxyServer {
    pub fn new(
        config: ProxyConfig,
        registry: Arc<CompositionRegistry>,
        hook: Arc<dyn TransformHook>,
    ) -> Self {
        Self {
            config,
            registry,
            hook,
            sessions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of sessions currently relaying.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Bind the configured listen address and serve.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.run_on(listener, shutdown).await
    }

    /// Accept clients on an already-bound listener until the stop signal
    /// fires. On stop, every live session is torn down before returning;
    /// no sockets are leaked.
    pub async fn run_on(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ProxyError> {
        info!(
            listen = %self.config.listen,
            target = %self.config.target,
            variant = self.config.variant,
            "proxy listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stop signal received, closing sessions");
                    break;
                }
                accepted = listener.accept() => {
                    let (client, addr) = accepted?;
                    self.spawn_session(client, addr, shutdown.clone()).await;
                }
            }
        }

        for entry in self.sessions.iter() {
            entry.value().abort();
        }
        self.sessions.clear();
        Ok(())
    }

    async fn spawn_session(
        &self,
        client: TcpStream,
        addr: std::net::SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, client = %addr, "client accepted");

        let target = match TcpStream::connect(&self.config.target).await {
            Ok(target) => target,
            Err(e) => {
                error!(
                    session = id,
                    target = %self.config.target,
                    error = %e,
                    "target connection failed, dropping client"
                );
                return;
            }
        };

        if let Err(e) = client.set_nodelay(true).and_then(|()| target.set_nodelay(true)) {
            warn!(session = id, error = %e, "could not set nodelay");
        }

        let session = ProxySession::new(
            id,
            client,
            target,
            self.config.variant,
            self.config.codec.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.hook),
            shutdown,
        );

        let sessions = Arc::clone(&self.sessions);
        let handle = tokio::spawn(async move {
            if let Err(e) = session.run().await {
                warn!(session = id, error = %e, "session ended with error");
            }
            sessions.remove(&id);
        });

        self.sessions.insert(id, handle);
    }
}
