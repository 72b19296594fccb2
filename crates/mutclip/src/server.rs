//! `MutclipServer` builder and server loop.
//!
//! This is the entry point for running a mutclip server. It ties together
//! all the layers: HTTP/WebSocket → protocol → router → clip.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use mutclip_clipboard::{ClipConfig, ClipRegistry};
use mutclip_protocol::{BincodeCodec, Codec};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::handler::{self, AppState};
use crate::{MutclipError, ServerConfig};

/// Builder for configuring and starting a mutclip server.
///
/// # Example
///
/// ```rust,no_run
/// use mutclip::prelude::*;
///
/// # async fn run() -> Result<(), MutclipError> {
/// let server = MutclipServer::builder()
///     .bind("127.0.0.1:5000")
///     .allowed_origins(["localhost"])
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MutclipServerBuilder {
    config: ServerConfig,
}

impl MutclipServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration, e.g. with
    /// [`ServerConfig::from_env`].
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Restricts WebSocket origins to these hostnames.
    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn conn_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.conn_idle_timeout = timeout;
        self
    }

    pub fn clip_config(mut self, config: ClipConfig) -> Self {
        self.config.clip = config;
        self
    }

    /// Binds the listener, using [`BincodeCodec`] on the wire.
    pub async fn build(self) -> Result<MutclipServer<BincodeCodec>, MutclipError> {
        self.build_with_codec(BincodeCodec).await
    }

    /// Binds the listener with a custom codec.
    pub async fn build_with_codec<C: Codec>(
        self,
        codec: C,
    ) -> Result<MutclipServer<C>, MutclipError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;

        let state = Arc::new(AppState {
            registry: ClipRegistry::new(self.config.clip.clone()),
            config: self.config,
            codec,
            shutdown: CancellationToken::new(),
        });

        Ok(MutclipServer { listener, state })
    }
}

/// A bound mutclip server.
///
/// Call [`run()`](Self::run) to start serving.
pub struct MutclipServer<C: Codec> {
    listener: TcpListener,
    state: Arc<AppState<C>>,
}

impl MutclipServer<BincodeCodec> {
    /// Creates a new builder.
    pub fn builder() -> MutclipServerBuilder {
        MutclipServerBuilder::new()
    }
}

impl<C: Codec> MutclipServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The registry of live clips.
    pub fn registry(&self) -> &ClipRegistry {
        &self.state.registry
    }

    /// Cancelling this token stops the server: every clip and connection
    /// ends and [`run()`](Self::run) returns.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    fn app(&self) -> axum::Router {
        axum::Router::new()
            .route("/newclip", get(handler::newclip::<C>))
            .route("/check/{id}", get(handler::check::<C>))
            .route("/ws/{id}", get(handler::ws::<C>))
            .with_state(Arc::clone(&self.state))
    }

    /// Serves HTTP and WebSocket traffic until the shutdown token is
    /// cancelled.
    pub async fn run(self) -> Result<(), MutclipError> {
        let app = self.app();
        let shutdown = self.state.shutdown.clone();

        if self.state.config.allowed_origins.is_empty() {
            warn!("no allowed origins configured, accepting WebSockets from any origin");
        }
        info!(addr = %self.listener.local_addr()?, "mutclip server running");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("mutclip server stopped");
        Ok(())
    }
}
