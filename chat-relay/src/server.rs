use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::{RelayConfig, SessionConfig},
    dispatch::Dispatcher,
    registry::Registry,
    session::Session,
};

/// Accepts websocket clients and gives each its own relay session.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: SessionConfig,
    sessions: CancellationToken,
}

impl RelayServer {
    pub fn new(listener: TcpListener, config: SessionConfig) -> Self {
        Self::with_registry(listener, config, Arc::new(Registry::new()))
    }

    pub fn with_registry(
        listener: TcpListener,
        config: SessionConfig,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            listener,
            registry,
            config,
            sessions: CancellationToken::new(),
        }
    }

    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config.session.clone()))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer {
            listener,
            registry,
            config,
            sessions,
        } = self;
        let dispatcher = Dispatcher::new(registry);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(online = dispatcher.registry().len(), "relay shutting down");
                    sessions.cancel();
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &dispatcher, &config, &sessions);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    dispatcher: &Dispatcher,
    config: &SessionConfig,
    sessions: &CancellationToken,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, dispatcher, config, sessions),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    config: &SessionConfig,
    sessions: &CancellationToken,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%peer, error = ?err, "failed to disable nagle");
    }

    let mut session = Session::new(dispatcher.clone(), config.clone(), sessions.child_token());
    tokio::spawn(async move {
        debug!(%peer, connection = session.id(), "connection accepted");
        match session.accept(stream).await {
            Ok(()) => {}
            Err(err) if err.is_quiet() => {
                debug!(%peer, connection = session.id(), error = %err, "session ended early")
            }
            Err(err) => {
                warn!(
                    %peer,
                    connection = session.id(),
                    identity = session.identity().unwrap_or_default(),
                    error = ?err,
                    "client connection closed with error"
                )
            }
        }
    });
}
