use std::{sync::Arc, time::Duration};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{self, Message},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    config::SessionConfig,
    dispatch::Dispatcher,
    error::{FrameError, SessionError},
    frame::{read_frame, write_frame},
    registry::{ConnectionId, Identity, PeerHandle, Registry},
};

/// How long the writer gets to flush queued frames after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registering,
    Active,
    Closing,
    Closed,
}

/// One client connection from handshake to cleanup.
///
/// The first frame names the identity; every later frame is broadcast to
/// the other registered identities. Whatever ends the read loop, the
/// registry entry is released before the session reports `Closed`.
pub struct Session {
    id: ConnectionId,
    dispatcher: Dispatcher,
    config: SessionConfig,
    cancel: CancellationToken,
    state: SessionState,
    identity: Option<Identity>,
}

impl Session {
    pub fn new(dispatcher: Dispatcher, config: SessionConfig, cancel: CancellationToken) -> Self {
        let id = dispatcher.registry().next_connection_id();
        Self {
            id,
            dispatcher,
            config,
            cancel,
            state: SessionState::Connecting,
            identity: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Performs the server side of the websocket handshake, then runs.
    pub async fn accept<S>(&mut self, stream: S) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match tokio_tungstenite::accept_async(stream).await {
            Ok(socket) => self.run(socket).await,
            Err(err) => {
                self.transition(SessionState::Closed);
                Err(SessionError::Handshake(err))
            }
        }
    }

    pub async fn run<S>(&mut self, socket: WebSocketStream<S>) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut stream) = socket.split();

        self.transition(SessionState::Registering);
        let identity = match self.await_identity(&mut stream).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                debug!(connection = self.id, "connection closed before registering");
                self.transition(SessionState::Closed);
                return Ok(());
            }
            Err(err) => {
                self.transition(SessionState::Closed);
                return Err(err);
            }
        };

        let (handle, outbound) = PeerHandle::channel(self.id, self.config.outbound_capacity);
        let mut writer = tokio::spawn(pump_outbound(
            sink,
            outbound,
            self.config.send_timeout,
            self.id,
        ));
        // Our own handle keeps the writer alive even if a newer connection
        // displaces this identity in the registry.
        let registration = Registration::new(
            self.dispatcher.registry(),
            &identity,
            handle.clone(),
            self.id,
        );
        self.identity = Some(identity.clone());
        self.transition(SessionState::Active);
        info!(connection = self.id, %identity, "client joined");

        let result = self.relay_frames(&identity, &mut stream).await;

        self.transition(SessionState::Closing);
        drop(registration);
        drop(handle);
        finish_writer(&mut writer, self.id).await;
        info!(connection = self.id, %identity, "client left");
        self.transition(SessionState::Closed);

        result
    }

    async fn await_identity<R>(&self, stream: &mut R) -> Result<Option<Identity>, SessionError>
    where
        R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let first_frame = async {
            select! {
                _ = self.cancel.cancelled() => Ok(None),
                frame = read_frame(stream) => frame,
            }
        };

        let frame = match self.config.registration_timeout {
            Some(limit) => timeout(limit, first_frame)
                .await
                .map_err(|_| SessionError::RegistrationTimeout(limit))?,
            None => first_frame.await,
        };

        match frame {
            Ok(identity) => Ok(identity),
            // A transport failure before the identity arrives is just an early close.
            Err(FrameError::Transport(err)) => {
                debug!(connection = self.id, error = %err, "transport failed before registering");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn relay_frames<R>(&self, identity: &str, stream: &mut R) -> Result<(), SessionError>
    where
        R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = select! {
                _ = self.cancel.cancelled() => {
                    debug!(connection = self.id, %identity, "session cancelled");
                    return Ok(());
                }
                frame = read_frame(stream) => frame?,
            };

            match frame {
                Some(text) => {
                    self.dispatcher.broadcast(identity, &text);
                }
                None => return Ok(()),
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        trace!(connection = self.id, from = ?self.state, to = ?next, "session state change");
        self.state = next;
    }
}

/// Registry membership scoped to the active part of a session.
///
/// Dropping it releases the entry, including when the session future is
/// dropped mid-loop.
struct Registration {
    registry: Arc<Registry>,
    identity: Identity,
    connection: ConnectionId,
}

impl Registration {
    fn new(
        registry: &Arc<Registry>,
        identity: &str,
        handle: PeerHandle,
        connection: ConnectionId,
    ) -> Self {
        registry.register(identity, handle);
        Self {
            registry: Arc::clone(registry),
            identity: identity.to_owned(),
            connection,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.release(&self.identity, self.connection) {
            debug!(connection = self.connection, identity = %self.identity, "identity unregistered");
        }
    }
}

/// Drains one connection's outbound queue onto its socket.
///
/// Ends when every handle is gone or a write fails; after that further
/// sends to this connection report `Disconnected`.
async fn pump_outbound<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<String>,
    send_timeout: Option<Duration>,
    connection: ConnectionId,
) where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let write = write_frame(&mut sink, frame);
        let result = match send_timeout {
            Some(limit) => match timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(connection, ?limit, "write to peer timed out");
                    break;
                }
            },
            None => write.await,
        };

        if let Err(error) = result {
            debug!(connection, %error, "failed to deliver frame to peer");
            break;
        }
    }

    outbound.close();
    if let Err(error) = sink.close().await {
        trace!(connection, %error, "failed to close websocket cleanly");
    }
}

async fn finish_writer(writer: &mut JoinHandle<()>, connection: ConnectionId) {
    if timeout(CLOSE_GRACE, &mut *writer).await.is_err() {
        debug!(connection, "writer still busy after close grace, aborting");
        writer.abort();
    }
}
