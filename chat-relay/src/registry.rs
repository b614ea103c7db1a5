use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::DeliveryError;

pub type Identity = String;
pub type ConnectionId = u64;

/// Sending end of one connection's outbound queue.
///
/// Cloning is cheap; all clones feed the same writer task. Sending never
/// waits: a full or closed queue is reported immediately.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

impl PeerHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<String>) -> Self {
        Self { id, outbound }
    }

    /// Creates a handle together with the receiver its writer task drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn send(&self, frame: String) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Who is online right now.
///
/// Every method takes the lock for a single map operation and releases it
/// before returning, so callers never hold it across I/O.
#[derive(Debug)]
pub struct Registry {
    connections: Mutex<HashMap<Identity, PeerHandle>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Inserts `handle` under `identity`, returning whatever it displaced.
    ///
    /// The displaced handle is not closed; it just stops receiving broadcasts.
    pub fn register(&self, identity: &str, handle: PeerHandle) -> Option<PeerHandle> {
        let connection = handle.id();
        let displaced = self.lock().insert(identity.to_owned(), handle);
        match &displaced {
            Some(previous) => info!(
                %identity,
                connection,
                displaced = previous.id(),
                "identity re-registered, replacing previous connection"
            ),
            None => debug!(%identity, connection, "identity registered"),
        }
        displaced
    }

    pub fn unregister(&self, identity: &str) -> Option<PeerHandle> {
        self.lock().remove(identity)
    }

    /// Removes `identity` only while it still points at `connection`.
    ///
    /// A session whose entry was overwritten must not evict its successor.
    pub fn release(&self, identity: &str, connection: ConnectionId) -> bool {
        let mut connections = self.lock();
        match connections.get(identity) {
            Some(handle) if handle.id() == connection => {
                connections.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> Vec<(Identity, PeerHandle)> {
        self.lock()
            .iter()
            .map(|(identity, handle)| (identity.clone(), handle.clone()))
            .collect()
    }

    pub fn get(&self, identity: &str) -> Option<PeerHandle> {
        self.lock().get(identity).cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<_> = self.lock().keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, PeerHandle>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
