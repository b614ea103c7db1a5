use std::{net::SocketAddr, time::Duration};

use crate::cli::{DEFAULT_LISTEN, ServerArgs};

/// Per-connection knobs shared by every session a listener spawns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Frames queued for one peer before new ones are dropped.
    pub outbound_capacity: usize,
    /// Upper bound on a single socket write to a peer.
    pub send_timeout: Option<Duration>,
    /// Upper bound on waiting for the identity frame.
    pub registration_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
            send_timeout: None,
            registration_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub session: SessionConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8765))),
            session: SessionConfig::default(),
        }
    }
}

impl From<&ServerArgs> for RelayConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            listen: args.listen,
            session: SessionConfig {
                outbound_capacity: args.outbound_capacity.max(1),
                send_timeout: args.send_timeout_ms.map(Duration::from_millis),
                registration_timeout: args.registration_timeout_secs.map(Duration::from_secs),
            },
        }
    }
}
