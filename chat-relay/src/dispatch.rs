use std::sync::Arc;

use tracing::{debug, trace};

use crate::{error::DeliveryError, registry::Registry};

/// Outcome of one broadcast, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Fans a message out to every registered identity except its sender.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Best-effort delivery. A peer that cannot take the frame right now
    /// loses it; the remaining peers are unaffected.
    pub fn broadcast(&self, sender: &str, message: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (identity, peer) in self.registry.snapshot() {
            if identity == sender {
                continue;
            }

            match peer.send(message.to_owned()) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    log_delivery_failure(sender, &identity, error);
                }
            }
        }

        trace!(
            %sender,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }
}

fn log_delivery_failure(sender: &str, recipient: &str, error: DeliveryError) {
    match error {
        DeliveryError::QueueFull => {
            debug!(%sender, %recipient, %error, "dropping message for slow peer")
        }
        DeliveryError::Disconnected => {
            debug!(%sender, %recipient, %error, "peer went away before delivery")
        }
    }
}
