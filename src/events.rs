//! Event notification for reconciliation outcomes.
//!
//! Publishes cluster-significant reconciliation events over a broadcast
//! channel so operator tooling and alerting can react without polling.
//! There is no synchronous caller waiting on a pass; events are the only
//! push-style signal the core emits.

use crate::types::{ContainerId, NodeId, PendingOpType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// A reconciliation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileEvent {
    /// No replica of any kind remains; operator intervention required.
    ContainerUnrecoverable {
        container: ContainerId,
        replica_count: usize,
    },
    /// A replicate command was dispatched for the container.
    ReplicationScheduled {
        container: ContainerId,
        target: NodeId,
    },
    /// A replica delete command was dispatched.
    ReplicaDeletionScheduled {
        container: ContainerId,
        node: NodeId,
    },
    /// A pending op went unconfirmed past its deadline and was dropped.
    PendingOpExpired {
        container: ContainerId,
        node: NodeId,
        op_type: PendingOpType,
    },
    /// This instance lost leadership mid-pass.
    LeadershipLost { container: ContainerId },
}

/// Timestamped event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: ReconcileEvent,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast bus for reconciliation events.
///
/// Slow subscribers may observe lagged receives; events are advisory and
/// carry no reconciliation state.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that will
    /// receive it; zero subscribers is not an error.
    pub fn publish(&self, event: ReconcileEvent) -> usize {
        debug!(event = ?event, "Publishing reconcile event");
        let envelope = EventEnvelope {
            event,
            timestamp: Utc::now(),
        };
        self.sender.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let delivered = bus.publish(ReconcileEvent::ContainerUnrecoverable {
            container: ContainerId(1),
            replica_count: 0,
        });
        assert_eq!(delivered, 1);

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(
            envelope.event,
            ReconcileEvent::ContainerUnrecoverable {
                container: ContainerId(1),
                ..
            }
        ));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        let delivered = bus.publish(ReconcileEvent::LeadershipLost {
            container: ContainerId(9),
        });
        assert_eq!(delivered, 0);
    }
}
