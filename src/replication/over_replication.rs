//! Removal of excess container replicas.
//!
//! Given an evaluation that found a surplus, this handler picks the least
//! valuable replicas and dispatches delete commands, capped so that
//! in-flight deletes are never doubled up. Unhealthy copies go first,
//! then copies on the fullest nodes, then the oldest copy (lowest
//! sequence id). The handler never deletes below the policy target and
//! never touches replicas parked on maintenance nodes.

use super::dispatcher::CommandDispatcher;
use super::replica_count::{state_matches, ReplicaCount};
use crate::cluster::{NodeHealthOracle, NodeStatus};
use crate::error::{ReplicoreError, Result};
use crate::events::{EventBus, ReconcileEvent};
use crate::types::{ContainerReplica, LifecycleState, NodeId, PendingOp, PendingOpType, ReplicaState};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Issues delete commands for containers with too many replicas.
pub struct OverReplicationHandler {
    dispatcher: Arc<CommandDispatcher>,
    nodes: Arc<dyn NodeHealthOracle>,
    events: EventBus,
}

impl OverReplicationHandler {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        nodes: Arc<dyn NodeHealthOracle>,
        events: EventBus,
    ) -> Self {
        Self {
            dispatcher,
            nodes,
            events,
        }
    }

    /// Remove the surplus described by `count`. Returns the number of
    /// delete commands dispatched.
    ///
    /// `count` must be the with-unhealthy evaluation: an unhealthy copy
    /// still occupies disk, so it both contributes to the surplus and is
    /// the first candidate for removal.
    pub async fn process(&self, count: &ReplicaCount, pending_ops: &[PendingOp]) -> Result<usize> {
        let container = count.container();

        // surplus() is net of pending deletes, so in-flight removals are
        // never doubled up.
        let mut excess = count.surplus();
        if excess == 0 {
            debug!(container = %container.id, "Surplus already covered by in-flight deletes");
            return Ok(0);
        }

        let pending_delete: HashSet<NodeId> = pending_ops
            .iter()
            .filter(|op| op.op_type == PendingOpType::Delete)
            .map(|op| op.target)
            .collect();

        let mut healthy_remaining = count
            .replicas()
            .iter()
            .filter(|r| {
                is_matching(container.state, r)
                    && !r.node_state.is_maintenance()
                    && !pending_delete.contains(&r.node_id)
            })
            .count();

        let mut candidates: Vec<&ContainerReplica> = count
            .replicas()
            .iter()
            .filter(|r| {
                !pending_delete.contains(&r.node_id)
                    && !r.node_state.is_maintenance()
                    && matches!(self.nodes.node_status(r.node_id), Ok(NodeStatus::Healthy))
            })
            .collect();
        // Unhealthy first, then the fullest node (frees the most pressure;
        // nodes without a capacity report sort last), then oldest data.
        candidates.sort_by_key(|r| {
            let available = self
                .nodes
                .node_space(r.node_id)
                .map(|s| s.available())
                .unwrap_or(u64::MAX);
            (r.state != ReplicaState::Unhealthy, available, r.sequence_id)
        });

        let mut sent = 0;
        for replica in candidates {
            if excess == 0 {
                break;
            }
            let matching = is_matching(container.state, replica);
            if matching && healthy_remaining <= count.required_replicas() {
                continue;
            }

            match self.dispatcher.send_delete(container, replica.node_id).await {
                Ok(()) => {
                    excess -= 1;
                    sent += 1;
                    if matching {
                        healthy_remaining -= 1;
                    }
                    self.events
                        .publish(ReconcileEvent::ReplicaDeletionScheduled {
                            container: container.id,
                            node: replica.node_id,
                        });
                    info!(
                        container = %container.id,
                        node = replica.node_id,
                        replica_state = ?replica.state,
                        "Scheduled replica deletion"
                    );
                }
                Err(ReplicoreError::TargetOverloaded { node, .. }) => {
                    warn!(container = %container.id, node = node, "Delete target overloaded, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

}

/// A healthy replica whose state matches its container's state grouping.
fn is_matching(container: LifecycleState, r: &ContainerReplica) -> bool {
    r.state != ReplicaState::Unhealthy && state_matches(container, r.state)
}
