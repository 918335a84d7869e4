//! Repair of under-replicated containers.
//!
//! Given an evaluation that found a replica deficit, this handler picks
//! source replicas to copy from, asks the placement oracle for target
//! nodes, and dispatches one replication command per target. It defers
//! entirely when in-flight adds already cover the deficit, and it never
//! copies from a replica that is scheduled for deletion or hosted on a
//! node that stopped heartbeating.

use super::dispatcher::CommandDispatcher;
use super::replica_count::ReplicaCount;
use crate::cluster::{NodeHealthOracle, NodeStatus, PlacementOracle};
use crate::config::ReplicationConfig;
use crate::error::{ReplicoreError, Result};
use crate::events::{EventBus, ReconcileEvent};
use crate::types::{NodeCommand, NodeId, PendingOp, PendingOpType, ReplicaState};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Issues replication commands for containers with too few replicas.
pub struct UnderReplicationHandler {
    dispatcher: Arc<CommandDispatcher>,
    placement: Arc<dyn PlacementOracle>,
    nodes: Arc<dyn NodeHealthOracle>,
    events: EventBus,
    max_container_size: u64,
    push_replication: bool,
    min_healthy_for_maintenance: usize,
}

impl UnderReplicationHandler {
    pub fn new(
        dispatcher: Arc<CommandDispatcher>,
        placement: Arc<dyn PlacementOracle>,
        nodes: Arc<dyn NodeHealthOracle>,
        events: EventBus,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            dispatcher,
            placement,
            nodes,
            events,
            max_container_size: config.max_container_size,
            push_replication: config.push_replication,
            min_healthy_for_maintenance: config.min_healthy_for_maintenance,
        }
    }

    /// Repair the deficit described by `count`. Returns the number of
    /// commands dispatched; zero when nothing needs to be done yet.
    ///
    /// `count` must be the without-unhealthy evaluation, so that unhealthy
    /// copies are repaired around rather than trusted.
    pub async fn process(&self, count: &ReplicaCount, pending_ops: &[PendingOp]) -> Result<usize> {
        let container = count.container();

        if count.is_sufficiently_replicated(true) {
            debug!(
                container = %container.id,
                pending_adds = count.pending_adds(),
                "Deficit already covered by in-flight adds"
            );
            return Ok(0);
        }
        if count.is_unrecoverable() {
            warn!(container = %container.id, "No replicas left to copy from");
            return Ok(0);
        }

        // With no healthy copy anywhere, defer entirely once unhealthy
        // copies plus in-flight adds reach the target.
        if count.healthy_replica_count() == 0 {
            let with_unhealthy = ReplicaCount::new(
                container,
                count.replicas(),
                pending_ops,
                self.min_healthy_for_maintenance,
                true,
            );
            if with_unhealthy.is_sufficiently_replicated(true) {
                debug!(
                    container = %container.id,
                    "Unhealthy copies and in-flight adds cover the deficit"
                );
                return Ok(0);
            }
        }

        let mut needed = count.additional_needed();
        if needed == 0 {
            return Ok(0);
        }
        // With no healthy copy anywhere, every new replica must come from
        // an unhealthy one. Copy it once and re-evaluate on the next pass
        // rather than fanning a possibly corrupt replica out N times.
        if count.healthy_replica_count() == 0 {
            needed = 1;
        }

        let sources = self.select_sources(count, pending_ops);
        if sources.is_empty() {
            // Expected when every copy sits on an unreachable node or is
            // already scheduled for deletion; nothing useful to do yet.
            warn!(container = %container.id, "No eligible source replicas");
            return Ok(0);
        }

        let mut exclude: HashSet<NodeId> = count.replicas().iter().map(|r| r.node_id).collect();
        exclude.extend(pending_ops.iter().map(|op| op.target));

        // A target must fit the full container even if reports lag behind.
        let min_free_bytes = container.used_bytes.max(self.max_container_size);
        let targets = self
            .placement
            .choose_targets(&exclude, None, needed, min_free_bytes)
            .await?;
        if targets.len() < needed {
            warn!(
                container = %container.id,
                requested = needed,
                placed = targets.len(),
                "Placement returned fewer targets than requested"
            );
        }

        let mut sent = 0;
        for target in targets {
            let result = if self.push_replication {
                self.dispatcher
                    .send_throttled_replication(container, &sources, target, 0)
                    .await
            } else {
                self.dispatcher
                    .send(
                        NodeCommand::Replicate {
                            container_id: container.id,
                            sources: sources.clone(),
                        },
                        container,
                        target,
                    )
                    .await
            };
            match result {
                Ok(()) => {
                    sent += 1;
                    self.events.publish(ReconcileEvent::ReplicationScheduled {
                        container: container.id,
                        target,
                    });
                    info!(container = %container.id, target = target, "Scheduled replication");
                }
                // The target cannot take more work right now; the next
                // pass will try a different one.
                Err(ReplicoreError::TargetOverloaded { node, .. }) => {
                    warn!(container = %container.id, target = node, "Replication target overloaded, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    /// Eligible source nodes, freshest first.
    ///
    /// Healthy closed/quasi-closed replicas are preferred; unhealthy ones
    /// are only used when no healthy copy exists at all. Replicas slated
    /// for deletion or hosted on non-heartbeating nodes never qualify.
    fn select_sources(&self, count: &ReplicaCount, pending_ops: &[PendingOp]) -> Vec<NodeId> {
        let pending_delete: HashSet<NodeId> = pending_ops
            .iter()
            .filter(|op| op.op_type == PendingOpType::Delete)
            .map(|op| op.target)
            .collect();

        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for replica in count.replicas() {
            if pending_delete.contains(&replica.node_id) {
                continue;
            }
            if !matches!(
                self.nodes.node_status(replica.node_id),
                Ok(NodeStatus::Healthy)
            ) {
                continue;
            }
            match replica.state {
                ReplicaState::Closed | ReplicaState::QuasiClosed => {
                    healthy.push((replica.sequence_id, replica.node_id));
                }
                ReplicaState::Unhealthy => {
                    unhealthy.push((replica.sequence_id, replica.node_id));
                }
                _ => {}
            }
        }

        // Fall back to unhealthy data only when the container has no
        // healthy copy at all. Healthy copies that merely failed the node
        // filters yield zero sources instead; repairing from a possibly
        // corrupt replica is worse than waiting for the node to return.
        let mut picked = if count.healthy_replica_count() == 0 {
            unhealthy
        } else {
            healthy
        };
        picked.sort_by(|a, b| b.0.cmp(&a.0));
        picked.into_iter().map(|(_, node)| node).collect()
    }
}
