//! Reconciliation orchestration.
//!
//! [`ReplicationManager`] ties the pieces together: for each container it
//! expires stale pending ops, evaluates the replica set twice (with and
//! without unhealthy copies), classifies the container, and routes it to
//! the under- or over-replication handler. It also ingests replica
//! reports to confirm pending ops and free dispatcher slots.
//!
//! A full pass over a snapshot is idempotent: commands dispatched in one
//! pass become pending ops, which the next pass credits, so re-running on
//! an unchanged snapshot sends nothing.

use super::dispatcher::CommandDispatcher;
use super::over_replication::OverReplicationHandler;
use super::pending_ops::PendingOpStore;
use super::replica_count::{HealthVerdict, ReplicaCount};
use super::under_replication::UnderReplicationHandler;
use crate::cluster::{CommandSink, LeadershipHandle, NodeHealthOracle, PlacementOracle};
use crate::config::ReplicationConfig;
use crate::error::{ReplicoreError, Result};
use crate::events::{EventBus, ReconcileEvent};
use crate::types::{ContainerId, ContainerInfo, ContainerReplica, PendingOp};
use chrono::Utc;
use metrics::{counter, gauge};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of reconciling one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    pub verdict: HealthVerdict,
    pub commands_sent: usize,
}

/// Aggregate result of one pass over a container snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub processed: usize,
    pub commands_sent: usize,
    pub under_replicated: usize,
    pub over_replicated: usize,
    pub unrecoverable: usize,
}

/// Drives replica reconciliation for the cluster.
pub struct ReplicationManager {
    config: ReplicationConfig,
    leadership: Arc<LeadershipHandle>,
    pending_ops: Arc<PendingOpStore>,
    dispatcher: Arc<CommandDispatcher>,
    under: UnderReplicationHandler,
    over: OverReplicationHandler,
    events: EventBus,
}

impl ReplicationManager {
    pub fn new(
        config: ReplicationConfig,
        sink: Arc<dyn CommandSink>,
        placement: Arc<dyn PlacementOracle>,
        nodes: Arc<dyn NodeHealthOracle>,
        leadership: Arc<LeadershipHandle>,
    ) -> Self {
        let events = EventBus::default();
        let pending_ops = Arc::new(PendingOpStore::new(config.pending_op_timeout));
        let dispatcher = Arc::new(CommandDispatcher::new(
            sink,
            leadership.clone(),
            pending_ops.clone(),
            config.node_inflight_limit,
        ));
        let under = UnderReplicationHandler::new(
            dispatcher.clone(),
            placement,
            nodes.clone(),
            events.clone(),
            &config,
        );
        let over = OverReplicationHandler::new(dispatcher.clone(), nodes, events.clone());
        Self {
            config,
            leadership,
            pending_ops,
            dispatcher,
            under,
            over,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn pending_ops(&self) -> &PendingOpStore {
        &self.pending_ops
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Classify a container given its replicas and in-flight ops.
    ///
    /// The without-unhealthy view decides under-replication, so unhealthy
    /// copies never mask a redundancy loss; the with-unhealthy view
    /// decides over-replication, since unhealthy copies still hold disk.
    pub fn classify(
        &self,
        container: &ContainerInfo,
        replicas: &[ContainerReplica],
        pending: &[PendingOp],
    ) -> HealthVerdict {
        let without = self.count(container, replicas, pending, false);
        if without.is_unrecoverable() {
            return HealthVerdict::Unrecoverable;
        }
        if !without.is_sufficiently_replicated(false) {
            return HealthVerdict::UnderReplicated {
                deficit: without.deficit(),
            };
        }
        let with = self.count(container, replicas, pending, true);
        if with.surplus() > 0 {
            return HealthVerdict::OverReplicated {
                surplus: with.surplus(),
            };
        }
        HealthVerdict::Healthy
    }

    /// Reconcile one container: expire stale pending ops, classify, and
    /// dispatch repair commands as needed.
    ///
    /// A `NotLeader` error always propagates so the caller can abort the
    /// pass; any other handler failure is logged and the container is
    /// retried on the next pass.
    pub async fn process_container(
        &self,
        container: &ContainerInfo,
        replicas: &[ContainerReplica],
    ) -> Result<PassOutcome> {
        if !self.leadership.is_leader() {
            return Err(self.leadership.not_leader_error());
        }

        // Containers on their way out are not reconciled; drop any state
        // still held for them.
        if matches!(
            container.state,
            crate::types::LifecycleState::Deleting | crate::types::LifecycleState::Deleted
        ) {
            for op in self.pending_ops.clear(container.id).await {
                self.dispatcher.release(op.target);
            }
            debug!(container = %container.id, state = ?container.state, "Skipping container being deleted");
            return Ok(PassOutcome {
                verdict: HealthVerdict::Healthy,
                commands_sent: 0,
            });
        }

        self.expire_pending(container.id).await;
        let pending = self.pending_ops.list(container.id).await;

        let verdict = self.classify(container, replicas, &pending);
        let commands_sent = match verdict {
            HealthVerdict::Healthy => 0,
            HealthVerdict::Unrecoverable => {
                counter!("replicore_unrecoverable_containers_total").increment(1);
                warn!(container = %container.id, "Container has no usable replicas");
                self.events.publish(ReconcileEvent::ContainerUnrecoverable {
                    container: container.id,
                    replica_count: replicas.len(),
                });
                0
            }
            HealthVerdict::UnderReplicated { deficit } => {
                debug!(container = %container.id, deficit = deficit, "Container under-replicated");
                let count = self.count(container, replicas, &pending, false);
                self.run_handler(container.id, self.under.process(&count, &pending).await)?
            }
            HealthVerdict::OverReplicated { surplus } => {
                debug!(container = %container.id, surplus = surplus, "Container over-replicated");
                let count = self.count(container, replicas, &pending, true);
                self.run_handler(container.id, self.over.process(&count, &pending).await)?
            }
        };

        Ok(PassOutcome {
            verdict,
            commands_sent,
        })
    }

    /// Run only the under-replication handler for a container, for
    /// callers that already classified it (e.g. a priority queue).
    pub async fn reconcile_under_replicated(
        &self,
        container: &ContainerInfo,
        replicas: &[ContainerReplica],
    ) -> Result<usize> {
        self.expire_pending(container.id).await;
        let pending = self.pending_ops.list(container.id).await;
        let count = self.count(container, replicas, &pending, false);
        self.run_handler(container.id, self.under.process(&count, &pending).await)
    }

    /// Run only the over-replication handler for a container.
    pub async fn reconcile_over_replicated(
        &self,
        container: &ContainerInfo,
        replicas: &[ContainerReplica],
    ) -> Result<usize> {
        self.expire_pending(container.id).await;
        let pending = self.pending_ops.list(container.id).await;
        let count = self.count(container, replicas, &pending, true);
        self.run_handler(container.id, self.over.process(&count, &pending).await)
    }

    /// Reconcile a snapshot of containers. Aborts on leadership loss;
    /// per-container handler failures are logged and skipped.
    pub async fn run_pass(
        &self,
        snapshot: &[(ContainerInfo, Vec<ContainerReplica>)],
    ) -> Result<PassSummary> {
        let mut summary = PassSummary::default();
        for (container, replicas) in snapshot {
            let outcome = self.process_container(container, replicas).await?;
            summary.processed += 1;
            summary.commands_sent += outcome.commands_sent;
            match outcome.verdict {
                HealthVerdict::UnderReplicated { .. } => summary.under_replicated += 1,
                HealthVerdict::OverReplicated { .. } => summary.over_replicated += 1,
                HealthVerdict::Unrecoverable => summary.unrecoverable += 1,
                HealthVerdict::Healthy => {}
            }
        }

        gauge!("replicore_under_replicated_containers").set(summary.under_replicated as f64);
        gauge!("replicore_over_replicated_containers").set(summary.over_replicated as f64);
        gauge!("replicore_unrecoverable_containers").set(summary.unrecoverable as f64);
        info!(
            processed = summary.processed,
            commands = summary.commands_sent,
            under = summary.under_replicated,
            over = summary.over_replicated,
            unrecoverable = summary.unrecoverable,
            "Reconciliation pass complete"
        );
        Ok(summary)
    }

    /// Ingest a fresh replica report for a container, confirming pending
    /// ops whose effect is now visible and freeing their dispatcher slots.
    /// Returns the number of ops confirmed.
    pub async fn on_replica_report(
        &self,
        container: ContainerId,
        replicas: &[ContainerReplica],
    ) -> usize {
        let confirmed = self.pending_ops.complete(container, replicas).await;
        for op in &confirmed {
            self.dispatcher.release(op.target);
            debug!(
                container = %container,
                node = op.target,
                op_type = ?op.op_type,
                "Pending op confirmed by replica report"
            );
        }
        counter!("replicore_pending_ops_confirmed_total").increment(confirmed.len() as u64);
        confirmed.len()
    }

    async fn expire_pending(&self, container: ContainerId) {
        for op in self.pending_ops.prune_expired(container, Utc::now()).await {
            self.dispatcher.release(op.target);
            counter!("replicore_pending_ops_expired_total").increment(1);
            warn!(
                container = %container,
                node = op.target,
                op_type = ?op.op_type,
                "Pending op expired without confirmation"
            );
            self.events.publish(ReconcileEvent::PendingOpExpired {
                container,
                node: op.target,
                op_type: op.op_type,
            });
        }
    }

    fn count(
        &self,
        container: &ContainerInfo,
        replicas: &[ContainerReplica],
        pending: &[PendingOp],
        count_unhealthy: bool,
    ) -> ReplicaCount {
        ReplicaCount::new(
            container,
            replicas,
            pending,
            self.config.min_healthy_for_maintenance,
            count_unhealthy,
        )
    }

    /// NotLeader aborts the pass; anything else is retried next pass.
    fn run_handler(&self, container: ContainerId, result: Result<usize>) -> Result<usize> {
        match result {
            Ok(sent) => Ok(sent),
            Err(e @ ReplicoreError::NotLeader { .. }) => {
                self.events
                    .publish(ReconcileEvent::LeadershipLost { container });
                Err(e)
            }
            Err(e) => {
                warn!(container = %container, error = %e, "Reconciliation handler failed");
                Ok(0)
            }
        }
    }
}
