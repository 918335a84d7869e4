//! Replica counting and redundancy verdicts.
//!
//! [`ReplicaCount`] is a pure snapshot evaluator: given a container, its
//! reported replicas, and the pending ops already in flight, it answers
//! whether the container is sufficiently replicated. It is always built
//! twice per decision, once counting UNHEALTHY replicas as valid and once
//! not, so handlers can distinguish "truly fine", "fine only via risky
//! unhealthy copies", and "unrecoverable".

use crate::types::{
    ContainerInfo, ContainerReplica, LifecycleState, PendingOp, PendingOpType, ReplicaState,
};
use std::collections::HashSet;

/// Redundancy verdict for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Replica set matches the policy.
    Healthy,
    /// Fewer available replicas than the policy requires.
    UnderReplicated { deficit: usize },
    /// More available replicas than the policy requires.
    OverReplicated { surplus: usize },
    /// No replica of any kind remains; nothing to replicate from.
    Unrecoverable,
}

impl HealthVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy)
    }

    /// True when a handler should be invoked for this verdict.
    pub fn needs_commands(&self) -> bool {
        matches!(
            self,
            HealthVerdict::UnderReplicated { .. } | HealthVerdict::OverReplicated { .. }
        )
    }
}

/// Does a replica's reported state match its container's state grouping?
///
/// An open (open/closing) container expects open/closing replicas; a
/// quasi-closed or closed container expects closed/quasi-closed replicas.
/// Containers being deleted have no matching state; reconciliation skips
/// them.
pub fn state_matches(container: LifecycleState, replica: ReplicaState) -> bool {
    match container {
        LifecycleState::Open | LifecycleState::Closing => {
            matches!(replica, ReplicaState::Open | ReplicaState::Closing)
        }
        LifecycleState::QuasiClosed | LifecycleState::Closed => {
            matches!(replica, ReplicaState::Closed | ReplicaState::QuasiClosed)
        }
        LifecycleState::Deleting | LifecycleState::Deleted => false,
    }
}

/// Snapshot evaluation of a container's replica set against its policy.
#[derive(Debug, Clone)]
pub struct ReplicaCount {
    container: ContainerInfo,
    /// All replicas except DELETED ones.
    replicas: Vec<ContainerReplica>,
    required: usize,
    /// Healthy state-matching replicas on in-service nodes.
    matching: usize,
    /// UNHEALTHY replicas on in-service nodes.
    unhealthy: usize,
    /// Healthy state-matching replicas on maintenance nodes.
    maintenance: usize,
    /// Pending adds targeting nodes that do not already host a replica.
    pending_adds: usize,
    /// Pending deletes on nodes that currently host a replica.
    pending_deletes: usize,
    min_healthy_for_maintenance: usize,
    count_unhealthy: bool,
}

impl ReplicaCount {
    pub fn new(
        container: &ContainerInfo,
        replicas: &[ContainerReplica],
        pending_ops: &[PendingOp],
        min_healthy_for_maintenance: usize,
        count_unhealthy: bool,
    ) -> Self {
        let kept: Vec<ContainerReplica> = replicas
            .iter()
            .filter(|r| r.state != ReplicaState::Deleted)
            .cloned()
            .collect();

        let hosting: HashSet<_> = kept.iter().map(|r| r.node_id).collect();

        let mut pending_adds = 0;
        let mut pending_deletes = 0;
        for op in pending_ops {
            match op.op_type {
                // An add to a node that already hosts a replica brings no
                // new redundancy.
                PendingOpType::Add if !hosting.contains(&op.target) => pending_adds += 1,
                PendingOpType::Delete if hosting.contains(&op.target) => pending_deletes += 1,
                _ => {}
            }
        }

        let mut matching = 0;
        let mut unhealthy = 0;
        let mut maintenance = 0;
        for replica in &kept {
            let on_maintenance_node = replica.node_state.is_maintenance();
            if replica.state == ReplicaState::Unhealthy {
                if !on_maintenance_node {
                    unhealthy += 1;
                }
            } else if state_matches(container.state, replica.state) {
                if on_maintenance_node {
                    maintenance += 1;
                } else {
                    matching += 1;
                }
            }
        }

        Self {
            container: container.clone(),
            replicas: kept,
            required: container.required_replicas(),
            matching,
            unhealthy,
            maintenance,
            pending_adds,
            pending_deletes,
            min_healthy_for_maintenance,
            count_unhealthy,
        }
    }

    pub fn container(&self) -> &ContainerInfo {
        &self.container
    }

    /// Replicas in the snapshot, DELETED ones excluded.
    pub fn replicas(&self) -> &[ContainerReplica] {
        &self.replicas
    }

    pub fn required_replicas(&self) -> usize {
        self.required
    }

    pub fn pending_adds(&self) -> usize {
        self.pending_adds
    }

    pub fn pending_deletes(&self) -> usize {
        self.pending_deletes
    }

    /// Healthy (non-UNHEALTHY) state-matching replicas, including those on
    /// maintenance nodes.
    pub fn healthy_replica_count(&self) -> usize {
        self.matching + self.maintenance
    }

    /// Replicas counted as valid copies for this evaluation, net of
    /// pending deletes. Maintenance-hosted copies are not available.
    pub fn available_replicas(&self) -> usize {
        let counted = self.matching
            + if self.count_unhealthy {
                self.unhealthy
            } else {
                0
            };
        counted.saturating_sub(self.pending_deletes)
    }

    /// The replica count that must be available in-service right now.
    ///
    /// With copies parked on maintenance nodes, full redundancy is relaxed
    /// down to the configured maintenance floor as long as the maintenance
    /// copies make up the difference.
    fn effective_required(&self) -> usize {
        if self.maintenance == 0 {
            self.required
        } else {
            let floor = self.required.min(self.min_healthy_for_maintenance);
            self.required.saturating_sub(self.maintenance).max(floor)
        }
    }

    /// True iff enough valid replicas are (or, with `include_pending_adds`,
    /// will be) available to satisfy the policy.
    pub fn is_sufficiently_replicated(&self, include_pending_adds: bool) -> bool {
        let mut available = self.available_replicas();
        if include_pending_adds {
            available += self.pending_adds;
        }
        available >= self.effective_required()
    }

    /// Additional replicas that must be created, crediting pending adds.
    pub fn additional_needed(&self) -> usize {
        self.effective_required()
            .saturating_sub(self.available_replicas() + self.pending_adds)
    }

    /// Shortfall ignoring in-flight adds; what the verdict reports.
    pub fn deficit(&self) -> usize {
        self.effective_required()
            .saturating_sub(self.available_replicas())
    }

    /// Valid replicas beyond the policy target, net of pending deletes so
    /// in-flight removals are not doubled up.
    pub fn surplus(&self) -> usize {
        self.available_replicas().saturating_sub(self.required)
    }

    /// No replica of any kind remains to copy from.
    pub fn is_unrecoverable(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Verdict for this single evaluation. The classifier combines the
    /// with- and without-unhealthy views instead of calling this directly.
    pub fn verdict(&self) -> HealthVerdict {
        if self.is_unrecoverable() {
            HealthVerdict::Unrecoverable
        } else if !self.is_sufficiently_replicated(false) {
            HealthVerdict::UnderReplicated {
                deficit: self.deficit(),
            }
        } else if self.surplus() > 0 {
            HealthVerdict::OverReplicated {
                surplus: self.surplus(),
            }
        } else {
            HealthVerdict::Healthy
        }
    }
}
