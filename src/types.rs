//! Core type definitions for the replicore reconciliation core.
//!
//! This module contains the fundamental data types used throughout the
//! crate: container metadata, replica reports, pending operations, and the
//! abstract commands the reconciler emits.
//!
//! # Key Types
//!
//! - [`ContainerInfo`]: the control plane's view of one data container
//! - [`ContainerReplica`]: one storage node's reported copy of a container
//! - [`PendingOp`]: an in-flight add/delete not yet confirmed by a report
//! - [`NodeCommand`]: abstract command payload sent to a storage node
//!
//! # Monotonic updates
//!
//! `used_bytes`, `key_count`, `sequence_id` and `delete_txn_id` only ever
//! advance: the update methods take the maximum of the old and new value.
//! A closed container's `sequence_id` is immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a storage node in the cluster.
pub type NodeId = u64;

/// Unique identifier for a data container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Container lifecycle state.
///
/// `Open` and `Closing` are jointly treated as "open" for write purposes.
/// A replica's state may legitimately diverge from its container's state
/// due to report lag or node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Open,
    Closing,
    QuasiClosed,
    Closed,
    Deleting,
    Deleted,
}

impl LifecycleState {
    pub fn is_open(&self) -> bool {
        matches!(self, LifecycleState::Open | LifecycleState::Closing)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, LifecycleState::Deleted)
    }
}

/// Redundancy policy for a container.
///
/// Only the replicated-copy model is implemented; the enum leaves room for
/// erasure-coded schemes without touching call sites that only need the
/// required replica count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationPolicy {
    /// Fixed number of full copies.
    Replicated { factor: usize },
}

impl ReplicationPolicy {
    /// Number of replicas the policy requires.
    pub fn required_replicas(&self) -> usize {
        match self {
            ReplicationPolicy::Replicated { factor } => *factor,
        }
    }
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        ReplicationPolicy::Replicated { factor: 3 }
    }
}

/// The control plane's view of one data container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub state: LifecycleState,
    pub policy: ReplicationPolicy,
    pub used_bytes: u64,
    pub key_count: u64,
    /// Monotonic write-order marker. Immutable once the container closes.
    pub sequence_id: u64,
    /// Latest pending block-delete epoch for this container.
    pub delete_txn_id: u64,
    pub owner: String,
    pub state_enter_time: DateTime<Utc>,
}

impl ContainerInfo {
    pub fn new(id: ContainerId, state: LifecycleState, policy: ReplicationPolicy) -> Self {
        Self {
            id,
            state,
            policy,
            used_bytes: 0,
            key_count: 0,
            sequence_id: 0,
            delete_txn_id: 0,
            owner: String::new(),
            state_enter_time: Utc::now(),
        }
    }

    /// Check if the container is open for writes (open or closing).
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    /// Number of replicas this container's policy requires.
    pub fn required_replicas(&self) -> usize {
        self.policy.required_replicas()
    }

    /// Advance the sequence id. Only legal while the container is open or
    /// quasi-closed; a closed container's sequence id never changes.
    pub fn update_sequence_id(&mut self, sequence_id: u64) {
        debug_assert!(
            self.is_open() || self.state == LifecycleState::QuasiClosed,
            "sequence id update on closed container {}",
            self.id
        );
        if self.is_open() || self.state == LifecycleState::QuasiClosed {
            self.sequence_id = self.sequence_id.max(sequence_id);
        }
    }

    /// Advance the delete transaction id (never decreases).
    pub fn update_delete_txn_id(&mut self, txn_id: u64) {
        self.delete_txn_id = self.delete_txn_id.max(txn_id);
    }

    /// Advance the used byte count (never decreases).
    pub fn update_used_bytes(&mut self, used_bytes: u64) {
        self.used_bytes = self.used_bytes.max(used_bytes);
    }

    /// Advance the key count (never decreases).
    pub fn update_key_count(&mut self, key_count: u64) {
        self.key_count = self.key_count.max(key_count);
    }
}

/// State of a single replica, as reported by its hosting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    Open,
    Closing,
    QuasiClosed,
    Closed,
    Unhealthy,
    Deleted,
}

/// Operational state of the node hosting a replica, carried on the report.
///
/// Replicas on nodes in maintenance still exist but must not be counted as
/// available redundancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOperationalState {
    InService,
    EnteringMaintenance,
    InMaintenance,
    Decommissioned,
}

impl NodeOperationalState {
    pub fn is_maintenance(&self) -> bool {
        matches!(
            self,
            NodeOperationalState::EnteringMaintenance | NodeOperationalState::InMaintenance
        )
    }
}

/// One storage node's copy of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerReplica {
    pub container_id: ContainerId,
    pub node_id: NodeId,
    pub state: ReplicaState,
    /// Sequence id reported by the node; may lag the container's own value.
    pub sequence_id: u64,
    pub used_bytes: u64,
    pub node_state: NodeOperationalState,
}

impl ContainerReplica {
    pub fn new(container_id: ContainerId, node_id: NodeId, state: ReplicaState) -> Self {
        Self {
            container_id,
            node_id,
            state,
            sequence_id: 0,
            used_bytes: 0,
            node_state: NodeOperationalState::InService,
        }
    }

    pub fn with_sequence_id(mut self, sequence_id: u64) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    pub fn with_node_state(mut self, node_state: NodeOperationalState) -> Self {
        self.node_state = node_state;
        self
    }
}

/// Replica set for a container, keyed by hosting node.
///
/// A node hosts at most one replica of a given container at a time.
pub type ReplicaMap = HashMap<NodeId, ContainerReplica>;

/// Build a replica map from a list of reports, keeping the last report per
/// node.
pub fn replica_map(replicas: impl IntoIterator<Item = ContainerReplica>) -> ReplicaMap {
    replicas.into_iter().map(|r| (r.node_id, r)).collect()
}

/// Type of an in-flight reconciliation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOpType {
    Add,
    Delete,
}

/// An in-flight reconciliation action not yet confirmed by a replica
/// report. Expired ops are dropped so the evaluator does not perpetually
/// treat a container as about to be fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOp {
    pub op_type: PendingOpType,
    pub target: NodeId,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl PendingOp {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// Unique identifier for a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Abstract command payload for a storage node. Wire format and transport
/// live outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCommand {
    /// Pull a replica from one of the listed source nodes, in preference
    /// order (freshest first). Sent to the target node.
    Replicate {
        container_id: ContainerId,
        sources: Vec<NodeId>,
    },
    /// Push a replica to the given node. Sent to a source node.
    PushReplica {
        container_id: ContainerId,
        to: NodeId,
    },
    /// Delete the local replica of the container. Sent to the hosting node.
    DeleteReplica { container_id: ContainerId },
}

impl NodeCommand {
    pub fn container_id(&self) -> ContainerId {
        match self {
            NodeCommand::Replicate { container_id, .. }
            | NodeCommand::PushReplica { container_id, .. }
            | NodeCommand::DeleteReplica { container_id } => *container_id,
        }
    }
}

/// A command addressed to a specific node, ready for the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchedCommand {
    pub id: CommandId,
    pub target: NodeId,
    pub command: NodeCommand,
    /// Scheduling hint for the transport layer; 0 is normal priority.
    pub priority: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lifecycle_open_grouping() {
        assert!(LifecycleState::Open.is_open());
        assert!(LifecycleState::Closing.is_open());
        assert!(!LifecycleState::QuasiClosed.is_open());
        assert!(!LifecycleState::Closed.is_open());
    }

    #[test]
    fn test_monotonic_updates() {
        let mut container = ContainerInfo::new(
            ContainerId(1),
            LifecycleState::Open,
            ReplicationPolicy::Replicated { factor: 3 },
        );

        container.update_used_bytes(100);
        container.update_used_bytes(50);
        assert_eq!(container.used_bytes, 100);

        container.update_delete_txn_id(7);
        container.update_delete_txn_id(3);
        assert_eq!(container.delete_txn_id, 7);
    }

    #[test]
    fn test_sequence_id_frozen_after_close() {
        let mut container = ContainerInfo::new(
            ContainerId(2),
            LifecycleState::Open,
            ReplicationPolicy::default(),
        );
        container.update_sequence_id(10);
        assert_eq!(container.sequence_id, 10);

        container.state = LifecycleState::QuasiClosed;
        container.update_sequence_id(12);
        assert_eq!(container.sequence_id, 12);

        container.state = LifecycleState::Closed;
        // Release builds ignore the update instead of panicking.
        if !cfg!(debug_assertions) {
            container.update_sequence_id(99);
            assert_eq!(container.sequence_id, 12);
        }
    }

    #[test]
    fn test_replica_map_one_replica_per_node() {
        let id = ContainerId(3);
        let map = replica_map(vec![
            ContainerReplica::new(id, 1, ReplicaState::Closed).with_sequence_id(4),
            ContainerReplica::new(id, 1, ReplicaState::Closed).with_sequence_id(9),
            ContainerReplica::new(id, 2, ReplicaState::Closed),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1].sequence_id, 9);
    }

    #[test]
    fn test_pending_op_expiry() {
        let now = Utc::now();
        let op = PendingOp {
            op_type: PendingOpType::Add,
            target: 5,
            created_at: now - Duration::minutes(20),
            deadline: now - Duration::minutes(10),
        };
        assert!(op.is_expired(now));
        assert!(!op.is_expired(now - Duration::minutes(15)));
    }

    #[test]
    fn test_command_container_id() {
        let cmd = NodeCommand::Replicate {
            container_id: ContainerId(8),
            sources: vec![1, 2],
        };
        assert_eq!(cmd.container_id(), ContainerId(8));
    }
}
