//! Cluster collaborator interfaces for the reconciliation core.
//!
//! The core does not implement node tracking, placement scoring, leader
//! election, or command transport; it consumes them through the traits in
//! this module:
//!
//! - [`NodeHealthOracle`]: current health and capacity of storage nodes
//! - [`PlacementOracle`]: chooses target nodes for new replicas
//! - [`CommandSink`]: hands commands to the transport layer
//! - [`LeadershipHandle`]: leader flag maintained by the consensus layer
//!
//! Implementations must bound their own lookups and fail closed: a node
//! whose status cannot be determined is treated as excluded, never waited
//! on.

use crate::error::{ReplicoreError, Result};
use crate::types::{DispatchedCommand, NodeId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Health of a storage node as seen by the heartbeat pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Heartbeating normally.
    Healthy,
    /// Missed recent heartbeats but not yet declared dead.
    Stale,
    /// Declared dead.
    Dead,
}

impl NodeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeStatus::Healthy)
    }
}

/// Reported storage capacity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpace {
    pub capacity: u64,
    pub used: u64,
}

impl NodeSpace {
    pub fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }
}

/// Lookup of node health and capacity.
///
/// `NodeNotFound` means the node is unknown to the cluster map and must be
/// excluded from any source or target selection.
pub trait NodeHealthOracle: Send + Sync {
    fn node_status(&self, node: NodeId) -> Result<NodeStatus>;

    /// Capacity report for the node, if one is available.
    fn node_space(&self, node: NodeId) -> Option<NodeSpace>;

    fn is_healthy(&self, node: NodeId) -> Result<bool> {
        Ok(self.node_status(node)?.is_healthy())
    }
}

/// Chooses physical target nodes for new replicas.
///
/// The scoring algorithm is external; the core only states its
/// constraints: never pick an excluded node, and every returned node must
/// have at least `min_free_bytes` available.
#[async_trait]
pub trait PlacementOracle: Send + Sync {
    async fn choose_targets(
        &self,
        exclude: &HashSet<NodeId>,
        affinity: Option<NodeId>,
        count: usize,
        min_free_bytes: u64,
    ) -> Result<Vec<NodeId>>;
}

/// Hands a command to the transport layer for delivery to its target node.
///
/// Delivery is fire-and-forget from the core's perspective: the effect of a
/// command is confirmed (or not) by future replica reports, never by a
/// synchronous acknowledgement.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn deliver(&self, command: DispatchedCommand) -> Result<()>;
}

/// Leader flag maintained by the (external) consensus layer.
///
/// Command issuance is a leader-only privilege; the dispatcher checks this
/// handle at send time, so a decision computed speculatively by a
/// non-leader can never turn into a duplicate command.
#[derive(Debug, Default)]
pub struct LeadershipHandle {
    is_leader: AtomicBool,
    known_leader: parking_lot::RwLock<Option<NodeId>>,
}

impl LeadershipHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle that already holds leadership.
    pub fn leader() -> Self {
        let handle = Self::new();
        handle.set_leader(true, None);
        handle
    }

    /// Update the leadership view. `known_leader` is the elected leader's
    /// node id when this instance is a follower and knows it.
    pub fn set_leader(&self, is_leader: bool, known_leader: Option<NodeId>) {
        self.is_leader.store(is_leader, Ordering::Release);
        *self.known_leader.write() = known_leader;
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    pub fn known_leader(&self) -> Option<NodeId> {
        *self.known_leader.read()
    }

    /// Error to return when a command is attempted without leadership.
    pub fn not_leader_error(&self) -> ReplicoreError {
        ReplicoreError::NotLeader {
            leader: self.known_leader(),
        }
    }
}
