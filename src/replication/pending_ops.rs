//! Tracking of in-flight reconciliation actions.
//!
//! A [`PendingOp`] is created when a command is dispatched and removed
//! when a later replica report confirms the corresponding state, or when
//! its deadline passes. Expiry keeps the store bounded: a lost command
//! must not make the evaluator treat a container as "about to be fixed"
//! forever.

use crate::types::{ContainerId, ContainerReplica, NodeId, PendingOp, PendingOpType, ReplicaState};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory store of pending add/delete operations, keyed by container.
#[derive(Debug)]
pub struct PendingOpStore {
    ops: RwLock<HashMap<ContainerId, Vec<PendingOp>>>,
    timeout: Duration,
}

impl PendingOpStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            ops: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Record a new pending op for the container and return it.
    pub async fn record(
        &self,
        container: ContainerId,
        op_type: PendingOpType,
        target: NodeId,
    ) -> PendingOp {
        let now = Utc::now();
        let op = PendingOp {
            op_type,
            target,
            created_at: now,
            deadline: now
                + chrono::Duration::from_std(self.timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(600)),
        };
        debug!(
            container = %container,
            target = target,
            op_type = ?op_type,
            "Recording pending op"
        );
        self.ops
            .write()
            .await
            .entry(container)
            .or_default()
            .push(op.clone());
        op
    }

    /// Current pending ops for a container. Expired ops are included until
    /// [`prune_expired`](Self::prune_expired) removes them.
    pub async fn list(&self, container: ContainerId) -> Vec<PendingOp> {
        self.ops
            .read()
            .await
            .get(&container)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop ops whose deadline has passed and return them, so the caller
    /// can release dispatcher slots and emit events.
    pub async fn prune_expired(
        &self,
        container: ContainerId,
        now: DateTime<Utc>,
    ) -> Vec<PendingOp> {
        let mut ops = self.ops.write().await;
        let Some(entries) = ops.get_mut(&container) else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        entries.retain(|op| {
            if op.is_expired(now) {
                expired.push(op.clone());
                false
            } else {
                true
            }
        });
        if entries.is_empty() {
            ops.remove(&container);
        }
        expired
    }

    /// Remove ops confirmed by a fresh replica report and return them.
    ///
    /// An add is confirmed when its target now hosts a non-deleted
    /// replica; a delete is confirmed when its target no longer does.
    pub async fn complete(
        &self,
        container: ContainerId,
        replicas: &[ContainerReplica],
    ) -> Vec<PendingOp> {
        let hosting: HashSet<NodeId> = replicas
            .iter()
            .filter(|r| r.state != ReplicaState::Deleted)
            .map(|r| r.node_id)
            .collect();

        let mut ops = self.ops.write().await;
        let Some(entries) = ops.get_mut(&container) else {
            return Vec::new();
        };

        let mut confirmed = Vec::new();
        entries.retain(|op| {
            let done = match op.op_type {
                PendingOpType::Add => hosting.contains(&op.target),
                PendingOpType::Delete => !hosting.contains(&op.target),
            };
            if done {
                confirmed.push(op.clone());
                false
            } else {
                true
            }
        });
        if entries.is_empty() {
            ops.remove(&container);
        }
        confirmed
    }

    /// Drop all state for a container (e.g. when it is deleted).
    pub async fn clear(&self, container: ContainerId) -> Vec<PendingOp> {
        self.ops
            .write()
            .await
            .remove(&container)
            .unwrap_or_default()
    }

    /// Total pending ops across all containers.
    pub async fn len(&self) -> usize {
        self.ops.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
