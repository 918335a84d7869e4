//! Command dispatch with per-target throttling and leadership enforcement.
//!
//! The dispatcher is the single gate between reconciliation decisions and
//! the transport layer. It refuses to send when this instance is not the
//! cluster leader, bounds the number of in-flight commands per target
//! node, and registers a [`PendingOp`](crate::types::PendingOp) for every
//! command it does send, so the next evaluation pass sees the in-flight
//! action.
//!
//! The per-node counters are the only cross-container shared mutable
//! state; they are updated with compare-and-swap so concurrent passes
//! cannot jointly overload one node.

use super::pending_ops::PendingOpStore;
use crate::cluster::{CommandSink, LeadershipHandle};
use crate::error::{ReplicoreError, Result};
use crate::types::{
    CommandId, ContainerInfo, DispatchedCommand, NodeCommand, NodeId, PendingOpType,
};
use metrics::counter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes reconciliation commands to storage nodes.
pub struct CommandDispatcher {
    sink: Arc<dyn CommandSink>,
    leadership: Arc<LeadershipHandle>,
    pending_ops: Arc<PendingOpStore>,
    inflight: parking_lot::RwLock<HashMap<NodeId, Arc<AtomicUsize>>>,
    inflight_limit: usize,
}

impl CommandDispatcher {
    pub fn new(
        sink: Arc<dyn CommandSink>,
        leadership: Arc<LeadershipHandle>,
        pending_ops: Arc<PendingOpStore>,
        inflight_limit: usize,
    ) -> Self {
        Self {
            sink,
            leadership,
            pending_ops,
            inflight: parking_lot::RwLock::new(HashMap::new()),
            inflight_limit,
        }
    }

    /// Send a command to the target node.
    ///
    /// Checks leadership, reserves an in-flight slot on the target, hands
    /// the command to the transport, and registers the matching pending op
    /// before returning.
    pub async fn send(
        &self,
        command: NodeCommand,
        container: &ContainerInfo,
        target: NodeId,
    ) -> Result<()> {
        self.send_with_priority(command, container, target, 0).await
    }

    /// Send a replicate command in push mode: the freshest source is told
    /// to push the container to `target`. The in-flight slot is reserved
    /// on the target, which is the node receiving data.
    pub async fn send_throttled_replication(
        &self,
        container: &ContainerInfo,
        sources: &[NodeId],
        target: NodeId,
        priority: u32,
    ) -> Result<()> {
        let Some(&source) = sources.first() else {
            return Err(ReplicoreError::InvalidState(format!(
                "no sources to push container {} from",
                container.id
            )));
        };

        self.ensure_leader()?;
        self.try_reserve(target)?;

        let dispatched = DispatchedCommand {
            id: CommandId::new(),
            target: source,
            command: NodeCommand::PushReplica {
                container_id: container.id,
                to: target,
            },
            priority,
        };

        match self.sink.deliver(dispatched).await {
            Ok(()) => {
                self.pending_ops
                    .record(container.id, PendingOpType::Add, target)
                    .await;
                counter!("replicore_commands_sent_total", "kind" => "push_replicate").increment(1);
                debug!(
                    container = %container.id,
                    source = source,
                    target = target,
                    "Dispatched push replication command"
                );
                Ok(())
            }
            Err(e) => {
                self.release(target);
                Err(e)
            }
        }
    }

    /// Send a delete command for the replica hosted on `target`.
    pub async fn send_delete(&self, container: &ContainerInfo, target: NodeId) -> Result<()> {
        self.send(
            NodeCommand::DeleteReplica {
                container_id: container.id,
            },
            container,
            target,
        )
        .await
    }

    async fn send_with_priority(
        &self,
        command: NodeCommand,
        container: &ContainerInfo,
        target: NodeId,
        priority: u32,
    ) -> Result<()> {
        self.ensure_leader()?;
        self.try_reserve(target)?;

        let op_type = match &command {
            NodeCommand::Replicate { .. } | NodeCommand::PushReplica { .. } => PendingOpType::Add,
            NodeCommand::DeleteReplica { .. } => PendingOpType::Delete,
        };
        let kind = match &command {
            NodeCommand::Replicate { .. } => "replicate",
            NodeCommand::PushReplica { .. } => "push_replicate",
            NodeCommand::DeleteReplica { .. } => "delete_replica",
        };

        let dispatched = DispatchedCommand {
            id: CommandId::new(),
            target,
            command,
            priority,
        };

        match self.sink.deliver(dispatched).await {
            Ok(()) => {
                self.pending_ops
                    .record(container.id, op_type, target)
                    .await;
                counter!("replicore_commands_sent_total", "kind" => kind).increment(1);
                debug!(container = %container.id, target = target, kind = kind, "Dispatched command");
                Ok(())
            }
            Err(e) => {
                self.release(target);
                warn!(container = %container.id, target = target, error = %e, "Command delivery failed");
                Err(e)
            }
        }
    }

    /// Current in-flight command count for a node.
    pub fn inflight(&self, node: NodeId) -> usize {
        self.inflight
            .read()
            .get(&node)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Release one in-flight slot for a node, after its pending op was
    /// confirmed or expired.
    pub fn release(&self, node: NodeId) {
        if let Some(counter) = self.inflight.read().get(&node) {
            let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        }
    }

    fn ensure_leader(&self) -> Result<()> {
        if self.leadership.is_leader() {
            Ok(())
        } else {
            counter!("replicore_not_leader_rejections_total").increment(1);
            Err(self.leadership.not_leader_error())
        }
    }

    fn counter_for(&self, node: NodeId) -> Arc<AtomicUsize> {
        if let Some(counter) = self.inflight.read().get(&node) {
            return counter.clone();
        }
        self.inflight
            .write()
            .entry(node)
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }

    /// Compare-and-swap reservation of an in-flight slot on the node.
    fn try_reserve(&self, node: NodeId) -> Result<()> {
        let counter_handle = self.counter_for(node);
        loop {
            let current = counter_handle.load(Ordering::Acquire);
            if current >= self.inflight_limit {
                counter!("replicore_overloaded_rejections_total").increment(1);
                return Err(ReplicoreError::TargetOverloaded {
                    node,
                    inflight: current,
                    limit: self.inflight_limit,
                });
            }
            if counter_handle
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}
