//! Common test utilities for integration tests.
//!
//! Provides a small simulated cluster: a command sink that captures
//! dispatched commands, static node health, pool-based placement, and a
//! helper that "executes" captured commands against the replica map the
//! way storage nodes eventually would.

use async_trait::async_trait;
use parking_lot::Mutex;
use replicore::cluster::{
    CommandSink, LeadershipHandle, NodeHealthOracle, NodeSpace, NodeStatus, PlacementOracle,
};
use replicore::config::ReplicationConfig;
use replicore::replication::ReplicationManager;
use replicore::types::{
    ContainerInfo, ContainerReplica, DispatchedCommand, NodeCommand, NodeId, ReplicaState,
};
use replicore::{ContainerId, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test tracing subscriber once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Sink that captures every dispatched command.
#[derive(Default)]
pub struct CapturingSink {
    commands: Mutex<Vec<DispatchedCommand>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<DispatchedCommand> {
        self.commands.lock().clone()
    }

    /// Drain and return the captured commands.
    pub fn take(&self) -> Vec<DispatchedCommand> {
        std::mem::take(&mut self.commands.lock())
    }
}

#[async_trait]
impl CommandSink for CapturingSink {
    async fn deliver(&self, command: DispatchedCommand) -> Result<()> {
        self.commands.lock().push(command);
        Ok(())
    }
}

/// Static node health map.
pub struct SimNodes {
    nodes: HashMap<NodeId, NodeStatus>,
}

impl SimNodes {
    pub fn healthy(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n, NodeStatus::Healthy)).collect(),
        }
    }
}

impl NodeHealthOracle for SimNodes {
    fn node_status(&self, node: NodeId) -> Result<NodeStatus> {
        self.nodes
            .get(&node)
            .copied()
            .ok_or(replicore::ReplicoreError::NodeNotFound(node))
    }

    fn node_space(&self, _node: NodeId) -> Option<NodeSpace> {
        None
    }
}

/// Placement that hands out nodes from a pool, skipping excluded ones.
pub struct SimPlacement {
    pool: Vec<NodeId>,
}

impl SimPlacement {
    pub fn new(pool: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            pool: pool.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PlacementOracle for SimPlacement {
    async fn choose_targets(
        &self,
        exclude: &HashSet<NodeId>,
        _affinity: Option<NodeId>,
        count: usize,
        _min_free_bytes: u64,
    ) -> Result<Vec<NodeId>> {
        Ok(self
            .pool
            .iter()
            .copied()
            .filter(|n| !exclude.contains(n))
            .take(count)
            .collect())
    }
}

/// A simulated cluster wrapping a [`ReplicationManager`].
pub struct SimCluster {
    pub manager: ReplicationManager,
    pub sink: Arc<CapturingSink>,
    pub leadership: Arc<LeadershipHandle>,
}

impl SimCluster {
    /// Cluster where all of `nodes` are healthy and empty nodes double as
    /// placement candidates.
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self::with_config(nodes, ReplicationConfig::default())
    }

    pub fn with_config(nodes: Vec<NodeId>, config: ReplicationConfig) -> Self {
        let sink = Arc::new(CapturingSink::new());
        let leadership = Arc::new(LeadershipHandle::leader());
        let manager = ReplicationManager::new(
            config,
            sink.clone(),
            Arc::new(SimPlacement::new(nodes.clone())),
            Arc::new(SimNodes::healthy(nodes)),
            leadership.clone(),
        );
        Self {
            manager,
            sink,
            leadership,
        }
    }

    /// Apply captured commands to the replica map as the storage nodes
    /// eventually would, then feed the result back as a replica report.
    /// Returns the updated replica list.
    pub async fn execute_commands(
        &self,
        container: &ContainerInfo,
        replicas: &[ContainerReplica],
    ) -> Vec<ContainerReplica> {
        let mut by_node: HashMap<NodeId, ContainerReplica> =
            replicas.iter().map(|r| (r.node_id, r.clone())).collect();

        for cmd in self.sink.take() {
            match cmd.command {
                NodeCommand::PushReplica { container_id, to } if container_id == container.id => {
                    by_node.insert(
                        to,
                        ContainerReplica::new(container.id, to, ReplicaState::Closed)
                            .with_sequence_id(container.sequence_id),
                    );
                }
                NodeCommand::Replicate { container_id, .. } if container_id == container.id => {
                    by_node.insert(
                        cmd.target,
                        ContainerReplica::new(container.id, cmd.target, ReplicaState::Closed)
                            .with_sequence_id(container.sequence_id),
                    );
                }
                NodeCommand::DeleteReplica { container_id } if container_id == container.id => {
                    by_node.remove(&cmd.target);
                }
                _ => {}
            }
        }

        let updated: Vec<ContainerReplica> = by_node.into_values().collect();
        self.manager.on_replica_report(container.id, &updated).await;
        updated
    }
}

/// Closed container with the given id and replication factor.
pub fn closed_container(id: u64, factor: usize) -> ContainerInfo {
    ContainerInfo::new(
        ContainerId(id),
        replicore::types::LifecycleState::Closed,
        replicore::types::ReplicationPolicy::Replicated { factor },
    )
}

/// Closed replica of `container` on `node`.
pub fn closed_replica(container: u64, node: NodeId, seq: u64) -> ContainerReplica {
    ContainerReplica::new(ContainerId(container), node, ReplicaState::Closed).with_sequence_id(seq)
}
