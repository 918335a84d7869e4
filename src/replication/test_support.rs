//! Stub collaborators shared by the replication unit tests.

use crate::cluster::{CommandSink, NodeHealthOracle, NodeSpace, NodeStatus, PlacementOracle};
use crate::error::{ReplicoreError, Result};
use crate::types::{DispatchedCommand, NodeId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Command sink that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<DispatchedCommand>>,
    fail_next: Mutex<Option<ReplicoreError>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<DispatchedCommand> {
        self.sent.lock().clone()
    }

    /// Make the next delivery fail with the given error.
    pub fn fail_next(&self, err: ReplicoreError) {
        *self.fail_next.lock() = Some(err);
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn deliver(&self, command: DispatchedCommand) -> Result<()> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        self.sent.lock().push(command);
        Ok(())
    }
}

/// Node oracle backed by a static map.
#[derive(Default)]
pub struct StaticNodes {
    nodes: HashMap<NodeId, (NodeStatus, Option<NodeSpace>)>,
}

impl StaticNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn healthy(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut this = Self::new();
        for node in nodes {
            this.nodes.insert(node, (NodeStatus::Healthy, None));
        }
        this
    }

    pub fn set_status(&mut self, node: NodeId, status: NodeStatus) {
        self.nodes.entry(node).or_insert((status, None)).0 = status;
    }

    pub fn set_space(&mut self, node: NodeId, capacity: u64, used: u64) {
        self.nodes
            .entry(node)
            .or_insert((NodeStatus::Healthy, None))
            .1 = Some(NodeSpace { capacity, used });
    }
}

impl NodeHealthOracle for StaticNodes {
    fn node_status(&self, node: NodeId) -> Result<NodeStatus> {
        self.nodes
            .get(&node)
            .map(|(status, _)| *status)
            .ok_or(ReplicoreError::NodeNotFound(node))
    }

    fn node_space(&self, node: NodeId) -> Option<NodeSpace> {
        self.nodes.get(&node).and_then(|(_, space)| *space)
    }
}

/// Placement oracle that hands out nodes from a fixed pool, respecting the
/// exclusion set.
pub struct PoolPlacement {
    pool: Vec<NodeId>,
    fail: Mutex<bool>,
    /// Requests seen: (exclude, count, min_free_bytes).
    pub requests: Mutex<Vec<(HashSet<NodeId>, usize, u64)>>,
}

impl PoolPlacement {
    pub fn new(pool: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            pool: pool.into_iter().collect(),
            fail: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_all(&self) {
        *self.fail.lock() = true;
    }
}

#[async_trait]
impl PlacementOracle for PoolPlacement {
    async fn choose_targets(
        &self,
        exclude: &HashSet<NodeId>,
        _affinity: Option<NodeId>,
        count: usize,
        min_free_bytes: u64,
    ) -> Result<Vec<NodeId>> {
        self.requests
            .lock()
            .push((exclude.clone(), count, min_free_bytes));
        if *self.fail.lock() {
            return Err(ReplicoreError::PlacementFailed("stub failure".into()));
        }
        Ok(self
            .pool
            .iter()
            .copied()
            .filter(|node| !exclude.contains(node))
            .take(count)
            .collect())
    }
}
