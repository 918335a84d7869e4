//! Error types for the replicore reconciliation core.
//!
//! This module provides a unified error type [`ReplicoreError`] for all
//! reconciliation operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Leadership**: only the elected leader may issue commands
//! - **Cluster**: node lookup and placement failures
//! - **Dispatch**: per-target overload rejections
//! - **Configuration**: invalid settings
//!
//! Per-node failures (`NodeNotFound`, `TargetOverloaded`) are recoverable
//! locally: the affected node is skipped and the pass continues with fewer
//! commands. Only `NotLeader` aborts an entire reconciliation pass, since
//! command issuance has moved to another control-plane instance.

use std::io;
use thiserror::Error;

/// Main error type for replicore operations.
#[derive(Error, Debug)]
pub enum ReplicoreError {
    // Leadership errors
    #[error("Not the leader. Leader is: {leader:?}")]
    NotLeader { leader: Option<u64> },

    // Cluster errors
    #[error("Node not found: {0}")]
    NodeNotFound(u64),

    #[error("Target node {node} overloaded: {inflight} commands in flight, limit {limit}")]
    TargetOverloaded {
        node: u64,
        inflight: usize,
        limit: usize,
    },

    #[error("Placement failed: {0}")]
    PlacementFailed(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // State errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicoreError {
    /// Check if error is retryable on a later pass.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReplicoreError::NotLeader { .. }
                | ReplicoreError::TargetOverloaded { .. }
                | ReplicoreError::Timeout(_)
                | ReplicoreError::PlacementFailed(_)
        )
    }

    /// True when the error disqualifies a single node rather than the
    /// whole pass.
    pub fn is_per_node(&self) -> bool {
        matches!(
            self,
            ReplicoreError::NodeNotFound(_) | ReplicoreError::TargetOverloaded { .. }
        )
    }
}

impl From<serde_json::Error> for ReplicoreError {
    fn from(e: serde_json::Error) -> Self {
        ReplicoreError::Serialization(e.to_string())
    }
}

/// Result type alias for replicore operations.
pub type Result<T> = std::result::Result<T, ReplicoreError>;
