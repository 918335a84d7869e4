//! Replica reconciliation for the container control plane.
//!
//! This module is the decision core: it compares the desired replica
//! count of each container against the replicas that storage nodes
//! actually report, and emits the commands that close the gap.
//!
//! # Components
//!
//! - [`ReplicaCount`]: pure evaluation of one container's replica set
//! - [`UnderReplicationHandler`]: creates replicas when copies are missing
//! - [`OverReplicationHandler`]: deletes replicas when copies are excess
//! - [`CommandDispatcher`]: leader-gated, per-node-throttled command path
//! - [`PendingOpStore`]: tracks in-flight ops until confirmed or expired
//! - [`ReplicationManager`]: orchestrates a pass over the container set
//!
//! # Flow
//!
//! ```text
//! container + replica reports + pending ops
//!         |
//!         v
//!   ReplicaCount (with / without unhealthy)
//!         |
//!         v
//!   HealthVerdict ---> Under / Over handler ---> CommandDispatcher
//!                                                     |
//!                              PendingOpStore <-------+
//! ```

mod dispatcher;
mod manager;
mod over_replication;
mod pending_ops;
mod replica_count;
mod under_replication;

#[cfg(test)]
pub(crate) mod test_support;

pub use dispatcher::CommandDispatcher;
pub use manager::{PassOutcome, PassSummary, ReplicationManager};
pub use over_replication::OverReplicationHandler;
pub use pending_ops::PendingOpStore;
pub use replica_count::{state_matches, HealthVerdict, ReplicaCount};
pub use under_replication::UnderReplicationHandler;
