//! Replicore - replica reconciliation core for a container control plane.
//!
//! Replicore keeps the replica count of every data container in a
//! distributed block-storage cluster converged on its policy. It consumes
//! container metadata and per-node replica reports, decides which
//! containers have too few or too many copies, and emits replicate and
//! delete commands toward storage nodes. Node tracking, placement
//! scoring, leader election, and the command transport are supplied by
//! the embedding control plane through the traits in [`cluster`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Replicore                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Orchestration: ReplicationManager | pass over containers   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Evaluation: ReplicaCount | HealthVerdict | PendingOpStore  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Repair: UnderReplicationHandler | OverReplicationHandler   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Dispatch: CommandDispatcher (leader gate, node throttling) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use replicore::config::ReplicoreConfig;
//! use replicore::replication::ReplicationManager;
//!
//! # async fn example(
//! #     sink: std::sync::Arc<dyn replicore::cluster::CommandSink>,
//! #     placement: std::sync::Arc<dyn replicore::cluster::PlacementOracle>,
//! #     nodes: std::sync::Arc<dyn replicore::cluster::NodeHealthOracle>,
//! # ) -> replicore::Result<()> {
//! let config = ReplicoreConfig::development();
//! let leadership = std::sync::Arc::new(replicore::cluster::LeadershipHandle::leader());
//! let manager = ReplicationManager::new(
//!     config.replication,
//!     sink,
//!     placement,
//!     nodes,
//!     leadership,
//! );
//! let summary = manager.run_pass(&[]).await?;
//! println!("reconciled {} containers", summary.processed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod cluster;
pub mod events;
pub mod replication;

pub use error::{ReplicoreError, Result};
pub use replication::{HealthVerdict, ReplicationManager};
pub use types::{ContainerId, ContainerInfo, ContainerReplica, NodeId};
