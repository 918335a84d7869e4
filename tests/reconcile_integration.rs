//! Reconciliation integration tests.
//!
//! Drives a [`replicore::replication::ReplicationManager`] against a
//! simulated cluster: commands are captured, "executed" against the
//! replica map, and fed back as reports, checking that containers
//! converge to their policy.

#[allow(dead_code)]
mod common;

use common::{closed_container, closed_replica, init_tracing, SimCluster};
use replicore::config::ReplicationConfig;
use replicore::replication::HealthVerdict;
use replicore::types::{ContainerReplica, NodeCommand, ReplicaState};
use replicore::ReplicoreError;
use std::time::Duration;

// =============================================================================
// Convergence
// =============================================================================

#[tokio::test]
async fn test_under_replicated_container_converges() {
    init_tracing();
    let cluster = SimCluster::new(vec![1, 2, 3, 4, 5]);
    let container = closed_container(1, 3);
    let replicas = vec![closed_replica(1, 1, 7)];

    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.commands_sent, 2);

    let replicas = cluster.execute_commands(&container, &replicas).await;
    assert_eq!(replicas.len(), 3);

    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.verdict, HealthVerdict::Healthy);
    assert_eq!(outcome.commands_sent, 0);
}

#[tokio::test]
async fn test_over_replicated_container_converges() {
    init_tracing();
    let cluster = SimCluster::new(vec![1, 2, 3, 4, 5]);
    let container = closed_container(1, 3);
    let replicas: Vec<_> = (1..=5).map(|n| closed_replica(1, n, n * 10)).collect();

    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.verdict, HealthVerdict::OverReplicated { surplus: 2 });
    assert_eq!(outcome.commands_sent, 2);

    let replicas = cluster.execute_commands(&container, &replicas).await;
    assert_eq!(replicas.len(), 3);

    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.verdict, HealthVerdict::Healthy);
}

#[tokio::test]
async fn test_unhealthy_replica_repaired_then_removed() {
    init_tracing();
    let cluster = SimCluster::new(vec![1, 2, 3, 4, 5]);
    let container = closed_container(1, 3);
    let mut replicas = vec![
        closed_replica(1, 1, 7),
        closed_replica(1, 2, 7),
        ContainerReplica::new(replicore::ContainerId(1), 3, ReplicaState::Unhealthy),
    ];

    // Pass 1: the unhealthy copy does not count, so one new replica is
    // created elsewhere.
    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.verdict, HealthVerdict::UnderReplicated { deficit: 1 });
    assert_eq!(outcome.commands_sent, 1);
    replicas = cluster.execute_commands(&container, &replicas).await;
    assert_eq!(replicas.len(), 4);

    // Pass 2: three healthy copies plus the unhealthy one is a surplus;
    // the unhealthy copy is removed.
    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.verdict, HealthVerdict::OverReplicated { surplus: 1 });
    let commands = cluster.sink.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].target, 3);
    assert!(matches!(
        commands[0].command,
        NodeCommand::DeleteReplica { .. }
    ));
    replicas = cluster.execute_commands(&container, &replicas).await;

    // Pass 3: converged.
    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.verdict, HealthVerdict::Healthy);
}

// =============================================================================
// Idempotence and pending-op lifecycle
// =============================================================================

#[tokio::test]
async fn test_repeated_passes_send_no_duplicate_commands() {
    init_tracing();
    let cluster = SimCluster::new(vec![1, 2, 3, 4, 5]);
    let container = closed_container(1, 3);
    let replicas = vec![closed_replica(1, 1, 7)];

    cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    let after_first = cluster.sink.commands().len();

    for _ in 0..3 {
        let outcome = cluster
            .manager
            .process_container(&container, &replicas)
            .await
            .unwrap();
        assert_eq!(outcome.commands_sent, 0);
    }
    assert_eq!(cluster.sink.commands().len(), after_first);
}

#[tokio::test]
async fn test_expired_pending_ops_allow_retry() {
    init_tracing();
    let config = ReplicationConfig {
        pending_op_timeout: Duration::ZERO,
        ..ReplicationConfig::default()
    };
    let cluster = SimCluster::with_config(vec![1, 2, 3, 4, 5], config);
    let container = closed_container(1, 3);
    let replicas = vec![closed_replica(1, 1, 7)];

    cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    // The commands were "lost": no report ever confirms them, and the
    // zero timeout expires the pending ops on the next pass.
    let outcome = cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    assert_eq!(outcome.commands_sent, 2);
}

#[tokio::test]
async fn test_report_confirms_partial_progress() {
    init_tracing();
    let cluster = SimCluster::new(vec![1, 2, 3, 4, 5]);
    let container = closed_container(1, 3);
    let replicas = vec![closed_replica(1, 1, 7)];

    cluster
        .manager
        .process_container(&container, &replicas)
        .await
        .unwrap();
    let targets: Vec<_> = cluster
        .sink
        .commands()
        .iter()
        .map(|cmd| match cmd.command {
            NodeCommand::PushReplica { to, .. } => to,
            _ => panic!("expected push replication"),
        })
        .collect();

    // Only the first target completed its copy.
    let partial = vec![closed_replica(1, 1, 7), closed_replica(1, targets[0], 7)];
    let confirmed = cluster.manager.on_replica_report(container.id, &partial).await;
    assert_eq!(confirmed, 1);

    // The remaining pending add still covers the rest of the deficit.
    let outcome = cluster
        .manager
        .process_container(&container, &partial)
        .await
        .unwrap();
    assert_eq!(outcome.commands_sent, 0);
}

// =============================================================================
// Leadership
// =============================================================================

#[tokio::test]
async fn test_leadership_loss_stops_command_flow() {
    init_tracing();
    let cluster = SimCluster::new(vec![1, 2, 3, 4, 5]);
    let container = closed_container(1, 3);
    let replicas = vec![closed_replica(1, 1, 7)];

    cluster.leadership.set_leader(false, Some(42));
    let err = cluster
        .manager
        .run_pass(&[(container.clone(), replicas.clone())])
        .await
        .unwrap_err();
    assert!(matches!(err, ReplicoreError::NotLeader { leader: Some(42) }));
    assert!(cluster.sink.commands().is_empty());

    // Regaining leadership resumes reconciliation.
    cluster.leadership.set_leader(true, None);
    let summary = cluster
        .manager
        .run_pass(&[(container, replicas)])
        .await
        .unwrap();
    assert_eq!(summary.commands_sent, 2);
}

// =============================================================================
// Whole-pass behavior
// =============================================================================

#[tokio::test]
async fn test_mixed_snapshot_pass() {
    init_tracing();
    let cluster = SimCluster::new(vec![1, 2, 3, 4, 5, 6]);
    let snapshot = vec![
        (
            closed_container(1, 3),
            (1..=3).map(|n| closed_replica(1, n, 5)).collect::<Vec<_>>(),
        ),
        (closed_container(2, 3), vec![closed_replica(2, 1, 5)]),
        (
            closed_container(3, 3),
            (1..=4).map(|n| closed_replica(3, n, n)).collect::<Vec<_>>(),
        ),
    ];

    let summary = cluster.manager.run_pass(&snapshot).await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.under_replicated, 1);
    assert_eq!(summary.over_replicated, 1);
    assert_eq!(summary.unrecoverable, 0);
    assert_eq!(summary.commands_sent, 3);
}
