//! End-to-end lifecycle on the local process substrate.
//!
//! Servers are `sh -c` sleepers, so these tests run real OS processes.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use universe::params::ClusterType;
use universe::substrate::ProcessSubstrateFactory;
use universe::{Fixture, Node, NodeStatus, ProcessBindings, UniverseWorkflow};
use universe_test_utils::{init_test_tracing, test_config, SimulatedDatabase};

fn sleeper_bindings(root: &std::path::Path) -> ProcessBindings {
    let mut bindings = ProcessBindings::new(root, "sh");
    bindings.args = vec![
        "-c".to_string(),
        "exec sleep 30".to_string(),
        "server".to_string(),
    ];
    bindings
}

#[tokio::test]
async fn test_process_universe_lifecycle() {
    init_test_tracing();
    let root = tempfile::tempdir().unwrap();
    let log_dir = tempfile::tempdir().unwrap();

    let mut fixture = Fixture::new(sleeper_bindings(root.path()));
    fixture.cluster.name = Some("local".to_string());
    fixture.cluster.num_nodes = 2;
    fixture.logging.enabled = true;
    fixture.logging.base_dir = Some(log_dir.path().to_path_buf());

    let database = SimulatedDatabase::new(Arc::new(|_: &str| true));
    let mut workflow = UniverseWorkflow::new(
        ProcessSubstrateFactory,
        Arc::new(database.clone()),
        fixture,
        test_config("process-lifecycle"),
    );
    workflow.init();
    workflow.deploy().await.unwrap();
    assert_eq!(database.bootstrap_calls(), 1);

    let names: Vec<String> = {
        let cluster = workflow
            .universe()
            .unwrap()
            .group_by_type(ClusterType::Database)
            .unwrap();
        assert_eq!(cluster.nodes().len(), 2);

        for node in cluster.nodes() {
            assert_eq!(node.status().await, NodeStatus::Running);
            assert!(node.endpoint().starts_with("localhost:"));
            assert!(node.pid().await.is_some());
        }

        let node = cluster.first_server().unwrap();
        let name = node.name();
        node.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(node.status().await, NodeStatus::Stopped);

        node.start().await.unwrap();
        assert_eq!(node.name(), name);
        assert_eq!(node.status().await, NodeStatus::Running);

        cluster.nodes().iter().map(|n| n.name()).collect()
    };

    let logging = workflow.universe().unwrap().logging().clone();
    let report = workflow.shutdown().await;
    assert!(report.is_clean(), "{report}");

    for name in &names {
        assert!(!root.path().join(name).exists());
        assert!(logging.node_log_file(name).exists());
    }
}
