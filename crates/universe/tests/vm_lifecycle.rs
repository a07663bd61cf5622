//! Integration tests for the VM substrate.
//!
//! Uses the mock appliance manager and remote shell; the simulated database
//! sees a server as alive while its process runs on the VM.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use universe::params::ClusterType;
use universe::scenario::{wait_for_cluster_status_stable, wait_for_unresponsive_servers_change};
use universe::substrate::vm::PowerState;
use universe::{Node, NodeStatus, PollPolicy, UniverseError};
use universe_test_utils::{init_test_tracing, VmHarness};

#[tokio::test]
async fn test_deploy_powers_on_and_launches_servers() {
    init_test_tracing();
    let harness = VmHarness::new(3);
    let mut workflow = harness.workflow("vm-deploy", harness.fixture(9000));

    workflow.deploy().await.unwrap();

    assert_eq!(harness.appliances.deploy_calls(), 1);
    for vm in harness.appliances.vm_names() {
        assert_eq!(harness.appliances.power(&vm), Some(PowerState::On));
    }
    assert_eq!(harness.database.bootstrap_calls(), 1);

    let cluster = workflow
        .universe()
        .unwrap()
        .group_by_type(ClusterType::Database)
        .unwrap();
    let endpoints: Vec<String> = cluster.nodes().iter().map(|n| n.endpoint()).collect();
    assert_eq!(endpoints, vec!["10.0.0.1:9000", "10.0.0.2:9001", "10.0.0.3:9002"]);

    for (index, node) in cluster.nodes().iter().enumerate() {
        assert_eq!(node.status().await, NodeStatus::Running);
        assert_eq!(node.vm_name(), format!("vm-{index}"));
    }

    let launch = harness.shell.commands_for("10.0.0.1");
    assert!(launch.iter().any(|c| c.contains("nohup /opt/universe/bin/server")));
}

#[tokio::test(start_paused = true)]
async fn test_start_on_running_node_does_not_relaunch() {
    let harness = VmHarness::new(1);
    let mut workflow = harness.workflow("vm-start-twice", harness.fixture(9000));
    workflow.deploy().await.unwrap();

    let node = workflow
        .universe()
        .unwrap()
        .groups()
        .first()
        .unwrap()
        .first_server()
        .unwrap();
    node.start().await.unwrap();

    let launches = |commands: Vec<String>| {
        commands.iter().filter(|c| c.contains("nohup")).count()
    };
    assert_eq!(launches(harness.shell.commands_for("10.0.0.1")), 1);
    assert_eq!(node.status().await, NodeStatus::Running);

    node.stop(Duration::from_secs(2)).await.unwrap();
    assert!(!harness.shell.is_running("10.0.0.1"));

    node.start().await.unwrap();
    assert_eq!(launches(harness.shell.commands_for("10.0.0.1")), 2);
}

#[tokio::test]
async fn test_not_enough_vms_is_configuration_error() {
    let harness = VmHarness::new(2);
    let mut fixture = harness.fixture(9000);
    fixture.cluster.num_nodes = 3;
    let mut workflow = harness.workflow("vm-short", fixture);

    let err = workflow.init_universe().await.unwrap_err();

    assert!(matches!(err, UniverseError::Configuration(_)));
    assert_eq!(harness.appliances.deploy_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_restart_seen_by_database() {
    let harness = VmHarness::new(3);
    let mut workflow = harness.workflow("vm-restart", harness.fixture(9000));
    workflow.deploy().await.unwrap();

    {
        let cluster = workflow.universe().unwrap().groups().first().unwrap();
        let client = cluster.client().await.unwrap();
        let policy = PollPolicy::default();
        let node = cluster.server_by_index(2).unwrap();

        node.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(node.status().await, NodeStatus::Stopped);
        let down = wait_for_unresponsive_servers_change(&policy, client.as_ref(), |n| n == 1)
            .await
            .unwrap();
        assert_eq!(down, vec!["10.0.0.3:9002".to_string()]);

        node.restart().await.unwrap();
        assert_eq!(node.status().await, NodeStatus::Running);
        wait_for_cluster_status_stable(&policy, client.as_ref())
            .await
            .unwrap();
    }

    let report = workflow.shutdown().await;
    assert!(report.is_clean(), "{report}");
}

#[tokio::test(start_paused = true)]
async fn test_stop_escalates_to_sigkill() {
    let harness = VmHarness::new(1);
    let mut workflow = harness.workflow("vm-escalate", harness.fixture(9000));
    workflow.deploy().await.unwrap();
    harness.shell.ignore_term("10.0.0.1");

    let node = workflow
        .universe()
        .unwrap()
        .groups()
        .first()
        .unwrap()
        .first_server()
        .unwrap();
    node.stop(Duration::from_secs(2)).await.unwrap();

    assert!(!harness.shell.is_running("10.0.0.1"));
    let commands = harness.shell.commands_for("10.0.0.1");
    assert!(commands.iter().any(|c| c.starts_with("kill -TERM")));
    assert!(commands.iter().any(|c| c.starts_with("kill -KILL")));
    assert_eq!(harness.appliances.power_off_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_vm_is_powered_off() {
    let harness = VmHarness::new(1);
    let mut workflow = harness.workflow("vm-unreachable", harness.fixture(9000));
    workflow.deploy().await.unwrap();

    {
        let node = workflow
            .universe()
            .unwrap()
            .groups()
            .first()
            .unwrap()
            .first_server()
            .unwrap();

        harness.shell.set_unreachable("10.0.0.1", true);
        node.kill().await.unwrap();

        assert_eq!(harness.appliances.power_off_calls(), 1);
        assert_eq!(harness.appliances.power("vm-0"), Some(PowerState::Off));
        assert_eq!(node.status().await, NodeStatus::Stopped);
        harness.shell.set_unreachable("10.0.0.1", false);
    }

    let report = workflow.shutdown().await;
    assert!(report.is_clean(), "{report}");
}

#[tokio::test]
async fn test_shutdown_cleans_up_work_dirs_and_collects_logs() {
    let log_dir = tempfile::tempdir().unwrap();
    let harness = VmHarness::new(2);
    let mut fixture = harness.fixture(9000);
    fixture.cluster.name = Some("vmcluster".to_string());
    fixture.logging.enabled = true;
    fixture.logging.base_dir = Some(log_dir.path().to_path_buf());
    let mut workflow = harness.workflow("vm-shutdown", fixture);
    workflow.deploy().await.unwrap();

    let logging = workflow.universe().unwrap().logging().clone();
    let report = workflow.shutdown().await;

    assert!(report.is_clean(), "{report}");
    for host in ["10.0.0.1", "10.0.0.2"] {
        assert!(!harness.shell.is_running(host));
        assert!(harness
            .shell
            .commands_for(host)
            .iter()
            .any(|c| c.starts_with("rm -rf")));
    }

    let contents =
        std::fs::read_to_string(logging.node_log_file("vmcluster-db-node9000")).unwrap();
    assert!(contents.contains("server log on 10.0.0.1"));
}
