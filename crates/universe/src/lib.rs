//! Universe: lifecycle engine for ephemeral database clusters.
//!
//! Provisions, observes and tears down short-lived multi-node clusters of a
//! distributed database server on three substrates: containers, virtual
//! machines and local OS processes. Built for integration and chaos tests.
//!
//! # Architecture
//!
//! - [`params`] - immutable, ordered node/deployment/cluster/universe parameters
//! - [`fixture`] - mutable declarative description, materialized once
//! - [`workflow`] - `init -> init_universe -> deploy -> shutdown` state machine
//! - [`universe`] / [`cluster`] / [`node`] - runtime topology and node handles
//! - [`substrate`] - per-substrate extension point and transports
//! - [`client`] - database client seam (bootstrap, layout, status)
//! - [`scenario`] - bounded polling and failure verification
//! - [`manager`] - run a scenario against a fresh universe, always tearing down
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = WorkflowConfig::from_env()?;
//! let mut workflow = UniverseWorkflow::new(
//!     DockerSubstrateFactory::cli(),
//!     connector,
//!     Fixture::new(ContainerBindings::default()),
//!     config,
//! );
//! workflow.init().setup(|f| f.cluster.num_nodes = 3)?;
//! workflow.deploy().await?;
//!
//! let cluster = workflow.universe()?.group_by_type(ClusterType::Database)?;
//! let client = cluster.client().await?;
//! cluster.first_server()?.stop(Duration::from_secs(10)).await?;
//! wait_for_unresponsive_servers_change(&PollPolicy::default(), client.as_ref(), |n| n == 1).await?;
//!
//! let report = workflow.shutdown().await;
//! ```

pub mod client;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod fixture;
pub mod manager;
pub mod node;
pub mod params;
pub mod scenario;
pub mod substrate;
pub mod universe;
pub mod workflow;

pub use client::{ClientConnector, ClusterClient, ClusterStatus, ClusterStatusReport, Layout};
pub use cluster::Cluster;
pub use config::{ConfigError, FixtureOverrides, WorkflowConfig};
pub use errors::{Result, TeardownReport, UniverseError};
pub use fixture::{BindingFactory, ContainerBindings, Fixture, ProcessBindings, VmBindings};
pub use manager::{ScenarioOutcome, UniverseManager};
pub use node::{Node, NodeStatus};
pub use scenario::PollPolicy;
pub use universe::Universe;
pub use workflow::{UniverseWorkflow, WorkflowState};
