//! Runtime group of nodes.
//!
//! A `Cluster` owns its node handles in deployment order, which is the
//! natural order of its deployment parameters. It is the only place nodes
//! are created or destroyed.
//!
//! # Bootstrap
//!
//! Database clusters are bootstrapped once, after every node reports
//! running, by installing a single chain-replication layout through the
//! database client. A second bootstrap after success is rejected with
//! `AlreadyBootstrapped`. A failed bootstrap leaves the cluster
//! un-bootstrapped, so callers may retry it. Support clusters have nothing to
//! bootstrap.

use crate::client::{ClientConnector, ClusterClient, Layout};
use crate::errors::{Result, TeardownReport, UniverseError};
use crate::node::{Node, NodeStatus};
use crate::params::{ClusterParams, ClusterType, DeploymentParams, LoggingParams};
use crate::substrate::Substrate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub struct Cluster<S: Substrate> {
    params: ClusterParams<S::Binding>,
    connector: Arc<dyn ClientConnector>,
    nodes: Vec<S::Node>,
    layout: Option<Layout>,
    bootstrapped: bool,
}

impl<S: Substrate> Cluster<S> {
    pub fn new(params: ClusterParams<S::Binding>, connector: Arc<dyn ClientConnector>) -> Self {
        Self {
            params,
            connector,
            nodes: Vec::new(),
            layout: None,
            bootstrapped: false,
        }
    }

    pub fn name(&self) -> &str {
        self.params.name()
    }

    pub fn params(&self) -> &ClusterParams<S::Binding> {
        &self.params
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.params.cluster_type()
    }

    /// Node handles in deployment order.
    pub fn nodes(&self) -> &[S::Node] {
        &self.nodes
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Layout installed by bootstrap.
    pub fn layout(&self) -> Option<&Layout> {
        self.layout.as_ref()
    }

    /// Build and start every enabled node in order, then bootstrap.
    ///
    /// Nodes are recorded before they are started, so a failed deploy leaves
    /// the partially started group visible for diagnostics and teardown.
    /// Calling `deploy` again resumes: recorded nodes that are not running are
    /// started again, and an already bootstrapped cluster is not bootstrapped
    /// twice.
    ///
    /// # Errors
    ///
    /// Returns the first substrate error from building or starting a node, or
    /// the bootstrap error. Nothing is retried internally.
    #[instrument(skip_all, name = "universe.cluster.deploy", fields(cluster = %self.params.name()))]
    pub async fn deploy(&mut self, substrate: &S, logging: &LoggingParams) -> Result<()> {
        info!(
            target: "universe.cluster",
            cluster = %self.params.name(),
            cluster_type = %self.params.cluster_type(),
            nodes = self.params.size(),
            substrate = substrate.kind(),
            "Deploying cluster"
        );

        for deployment in self.params.cluster_nodes() {
            let name = deployment.name();
            if let Some(node) = self.nodes.iter().find(|n| n.name() == name) {
                let status = node.status().await;
                if status != NodeStatus::Running {
                    debug!(
                        target: "universe.cluster",
                        node = %name,
                        status = %status,
                        "Restarting node left behind by an earlier deploy"
                    );
                    node.start().await?;
                }
                continue;
            }
            if !deployment.node().enabled() {
                debug!(
                    target: "universe.cluster",
                    node = %name,
                    "Skipping disabled node"
                );
                continue;
            }

            let node = substrate.build_node(deployment, logging).await?;
            let started = node.start().await;
            self.nodes.push(node);
            started?;
        }

        if self.bootstrapped {
            return Ok(());
        }
        self.bootstrap().await
    }

    /// Join the started nodes into one logical cluster.
    ///
    /// # Errors
    ///
    /// - `AlreadyBootstrapped` if a previous bootstrap succeeded
    /// - `NotReady` if a node does not report `RUNNING`
    /// - `Bootstrap` if the client cannot connect or rejects the layout
    #[instrument(skip_all, name = "universe.cluster.bootstrap", fields(cluster = %self.params.name()))]
    pub async fn bootstrap(&mut self) -> Result<()> {
        if self.params.cluster_type() == ClusterType::Support {
            self.bootstrapped = true;
            return Ok(());
        }
        if self.bootstrapped {
            return Err(UniverseError::AlreadyBootstrapped(self.name().to_string()));
        }
        if self.nodes.is_empty() {
            return Err(UniverseError::Bootstrap {
                cluster: self.name().to_string(),
                message: "cluster has no nodes".to_string(),
            });
        }

        for node in &self.nodes {
            let status = node.status().await;
            if status != NodeStatus::Running {
                return Err(UniverseError::NotReady {
                    cluster: self.name().to_string(),
                    node: node.name(),
                    status: status.to_string(),
                });
            }
        }

        let endpoints: Vec<String> = self.nodes.iter().map(|n| n.endpoint()).collect();
        let layout = Layout::chain(endpoints.clone());

        let bootstrap_error = |e: UniverseError| UniverseError::Bootstrap {
            cluster: self.params.name().to_string(),
            message: e.to_string(),
        };
        let client = self
            .connector
            .connect(&endpoints)
            .await
            .map_err(bootstrap_error)?;
        client.bootstrap(&layout).await.map_err(bootstrap_error)?;

        if let Ok(json) = layout.to_json() {
            debug!(target: "universe.cluster", layout = %json, "Installed layout");
        }
        info!(
            target: "universe.cluster",
            cluster = %self.params.name(),
            cluster_id = %layout.cluster_id,
            servers = endpoints.len(),
            "Cluster bootstrapped"
        );

        self.layout = Some(layout);
        self.bootstrapped = true;
        Ok(())
    }

    /// Database client connected to the layout servers.
    ///
    /// # Errors
    ///
    /// `NotBootstrapped` before a successful bootstrap; `Client` for support
    /// clusters.
    pub async fn client(&self) -> Result<Arc<dyn ClusterClient>> {
        if self.params.cluster_type() == ClusterType::Support {
            return Err(UniverseError::Client(format!(
                "support cluster {} has no database client",
                self.name()
            )));
        }
        let Some(layout) = self.layout.as_ref() else {
            return Err(UniverseError::NotBootstrapped(self.name().to_string()));
        };
        self.connector.connect(&layout.layout_servers).await
    }

    /// Build and start an extra node in a deployed cluster.
    ///
    /// The node is kept in natural order. It is not added to the installed
    /// layout; membership changes are the database's business.
    #[instrument(skip_all, name = "universe.cluster.add_node", fields(cluster = %self.params.name()))]
    pub async fn add_node(
        &mut self,
        substrate: &S,
        logging: &LoggingParams,
        deployment: DeploymentParams<S::Binding>,
    ) -> Result<()> {
        if !self.bootstrapped {
            return Err(UniverseError::NotBootstrapped(self.name().to_string()));
        }
        self.params.add(deployment.clone())?;

        let node = substrate.build_node(&deployment, logging).await?;
        let started = node.start().await;

        let position = self
            .nodes
            .iter()
            .position(|n| n.params() > deployment.node())
            .unwrap_or(self.nodes.len());
        self.nodes.insert(position, node);
        started?;

        info!(
            target: "universe.cluster",
            cluster = %self.params.name(),
            node = %deployment.name(),
            "Node added"
        );
        Ok(())
    }

    pub fn server_by_index(&self, index: usize) -> Result<&S::Node> {
        self.nodes
            .get(index)
            .ok_or_else(|| UniverseError::NodeNotFound(format!("{}[{index}]", self.name())))
    }

    pub fn first_server(&self) -> Result<&S::Node> {
        self.server_by_index(0)
    }

    /// Node by short (`node9000`) or full name.
    pub fn node(&self, name: &str) -> Result<&S::Node> {
        let full = self.params.full_node_name(name);
        self.nodes
            .iter()
            .find(|n| {
                let node_name = n.name();
                node_name == name || node_name == full
            })
            .ok_or_else(|| UniverseError::NodeNotFound(name.to_string()))
    }

    /// Stop every node, collecting failures.
    pub async fn stop(&self, timeout: Duration) -> TeardownReport {
        let mut report = TeardownReport::new();
        for node in &self.nodes {
            if let Err(e) = node.stop(timeout).await {
                report.record(node.name(), e);
            }
        }
        report
    }

    /// Kill every node, collecting failures.
    pub async fn kill(&self) -> TeardownReport {
        let mut report = TeardownReport::new();
        for node in &self.nodes {
            if let Err(e) = node.kill().await {
                report.record(node.name(), e);
            }
        }
        report
    }

    /// Destroy every node, collecting failures.
    pub async fn destroy(&self) -> TeardownReport {
        let mut report = TeardownReport::new();
        for node in &self.nodes {
            if let Err(e) = node.destroy().await {
                report.record(node.name(), e);
            }
        }
        report
    }

    /// Stop and destroy every node in reverse deployment order.
    ///
    /// A node destroyed before shutdown is reported as a failure and skipped;
    /// the walk always continues.
    #[instrument(skip_all, name = "universe.cluster.shutdown", fields(cluster = %self.params.name()))]
    pub async fn shutdown(&self) -> TeardownReport {
        let mut report = TeardownReport::new();

        for node in self.nodes.iter().rev() {
            let name = node.name();
            if node.is_destroyed() {
                warn!(
                    target: "universe.cluster",
                    node = %name,
                    "Node was destroyed before shutdown"
                );
                report.record(name.clone(), UniverseError::NodeDestroyed(name));
                continue;
            }

            if let Err(e) = node.stop(node.params().stop_timeout()).await {
                warn!(
                    target: "universe.cluster",
                    node = %name,
                    error = %e,
                    "Failed to stop node"
                );
                report.record(name.clone(), e);
            }
            if let Err(e) = node.destroy().await {
                warn!(
                    target: "universe.cluster",
                    node = %name,
                    error = %e,
                    "Failed to destroy node"
                );
                report.record(name, e);
            }
        }

        info!(
            target: "universe.cluster",
            cluster = %self.params.name(),
            failures = report.failures().len(),
            "Cluster shut down"
        );
        report
    }
}
