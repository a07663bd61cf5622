//! Cluster parameters.

use crate::errors::{Result, UniverseError};
use crate::params::deployment::DeploymentParams;
use crate::params::node::full_node_name;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Default expected node count.
pub const DEFAULT_NUM_NODES: usize = 3;

/// Default node-name prefix for database clusters.
pub const DEFAULT_NODE_NAME_PREFIX: &str = "db";

/// Logical role of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    /// Database servers joined into one cluster by bootstrap.
    Database,
    /// Stateless support services; bootstrap is a no-op.
    Support,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterType::Database => write!(f, "database"),
            ClusterType::Support => write!(f, "support"),
        }
    }
}

/// Named, ordered set of deployments sharing a server version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterParams<B> {
    name: String,
    node_name_prefix: String,
    server_version: String,
    cluster_type: ClusterType,
    num_nodes: usize,
    nodes: BTreeSet<DeploymentParams<B>>,
}

impl<B> ClusterParams<B> {
    /// Create empty cluster params.
    ///
    /// # Errors
    ///
    /// Returns `UniverseError::Configuration` if the name or server version
    /// is blank.
    pub fn new(
        name: impl Into<String>,
        server_version: impl Into<String>,
        cluster_type: ClusterType,
    ) -> Result<Self> {
        let name = name.into();
        let server_version = server_version.into();

        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            return Err(UniverseError::Configuration(format!(
                "invalid cluster name: '{name}'"
            )));
        }
        if server_version.trim().is_empty() {
            return Err(UniverseError::Configuration(format!(
                "server version not set for cluster {name}"
            )));
        }

        Ok(Self {
            name,
            node_name_prefix: DEFAULT_NODE_NAME_PREFIX.to_string(),
            server_version,
            cluster_type,
            num_nodes: DEFAULT_NUM_NODES,
            nodes: BTreeSet::new(),
        })
    }

    /// Create cluster params with a random six-letter lowercase name.
    pub fn with_random_name(server_version: impl Into<String>, cluster_type: ClusterType) -> Result<Self> {
        Self::new(random_cluster_name(), server_version, cluster_type)
    }

    #[must_use]
    pub fn with_node_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.node_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_num_nodes(mut self, num_nodes: usize) -> Self {
        self.num_nodes = num_nodes;
        self
    }

    /// Add a deployment.
    ///
    /// # Errors
    ///
    /// Returns `UniverseError::Configuration` if the node belongs to another
    /// cluster, uses another name prefix or server version, or its name is
    /// already taken.
    pub fn add(&mut self, deployment: DeploymentParams<B>) -> Result<()> {
        let node = deployment.node();
        if node.cluster_name() != self.name {
            return Err(UniverseError::Configuration(format!(
                "node {} belongs to cluster {}, not {}",
                node.name(),
                node.cluster_name(),
                self.name
            )));
        }
        if node.name_prefix() != self.node_name_prefix {
            return Err(UniverseError::Configuration(format!(
                "node {} uses name prefix {}, cluster {} uses {}",
                node.name(),
                node.name_prefix(),
                self.name,
                self.node_name_prefix
            )));
        }
        if node.server_version() != self.server_version {
            return Err(UniverseError::Configuration(format!(
                "node {} runs server version {}, cluster {} runs {}",
                node.name(),
                node.server_version(),
                self.name,
                self.server_version
            )));
        }

        let name = deployment.name();
        if self.nodes.iter().any(|d| d.name() == name) {
            return Err(UniverseError::Configuration(format!(
                "duplicate node name {name} in cluster {}",
                self.name
            )));
        }

        self.nodes.insert(deployment);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_name_prefix(&self) -> &str {
        &self.node_name_prefix
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    /// Expected node count used by fixtures.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of deployments actually added.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Deployments in their natural order.
    pub fn cluster_nodes(&self) -> impl Iterator<Item = &DeploymentParams<B>> {
        self.nodes.iter()
    }

    /// Deployment by full or short name.
    pub fn node(&self, name: &str) -> Option<&DeploymentParams<B>> {
        let full = self.full_node_name(name);
        self.nodes
            .iter()
            .find(|d| d.name() == name || d.name() == full)
    }

    pub fn node_by_index(&self, index: usize) -> Option<&DeploymentParams<B>> {
        self.nodes.iter().nth(index)
    }

    /// Full node name for `short_name`, usable before the node exists.
    pub fn full_node_name(&self, short_name: &str) -> String {
        full_node_name(&self.name, &self.node_name_prefix, short_name)
    }
}

fn random_cluster_name() -> String {
    let mut rng = rand::thread_rng();
    (0..6).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::params::deployment::VmBinding;
    use crate::params::node::NodeParams;

    fn deployment(cluster: &str, port: u16) -> DeploymentParams<VmBinding> {
        deployment_with(cluster, DEFAULT_NODE_NAME_PREFIX, "1.0", port)
    }

    fn deployment_with(
        cluster: &str,
        prefix: &str,
        version: &str,
        port: u16,
    ) -> DeploymentParams<VmBinding> {
        let node = NodeParams::builder(cluster, prefix)
            .port(port)
            .server_version(version)
            .build()
            .unwrap();
        DeploymentParams::new(
            node,
            VmBinding {
                vm_name: format!("vm-{port}"),
                index: 0,
            },
        )
    }

    #[test]
    fn test_full_node_name_is_pure() {
        let params: ClusterParams<VmBinding> =
            ClusterParams::new("mycluster", "1.0", ClusterType::Database).unwrap();
        assert_eq!(params.full_node_name("node9000"), "mycluster-db-node9000");
        assert_eq!(
            params.full_node_name("node9000"),
            params.full_node_name("node9000")
        );
        assert_eq!(params.size(), 0);
    }

    #[test]
    fn test_random_name_is_six_lowercase_letters() {
        let params: ClusterParams<VmBinding> =
            ClusterParams::with_random_name("1.0", ClusterType::Database).unwrap();
        assert_eq!(params.name().len(), 6);
        assert!(params.name().chars().all(|c| c.is_ascii_lowercase()));
        assert_eq!(params.num_nodes(), DEFAULT_NUM_NODES);
    }

    #[test]
    fn test_add_keeps_natural_order() {
        let mut params = ClusterParams::new("c1", "1.0", ClusterType::Database).unwrap();
        params.add(deployment("c1", 9002)).unwrap();
        params.add(deployment("c1", 9000)).unwrap();
        params.add(deployment("c1", 9001)).unwrap();

        let ports: Vec<u16> = params
            .cluster_nodes()
            .map(|d| d.node().primary_port())
            .collect();
        assert_eq!(ports, vec![9000, 9001, 9002]);
        assert_eq!(params.node_by_index(0).unwrap().node().primary_port(), 9000);
    }

    #[test]
    fn test_add_rejects_duplicates_and_foreign_nodes() {
        let mut params = ClusterParams::new("c1", "1.0", ClusterType::Database).unwrap();
        params.add(deployment("c1", 9000)).unwrap();

        let dup = params.add(deployment("c1", 9000));
        assert!(matches!(dup, Err(UniverseError::Configuration(_))));

        let foreign = params.add(deployment("c2", 9001));
        assert!(matches!(foreign, Err(UniverseError::Configuration(_))));
        assert_eq!(params.size(), 1);
    }

    #[test]
    fn test_add_rejects_mismatched_prefix_and_version() {
        let mut params = ClusterParams::new("c1", "1.0", ClusterType::Database)
            .unwrap()
            .with_node_name_prefix("corfu");

        let prefix = params.add(deployment_with("c1", "db", "1.0", 9000));
        assert!(matches!(prefix, Err(UniverseError::Configuration(_))));

        let version = params.add(deployment_with("c1", "corfu", "9.9", 9000));
        assert!(matches!(version, Err(UniverseError::Configuration(_))));
        assert_eq!(params.size(), 0);

        params
            .add(deployment_with("c1", "corfu", "1.0", 9000))
            .unwrap();
        assert_eq!(params.node("node9000").unwrap().name(), "c1-corfu-node9000");
    }

    #[test]
    fn test_node_lookup_by_short_or_full_name() {
        let mut params = ClusterParams::new("c1", "1.0", ClusterType::Database).unwrap();
        params.add(deployment("c1", 9000)).unwrap();

        assert!(params.node("node9000").is_some());
        assert!(params.node("c1-db-node9000").is_some());
        assert!(params.node("node9001").is_none());
    }

    #[test]
    fn test_new_rejects_bad_names() {
        let blank = ClusterParams::<VmBinding>::new("", "1.0", ClusterType::Support);
        assert!(matches!(blank, Err(UniverseError::Configuration(_))));

        let spaced = ClusterParams::<VmBinding>::new("a b", "1.0", ClusterType::Support);
        assert!(matches!(spaced, Err(UniverseError::Configuration(_))));

        let no_version = ClusterParams::<VmBinding>::new("c1", " ", ClusterType::Support);
        assert!(matches!(no_version, Err(UniverseError::Configuration(_))));
    }
}
