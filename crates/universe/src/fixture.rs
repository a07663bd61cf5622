//! Fixtures: the mutable, declarative description of a universe.
//!
//! A fixture is customized by setup callbacks and then materialized once
//! into [`UniverseParams`]. Substrate-specific details come from a
//! [`BindingFactory`], one per substrate.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut fixture = Fixture::new(ContainerBindings::default());
//! fixture.server_version = Some("0.4.1".to_string());
//! fixture.cluster.num_nodes = 3;
//! fixture.cluster.initial_port = Some(9000);
//! let params = fixture.build_params()?;
//! ```

use crate::config::FixtureOverrides;
use crate::errors::{Result, UniverseError};
use crate::params::{
    ClusterParams, ClusterType, ContainerBinding, DeploymentParams, LogLevel, LoggingParams, Mode,
    NodeParams, NodeType, Persistence, ProcessBinding, UniverseParams, VmBinding, VolumeBinding,
};
use std::collections::BTreeMap;
use std::fmt;
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration;

/// Default database server image.
pub const DEFAULT_SERVER_IMAGE: &str = "corfudb/corfu-server";

/// Produces the substrate binding of each node while a fixture materializes.
pub trait BindingFactory: Clone + Send + Sync + 'static {
    type Binding: Clone + fmt::Debug + Send + Sync + 'static;

    /// Binding of the `index`-th node of the universe (counting across groups).
    fn binding_for(
        &self,
        node: &NodeParams,
        index: usize,
        network_name: &str,
    ) -> Result<Self::Binding>;
}

/// Container bindings: image per server version, shared network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBindings {
    pub image: String,
    pub envs: BTreeMap<String, String>,
    pub volume_bindings: Vec<VolumeBinding>,
}

impl Default for ContainerBindings {
    fn default() -> Self {
        Self {
            image: DEFAULT_SERVER_IMAGE.to_string(),
            envs: BTreeMap::new(),
            volume_bindings: Vec::new(),
        }
    }
}

impl BindingFactory for ContainerBindings {
    type Binding = ContainerBinding;

    fn binding_for(&self, node: &NodeParams, _index: usize, network_name: &str) -> Result<ContainerBinding> {
        let mut binding = ContainerBinding::for_node(node, self.image.clone(), network_name);
        binding.image_version = node.server_version().to_string();
        binding.envs = self.envs.clone();
        binding.volume_bindings = self.volume_bindings.clone();
        Ok(binding)
    }
}

/// VM bindings: nodes are placed on the listed VMs in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmBindings {
    pub vm_names: Vec<String>,
}

impl BindingFactory for VmBindings {
    type Binding = VmBinding;

    fn binding_for(&self, node: &NodeParams, index: usize, _network_name: &str) -> Result<VmBinding> {
        let vm_name = self.vm_names.get(index).ok_or_else(|| {
            UniverseError::Configuration(format!(
                "no VM available for node {} ({} VMs configured)",
                node.name(),
                self.vm_names.len()
            ))
        })?;
        Ok(VmBinding {
            vm_name: vm_name.clone(),
            index,
        })
    }
}

/// Process bindings: one work directory per node under `root_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessBindings {
    pub root_dir: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessBindings {
    pub fn new(root_dir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }
}

impl BindingFactory for ProcessBindings {
    type Binding = ProcessBinding;

    fn binding_for(&self, node: &NodeParams, _index: usize, _network_name: &str) -> Result<ProcessBinding> {
        Ok(ProcessBinding {
            work_dir: self.root_dir.join(node.name()),
            program: self.program.clone(),
            args: self.args.clone(),
        })
    }
}

/// Desired database cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFixture {
    /// Random six-letter name when unset.
    pub name: Option<String>,
    pub node_name_prefix: String,
    pub num_nodes: usize,
    /// Base port; ports are random open ports when unset.
    pub initial_port: Option<u16>,
    pub persistence: Persistence,
    pub mode: Mode,
    pub log_level: LogLevel,
    pub stop_timeout: Duration,
    pub log_size_quota_percentage: u8,
}

impl Default for ClusterFixture {
    fn default() -> Self {
        Self {
            name: None,
            node_name_prefix: crate::params::cluster::DEFAULT_NODE_NAME_PREFIX.to_string(),
            num_nodes: crate::params::cluster::DEFAULT_NUM_NODES,
            initial_port: None,
            persistence: Persistence::default(),
            mode: Mode::default(),
            log_level: LogLevel::default(),
            stop_timeout: crate::params::node::DEFAULT_STOP_TIMEOUT,
            log_size_quota_percentage: crate::params::node::DEFAULT_LOG_SIZE_QUOTA,
        }
    }
}

/// Optional support-services group deployed after the database cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportFixture {
    pub name: String,
    pub node_name_prefix: String,
    pub node_type: NodeType,
    pub num_nodes: usize,
    pub initial_port: Option<u16>,
}

impl Default for SupportFixture {
    fn default() -> Self {
        Self {
            name: "support".to_string(),
            node_name_prefix: "metrics".to_string(),
            node_type: NodeType::Metrics,
            num_nodes: 1,
            initial_port: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingFixture {
    pub enabled: bool,
    /// System temp dir when unset.
    pub base_dir: Option<PathBuf>,
}

/// Declarative universe description for one substrate.
#[derive(Debug, Clone)]
pub struct Fixture<B: BindingFactory> {
    /// Set by `UniverseWorkflow::init`.
    pub server_version: Option<String>,
    pub cluster: ClusterFixture,
    pub support: Option<SupportFixture>,
    pub logging: LoggingFixture,
    pub clean_up_enabled: bool,
    pub bindings: B,
}

impl<B: BindingFactory> Fixture<B> {
    pub fn new(bindings: B) -> Self {
        Self {
            server_version: None,
            cluster: ClusterFixture::default(),
            support: None,
            logging: LoggingFixture::default(),
            clean_up_enabled: true,
            bindings,
        }
    }

    /// Apply environment overrides on top of the current settings.
    pub fn apply_overrides(&mut self, overrides: &FixtureOverrides) {
        if let Some(num_nodes) = overrides.num_nodes {
            self.cluster.num_nodes = num_nodes;
        }
        if let Some(port) = overrides.initial_port {
            self.cluster.initial_port = Some(port);
        }
        if let Some(enabled) = overrides.logging_enabled {
            self.logging.enabled = enabled;
        }
        if let Some(dir) = &overrides.log_dir {
            self.logging.base_dir = Some(dir.clone());
        }
        if let Some(enabled) = overrides.clean_up_enabled {
            self.clean_up_enabled = enabled;
        }
    }

    /// Logging params for a test.
    pub fn logging_params(&self, test_name: &str) -> LoggingParams {
        let logging = LoggingParams::new(test_name).with_enabled(self.logging.enabled);
        match &self.logging.base_dir {
            Some(dir) => logging.with_base_dir(dir.clone()),
            None => logging,
        }
    }

    /// Materialize the universe parameters.
    ///
    /// Ports and unset cluster names are allocated here, so each call yields
    /// a fresh topology when they are left random.
    ///
    /// # Errors
    ///
    /// Returns `UniverseError::Configuration` if the server version is unset,
    /// a node count is zero, the port range overflows, or a binding cannot be
    /// produced.
    pub fn build_params(&self) -> Result<UniverseParams<B::Binding>> {
        let server_version = self
            .server_version
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                UniverseError::Configuration(
                    "fixture server version not set (call init() first)".to_string(),
                )
            })?;

        let mut universe = UniverseParams::new().with_clean_up_enabled(self.clean_up_enabled);
        let network_name = universe.network_name().to_string();
        let mut index = 0;

        let cluster = &self.cluster;
        let mut database = match &cluster.name {
            Some(name) => ClusterParams::new(name.clone(), server_version, ClusterType::Database)?,
            None => ClusterParams::with_random_name(server_version, ClusterType::Database)?,
        }
        .with_node_name_prefix(cluster.node_name_prefix.clone())
        .with_num_nodes(cluster.num_nodes);

        for port in allocate_ports(cluster.num_nodes, cluster.initial_port)? {
            let node = NodeParams::builder(database.name(), database.node_name_prefix())
                .node_type(NodeType::DatabaseServer)
                .port(port)
                .server_version(server_version)
                .persistence(cluster.persistence)
                .mode(cluster.mode)
                .log_level(cluster.log_level)
                .stop_timeout(cluster.stop_timeout)
                .log_size_quota_percentage(cluster.log_size_quota_percentage)
                .build()?;
            let binding = self.bindings.binding_for(&node, index, &network_name)?;
            index += 1;
            database.add(DeploymentParams::new(node, binding))?;
        }
        universe.add_group(database)?;

        if let Some(support) = &self.support {
            let mut group = ClusterParams::new(support.name.clone(), server_version, ClusterType::Support)?
                .with_node_name_prefix(support.node_name_prefix.clone())
                .with_num_nodes(support.num_nodes);

            for port in allocate_ports(support.num_nodes, support.initial_port)? {
                let node = NodeParams::builder(group.name(), group.node_name_prefix())
                    .node_type(support.node_type)
                    .port(port)
                    .server_version(server_version)
                    .build()?;
                let binding = self.bindings.binding_for(&node, index, &network_name)?;
                index += 1;
                group.add(DeploymentParams::new(node, binding))?;
            }
            universe.add_group(group)?;
        }

        Ok(universe)
    }
}

/// `count` ports: consecutive from `initial`, or random open ports, ascending.
pub fn allocate_ports(count: usize, initial: Option<u16>) -> Result<Vec<u16>> {
    if count == 0 {
        return Err(UniverseError::Configuration(
            "node count must be greater than 0".to_string(),
        ));
    }

    let mut ports = match initial {
        Some(base) => (0..count)
            .map(|offset| {
                u16::try_from(offset)
                    .ok()
                    .and_then(|offset| base.checked_add(offset))
                    .filter(|port| *port != 0)
                    .ok_or_else(|| {
                        UniverseError::Configuration(format!(
                            "{count} ports starting at {base} exceed the port range"
                        ))
                    })
            })
            .collect::<Result<Vec<u16>>>()?,
        None => random_open_ports(count)?,
    };

    ports.sort_unstable();
    Ok(ports)
}

/// Distinct currently-free local ports; listeners are held until all are found.
pub fn random_open_ports(count: usize) -> Result<Vec<u16>> {
    let listeners = (0..count)
        .map(|_| TcpListener::bind(("127.0.0.1", 0)))
        .collect::<std::io::Result<Vec<_>>>()?;
    let ports = listeners
        .iter()
        .map(|l| l.local_addr().map(|a| a.port()))
        .collect::<std::io::Result<Vec<_>>>()?;
    Ok(ports)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn fixture() -> Fixture<VmBindings> {
        let mut fixture = Fixture::new(VmBindings {
            vm_names: vec!["vm-a".into(), "vm-b".into(), "vm-c".into(), "vm-d".into()],
        });
        fixture.server_version = Some("0.4.1".to_string());
        fixture.cluster.name = Some("mycluster".to_string());
        fixture.cluster.initial_port = Some(9000);
        fixture
    }

    #[test]
    fn test_build_params_requires_server_version() {
        let mut fixture = fixture();
        fixture.server_version = None;
        assert!(matches!(
            fixture.build_params(),
            Err(UniverseError::Configuration(_))
        ));
    }

    #[test]
    fn test_build_params_database_cluster() {
        let params = fixture().build_params().unwrap();
        let group = params.group("mycluster").unwrap();

        assert_eq!(group.size(), 3);
        assert_eq!(group.cluster_type(), ClusterType::Database);
        let names: Vec<String> = group.cluster_nodes().map(|d| d.name()).collect();
        assert_eq!(
            names,
            vec![
                "mycluster-db-node9000",
                "mycluster-db-node9001",
                "mycluster-db-node9002"
            ]
        );
        let vms: Vec<&str> = group
            .cluster_nodes()
            .map(|d| d.binding().vm_name.as_str())
            .collect();
        assert_eq!(vms, vec!["vm-a", "vm-b", "vm-c"]);
    }

    #[test]
    fn test_build_params_with_support_group() {
        let mut fixture = fixture();
        fixture.support = Some(SupportFixture {
            initial_port: Some(9100),
            ..SupportFixture::default()
        });

        let params = fixture.build_params().unwrap();
        assert_eq!(params.groups().len(), 2);
        let support = params.group_by_index(1).unwrap();
        assert_eq!(support.cluster_type(), ClusterType::Support);
        let node = support.node_by_index(0).unwrap();
        assert_eq!(node.node().node_type(), NodeType::Metrics);
        assert_eq!(node.binding().vm_name, "vm-d");
    }

    #[test]
    fn test_not_enough_vms() {
        let mut fixture = fixture();
        fixture.cluster.num_nodes = 5;
        assert!(matches!(
            fixture.build_params(),
            Err(UniverseError::Configuration(_))
        ));
    }

    #[test]
    fn test_apply_overrides() {
        let mut fixture = fixture();
        fixture.apply_overrides(&FixtureOverrides {
            num_nodes: Some(1),
            initial_port: Some(7000),
            logging_enabled: Some(true),
            log_dir: Some(PathBuf::from("/tmp/logs")),
            clean_up_enabled: Some(false),
        });

        assert_eq!(fixture.cluster.num_nodes, 1);
        assert_eq!(fixture.cluster.initial_port, Some(7000));
        assert!(fixture.logging.enabled);
        assert!(!fixture.clean_up_enabled);

        let logging = fixture.logging_params("suite/case");
        assert_eq!(logging.server_log_dir(), PathBuf::from("/tmp/logs/logs/case"));

        let params = fixture.build_params().unwrap();
        assert!(!params.clean_up_enabled());
    }

    #[test]
    fn test_allocate_ports_consecutive_and_overflow() {
        assert_eq!(allocate_ports(3, Some(9000)).unwrap(), vec![9000, 9001, 9002]);
        assert!(allocate_ports(2, Some(u16::MAX)).is_err());
        assert!(allocate_ports(0, Some(9000)).is_err());
    }

    #[test]
    fn test_random_ports_are_distinct_and_sorted() {
        let ports = allocate_ports(4, None).unwrap();
        let unique: HashSet<u16> = ports.iter().copied().collect();
        assert_eq!(unique.len(), 4);
        let mut sorted = ports.clone();
        sorted.sort_unstable();
        assert_eq!(ports, sorted);
    }

    #[test]
    fn test_container_bindings_use_server_version_as_image_tag() {
        let node = NodeParams::builder("c1", "db")
            .port(9000)
            .server_version("0.4.1")
            .build()
            .unwrap();
        let binding = ContainerBindings::default()
            .binding_for(&node, 0, "universe-net-1")
            .unwrap();
        assert_eq!(binding.image_full_name(), "corfudb/corfu-server:0.4.1");
        assert_eq!(binding.network_name, "universe-net-1");
    }

    #[test]
    fn test_process_bindings_work_dir_per_node() {
        let node = NodeParams::builder("c1", "db")
            .port(9000)
            .server_version("1")
            .build()
            .unwrap();
        let binding = ProcessBindings::new("/tmp/u", "/usr/bin/server")
            .binding_for(&node, 0, "")
            .unwrap();
        assert_eq!(binding.work_dir, PathBuf::from("/tmp/u/c1-db-node9000"));
    }
}
