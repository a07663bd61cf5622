//! Universe-wide parameters: groups, shared network and logging.

use crate::errors::{Result, UniverseError};
use crate::params::cluster::ClusterParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Parameters of a whole universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseParams<B> {
    network_name: String,
    groups: Vec<ClusterParams<B>>,
    clean_up_enabled: bool,
}

impl<B> Default for UniverseParams<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> UniverseParams<B> {
    /// Empty universe with a unique network name.
    pub fn new() -> Self {
        Self {
            network_name: format!("universe-net-{}", Uuid::new_v4()),
            groups: Vec::new(),
            clean_up_enabled: true,
        }
    }

    #[must_use]
    pub fn with_clean_up_enabled(mut self, enabled: bool) -> Self {
        self.clean_up_enabled = enabled;
        self
    }

    /// Append a group. Groups deploy in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `UniverseError::Configuration` if the group name is taken or
    /// a node name collides with a node of another group.
    pub fn add_group(&mut self, group: ClusterParams<B>) -> Result<()> {
        if self.group(group.name()).is_some() {
            return Err(UniverseError::Configuration(format!(
                "duplicate group name {}",
                group.name()
            )));
        }

        for deployment in group.cluster_nodes() {
            let name = deployment.name();
            let taken = self
                .groups
                .iter()
                .flat_map(|g| g.cluster_nodes())
                .any(|d| d.name() == name);
            if taken {
                return Err(UniverseError::Configuration(format!(
                    "node name {name} is not unique within the universe"
                )));
            }
        }

        self.groups.push(group);
        Ok(())
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn clean_up_enabled(&self) -> bool {
        self.clean_up_enabled
    }

    pub fn groups(&self) -> &[ClusterParams<B>] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&ClusterParams<B>> {
        self.groups.iter().find(|g| g.name() == name)
    }

    pub fn group_by_index(&self, index: usize) -> Option<&ClusterParams<B>> {
        self.groups.get(index)
    }
}

/// Per-test log partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingParams {
    pub test_name: String,
    pub enabled: bool,
    pub base_dir: PathBuf,
}

impl LoggingParams {
    /// Logging params rooted at the system temp dir, disabled.
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            enabled: false,
            base_dir: std::env::temp_dir().join("universe"),
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// `{base_dir}/logs/{last path component of test_name}`.
    pub fn server_log_dir(&self) -> PathBuf {
        let test_dir = Path::new(&self.test_name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| self.test_name.clone().into());
        self.base_dir.join("logs").join(test_dir)
    }

    /// Log file of `node_name` inside the server log dir.
    pub fn node_log_file(&self, node_name: &str) -> PathBuf {
        self.server_log_dir().join(format!("{node_name}.log"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::params::cluster::ClusterType;
    use crate::params::deployment::{DeploymentParams, VmBinding};
    use crate::params::node::NodeParams;

    fn group(name: &str, ports: &[u16]) -> ClusterParams<VmBinding> {
        let mut params = ClusterParams::new(name, "1.0", ClusterType::Database).unwrap();
        for port in ports {
            let node = NodeParams::builder(name, "db")
                .port(*port)
                .server_version("1.0")
                .build()
                .unwrap();
            params
                .add(DeploymentParams::new(
                    node,
                    VmBinding {
                        vm_name: format!("vm{port}"),
                        index: 0,
                    },
                ))
                .unwrap();
        }
        params
    }

    #[test]
    fn test_network_name_is_unique() {
        let a: UniverseParams<VmBinding> = UniverseParams::new();
        let b: UniverseParams<VmBinding> = UniverseParams::new();
        assert!(a.network_name().starts_with("universe-net-"));
        assert_ne!(a.network_name(), b.network_name());
        assert!(a.clean_up_enabled());
    }

    #[test]
    fn test_groups_keep_insertion_order() {
        let mut params = UniverseParams::new();
        params.add_group(group("zeta", &[9000])).unwrap();
        params.add_group(group("alpha", &[9100])).unwrap();

        assert_eq!(params.group_by_index(0).unwrap().name(), "zeta");
        assert_eq!(params.group_by_index(1).unwrap().name(), "alpha");
        assert!(params.group("alpha").is_some());
        assert!(params.group_by_index(2).is_none());
    }

    #[test]
    fn test_add_group_rejects_duplicate_group() {
        let mut params = UniverseParams::new();
        params.add_group(group("c1", &[9000])).unwrap();
        let result = params.add_group(group("c1", &[9001]));
        assert!(matches!(result, Err(UniverseError::Configuration(_))));
    }

    #[test]
    fn test_server_log_dir_uses_last_test_name_component() {
        let logging = LoggingParams::new("suite/node_failure")
            .with_enabled(true)
            .with_base_dir("/var/universe");
        assert_eq!(
            logging.server_log_dir(),
            PathBuf::from("/var/universe/logs/node_failure")
        );
        assert_eq!(
            logging.node_log_file("c1-db-node9000"),
            PathBuf::from("/var/universe/logs/node_failure/c1-db-node9000.log")
        );
    }

    #[test]
    fn test_logging_disabled_by_default() {
        assert!(!LoggingParams::new("t").enabled);
    }
}
