//! Deployment parameters.
//!
//! A `DeploymentParams<B>` wraps a [`NodeParams`] with substrate-specific
//! binding info `B`. Comparison delegates entirely to the wrapped node, so
//! two deployments with equal node parameters are equal and order identically
//! whatever their bindings.

use crate::params::node::NodeParams;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Default container image version.
pub const DEFAULT_IMAGE_VERSION: &str = "latest";

/// Node parameters plus substrate binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentParams<B> {
    node: NodeParams,
    binding: B,
}

impl<B> DeploymentParams<B> {
    pub fn new(node: NodeParams, binding: B) -> Self {
        Self { node, binding }
    }

    pub fn node(&self) -> &NodeParams {
        &self.node
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    /// Full name of the wrapped node.
    pub fn name(&self) -> String {
        self.node.name()
    }
}

impl<B> PartialEq for DeploymentParams<B> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<B> Eq for DeploymentParams<B> {}

impl<B> Hash for DeploymentParams<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
    }
}

impl<B> PartialOrd for DeploymentParams<B> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<B> Ord for DeploymentParams<B> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.node.cmp(&other.node)
    }
}

/// Host/container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortBinding {
    /// Map a port to the same port on the host.
    pub fn same(port: u16) -> Self {
        Self {
            host_port: port,
            container_port: port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeMode {
    ReadOnly,
    ReadWrite,
}

impl VolumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeMode::ReadOnly => "ro",
            VolumeMode::ReadWrite => "rw",
        }
    }
}

/// Host directory mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub mode: VolumeMode,
}

impl VolumeBinding {
    /// `host:container:mode` as accepted by `docker create -v`.
    pub fn to_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path.display(),
            self.mode.as_str()
        )
    }
}

/// Container binding: image, port/volume bindings, env and network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBinding {
    pub image: String,
    pub image_version: String,
    pub port_bindings: Vec<PortBinding>,
    pub volume_bindings: Vec<VolumeBinding>,
    pub envs: BTreeMap<String, String>,
    pub network_name: String,
}

impl ContainerBinding {
    /// Binding that publishes every node port on the same host port.
    pub fn for_node(node: &NodeParams, image: impl Into<String>, network_name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            image_version: DEFAULT_IMAGE_VERSION.to_string(),
            port_bindings: node.ports().iter().copied().map(PortBinding::same).collect(),
            volume_bindings: Vec::new(),
            envs: BTreeMap::new(),
            network_name: network_name.into(),
        }
    }

    /// `image:version`.
    pub fn image_full_name(&self) -> String {
        format!("{}:{}", self.image, self.image_version)
    }
}

/// Pre-provisioned virtual machine hosting one node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VmBinding {
    pub vm_name: String,
    /// Position of the VM in the appliance inventory.
    pub index: usize,
}

/// Local OS process working directory and launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBinding {
    pub work_dir: PathBuf,
    pub program: PathBuf,
    /// Arguments placed before the server arguments.
    pub args: Vec<String>,
}
