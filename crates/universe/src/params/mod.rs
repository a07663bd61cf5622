//! Declarative parameter model.
//!
//! Node, deployment, cluster and universe parameters are pure data: built
//! and validated up front, compared and ordered deterministically, never
//! mutated once a node is started.

pub mod cluster;
pub mod deployment;
pub mod node;
pub mod universe;

pub use cluster::{ClusterParams, ClusterType};
pub use deployment::{
    ContainerBinding, DeploymentParams, PortBinding, ProcessBinding, VmBinding, VolumeBinding,
    VolumeMode,
};
pub use node::{full_node_name, LogLevel, Mode, NodeParams, NodeParamsBuilder, NodeType, Persistence};
pub use universe::{LoggingParams, UniverseParams};
