//! Deployment substrates.
//!
//! A [`Substrate`] is the single extension point each execution environment
//! implements: prepare shared resources, build a node handle per deployment,
//! release shared resources. Everything above it (group deploy, bootstrap,
//! teardown) is substrate-independent.
//!
//! A [`SubstrateFactory`] connects the substrate client. The workflow calls
//! it exactly once per universe; the universe then owns the substrate.

pub mod docker;
pub mod process;
pub mod vm;

use crate::errors::Result;
use crate::fixture::BindingFactory;
use crate::node::Node;
use crate::params::{DeploymentParams, LoggingParams, UniverseParams};
use async_trait::async_trait;
use std::fmt;

pub use docker::{ContainerEngine, DockerCli, DockerSubstrate, DockerSubstrateFactory};
pub use process::{ProcessSubstrate, ProcessSubstrateFactory};
pub use vm::{
    ApplianceManager, RemoteShell, SshRemoteShell, StaticAppliances, VmSubstrate,
    VmSubstrateFactory,
};

#[async_trait]
pub trait Substrate: Send + Sync + 'static {
    /// Substrate-specific binding carried by each deployment.
    type Binding: Clone + fmt::Debug + Send + Sync + 'static;

    type Node: Node + 'static;

    /// Short substrate name used in logs.
    fn kind(&self) -> &'static str;

    /// Allocate shared resources (network, appliances). Called once per universe.
    async fn prepare(&self, params: &UniverseParams<Self::Binding>) -> Result<()>;

    /// Build (not start) the node handle for one deployment.
    async fn build_node(
        &self,
        deployment: &DeploymentParams<Self::Binding>,
        logging: &LoggingParams,
    ) -> Result<Self::Node>;

    /// Release shared resources allocated by `prepare`.
    async fn release(&self, params: &UniverseParams<Self::Binding>) -> Result<()>;
}

#[async_trait]
pub trait SubstrateFactory: Send + Sync {
    type Substrate: Substrate;

    /// Fixture-side producer of this substrate's bindings.
    type Bindings: BindingFactory<Binding = <Self::Substrate as Substrate>::Binding>;

    /// Connect the substrate client.
    async fn connect(&self) -> Result<Self::Substrate>;
}
