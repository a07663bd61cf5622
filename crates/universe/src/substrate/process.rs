//! Local-process substrate. No shared resources.

use crate::errors::Result;
use crate::fixture::ProcessBindings;
use crate::node::ProcessNode;
use crate::params::{DeploymentParams, LoggingParams, ProcessBinding, UniverseParams};
use crate::substrate::{Substrate, SubstrateFactory};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSubstrate;

#[async_trait]
impl Substrate for ProcessSubstrate {
    type Binding = ProcessBinding;
    type Node = ProcessNode;

    fn kind(&self) -> &'static str {
        "process"
    }

    async fn prepare(&self, _params: &UniverseParams<ProcessBinding>) -> Result<()> {
        Ok(())
    }

    async fn build_node(
        &self,
        deployment: &DeploymentParams<ProcessBinding>,
        logging: &LoggingParams,
    ) -> Result<ProcessNode> {
        Ok(ProcessNode::new(deployment.clone(), logging.clone()))
    }

    async fn release(&self, _params: &UniverseParams<ProcessBinding>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSubstrateFactory;

#[async_trait]
impl SubstrateFactory for ProcessSubstrateFactory {
    type Substrate = ProcessSubstrate;
    type Bindings = ProcessBindings;

    async fn connect(&self) -> Result<ProcessSubstrate> {
        Ok(ProcessSubstrate)
    }
}
