//! Container substrate.
//!
//! The container engine is reached through the [`ContainerEngine`] trait.
//! [`DockerCli`] implements it by shelling out to the `docker` binary; tests
//! use the in-memory engine from `universe-test-utils`.
//!
//! Shared resources: one bridge network per universe, created on the first
//! deploy and removed at shutdown. Every node joins it with its node name as
//! network alias.

use crate::errors::{Result, UniverseError};
use crate::fixture::ContainerBindings;
use crate::node::ContainerNode;
use crate::params::{
    ContainerBinding, DeploymentParams, LoggingParams, PortBinding, UniverseParams, VolumeBinding,
};
use crate::substrate::{Substrate, SubstrateFactory};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub network_alias: String,
    pub port_bindings: Vec<PortBinding>,
    pub volume_bindings: Vec<VolumeBinding>,
    pub envs: BTreeMap<String, String>,
    pub cmd: Vec<String>,
}

impl ContainerSpec {
    /// Container spec for a deployment; the server binds to its node name.
    pub fn for_deployment(deployment: &DeploymentParams<ContainerBinding>) -> Self {
        let node = deployment.node();
        let binding = deployment.binding();
        let name = node.name();

        Self {
            image: binding.image_full_name(),
            network: binding.network_name.clone(),
            network_alias: name.clone(),
            port_bindings: binding.port_bindings.clone(),
            volume_bindings: binding.volume_bindings.clone(),
            envs: binding.envs.clone(),
            cmd: node.server_args(&name),
            name,
        }
    }
}

/// Container state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "created" => Some(ContainerState::Created),
            "running" => Some(ContainerState::Running),
            "paused" => Some(ContainerState::Paused),
            "restarting" => Some(ContainerState::Restarting),
            "removing" => Some(ContainerState::Removing),
            "exited" => Some(ContainerState::Exited),
            "dead" => Some(ContainerState::Dead),
            _ => None,
        }
    }
}

/// Narrow container-engine capability set.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check the engine is reachable.
    async fn ping(&self) -> Result<()>;

    async fn create_network(&self, name: &str) -> Result<()>;

    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Create (not start) a container; returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Graceful stop; the engine kills the container after `timeout`.
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    async fn kill_container(&self, id: &str) -> Result<()>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerState>;

    /// Combined stdout/stderr of the container.
    async fn container_logs(&self, id: &str) -> Result<Vec<u8>>;

    /// Force-remove a container, running or not.
    async fn remove_container(&self, id: &str) -> Result<()>;
}

/// Container engine backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn output(&self, target: &str, args: &[String]) -> Result<Output> {
        debug!(
            target: "universe.substrate.docker",
            command = %args.join(" "),
            "Running docker command"
        );

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| UniverseError::substrate(target, format!("failed to run docker: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UniverseError::substrate(
                target,
                format!(
                    "docker {} exited with {}: {}",
                    args.first().map(String::as_str).unwrap_or_default(),
                    output.status,
                    stderr.trim()
                ),
            ));
        }

        Ok(output)
    }

    async fn run(&self, target: &str, args: &[String]) -> Result<String> {
        let output = self.output(target, args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--network".to_string(),
            spec.network.clone(),
            "--network-alias".to_string(),
            spec.network_alias.clone(),
        ];

        for port in &spec.port_bindings {
            args.push("-p".to_string());
            args.push(format!("{}:{}", port.host_port, port.container_port));
        }
        for volume in &spec.volume_bindings {
            args.push("-v".to_string());
            args.push(volume.to_arg());
        }
        for (key, value) in &spec.envs {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(spec.image.clone());
        args.extend(spec.cmd.iter().cloned());
        args
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn ping(&self) -> Result<()> {
        self.run("docker", &strings(&["version", "--format", "{{.Server.Version}}"]))
            .await
            .map(|_| ())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        self.run(name, &strings(&["network", "create", name]))
            .await
            .map(|_| ())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.run(name, &strings(&["network", "rm", name]))
            .await
            .map(|_| ())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.run(&spec.name, &Self::create_args(spec)).await
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run(id, &strings(&["start", id])).await.map(|_| ())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let seconds = timeout.as_secs().max(1).to_string();
        self.run(id, &strings(&["stop", "-t", &seconds, id]))
            .await
            .map(|_| ())
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        self.run(id, &strings(&["kill", id])).await.map(|_| ())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let status = self
            .run(id, &strings(&["inspect", "--format", "{{.State.Status}}", id]))
            .await?;
        ContainerState::parse(&status).ok_or_else(|| {
            UniverseError::substrate(id, format!("unknown container state '{status}'"))
        })
    }

    async fn container_logs(&self, id: &str) -> Result<Vec<u8>> {
        let output = self.output(id, &strings(&["logs", id])).await?;
        let mut logs = output.stdout;
        logs.extend_from_slice(&output.stderr);
        Ok(logs)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.run(id, &strings(&["rm", "-f", id])).await.map(|_| ())
    }
}

/// Container substrate owned by one universe.
pub struct DockerSubstrate {
    engine: Arc<dyn ContainerEngine>,
}

impl DockerSubstrate {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Substrate for DockerSubstrate {
    type Binding = ContainerBinding;
    type Node = ContainerNode;

    fn kind(&self) -> &'static str {
        "docker"
    }

    #[instrument(skip_all, name = "universe.substrate.docker.prepare")]
    async fn prepare(&self, params: &UniverseParams<ContainerBinding>) -> Result<()> {
        info!(
            target: "universe.substrate.docker",
            network = %params.network_name(),
            "Creating universe network"
        );
        self.engine.create_network(params.network_name()).await
    }

    async fn build_node(
        &self,
        deployment: &DeploymentParams<ContainerBinding>,
        logging: &LoggingParams,
    ) -> Result<ContainerNode> {
        Ok(ContainerNode::new(
            Arc::clone(&self.engine),
            deployment.clone(),
            logging.clone(),
        ))
    }

    #[instrument(skip_all, name = "universe.substrate.docker.release")]
    async fn release(&self, params: &UniverseParams<ContainerBinding>) -> Result<()> {
        info!(
            target: "universe.substrate.docker",
            network = %params.network_name(),
            "Removing universe network"
        );
        self.engine.remove_network(params.network_name()).await
    }
}

/// Connects a [`DockerSubstrate`] to a container engine.
#[derive(Clone)]
pub struct DockerSubstrateFactory {
    engine: Arc<dyn ContainerEngine>,
}

impl DockerSubstrateFactory {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Factory using the local `docker` CLI.
    pub fn cli() -> Self {
        Self::new(Arc::new(DockerCli::new()))
    }
}

#[async_trait]
impl SubstrateFactory for DockerSubstrateFactory {
    type Substrate = DockerSubstrate;
    type Bindings = ContainerBindings;

    async fn connect(&self) -> Result<DockerSubstrate> {
        self.engine.ping().await?;
        Ok(DockerSubstrate::new(Arc::clone(&self.engine)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::params::{NodeParams, VolumeMode};

    fn deployment() -> DeploymentParams<ContainerBinding> {
        let node = NodeParams::builder("c1", "db")
            .port(9000)
            .server_version("1.0")
            .build()
            .unwrap();
        let mut binding = ContainerBinding::for_node(&node, "corfudb/server", "universe-net-x");
        binding.image_version = "1.0".to_string();
        binding.envs.insert("JAVA_OPTS".to_string(), "-Xmx1g".to_string());
        binding.volume_bindings.push(VolumeBinding {
            host_path: PathBuf::from("/tmp/c1"),
            container_path: PathBuf::from("/data"),
            mode: VolumeMode::ReadWrite,
        });
        DeploymentParams::new(node, binding)
    }

    #[test]
    fn test_spec_for_deployment() {
        let spec = ContainerSpec::for_deployment(&deployment());
        assert_eq!(spec.name, "c1-db-node9000");
        assert_eq!(spec.network_alias, "c1-db-node9000");
        assert_eq!(spec.image, "corfudb/server:1.0");
        assert_eq!(spec.network, "universe-net-x");
        assert_eq!(spec.cmd.first().map(String::as_str), Some("-a"));
        assert_eq!(spec.cmd.get(1).map(String::as_str), Some("c1-db-node9000"));
    }

    #[test]
    fn test_create_args() {
        let args = DockerCli::create_args(&ContainerSpec::for_deployment(&deployment()));
        let joined = args.join(" ");
        assert!(joined.starts_with(
            "create --name c1-db-node9000 --network universe-net-x --network-alias c1-db-node9000"
        ));
        assert!(joined.contains("-p 9000:9000"));
        assert!(joined.contains("-v /tmp/c1:/data:rw"));
        assert!(joined.contains("-e JAVA_OPTS=-Xmx1g"));
        assert!(joined.contains("corfudb/server:1.0 -a c1-db-node9000"));
        assert!(joined.ends_with("9000"));
    }

    #[test]
    fn test_parse_container_state() {
        assert_eq!(ContainerState::parse("running\n"), Some(ContainerState::Running));
        assert_eq!(ContainerState::parse("exited"), Some(ContainerState::Exited));
        assert_eq!(ContainerState::parse("bogus"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_substrate_error() {
        let cli = DockerCli::with_binary("/nonexistent/docker-binary");
        let err = cli.ping().await.unwrap_err();
        assert!(matches!(err, UniverseError::Substrate { .. }));
    }
}
