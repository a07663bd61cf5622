//! Virtual-machine substrate.
//!
//! VMs are managed through an [`ApplianceManager`] (power control, address
//! lookup) and servers are launched over a [`RemoteShell`]. Appliance
//! managers are treated as exclusive to one universe.

use crate::errors::{Result, UniverseError};
use crate::fixture::VmBindings;
use crate::node::VmNode;
use crate::params::{DeploymentParams, LoggingParams, UniverseParams, VmBinding};
use crate::substrate::{Substrate, SubstrateFactory};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Exit code ssh uses for its own (connection) failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    Suspended,
}

/// Result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// VM power control and inventory.
#[async_trait]
pub trait ApplianceManager: Send + Sync {
    /// Make sure every VM exists and is provisioned.
    async fn deploy(&self, vms: &[VmBinding]) -> Result<()>;

    /// Address the VM is reachable at.
    async fn address(&self, vm_name: &str) -> Result<String>;

    async fn power_on(&self, vm_name: &str) -> Result<()>;

    async fn power_off(&self, vm_name: &str) -> Result<()>;

    async fn power_state(&self, vm_name: &str) -> Result<PowerState>;
}

/// Remote command execution.
///
/// Returns `Err` only when the command could not be delivered; a command
/// that ran and failed comes back as a non-zero exit code.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput>;
}

/// Pre-provisioned hosts with fixed addresses and no power control.
#[derive(Debug, Clone, Default)]
pub struct StaticAppliances {
    addresses: HashMap<String, String>,
}

impl StaticAppliances {
    pub fn new(addresses: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ApplianceManager for StaticAppliances {
    async fn deploy(&self, vms: &[VmBinding]) -> Result<()> {
        for vm in vms {
            if !self.addresses.contains_key(&vm.vm_name) {
                return Err(UniverseError::Configuration(format!(
                    "unknown appliance {}",
                    vm.vm_name
                )));
            }
        }
        Ok(())
    }

    async fn address(&self, vm_name: &str) -> Result<String> {
        self.addresses
            .get(vm_name)
            .cloned()
            .ok_or_else(|| UniverseError::Configuration(format!("unknown appliance {vm_name}")))
    }

    async fn power_on(&self, _vm_name: &str) -> Result<()> {
        Ok(())
    }

    async fn power_off(&self, vm_name: &str) -> Result<()> {
        Err(UniverseError::substrate(
            vm_name,
            "static appliances cannot be powered off",
        ))
    }

    async fn power_state(&self, _vm_name: &str) -> Result<PowerState> {
        Ok(PowerState::On)
    }
}

/// Remote shell over the `ssh` CLI (batch mode, key auth).
#[derive(Debug, Clone)]
pub struct SshRemoteShell {
    binary: PathBuf,
    user: Option<String>,
}

impl Default for SshRemoteShell {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SshRemoteShell {
    pub fn new(user: Option<String>) -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            user,
        }
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn destination(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }
}

#[async_trait]
impl RemoteShell for SshRemoteShell {
    async fn execute(&self, host: &str, command: &str) -> Result<CommandOutput> {
        debug!(
            target: "universe.node.vm",
            host = %host,
            command = %command,
            "Executing remote command"
        );

        let output = Command::new(&self.binary)
            .args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no"])
            .arg(self.destination(host))
            .arg(command)
            .output()
            .await
            .map_err(|e| UniverseError::substrate(host, format!("failed to run ssh: {e}")))?;

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == SSH_CONNECTION_FAILURE {
            return Err(UniverseError::substrate(
                host,
                format!(
                    "ssh connection failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(CommandOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Where and how the server runs on a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmServerSettings {
    /// Server launcher on the VM.
    pub server_binary: String,
    /// Directory holding logs, pid files and stream logs.
    pub work_dir: String,
}

impl Default for VmServerSettings {
    fn default() -> Self {
        Self {
            server_binary: "/opt/universe/bin/server".to_string(),
            work_dir: "/opt/universe/work".to_string(),
        }
    }
}

/// VM substrate owned by one universe.
pub struct VmSubstrate {
    appliances: Arc<dyn ApplianceManager>,
    shell: Arc<dyn RemoteShell>,
    settings: VmServerSettings,
}

impl VmSubstrate {
    pub fn new(
        appliances: Arc<dyn ApplianceManager>,
        shell: Arc<dyn RemoteShell>,
        settings: VmServerSettings,
    ) -> Self {
        Self {
            appliances,
            shell,
            settings,
        }
    }
}

#[async_trait]
impl Substrate for VmSubstrate {
    type Binding = VmBinding;
    type Node = VmNode;

    fn kind(&self) -> &'static str {
        "vm"
    }

    #[instrument(skip_all, name = "universe.substrate.vm.prepare")]
    async fn prepare(&self, params: &UniverseParams<VmBinding>) -> Result<()> {
        let vms: Vec<VmBinding> = params
            .groups()
            .iter()
            .flat_map(|g| g.cluster_nodes())
            .map(|d| d.binding().clone())
            .collect();

        info!(
            target: "universe.node.vm",
            vm_count = vms.len(),
            "Deploying appliances"
        );
        self.appliances.deploy(&vms).await
    }

    async fn build_node(
        &self,
        deployment: &DeploymentParams<VmBinding>,
        logging: &LoggingParams,
    ) -> Result<VmNode> {
        let host = self.appliances.address(&deployment.binding().vm_name).await?;
        Ok(VmNode::new(
            Arc::clone(&self.appliances),
            Arc::clone(&self.shell),
            self.settings.clone(),
            deployment.clone(),
            logging.clone(),
            host,
        ))
    }

    async fn release(&self, _params: &UniverseParams<VmBinding>) -> Result<()> {
        Ok(())
    }
}

/// Connects a [`VmSubstrate`].
#[derive(Clone)]
pub struct VmSubstrateFactory {
    appliances: Arc<dyn ApplianceManager>,
    shell: Arc<dyn RemoteShell>,
    settings: VmServerSettings,
}

impl VmSubstrateFactory {
    pub fn new(
        appliances: Arc<dyn ApplianceManager>,
        shell: Arc<dyn RemoteShell>,
        settings: VmServerSettings,
    ) -> Self {
        Self {
            appliances,
            shell,
            settings,
        }
    }
}

#[async_trait]
impl SubstrateFactory for VmSubstrateFactory {
    type Substrate = VmSubstrate;
    type Bindings = VmBindings;

    async fn connect(&self) -> Result<VmSubstrate> {
        Ok(VmSubstrate::new(
            Arc::clone(&self.appliances),
            Arc::clone(&self.shell),
            self.settings.clone(),
        ))
    }
}
