//! VM node.
//!
//! The server runs as a background process on its VM, tracked by a pid file
//! in the work directory. Status combines the appliance power state with a
//! `kill -0` liveness probe.

use crate::errors::{Result, UniverseError};
use crate::node::{collect_log_file, Node, NodeStatus};
use crate::params::{DeploymentParams, LoggingParams, NodeParams, VmBinding};
use crate::params::node::millis;
use crate::substrate::vm::{ApplianceManager, PowerState, RemoteShell, VmServerSettings};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between liveness probes while waiting for a graceful stop.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct VmNode {
    appliances: Arc<dyn ApplianceManager>,
    shell: Arc<dyn RemoteShell>,
    settings: VmServerSettings,
    deployment: DeploymentParams<VmBinding>,
    logging: LoggingParams,
    host: String,
    destroyed: AtomicBool,
}

impl VmNode {
    pub fn new(
        appliances: Arc<dyn ApplianceManager>,
        shell: Arc<dyn RemoteShell>,
        settings: VmServerSettings,
        deployment: DeploymentParams<VmBinding>,
        logging: LoggingParams,
        host: String,
    ) -> Self {
        Self {
            appliances,
            shell,
            settings,
            deployment,
            logging,
            host,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn vm_name(&self) -> &str {
        &self.deployment.binding().vm_name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn pid_file(&self) -> String {
        format!("{}/{}.pid", self.settings.work_dir, self.name())
    }

    fn log_file(&self) -> String {
        format!("{}/{}.log", self.settings.work_dir, self.name())
    }

    fn launch_command(&self) -> String {
        let args = self.params().server_args(&self.host).join(" ");
        format!(
            "mkdir -p {work} && cd {work} && nohup {bin} {args} > {log} 2>&1 & echo $! > {pid}",
            work = self.settings.work_dir,
            bin = self.settings.server_binary,
            log = self.log_file(),
            pid = self.pid_file(),
        )
    }

    fn signal_command(&self, signal: &str) -> String {
        format!("kill -{signal} $(cat {})", self.pid_file())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(UniverseError::NodeDestroyed(self.name()));
        }
        Ok(())
    }

    /// Server process liveness; `Err` if the VM could not be reached.
    async fn process_alive(&self) -> Result<bool> {
        let output = self
            .shell
            .execute(&self.host, &self.signal_command("0"))
            .await?;
        Ok(output.success())
    }

    /// SIGKILL the server, powering the appliance off if the VM is unreachable.
    async fn force_stop(&self) -> Result<()> {
        match self.shell.execute(&self.host, &self.signal_command("KILL")).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    target: "universe.node.vm",
                    node = %self.name(),
                    vm = %self.vm_name(),
                    error = %e,
                    "Remote kill failed, powering off appliance"
                );
                self.appliances.power_off(self.vm_name()).await
            }
        }
    }
}

#[async_trait]
impl Node for VmNode {
    fn params(&self) -> &NodeParams {
        self.deployment.node()
    }

    fn endpoint(&self) -> String {
        self.params().endpoint(&self.host)
    }

    async fn start(&self) -> Result<()> {
        self.ensure_alive()?;

        if self.appliances.power_state(self.vm_name()).await? != PowerState::On {
            info!(
                target: "universe.node.vm",
                vm = %self.vm_name(),
                "Powering on appliance"
            );
            self.appliances.power_on(self.vm_name()).await?;
        }

        // A second launch would orphan the running server behind a new pid file.
        if self.process_alive().await? {
            debug!(
                target: "universe.node.vm",
                node = %self.name(),
                "Server already running on VM"
            );
            return Ok(());
        }

        let output = self.shell.execute(&self.host, &self.launch_command()).await?;
        if !output.success() {
            return Err(UniverseError::substrate(
                self.name(),
                format!(
                    "server launch exited with {}: {}",
                    output.exit_code,
                    output.stderr_lossy()
                ),
            ));
        }

        info!(
            target: "universe.node.vm",
            node = %self.name(),
            host = %self.host,
            "Server started on VM"
        );
        Ok(())
    }

    async fn stop(&self, timeout: Duration) -> Result<()> {
        self.ensure_alive()?;

        if let Err(e) = self.shell.execute(&self.host, &self.signal_command("TERM")).await {
            warn!(
                target: "universe.node.vm",
                node = %self.name(),
                error = %e,
                "Graceful shutdown command failed"
            );
            return self.force_stop().await;
        }

        let deadline = Instant::now() + timeout;
        loop {
            match self.process_alive().await {
                Ok(false) => {
                    info!(
                        target: "universe.node.vm",
                        node = %self.name(),
                        "Server stopped on VM"
                    );
                    return Ok(());
                }
                Ok(true) => {}
                Err(e) => {
                    debug!(
                        target: "universe.node.vm",
                        node = %self.name(),
                        error = %e,
                        "Liveness probe failed during stop"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
        }

        warn!(
            target: "universe.node.vm",
            node = %self.name(),
            timeout_ms = millis(timeout),
            "Graceful stop timed out, killing server"
        );
        self.force_stop().await
    }

    async fn kill(&self) -> Result<()> {
        self.ensure_alive()?;
        self.force_stop().await?;
        info!(
            target: "universe.node.vm",
            node = %self.name(),
            "Server killed on VM"
        );
        Ok(())
    }

    async fn status(&self) -> NodeStatus {
        if self.destroyed.load(Ordering::SeqCst) {
            return NodeStatus::Unknown;
        }

        match self.appliances.power_state(self.vm_name()).await {
            Ok(PowerState::Off) => NodeStatus::Stopped,
            Ok(PowerState::Suspended) => NodeStatus::Unresponsive,
            Ok(PowerState::On) => match self.process_alive().await {
                Ok(true) => NodeStatus::Running,
                Ok(false) => NodeStatus::Stopped,
                Err(_) => NodeStatus::Unresponsive,
            },
            Err(_) => NodeStatus::Unknown,
        }
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.shell.execute(&self.host, &self.signal_command("KILL")).await {
            warn!(
                target: "universe.node.vm",
                node = %self.name(),
                error = %e,
                "Failed to kill server during destroy"
            );
        }

        if self.logging.enabled {
            match self
                .shell
                .execute(&self.host, &format!("cat {}", self.log_file()))
                .await
            {
                Ok(output) => collect_log_file(&self.logging, &self.name(), &output.stdout).await,
                Err(e) => warn!(
                    target: "universe.node.vm",
                    node = %self.name(),
                    error = %e,
                    "Failed to fetch server log"
                ),
            }
        }

        let cleanup = format!(
            "rm -rf {work}/{name} {log} {pid}",
            work = self.settings.work_dir,
            name = self.name(),
            log = self.log_file(),
            pid = self.pid_file(),
        );
        let output = self.shell.execute(&self.host, &cleanup).await?;
        if !output.success() {
            return Err(UniverseError::substrate(
                self.name(),
                format!("cleanup failed: {}", output.stderr_lossy()),
            ));
        }

        info!(
            target: "universe.node.vm",
            node = %self.name(),
            "VM node destroyed"
        );
        Ok(())
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}
