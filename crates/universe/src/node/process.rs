//! Local OS process node.
//!
//! The server is spawned in its own work directory with stdout/stderr going
//! to `{work_dir}/{name}.log`. Stop sends SIGTERM (unix), waits up to the
//! timeout, then force-kills.

use crate::errors::{Result, UniverseError};
use crate::node::{collect_log_file, Node, NodeStatus};
use crate::params::{DeploymentParams, LoggingParams, NodeParams, ProcessBinding};
use crate::params::node::millis;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Host local servers bind to.
pub const LOCAL_HOST: &str = "localhost";

pub struct ProcessNode {
    deployment: DeploymentParams<ProcessBinding>,
    logging: LoggingParams,
    child: Mutex<Option<Child>>,
    destroyed: AtomicBool,
}

impl ProcessNode {
    pub fn new(deployment: DeploymentParams<ProcessBinding>, logging: LoggingParams) -> Self {
        Self {
            deployment,
            logging,
            child: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn work_dir(&self) -> &std::path::Path {
        &self.deployment.binding().work_dir
    }

    pub fn log_file(&self) -> PathBuf {
        self.work_dir().join(format!("{}.log", self.name()))
    }

    /// OS pid of the running server.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(UniverseError::NodeDestroyed(self.name()));
        }
        Ok(())
    }

    async fn spawn(&self) -> Result<Child> {
        let binding = self.deployment.binding();
        tokio::fs::create_dir_all(&binding.work_dir).await?;

        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())
            .await?
            .into_std()
            .await;
        let log_err = log.try_clone()?;

        Command::new(&binding.program)
            .args(&binding.args)
            .args(self.params().server_args(LOCAL_HOST))
            .current_dir(&binding.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                UniverseError::substrate(
                    self.name(),
                    format!("failed to spawn {}: {e}", binding.program.display()),
                )
            })
    }
}

/// Ask the process to terminate gracefully.
#[cfg(unix)]
async fn terminate(child: &mut Child) -> Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .await?;
    if !status.success() {
        debug!(
            target: "universe.node.process",
            pid = pid,
            "kill -TERM did not succeed, process may have exited"
        );
    }
    Ok(())
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> Result<()> {
    child.start_kill()?;
    Ok(())
}

#[async_trait]
impl Node for ProcessNode {
    fn params(&self) -> &NodeParams {
        self.deployment.node()
    }

    fn endpoint(&self) -> String {
        self.params().endpoint(LOCAL_HOST)
    }

    async fn start(&self) -> Result<()> {
        self.ensure_alive()?;
        let mut guard = self.child.lock().await;

        if let Some(child) = guard.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                debug!(
                    target: "universe.node.process",
                    node = %self.name(),
                    "Process already running"
                );
                return Ok(());
            }
        }

        let child = self.spawn().await?;
        info!(
            target: "universe.node.process",
            node = %self.name(),
            pid = child.id().unwrap_or_default(),
            "Process started"
        );
        *guard = Some(child);
        Ok(())
    }

    async fn stop(&self, timeout: Duration) -> Result<()> {
        self.ensure_alive()?;
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(
                target: "universe.node.process",
                node = %self.name(),
                status = %status,
                "Process already exited"
            );
            *guard = None;
            return Ok(());
        }

        terminate(child).await?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(
                    target: "universe.node.process",
                    node = %self.name(),
                    status = %status,
                    "Process stopped"
                );
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    target: "universe.node.process",
                    node = %self.name(),
                    timeout_ms = millis(timeout),
                    "Graceful stop timed out, killing process"
                );
                child.kill().await?;
            }
        }

        *guard = None;
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.ensure_alive()?;
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            child.kill().await?;
            info!(
                target: "universe.node.process",
                node = %self.name(),
                "Process killed"
            );
        }
        Ok(())
    }

    async fn status(&self) -> NodeStatus {
        if self.destroyed.load(Ordering::SeqCst) {
            return NodeStatus::Unknown;
        }
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            None => NodeStatus::Stopped,
            Some(child) => match child.try_wait() {
                Ok(None) => NodeStatus::Running,
                Ok(Some(_)) => NodeStatus::Stopped,
                Err(_) => NodeStatus::Unknown,
            },
        }
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(
                    target: "universe.node.process",
                    node = %self.name(),
                    error = %e,
                    "Failed to kill process during destroy"
                );
            }
        }

        if self.logging.enabled {
            match tokio::fs::read(self.log_file()).await {
                Ok(contents) => collect_log_file(&self.logging, &self.name(), &contents).await,
                Err(e) => warn!(
                    target: "universe.node.process",
                    node = %self.name(),
                    error = %e,
                    "Failed to read process log"
                ),
            }
        }

        match tokio::fs::remove_dir_all(self.work_dir()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            target: "universe.node.process",
            node = %self.name(),
            "Process node destroyed"
        );
        Ok(())
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// A node running a `sh -c` sleeper; the server args land in `$1..`.
    fn sleeper(dir: &std::path::Path, port: u16, trap_term: bool) -> ProcessNode {
        let node = NodeParams::builder("local", "db")
            .port(port)
            .server_version("1.0")
            .build()
            .unwrap();
        let script = if trap_term {
            "trap '' TERM; sleep 30"
        } else {
            "exec sleep 30"
        };
        let binding = ProcessBinding {
            work_dir: dir.join(node.name()),
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string(), "server".to_string()],
        };
        ProcessNode::new(
            DeploymentParams::new(node, binding),
            LoggingParams::new("process-test").with_base_dir(dir),
        )
    }

    #[tokio::test]
    async fn test_start_stop_restart_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let node = sleeper(dir.path(), 19000, false);
        let name = node.name();

        assert_eq!(node.status().await, NodeStatus::Stopped);

        node.start().await.unwrap();
        assert_eq!(node.status().await, NodeStatus::Running);
        assert_eq!(node.endpoint(), "localhost:19000");

        node.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(node.status().await, NodeStatus::Stopped);

        node.restart().await.unwrap();
        assert_eq!(node.status().await, NodeStatus::Running);
        assert_eq!(node.name(), name);

        node.destroy().await.unwrap();
        assert!(!dir.path().join(&name).exists());
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let node = sleeper(dir.path(), 19001, true);

        node.start().await.unwrap();
        node.stop(Duration::from_millis(200)).await.unwrap();
        assert_eq!(node.status().await, NodeStatus::Stopped);

        node.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroyed_node_rejects_lifecycle_calls() {
        let dir = tempfile::tempdir().unwrap();
        let node = sleeper(dir.path(), 19002, false);

        node.start().await.unwrap();
        node.destroy().await.unwrap();
        node.destroy().await.unwrap();

        assert!(node.is_destroyed());
        assert_eq!(node.status().await, NodeStatus::Unknown);
        assert!(matches!(
            node.start().await,
            Err(UniverseError::NodeDestroyed(_))
        ));
        assert!(matches!(
            node.stop(Duration::from_secs(1)).await,
            Err(UniverseError::NodeDestroyed(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_substrate_error() {
        let dir = tempfile::tempdir().unwrap();
        let node_params = NodeParams::builder("local", "db")
            .port(19003)
            .server_version("1.0")
            .build()
            .unwrap();
        let binding = ProcessBinding {
            work_dir: dir.path().join("w"),
            program: PathBuf::from("/nonexistent/server"),
            args: Vec::new(),
        };
        let node = ProcessNode::new(
            DeploymentParams::new(node_params, binding),
            LoggingParams::new("t"),
        );

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, UniverseError::Substrate { .. }));
    }
}
