//! Container node.
//!
//! The container is created lazily on the first `start()` and reused by
//! later starts, so a restarted node keeps its container and identity.

use crate::errors::{Result, UniverseError};
use crate::node::{collect_log_file, Node, NodeStatus};
use crate::params::{ContainerBinding, DeploymentParams, LoggingParams, NodeParams};
use crate::params::node::millis;
use crate::substrate::docker::{ContainerEngine, ContainerSpec, ContainerState};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extra time the engine gets beyond the stop timeout before we kill.
const STOP_ESCALATION_GRACE: Duration = Duration::from_secs(5);

pub struct ContainerNode {
    engine: Arc<dyn ContainerEngine>,
    deployment: DeploymentParams<ContainerBinding>,
    logging: LoggingParams,
    container_id: Mutex<Option<String>>,
    destroyed: AtomicBool,
}

impl ContainerNode {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        deployment: DeploymentParams<ContainerBinding>,
        logging: LoggingParams,
    ) -> Self {
        Self {
            engine,
            deployment,
            logging,
            container_id: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn binding(&self) -> &ContainerBinding {
        self.deployment.binding()
    }

    /// Engine id of the container, once created.
    pub async fn container_id(&self) -> Option<String> {
        self.container_id.lock().await.clone()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(UniverseError::NodeDestroyed(self.name()));
        }
        Ok(())
    }
}

#[async_trait]
impl Node for ContainerNode {
    fn params(&self) -> &NodeParams {
        self.deployment.node()
    }

    fn endpoint(&self) -> String {
        self.params().endpoint(&self.name())
    }

    async fn start(&self) -> Result<()> {
        self.ensure_alive()?;
        let mut container_id = self.container_id.lock().await;

        let id = match container_id.as_ref() {
            Some(id) => id.clone(),
            None => {
                let spec = ContainerSpec::for_deployment(&self.deployment);
                let id = self.engine.create_container(&spec).await?;
                debug!(
                    target: "universe.node.container",
                    node = %spec.name,
                    container_id = %id,
                    image = %spec.image,
                    "Container created"
                );
                *container_id = Some(id.clone());
                id
            }
        };

        self.engine.start_container(&id).await?;

        info!(
            target: "universe.node.container",
            node = %self.name(),
            container_id = %id,
            "Container started"
        );
        Ok(())
    }

    async fn stop(&self, timeout: Duration) -> Result<()> {
        self.ensure_alive()?;
        let Some(id) = self.container_id().await else {
            debug!(
                target: "universe.node.container",
                node = %self.name(),
                "Stop requested before the container was created"
            );
            return Ok(());
        };

        match tokio::time::timeout(
            timeout + STOP_ESCALATION_GRACE,
            self.engine.stop_container(&id, timeout),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    target: "universe.node.container",
                    node = %self.name(),
                    timeout_ms = millis(timeout),
                    "Graceful stop timed out, killing container"
                );
                self.engine.kill_container(&id).await?;
            }
        }

        info!(
            target: "universe.node.container",
            node = %self.name(),
            "Container stopped"
        );
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.ensure_alive()?;
        if let Some(id) = self.container_id().await {
            self.engine.kill_container(&id).await?;
            info!(
                target: "universe.node.container",
                node = %self.name(),
                "Container killed"
            );
        }
        Ok(())
    }

    async fn status(&self) -> NodeStatus {
        if self.destroyed.load(Ordering::SeqCst) {
            return NodeStatus::Unknown;
        }
        let Some(id) = self.container_id().await else {
            return NodeStatus::Stopped;
        };

        match self.engine.inspect_container(&id).await {
            Ok(ContainerState::Running) => NodeStatus::Running,
            Ok(ContainerState::Created | ContainerState::Exited) => NodeStatus::Stopped,
            Ok(
                ContainerState::Paused
                | ContainerState::Restarting
                | ContainerState::Removing
                | ContainerState::Dead,
            ) => NodeStatus::Unresponsive,
            Err(e) => {
                debug!(
                    target: "universe.node.container",
                    node = %self.name(),
                    error = %e,
                    "Container inspect failed"
                );
                NodeStatus::Unknown
            }
        }
    }

    async fn destroy(&self) -> Result<()> {
        let already = self.destroyed.swap(true, Ordering::SeqCst);
        let mut container_id = self.container_id.lock().await;

        // The id is cleared only once removal succeeds, so a failed removal
        // is retried by the next destroy.
        let Some(id) = container_id.clone() else {
            if already {
                debug!(
                    target: "universe.node.container",
                    node = %self.name(),
                    "Container node already destroyed"
                );
            }
            return Ok(());
        };

        if self.logging.enabled && !already {
            match self.engine.container_logs(&id).await {
                Ok(logs) => collect_log_file(&self.logging, &self.name(), &logs).await,
                Err(e) => warn!(
                    target: "universe.node.container",
                    node = %self.name(),
                    error = %e,
                    "Failed to fetch container logs"
                ),
            }
        }

        self.engine.remove_container(&id).await?;
        *container_id = None;

        info!(
            target: "universe.node.container",
            node = %self.name(),
            "Container destroyed"
        );
        Ok(())
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}
