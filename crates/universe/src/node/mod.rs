//! Node handles.
//!
//! A [`Node`] is one server instance on one substrate. Every variant exposes
//! the same capability set; the substrate is chosen once, when the group is
//! built, and never re-dispatched per call.
//!
//! Lifecycle: not-started -> running -> stopped -> running -> destroyed.
//! A stopped node keeps its identity and can be restarted. A destroyed node
//! rejects every further lifecycle call with `UniverseError::NodeDestroyed`.

pub mod container;
pub mod process;
pub mod vm;

use crate::errors::Result;
use crate::params::{LoggingParams, NodeParams};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::warn;

pub use container::ContainerNode;
pub use process::ProcessNode;
pub use vm::VmNode;

/// Observed status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Running,
    Stopped,
    Unresponsive,
    /// Status could not be determined (or the node is destroyed).
    Unknown,
}

impl NodeStatus {
    /// Stopped or unresponsive.
    pub fn is_down(&self) -> bool {
        matches!(self, NodeStatus::Stopped | NodeStatus::Unresponsive)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Running => write!(f, "RUNNING"),
            NodeStatus::Stopped => write!(f, "STOPPED"),
            NodeStatus::Unresponsive => write!(f, "UNRESPONSIVE"),
            NodeStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Capability set of a server instance.
///
/// `start()` failures are returned, never retried. `stop(timeout)` escalates
/// to a forced kill once `timeout` elapses and still reports success.
#[async_trait]
pub trait Node: Send + Sync {
    fn params(&self) -> &NodeParams;

    /// Address the database client uses to reach this node.
    fn endpoint(&self) -> String;

    fn name(&self) -> String {
        self.params().name()
    }

    async fn start(&self) -> Result<()>;

    async fn stop(&self, timeout: Duration) -> Result<()>;

    /// Immediate forced termination.
    async fn kill(&self) -> Result<()>;

    /// Graceful stop using the node's stop timeout, then start.
    async fn restart(&self) -> Result<()> {
        self.stop(self.params().stop_timeout()).await?;
        self.start().await
    }

    async fn status(&self) -> NodeStatus;

    /// Release every substrate resource of the node. Idempotent.
    async fn destroy(&self) -> Result<()>;

    fn is_destroyed(&self) -> bool;
}

/// Copy `source` into the per-test log directory when logging is enabled.
///
/// Failures are logged and swallowed; log collection never fails teardown.
pub(crate) async fn collect_log_file(
    logging: &LoggingParams,
    node_name: &str,
    contents: &[u8],
) {
    if !logging.enabled {
        return;
    }

    let dir = logging.server_log_dir();
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        warn!(
            target: "universe.node",
            node = %node_name,
            dir = %dir.display(),
            error = %e,
            "Failed to create server log directory"
        );
        return;
    }

    let file = logging.node_log_file(node_name);
    if let Err(e) = tokio::fs::write(&file, contents).await {
        warn!(
            target: "universe.node",
            node = %node_name,
            file = %file.display(),
            error = %e,
            "Failed to write node log file"
        );
    }
}
