//! Universe error types.
//!
//! Errors follow the lifecycle of a test universe:
//! - Configuration errors fail fast, before any substrate resource exists.
//! - Substrate and bootstrap errors are fatal to `deploy()` and never retried here.
//! - Timeout errors come from status polling and carry the last observation.
//!
//! Teardown never raises. Individual failures are collected into a
//! [`TeardownReport`] so the remaining resources are still released.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Universe error type.
#[derive(Debug, Error)]
pub enum UniverseError {
    /// Missing or invalid fixture/config field.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A container, VM or process operation failed.
    #[error("Substrate error on {target}: {message}")]
    Substrate { target: String, message: String },

    /// The node handle was destroyed and must not be reused.
    #[error("Node destroyed: {0}")]
    NodeDestroyed(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Cluster already bootstrapped: {0}")]
    AlreadyBootstrapped(String),

    #[error("Cluster not bootstrapped: {0}")]
    NotBootstrapped(String),

    /// Bootstrap requires every member to be running.
    #[error("Cluster {cluster} not ready for bootstrap: node {node} is {status}")]
    NotReady {
        cluster: String,
        node: String,
        status: String,
    },

    #[error("Bootstrap failed for cluster {cluster}: {message}")]
    Bootstrap { cluster: String, message: String },

    /// The database client call itself failed.
    #[error("Client error: {0}")]
    Client(String),

    /// A workflow step was called in a state that does not allow it.
    #[error("Invalid workflow state: {0}")]
    WorkflowState(String),

    /// The polled condition never became true within the budget.
    #[error("Timed out after {waited:?} waiting for {condition}; last observed: {last_observed}")]
    Timeout {
        condition: String,
        waited: Duration,
        last_observed: String,
    },

    /// A one-shot status check did not hold.
    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UniverseError {
    /// Build a substrate error for the given resource.
    pub fn substrate(target: impl Into<String>, message: impl fmt::Display) -> Self {
        UniverseError::Substrate {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this is a polling timeout (the condition never held).
    pub fn is_timeout(&self) -> bool {
        matches!(self, UniverseError::Timeout { .. })
    }
}

/// Result type alias using `UniverseError`.
pub type Result<T> = std::result::Result<T, UniverseError>;

/// A single resource that could not be released during teardown.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Node, group or shared resource name.
    pub resource: String,
    pub error: UniverseError,
}

/// Outcome of a best-effort teardown.
///
/// Shutdown walks every group and node regardless of earlier failures.
/// All failures end up here instead of aborting the walk.
#[derive(Debug, Default)]
pub struct TeardownReport {
    failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed release of `resource`.
    pub fn record(&mut self, resource: impl Into<String>, error: UniverseError) {
        self.failures.push(TeardownFailure {
            resource: resource.into(),
            error,
        });
    }

    /// Append all failures of another report.
    pub fn merge(&mut self, other: TeardownReport) {
        self.failures.extend(other.failures);
    }

    /// True when every resource was released.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    /// True if a failure was recorded for `resource`.
    pub fn has_failure_for(&self, resource: &str) -> bool {
        self.failures.iter().any(|f| f.resource == resource)
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "clean teardown");
        }

        write!(f, "{} teardown failure(s):", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.resource, failure.error)?;
        }
        Ok(())
    }
}
