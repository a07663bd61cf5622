//! Status polling and failure verification.
//!
//! These helpers observe the cluster through the database client's own
//! status API, not through orchestration bookkeeping, so they verify how the
//! database reacts to failures.
//!
//! Polls use exponential backoff bounded by a [`PollPolicy`]:
//! - Initial delay: 500ms
//! - Multiplier: 2x, capped at `max_delay` and at the remaining budget
//! - Timeout: 60s
//!
//! A condition that never holds yields `UniverseError::Timeout` carrying the
//! last observation. Client errors abort the poll immediately.

use crate::client::{ClusterClient, ClusterStatus, ClusterStatusReport};
use crate::errors::{Result, UniverseError};
use crate::node::NodeStatus;
use crate::params::node::millis;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Polling budget and backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl PollPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Poll `probe` until `check` holds or the budget runs out.
async fn poll_until<T, P, Fut, C, D>(
    policy: &PollPolicy,
    condition: &str,
    mut probe: P,
    check: C,
    describe: D,
) -> Result<T>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&T) -> bool,
    D: Fn(&T) -> String,
{
    let start = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let observed = probe().await?;
        if check(&observed) {
            debug!(
                target: "universe.scenario",
                condition = %condition,
                attempts = attempts,
                elapsed_ms = millis(start.elapsed()),
                "Condition met"
            );
            return Ok(observed);
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            let last_observed = describe(&observed);
            warn!(
                target: "universe.scenario",
                condition = %condition,
                attempts = attempts,
                last_observed = %last_observed,
                "Condition not met within timeout"
            );
            return Err(UniverseError::Timeout {
                condition: condition.to_string(),
                waited: elapsed,
                last_observed,
            });
        }

        let remaining = policy.timeout.saturating_sub(elapsed);
        sleep(delay.min(remaining)).await;
        delay = delay.saturating_mul(2).min(policy.max_delay);
    }
}

/// Wait until the number of unresponsive servers satisfies `predicate`.
///
/// # Returns
///
/// The unresponsive servers observed when the predicate held.
///
/// # Errors
///
/// `Timeout` if the predicate never holds; the client's error if a query fails.
#[instrument(skip_all, name = "universe.scenario.wait_for_unresponsive_servers")]
pub async fn wait_for_unresponsive_servers_change<P>(
    policy: &PollPolicy,
    client: &dyn ClusterClient,
    predicate: P,
) -> Result<Vec<String>>
where
    P: Fn(usize) -> bool,
{
    poll_until(
        policy,
        "unresponsive servers change",
        || client.unresponsive_servers(),
        |servers: &Vec<String>| predicate(servers.len()),
        |servers: &Vec<String>| format!("{} unresponsive {:?}", servers.len(), servers),
    )
    .await
}

/// Wait until the cluster reports `expected`.
pub async fn wait_for_cluster_status(
    policy: &PollPolicy,
    client: &dyn ClusterClient,
    expected: ClusterStatus,
) -> Result<ClusterStatusReport> {
    poll_until(
        policy,
        &format!("cluster status {expected}"),
        || client.cluster_status(),
        |report: &ClusterStatusReport| report.status == expected,
        |report: &ClusterStatusReport| report.status.to_string(),
    )
    .await
}

#[instrument(skip_all, name = "universe.scenario.wait_for_stable")]
pub async fn wait_for_cluster_status_stable(
    policy: &PollPolicy,
    client: &dyn ClusterClient,
) -> Result<ClusterStatusReport> {
    wait_for_cluster_status(policy, client, ClusterStatus::Stable).await
}

#[instrument(skip_all, name = "universe.scenario.wait_for_degraded")]
pub async fn wait_for_cluster_status_degraded(
    policy: &PollPolicy,
    client: &dyn ClusterClient,
) -> Result<ClusterStatusReport> {
    wait_for_cluster_status(policy, client, ClusterStatus::Degraded).await
}

/// One-shot check that the database reports `endpoint` as down.
///
/// # Errors
///
/// `Verification` if the node is reported up or missing.
pub async fn verify_node_status_is_down(
    client: &dyn ClusterClient,
    endpoint: &str,
) -> Result<NodeStatus> {
    let report = client.cluster_status().await?;
    match report.node_statuses.get(endpoint) {
        Some(status) if status.is_down() => Ok(*status),
        Some(status) => Err(UniverseError::Verification(format!(
            "node {endpoint} is {status}, expected STOPPED or UNRESPONSIVE"
        ))),
        None => Err(UniverseError::Verification(format!(
            "node {endpoint} missing from cluster status"
        ))),
    }
}
