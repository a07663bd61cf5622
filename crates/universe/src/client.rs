//! Database client seam and cluster view model.
//!
//! The database client is an external collaborator. The orchestration layer
//! only needs it for the bootstrap call and for status polling, so it is
//! modelled as a narrow async trait. Implementations wrap the real RPC client;
//! tests use the simulated cluster from `universe-test-utils`.

use crate::errors::{Result, UniverseError};
use crate::node::NodeStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMode {
    ChainReplication,
}

/// One stripe of log servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutStripe {
    pub log_servers: Vec<String>,
}

/// Address-space segment. `end = None` means open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSegment {
    pub replication_mode: ReplicationMode,
    pub start: u64,
    pub end: Option<u64>,
    pub stripes: Vec<LayoutStripe>,
}

/// Cluster membership layout as seen by the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub epoch: u64,
    pub cluster_id: Uuid,
    pub layout_servers: Vec<String>,
    pub sequencers: Vec<String>,
    pub segments: Vec<LayoutSegment>,
    pub unresponsive_servers: Vec<String>,
}

impl Layout {
    /// Initial layout for freshly started servers: epoch 0, a single open
    /// chain-replication segment with one stripe over all servers.
    pub fn chain(servers: Vec<String>) -> Self {
        Self {
            epoch: 0,
            cluster_id: Uuid::new_v4(),
            layout_servers: servers.clone(),
            sequencers: servers.clone(),
            segments: vec![LayoutSegment {
                replication_mode: ReplicationMode::ChainReplication,
                start: 0,
                end: None,
                stripes: vec![LayoutStripe {
                    log_servers: servers,
                }],
            }],
            unresponsive_servers: Vec::new(),
        }
    }

    /// Every server mentioned by the layout, deduplicated, in first-seen order.
    pub fn all_servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = Vec::new();
        let log_servers = self
            .segments
            .iter()
            .flat_map(|s| s.stripes.iter())
            .flat_map(|s| s.log_servers.iter());
        for server in self
            .layout_servers
            .iter()
            .chain(self.sequencers.iter())
            .chain(log_servers)
        {
            if !servers.contains(server) {
                servers.push(server.clone());
            }
        }
        servers
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| UniverseError::Client(format!("failed to serialize layout: {e}")))
    }
}

/// Overall health classification of a database cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    /// All nodes responsive.
    Stable,
    /// Some nodes down, quorum kept.
    Degraded,
    /// Too many nodes down to form a quorum.
    Unavailable,
}

impl ClusterStatus {
    /// Classify a cluster of `total` nodes with `unresponsive` of them down.
    pub fn classify(total: usize, unresponsive: usize) -> Self {
        if unresponsive == 0 {
            return ClusterStatus::Stable;
        }
        let responsive = total.saturating_sub(unresponsive);
        if responsive > total / 2 {
            ClusterStatus::Degraded
        } else {
            ClusterStatus::Unavailable
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterStatus::Stable => write!(f, "STABLE"),
            ClusterStatus::Degraded => write!(f, "DEGRADED"),
            ClusterStatus::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Cluster status with per-endpoint node status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatusReport {
    pub status: ClusterStatus,
    pub node_statuses: BTreeMap<String, NodeStatus>,
}

impl ClusterStatusReport {
    /// Build a report from node statuses, classifying the cluster.
    ///
    /// Only `RUNNING` nodes count as responsive; an `UNKNOWN` node is not.
    pub fn from_node_statuses(node_statuses: BTreeMap<String, NodeStatus>) -> Self {
        let down = node_statuses
            .values()
            .filter(|s| **s != NodeStatus::Running)
            .count();
        Self {
            status: ClusterStatus::classify(node_statuses.len(), down),
            node_statuses,
        }
    }
}

/// Database client used for bootstrap and status polling.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Current committed layout.
    async fn layout(&self) -> Result<Layout>;

    /// Servers the database currently considers unreachable.
    async fn unresponsive_servers(&self) -> Result<Vec<String>> {
        Ok(self.layout().await?.unresponsive_servers)
    }

    async fn cluster_status(&self) -> Result<ClusterStatusReport>;

    /// Install the initial layout on freshly started servers.
    async fn bootstrap(&self, layout: &Layout) -> Result<()>;
}

/// Opens database clients against a set of endpoints.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, endpoints: &[String]) -> Result<Arc<dyn ClusterClient>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(ClusterStatus::classify(3, 0), ClusterStatus::Stable);
        assert_eq!(ClusterStatus::classify(3, 1), ClusterStatus::Degraded);
        assert_eq!(ClusterStatus::classify(3, 2), ClusterStatus::Unavailable);
        assert_eq!(ClusterStatus::classify(5, 2), ClusterStatus::Degraded);
        assert_eq!(ClusterStatus::classify(4, 2), ClusterStatus::Unavailable);
        assert_eq!(ClusterStatus::classify(1, 1), ClusterStatus::Unavailable);
    }

    #[test]
    fn test_chain_layout() {
        let servers = vec!["a:9000".to_string(), "b:9001".to_string()];
        let layout = Layout::chain(servers.clone());

        assert_eq!(layout.epoch, 0);
        assert_eq!(layout.layout_servers, servers);
        assert_eq!(layout.segments.len(), 1);
        let segment = layout.segments.first().unwrap();
        assert_eq!(segment.replication_mode, ReplicationMode::ChainReplication);
        assert_eq!(segment.start, 0);
        assert_eq!(segment.end, None);
        assert_eq!(segment.stripes.first().unwrap().log_servers, servers);
        assert_eq!(layout.all_servers(), servers);
        assert!(layout.unresponsive_servers.is_empty());
    }

    #[test]
    fn test_layout_json() {
        let layout = Layout::chain(vec!["a:9000".to_string()]);
        let json = layout.to_json().unwrap();
        assert!(json.contains("CHAIN_REPLICATION"));
        let back: Layout = serde_json::from_str(&json).unwrap();
        assert_eq!(back, layout);
    }

    #[test]
    fn test_report_from_node_statuses() {
        let mut statuses = BTreeMap::new();
        statuses.insert("a:9000".to_string(), NodeStatus::Running);
        statuses.insert("b:9001".to_string(), NodeStatus::Stopped);
        statuses.insert("c:9002".to_string(), NodeStatus::Running);

        let report = ClusterStatusReport::from_node_statuses(statuses);
        assert_eq!(report.status, ClusterStatus::Degraded);
    }

    #[test]
    fn test_unknown_nodes_are_not_responsive() {
        let mut statuses = BTreeMap::new();
        statuses.insert("a:9000".to_string(), NodeStatus::Running);
        statuses.insert("b:9001".to_string(), NodeStatus::Unknown);
        statuses.insert("c:9002".to_string(), NodeStatus::Running);
        assert_eq!(
            ClusterStatusReport::from_node_statuses(statuses.clone()).status,
            ClusterStatus::Degraded
        );

        statuses.insert("c:9002".to_string(), NodeStatus::Unknown);
        assert_eq!(
            ClusterStatusReport::from_node_statuses(statuses).status,
            ClusterStatus::Unavailable
        );
    }
}
