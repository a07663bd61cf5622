//! Simulated database cluster.
//!
//! Acts as both [`ClientConnector`] and [`ClusterClient`]. Server liveness is
//! read through an endpoint probe, so the simulated database notices a node
//! going down the same way the real one would: by failing to reach it.
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = MockContainerEngine::new();
//! let database = SimulatedDatabase::over_containers(engine.clone());
//! let connector: Arc<dyn ClientConnector> = Arc::new(database.clone());
//! // ... deploy, stop a node ...
//! assert_eq!(database.unresponsive_servers().await?.len(), 1);
//! ```

use crate::mock_engine::MockContainerEngine;
use crate::mock_vm::MockShell;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use universe::client::{ClientConnector, ClusterClient, ClusterStatusReport, Layout};
use universe::{NodeStatus, Result, UniverseError};

/// Endpoint liveness probe.
pub type LivenessProbe = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One bootstrapped cluster and its failure detector.
#[derive(Debug)]
struct SimCluster {
    layout: Layout,
    unresponsive: Vec<String>,
    queries_since_refresh: usize,
}

#[derive(Debug, Default)]
struct DbState {
    clusters: Vec<SimCluster>,
    detection_lag: usize,
    bootstrap_calls: usize,
    connect_calls: usize,
    fail_bootstrap: bool,
    fail_connect: bool,
}

/// In-memory database, cheap to clone (shared state).
///
/// Every bootstrap installs a separate cluster keyed by its servers, so one
/// instance can serve many universes in turn. A handle returned by `connect`
/// is scoped to the cluster owning its endpoints; an unscoped handle talks to
/// the most recently bootstrapped cluster.
#[derive(Clone)]
pub struct SimulatedDatabase {
    state: Arc<Mutex<DbState>>,
    probe: LivenessProbe,
    scope: Option<Vec<String>>,
}

impl fmt::Debug for SimulatedDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedDatabase")
            .field("state", &self.state)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

fn endpoint_host(endpoint: &str) -> &str {
    endpoint
        .rsplit_once(':')
        .map_or(endpoint, |(host, _port)| host)
}

fn shares_server(layout: &Layout, servers: &[String]) -> bool {
    layout.all_servers().iter().any(|s| servers.contains(s))
}

impl SimulatedDatabase {
    pub fn new(probe: LivenessProbe) -> Self {
        Self {
            state: Arc::new(Mutex::new(DbState::default())),
            probe,
            scope: None,
        }
    }

    /// Servers are alive while their container is running.
    pub fn over_containers(engine: MockContainerEngine) -> Self {
        Self::new(Arc::new(move |endpoint: &str| {
            engine.is_running_alias(endpoint_host(endpoint))
        }))
    }

    /// Servers are alive while the shell reports their process running.
    pub fn over_shell(shell: MockShell) -> Self {
        Self::new(Arc::new(move |endpoint: &str| {
            shell.is_running(endpoint_host(endpoint))
        }))
    }

    /// Failure detection only refreshes every `lag + 1` queries.
    #[must_use]
    pub fn with_detection_lag(self, lag: usize) -> Self {
        self.lock().detection_lag = lag;
        self
    }

    /// Make every bootstrap call fail.
    pub fn fail_bootstrap(&self, fail: bool) {
        self.lock().fail_bootstrap = fail;
    }

    /// Make every connect call fail.
    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn bootstrap_calls(&self) -> usize {
        self.lock().bootstrap_calls
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn is_bootstrapped(&self) -> bool {
        !self.lock().clusters.is_empty()
    }

    /// Number of clusters currently known to the database.
    pub fn cluster_count(&self) -> usize {
        self.lock().clusters.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DbState> {
        self.state.lock().expect("database state poisoned")
    }

    /// Re-run failure detection if due; bumps the epoch on membership change.
    fn observe(&self) -> Result<Layout> {
        let mut state = self.lock();
        let lag = state.detection_lag;
        let cluster = match &self.scope {
            Some(endpoints) => state
                .clusters
                .iter_mut()
                .rev()
                .find(|c| shares_server(&c.layout, endpoints)),
            None => state.clusters.last_mut(),
        }
        .ok_or_else(|| UniverseError::Client("cluster not bootstrapped".to_string()))?;

        cluster.queries_since_refresh += 1;
        if cluster.queries_since_refresh > lag {
            cluster.queries_since_refresh = 0;
            let unresponsive: Vec<String> = cluster
                .layout
                .all_servers()
                .into_iter()
                .filter(|server| !(self.probe)(server))
                .collect();
            if unresponsive != cluster.unresponsive {
                cluster.unresponsive = unresponsive;
                cluster.layout.epoch += 1;
            }
        }

        let mut observed = cluster.layout.clone();
        observed.unresponsive_servers = cluster.unresponsive.clone();
        Ok(observed)
    }
}

#[async_trait]
impl ClusterClient for SimulatedDatabase {
    async fn layout(&self) -> Result<Layout> {
        self.observe()
    }

    async fn cluster_status(&self) -> Result<ClusterStatusReport> {
        let layout = self.observe()?;
        let statuses: BTreeMap<String, NodeStatus> = layout
            .all_servers()
            .into_iter()
            .map(|server| {
                let status = if layout.unresponsive_servers.contains(&server) {
                    NodeStatus::Unresponsive
                } else {
                    NodeStatus::Running
                };
                (server, status)
            })
            .collect();
        Ok(ClusterStatusReport::from_node_statuses(statuses))
    }

    async fn bootstrap(&self, layout: &Layout) -> Result<()> {
        let mut state = self.lock();
        state.bootstrap_calls += 1;

        if state.fail_bootstrap {
            return Err(UniverseError::Client("bootstrap rejected".to_string()));
        }

        // Clusters with no reachable server left have been torn down.
        let probe = &self.probe;
        state
            .clusters
            .retain(|c| c.layout.all_servers().iter().any(|s| probe(s)));

        let servers = layout.all_servers();
        if state
            .clusters
            .iter()
            .any(|c| shares_server(&c.layout, &servers))
        {
            return Err(UniverseError::Client("cluster already bootstrapped".to_string()));
        }
        if let Some(down) = servers.iter().find(|s| !probe(s)) {
            return Err(UniverseError::Client(format!("server {down} unreachable")));
        }

        state.clusters.push(SimCluster {
            layout: layout.clone(),
            unresponsive: Vec::new(),
            queries_since_refresh: 0,
        });
        Ok(())
    }
}

#[async_trait]
impl ClientConnector for SimulatedDatabase {
    async fn connect(&self, endpoints: &[String]) -> Result<Arc<dyn ClusterClient>> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(UniverseError::Client("connection refused".to_string()));
        }
        if endpoints.is_empty() {
            return Err(UniverseError::Client("no endpoints to connect to".to_string()));
        }
        Ok(Arc::new(Self {
            state: Arc::clone(&self.state),
            probe: Arc::clone(&self.probe),
            scope: Some(endpoints.to_vec()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn database() -> (SimulatedDatabase, Arc<Mutex<HashSet<String>>>) {
        let down: Arc<Mutex<HashSet<String>>> = Arc::default();
        let offline = Arc::clone(&down);
        let db = SimulatedDatabase::new(Arc::new(move |endpoint: &str| {
            !offline.lock().unwrap().contains(endpoint)
        }));
        (db, down)
    }

    fn servers() -> Vec<String> {
        vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
    }

    #[tokio::test]
    async fn test_bootstrap_once() {
        let (db, _) = database();
        assert!(db.layout().await.is_err());

        db.bootstrap(&Layout::chain(servers())).await.unwrap();
        assert!(db.bootstrap(&Layout::chain(servers())).await.is_err());
        assert_eq!(db.bootstrap_calls(), 2);
        assert_eq!(db.layout().await.unwrap().epoch, 0);
    }

    #[tokio::test]
    async fn test_failure_detection_bumps_epoch() {
        let (db, down) = database();
        db.bootstrap(&Layout::chain(servers())).await.unwrap();

        down.lock().unwrap().insert("b:2".to_string());
        let layout = db.layout().await.unwrap();
        assert_eq!(layout.unresponsive_servers, vec!["b:2".to_string()]);
        assert_eq!(layout.epoch, 1);

        down.lock().unwrap().clear();
        let layout = db.layout().await.unwrap();
        assert!(layout.unresponsive_servers.is_empty());
        assert_eq!(layout.epoch, 2);
    }

    #[tokio::test]
    async fn test_detection_lag() {
        let (db, down) = database();
        let db = db.with_detection_lag(2);
        db.bootstrap(&Layout::chain(servers())).await.unwrap();

        down.lock().unwrap().insert("a:1".to_string());
        assert!(db.unresponsive_servers().await.unwrap().is_empty());
        assert!(db.unresponsive_servers().await.unwrap().is_empty());
        assert_eq!(db.unresponsive_servers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clusters_are_tracked_separately() {
        let (db, down) = database();
        let other = vec!["x:1".to_string(), "y:2".to_string()];
        db.bootstrap(&Layout::chain(servers())).await.unwrap();
        db.bootstrap(&Layout::chain(other.clone())).await.unwrap();
        assert_eq!(db.cluster_count(), 2);

        down.lock().unwrap().insert("a:1".to_string());
        let first = db.connect(&servers()).await.unwrap();
        let second = db.connect(&other).await.unwrap();
        assert_eq!(first.unresponsive_servers().await.unwrap().len(), 1);
        assert!(second.unresponsive_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_torn_down_cluster_is_forgotten() {
        let (db, down) = database();
        db.bootstrap(&Layout::chain(servers())).await.unwrap();
        assert!(db.bootstrap(&Layout::chain(servers())).await.is_err());

        down.lock().unwrap().extend(servers());
        db.bootstrap(&Layout::chain(vec!["x:1".to_string()]))
            .await
            .unwrap();
        assert_eq!(db.cluster_count(), 1);

        down.lock().unwrap().clear();
        db.bootstrap(&Layout::chain(servers())).await.unwrap();
        assert_eq!(db.cluster_count(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_unreachable_server() {
        let (db, down) = database();
        down.lock().unwrap().insert("c:3".to_string());
        assert!(db.bootstrap(&Layout::chain(servers())).await.is_err());
        assert!(!db.is_bootstrapped());
    }
}
