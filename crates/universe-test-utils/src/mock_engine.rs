//! In-memory container engine.
//!
//! Tracks networks and containers the way the docker daemon would, counts
//! calls per operation and supports failure injection:
//! - `failing_ping()` - the engine is unreachable
//! - `fail_create(name)` / `fail_remove(name)` - per-container failures,
//!   lifted again with `allow_create` / `allow_remove`
//! - `hang_on_stop()` - graceful stop never completes (forces escalation)
//! - `crash(name)` - the container exits behind the harness's back
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = MockContainerEngine::new();
//! let factory = DockerSubstrateFactory::new(Arc::new(engine.clone()));
//! // ... deploy ...
//! assert_eq!(engine.call_count("create_container"), 3);
//! ```

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use universe::substrate::docker::{ContainerEngine, ContainerSpec, ContainerState};
use universe::{Result, UniverseError};

#[derive(Debug, Clone)]
struct MockContainer {
    spec: ContainerSpec,
    state: ContainerState,
}

#[derive(Debug, Default)]
struct EngineState {
    networks: BTreeSet<String>,
    containers: HashMap<String, MockContainer>,
    next_id: u64,
    calls: HashMap<&'static str, usize>,
    ping_fails: bool,
    hang_on_stop: bool,
    fail_create: HashSet<String>,
    fail_remove: HashSet<String>,
}

/// Mock container engine, cheap to clone (shared state).
#[derive(Debug, Clone, Default)]
pub struct MockContainerEngine {
    inner: Arc<Mutex<EngineState>>,
}

impl MockContainerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose `ping` fails.
    pub fn failing_ping() -> Self {
        let engine = Self::new();
        engine.lock().ping_fails = true;
        engine
    }

    /// Fail `create_container` for the container named `name`.
    pub fn fail_create(&self, name: &str) {
        self.lock().fail_create.insert(name.to_string());
    }

    /// Fail `remove_container` for the container named `name`.
    pub fn fail_remove(&self, name: &str) {
        self.lock().fail_remove.insert(name.to_string());
    }

    /// Let creation of `name` succeed again.
    pub fn allow_create(&self, name: &str) {
        self.lock().fail_create.remove(name);
    }

    /// Let removal of `name` succeed again.
    pub fn allow_remove(&self, name: &str) {
        self.lock().fail_remove.remove(name);
    }

    /// Make graceful stops hang forever.
    pub fn hang_on_stop(&self) {
        self.lock().hang_on_stop = true;
    }

    /// Simulate the container named `name` exiting on its own.
    pub fn crash(&self, name: &str) {
        let mut state = self.lock();
        for container in state.containers.values_mut() {
            if container.spec.name == name {
                container.state = ContainerState::Exited;
            }
        }
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn networks(&self) -> Vec<String> {
        self.lock().networks.iter().cloned().collect()
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// State of the container named `name`, if it exists.
    pub fn container_state(&self, name: &str) -> Option<ContainerState> {
        self.lock()
            .containers
            .values()
            .find(|c| c.spec.name == name)
            .map(|c| c.state)
    }

    /// Spec the container named `name` was created with.
    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.lock()
            .containers
            .values()
            .find(|c| c.spec.name == name)
            .map(|c| c.spec.clone())
    }

    /// True if a running container has network alias `alias`.
    pub fn is_running_alias(&self, alias: &str) -> bool {
        self.lock()
            .containers
            .values()
            .any(|c| c.spec.network_alias == alias && c.state == ContainerState::Running)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.inner.lock().expect("engine state poisoned")
    }

    fn record(&self, operation: &'static str) {
        *self.lock().calls.entry(operation).or_insert(0) += 1;
    }

    fn with_container<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut MockContainer) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| UniverseError::substrate(id, "No such container"))?;
        f(container)
    }
}

#[async_trait]
impl ContainerEngine for MockContainerEngine {
    async fn ping(&self) -> Result<()> {
        self.record("ping");
        if self.lock().ping_fails {
            return Err(UniverseError::substrate("docker", "Cannot connect to the Docker daemon"));
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        self.record("create_network");
        if !self.lock().networks.insert(name.to_string()) {
            return Err(UniverseError::substrate(name, "network already exists"));
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.record("remove_network");
        if !self.lock().networks.remove(name) {
            return Err(UniverseError::substrate(name, "network not found"));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record("create_container");
        let mut state = self.lock();

        if state.fail_create.contains(&spec.name) {
            return Err(UniverseError::substrate(&spec.name, "image pull failed"));
        }
        if !state.networks.contains(&spec.network) {
            return Err(UniverseError::substrate(
                &spec.name,
                format!("network {} not found", spec.network),
            ));
        }
        if state.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(UniverseError::substrate(&spec.name, "container name already in use"));
        }

        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                state: ContainerState::Created,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record("start_container");
        self.with_container(id, |c| {
            c.state = ContainerState::Running;
            Ok(())
        })
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<()> {
        self.record("stop_container");
        let hang = self.lock().hang_on_stop;
        if hang {
            std::future::pending::<()>().await;
        }
        self.with_container(id, |c| {
            c.state = ContainerState::Exited;
            Ok(())
        })
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        self.record("kill_container");
        self.with_container(id, |c| {
            if c.state != ContainerState::Running {
                return Err(UniverseError::substrate(
                    &c.spec.name,
                    "container is not running",
                ));
            }
            c.state = ContainerState::Exited;
            Ok(())
        })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        self.record("inspect_container");
        self.with_container(id, |c| Ok(c.state))
    }

    async fn container_logs(&self, id: &str) -> Result<Vec<u8>> {
        self.record("container_logs");
        self.with_container(id, |c| Ok(format!("log output of {}\n", c.spec.name).into_bytes()))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.record("remove_container");
        let mut state = self.lock();
        let name = state
            .containers
            .get(id)
            .map(|c| c.spec.name.clone())
            .ok_or_else(|| UniverseError::substrate(id, "No such container"))?;
        if state.fail_remove.contains(&name) {
            return Err(UniverseError::substrate(&name, "device or resource busy"));
        }
        state.containers.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "img:1".to_string(),
            network: "net".to_string(),
            network_alias: name.to_string(),
            port_bindings: Vec::new(),
            volume_bindings: Vec::new(),
            envs: BTreeMap::new(),
            cmd: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let engine = MockContainerEngine::new();
        engine.create_network("net").await.unwrap();

        let id = engine.create_container(&spec("a")).await.unwrap();
        assert_eq!(engine.container_state("a"), Some(ContainerState::Created));

        engine.start_container(&id).await.unwrap();
        assert!(engine.is_running_alias("a"));

        engine.stop_container(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(engine.inspect_container(&id).await.unwrap(), ContainerState::Exited);
        assert!(engine.kill_container(&id).await.is_err());

        engine.remove_container(&id).await.unwrap();
        assert_eq!(engine.container_count(), 0);
        assert_eq!(engine.call_count("create_container"), 1);
    }

    #[tokio::test]
    async fn test_create_requires_network_and_unique_name() {
        let engine = MockContainerEngine::new();
        assert!(engine.create_container(&spec("a")).await.is_err());

        engine.create_network("net").await.unwrap();
        engine.create_container(&spec("a")).await.unwrap();
        assert!(engine.create_container(&spec("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let engine = MockContainerEngine::failing_ping();
        assert!(engine.ping().await.is_err());

        let engine = MockContainerEngine::new();
        engine.create_network("net").await.unwrap();
        engine.fail_create("bad");
        assert!(engine.create_container(&spec("bad")).await.is_err());

        let id = engine.create_container(&spec("sticky")).await.unwrap();
        engine.fail_remove("sticky");
        assert!(engine.remove_container(&id).await.is_err());
    }
}
