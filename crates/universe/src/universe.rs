//! The universe: every group of a test topology plus its shared resources.
//!
//! A `Universe` exclusively owns its substrate client; nothing is looked up
//! from global state, so universes in the same process do not interfere.
//!
//! Lifecycle: constructed (groups built, nothing started) -> `deploy()` ->
//! `shutdown()`. After shutdown the universe rejects further deploys.

use crate::client::ClientConnector;
use crate::cluster::Cluster;
use crate::errors::{Result, TeardownReport, UniverseError};
use crate::params::{ClusterParams, ClusterType, DeploymentParams, LoggingParams, UniverseParams};
use crate::substrate::Substrate;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub struct Universe<S: Substrate> {
    id: Uuid,
    substrate: S,
    connector: Arc<dyn ClientConnector>,
    params: UniverseParams<S::Binding>,
    logging: LoggingParams,
    groups: Vec<Cluster<S>>,
    prepared: bool,
    deployed: bool,
    shut_down: bool,
}

impl<S: Substrate> Universe<S> {
    /// Build a universe. Groups are created in parameter order, not started.
    pub fn new(
        substrate: S,
        connector: Arc<dyn ClientConnector>,
        params: UniverseParams<S::Binding>,
        logging: LoggingParams,
    ) -> Self {
        let groups = params
            .groups()
            .iter()
            .map(|g| Cluster::new(g.clone(), Arc::clone(&connector)))
            .collect();

        Self {
            id: Uuid::new_v4(),
            substrate,
            connector,
            params,
            logging,
            groups,
            prepared: false,
            deployed: false,
            shut_down: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn params(&self) -> &UniverseParams<S::Binding> {
        &self.params
    }

    pub fn logging(&self) -> &LoggingParams {
        &self.logging
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Prepare shared resources (once), then deploy every group in order.
    ///
    /// A second call after success is a no-op. A failure leaves already
    /// started nodes in place for diagnostics; `shutdown()` releases them,
    /// or a later `deploy()` resumes from where the failure stopped.
    #[instrument(skip_all, name = "universe.deploy", fields(universe_id = %self.id))]
    pub async fn deploy(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.deployed {
            debug!(target: "universe.universe", "Universe already deployed");
            return Ok(());
        }

        if !self.prepared {
            self.substrate.prepare(&self.params).await?;
            self.prepared = true;
        }

        info!(
            target: "universe.universe",
            universe_id = %self.id,
            groups = self.groups.len(),
            substrate = self.substrate.kind(),
            "Deploying universe"
        );

        for group in &mut self.groups {
            group.deploy(&self.substrate, &self.logging).await?;
        }

        self.deployed = true;
        info!(
            target: "universe.universe",
            universe_id = %self.id,
            "Universe deployed"
        );
        Ok(())
    }

    /// Deploy an additional group into a deployed universe.
    ///
    /// The group is recorded before it deploys, so a failure leaves it
    /// visible and covered by `shutdown()`.
    pub async fn add_group(&mut self, params: ClusterParams<S::Binding>) -> Result<&Cluster<S>> {
        self.ensure_usable()?;
        if !self.deployed {
            return Err(UniverseError::WorkflowState(
                "add_group() requires a deployed universe".to_string(),
            ));
        }

        self.params.add_group(params.clone())?;
        self.groups
            .push(Cluster::new(params, Arc::clone(&self.connector)));

        let group = self
            .groups
            .last_mut()
            .ok_or_else(|| UniverseError::GroupNotFound("new group".to_string()))?;
        group.deploy(&self.substrate, &self.logging).await?;
        Ok(&*group)
    }

    /// Build and start an extra node in the named group.
    pub async fn add_node(
        &mut self,
        group_name: &str,
        deployment: DeploymentParams<S::Binding>,
    ) -> Result<()> {
        self.ensure_usable()?;
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name() == group_name)
            .ok_or_else(|| UniverseError::GroupNotFound(group_name.to_string()))?;
        group
            .add_node(&self.substrate, &self.logging, deployment)
            .await
    }

    pub fn groups(&self) -> &[Cluster<S>] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Result<&Cluster<S>> {
        self.groups
            .iter()
            .find(|g| g.name() == name)
            .ok_or_else(|| UniverseError::GroupNotFound(name.to_string()))
    }

    pub fn group_mut(&mut self, name: &str) -> Result<&mut Cluster<S>> {
        self.groups
            .iter_mut()
            .find(|g| g.name() == name)
            .ok_or_else(|| UniverseError::GroupNotFound(name.to_string()))
    }

    /// First group of the given type.
    pub fn group_by_type(&self, cluster_type: ClusterType) -> Result<&Cluster<S>> {
        self.groups
            .iter()
            .find(|g| g.cluster_type() == cluster_type)
            .ok_or_else(|| UniverseError::GroupNotFound(cluster_type.to_string()))
    }

    /// Tear everything down: groups in reverse order, then shared resources.
    ///
    /// Never fails; every failure lands in the report. Idempotent: a second
    /// call returns an empty report. With clean-up disabled nothing is
    /// released and the nodes are left running for inspection.
    #[instrument(skip_all, name = "universe.shutdown", fields(universe_id = %self.id))]
    pub async fn shutdown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::new();

        if self.shut_down {
            debug!(target: "universe.universe", "Universe already shut down");
            return report;
        }
        self.shut_down = true;

        if !self.params.clean_up_enabled() {
            info!(
                target: "universe.universe",
                universe_id = %self.id,
                "Clean-up disabled, leaving universe running"
            );
            return report;
        }

        for group in self.groups.iter().rev() {
            report.merge(group.shutdown().await);
        }

        if self.prepared {
            if let Err(e) = self.substrate.release(&self.params).await {
                warn!(
                    target: "universe.universe",
                    universe_id = %self.id,
                    error = %e,
                    "Failed to release shared substrate resources"
                );
                report.record(self.params.network_name(), e);
            }
        }

        info!(
            target: "universe.universe",
            universe_id = %self.id,
            failures = report.failures().len(),
            "Universe shut down"
        );
        report
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.shut_down {
            return Err(UniverseError::WorkflowState(format!(
                "universe {} is shut down",
                self.id
            )));
        }
        Ok(())
    }
}
