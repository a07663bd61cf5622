//! Run scenarios against freshly deployed universes.
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = UniverseManager::new(factory, connector, config, fixture);
//! let outcome = manager
//!     .run(|workflow| {
//!         Box::pin(async move {
//!             let cluster = workflow.universe()?.group_by_type(ClusterType::Database)?;
//!             cluster.first_server()?.stop(Duration::from_secs(10)).await
//!         })
//!     })
//!     .await;
//! outcome.result?;
//! assert!(outcome.teardown.is_clean());
//! ```

use crate::client::ClientConnector;
use crate::config::WorkflowConfig;
use crate::errors::{Result, TeardownReport};
use crate::substrate::SubstrateFactory;
use crate::workflow::{FixtureFor, UniverseWorkflow};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Scenario result plus the teardown that always follows it.
#[derive(Debug)]
pub struct ScenarioOutcome<T> {
    pub result: Result<T>,
    pub teardown: TeardownReport,
}

impl<T> ScenarioOutcome<T> {
    /// True if the scenario succeeded and teardown was clean.
    pub fn is_success(&self) -> bool {
        self.result.is_ok() && self.teardown.is_clean()
    }
}

/// Builds one workflow per scenario from shared settings.
pub struct UniverseManager<F: SubstrateFactory + Clone> {
    factory: F,
    connector: Arc<dyn ClientConnector>,
    config: WorkflowConfig,
    fixture: FixtureFor<F>,
}

impl<F: SubstrateFactory + Clone> UniverseManager<F> {
    pub fn new(
        factory: F,
        connector: Arc<dyn ClientConnector>,
        config: WorkflowConfig,
        fixture: FixtureFor<F>,
    ) -> Self {
        Self {
            factory,
            connector,
            config,
            fixture,
        }
    }

    /// A new, initialized workflow over a copy of the fixture.
    pub fn workflow(&self) -> UniverseWorkflow<F> {
        let mut workflow = UniverseWorkflow::new(
            self.factory.clone(),
            Arc::clone(&self.connector),
            self.fixture.clone(),
            self.config.clone(),
        );
        workflow.init();
        workflow
    }

    /// Deploy a universe, run `scenario` against it, then shut it down.
    ///
    /// Shutdown runs whether deploy or the scenario failed.
    #[instrument(skip_all, name = "universe.manager.run", fields(test_name = %self.config.test_name))]
    pub async fn run<T, S>(&self, scenario: S) -> ScenarioOutcome<T>
    where
        T: Send,
        S: for<'a> FnOnce(&'a mut UniverseWorkflow<F>) -> BoxFuture<'a, Result<T>>,
    {
        let mut workflow = self.workflow();

        let result = match workflow.deploy().await {
            Ok(()) => scenario(&mut workflow).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!(
                target: "universe.workflow",
                error = %e,
                state = %workflow.state(),
                "Scenario failed"
            );
        }

        let teardown = workflow.shutdown().await;
        info!(
            target: "universe.workflow",
            success = result.is_ok(),
            teardown = %teardown,
            "Scenario finished"
        );

        ScenarioOutcome { result, teardown }
    }
}
