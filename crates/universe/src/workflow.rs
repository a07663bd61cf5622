//! Universe workflow state machine.
//!
//! States: `Created -> Initialized -> Deployed -> Shutdown`.
//!
//! - `init()` copies the workflow config (server version) into the fixture.
//! - `setup(f)` mutates the fixture. It is only allowed before
//!   `init_universe()`; once the universe is materialized the fixture is
//!   frozen and `setup` fails with `UniverseError::WorkflowState`.
//! - `init_universe()` validates the fixture, connects the substrate client
//!   and builds the universe. It is effectful exactly once; later calls are
//!   no-ops, so composed entry points never allocate a second client.
//! - `deploy()` is `init_universe()` followed by `Universe::deploy()`. A
//!   partial deploy is left in place, not rolled back; calling `deploy()`
//!   again resumes it.
//! - `shutdown()` is best-effort and returns a `TeardownReport`.
//!
//! All transitions take `&mut self`, which makes the initialized
//! check-and-set atomic for the single owner of the workflow.

use crate::client::ClientConnector;
use crate::config::WorkflowConfig;
use crate::errors::{Result, TeardownReport, UniverseError};
use crate::fixture::Fixture;
use crate::substrate::SubstrateFactory;
use crate::universe::Universe;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Fixture type of a substrate factory.
pub type FixtureFor<F> = Fixture<<F as SubstrateFactory>::Bindings>;

/// Universe type of a substrate factory.
pub type UniverseFor<F> = Universe<<F as SubstrateFactory>::Substrate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Created,
    Initialized,
    Deployed,
    Shutdown,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Created => write!(f, "CREATED"),
            WorkflowState::Initialized => write!(f, "INITIALIZED"),
            WorkflowState::Deployed => write!(f, "DEPLOYED"),
            WorkflowState::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Mutable workflow context, owned by exactly one workflow.
pub struct WorkflowContext<F: SubstrateFactory> {
    fixture: FixtureFor<F>,
    config: WorkflowConfig,
    universe: Option<UniverseFor<F>>,
    initialized: bool,
}

impl<F: SubstrateFactory> WorkflowContext<F> {
    pub fn fixture(&self) -> &FixtureFor<F> {
        &self.fixture
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn universe(&self) -> Option<&UniverseFor<F>> {
        self.universe.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

pub struct UniverseWorkflow<F: SubstrateFactory> {
    factory: F,
    connector: Arc<dyn ClientConnector>,
    context: WorkflowContext<F>,
    state: WorkflowState,
}

impl<F: SubstrateFactory> UniverseWorkflow<F> {
    pub fn new(
        factory: F,
        connector: Arc<dyn ClientConnector>,
        fixture: FixtureFor<F>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            factory,
            connector,
            context: WorkflowContext {
                fixture,
                config,
                universe: None,
                initialized: false,
            },
            state: WorkflowState::Created,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn context(&self) -> &WorkflowContext<F> {
        &self.context
    }

    pub fn fixture(&self) -> &FixtureFor<F> {
        &self.context.fixture
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.context.config
    }

    /// Copy workflow config into the fixture. Idempotent.
    pub fn init(&mut self) -> &mut Self {
        self.context.fixture.server_version = Some(self.context.config.server_version.clone());
        self
    }

    /// Mutate the fixture before the universe is materialized.
    ///
    /// # Errors
    ///
    /// `UniverseError::WorkflowState` once `init_universe()` has run.
    pub fn setup<M>(&mut self, mutator: M) -> Result<&mut Self>
    where
        M: FnOnce(&mut FixtureFor<F>),
    {
        if self.context.initialized {
            return Err(UniverseError::WorkflowState(format!(
                "setup() called in state {}; the fixture is frozen once the universe is initialized",
                self.state
            )));
        }
        mutator(&mut self.context.fixture);
        Ok(self)
    }

    /// Materialize the universe. Effectful exactly once.
    ///
    /// # Errors
    ///
    /// Configuration errors from the fixture (before any substrate call) and
    /// substrate errors from connecting the client.
    #[instrument(skip_all, name = "universe.workflow.init_universe")]
    pub async fn init_universe(&mut self) -> Result<()> {
        if self.context.initialized {
            debug!(
                target: "universe.workflow",
                state = %self.state,
                "Universe already initialized"
            );
            return Ok(());
        }

        let params = self.context.fixture.build_params()?;
        let logging = self
            .context
            .fixture
            .logging_params(&self.context.config.test_name);

        let substrate = self.factory.connect().await?;
        let universe = Universe::new(substrate, Arc::clone(&self.connector), params, logging);

        info!(
            target: "universe.workflow",
            universe_id = %universe.id(),
            test_name = %self.context.config.test_name,
            server_version = %self.context.config.server_version,
            "Universe initialized"
        );

        self.context.universe = Some(universe);
        self.context.initialized = true;
        self.state = WorkflowState::Initialized;
        Ok(())
    }

    /// `init_universe()` then deploy every group.
    #[instrument(skip_all, name = "universe.workflow.deploy")]
    pub async fn deploy(&mut self) -> Result<()> {
        if self.state == WorkflowState::Shutdown {
            return Err(UniverseError::WorkflowState(
                "deploy() called after shutdown".to_string(),
            ));
        }

        self.init_universe().await?;
        self.universe_mut()?.deploy().await?;
        self.state = WorkflowState::Deployed;
        Ok(())
    }

    /// Shut the universe down. Never fails; failures are in the report.
    #[instrument(skip_all, name = "universe.workflow.shutdown")]
    pub async fn shutdown(&mut self) -> TeardownReport {
        let report = match self.context.universe.as_mut() {
            Some(universe) => universe.shutdown().await,
            None => TeardownReport::new(),
        };

        if self.state != WorkflowState::Shutdown {
            info!(
                target: "universe.workflow",
                from = %self.state,
                clean = report.is_clean(),
                "Workflow shut down"
            );
        }
        self.state = WorkflowState::Shutdown;
        report
    }

    /// The materialized universe.
    ///
    /// # Errors
    ///
    /// `UniverseError::WorkflowState` before `init_universe()`.
    pub fn universe(&self) -> Result<&UniverseFor<F>> {
        self.context.universe.as_ref().ok_or_else(|| {
            UniverseError::WorkflowState("universe not initialized".to_string())
        })
    }

    pub fn universe_mut(&mut self) -> Result<&mut UniverseFor<F>> {
        self.context.universe.as_mut().ok_or_else(|| {
            UniverseError::WorkflowState("universe not initialized".to_string())
        })
    }
}
