//! Ready-made harnesses wiring substrates to the simulated database.

use crate::counting_factory::CountingFactory;
use crate::mock_engine::MockContainerEngine;
use crate::mock_vm::{MockAppliances, MockShell};
use crate::simulated_db::SimulatedDatabase;
use std::sync::Arc;
use universe::substrate::docker::DockerSubstrateFactory;
use universe::substrate::vm::{VmServerSettings, VmSubstrateFactory};
use universe::{ContainerBindings, Fixture, UniverseWorkflow, VmBindings, WorkflowConfig};

pub const TEST_SERVER_VERSION: &str = "0.4.1-test";

/// Workflow config for a test.
pub fn test_config(test_name: &str) -> WorkflowConfig {
    WorkflowConfig::new(TEST_SERVER_VERSION, test_name).expect("valid test config")
}

/// Container fixture with fixed ports starting at `initial_port`.
pub fn container_fixture(num_nodes: usize, initial_port: u16) -> Fixture<ContainerBindings> {
    let mut fixture = Fixture::new(ContainerBindings::default());
    fixture.cluster.num_nodes = num_nodes;
    fixture.cluster.initial_port = Some(initial_port);
    fixture
}

/// Container substrate backed by [`MockContainerEngine`].
pub struct DockerHarness {
    pub engine: MockContainerEngine,
    pub database: SimulatedDatabase,
    pub factory: CountingFactory<DockerSubstrateFactory>,
}

impl Default for DockerHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerHarness {
    pub fn new() -> Self {
        let engine = MockContainerEngine::new();
        let database = SimulatedDatabase::over_containers(engine.clone());
        let factory = CountingFactory::new(DockerSubstrateFactory::new(Arc::new(engine.clone())));
        Self {
            engine,
            database,
            factory,
        }
    }

    /// Initialized workflow over `fixture`.
    pub fn workflow(
        &self,
        test_name: &str,
        fixture: Fixture<ContainerBindings>,
    ) -> UniverseWorkflow<CountingFactory<DockerSubstrateFactory>> {
        let mut workflow = UniverseWorkflow::new(
            self.factory.clone(),
            Arc::new(self.database.clone()),
            fixture,
            test_config(test_name),
        );
        workflow.init();
        workflow
    }
}

/// VM substrate backed by [`MockAppliances`] and [`MockShell`].
pub struct VmHarness {
    pub appliances: MockAppliances,
    pub shell: MockShell,
    pub database: SimulatedDatabase,
    pub factory: VmSubstrateFactory,
}

impl VmHarness {
    /// Harness with `vm_count` appliances.
    pub fn new(vm_count: usize) -> Self {
        let appliances = MockAppliances::with_vms(vm_count);
        let shell = MockShell::new();
        let database = SimulatedDatabase::over_shell(shell.clone());
        let factory = VmSubstrateFactory::new(
            Arc::new(appliances.clone()),
            Arc::new(shell.clone()),
            VmServerSettings::default(),
        );
        Self {
            appliances,
            shell,
            database,
            factory,
        }
    }

    /// Fixture placing one node per appliance, ports from `initial_port`.
    pub fn fixture(&self, initial_port: u16) -> Fixture<VmBindings> {
        let vm_names = self.appliances.vm_names();
        let mut fixture = Fixture::new(VmBindings {
            vm_names: vm_names.clone(),
        });
        fixture.cluster.num_nodes = vm_names.len();
        fixture.cluster.initial_port = Some(initial_port);
        fixture
    }

    /// Initialized workflow over `fixture`.
    pub fn workflow(
        &self,
        test_name: &str,
        fixture: Fixture<VmBindings>,
    ) -> UniverseWorkflow<VmSubstrateFactory> {
        let mut workflow = UniverseWorkflow::new(
            self.factory.clone(),
            Arc::new(self.database.clone()),
            fixture,
            test_config(test_name),
        );
        workflow.init();
        workflow
    }
}
