//! Test utilities for the universe cluster lifecycle engine.
//!
//! This crate provides:
//! - `MockContainerEngine` - in-memory container engine with failure injection
//! - `MockAppliances` / `MockShell` - VM inventory and remote shell simulation
//! - `SimulatedDatabase` - database client and connector with failure detection
//! - `CountingFactory` - substrate factory wrapper counting connections
//! - `DockerHarness` / `VmHarness` - substrates wired to the simulated database
//!
//! # Example
//!
//! ```rust,ignore
//! use universe_test_utils::{container_fixture, DockerHarness};
//!
//! let harness = DockerHarness::new();
//! let mut workflow = harness.workflow("my-test", container_fixture(3, 9000));
//! workflow.deploy().await?;
//! assert_eq!(harness.database.bootstrap_calls(), 1);
//! ```

pub mod counting_factory;
pub mod fixtures;
pub mod mock_engine;
pub mod mock_vm;
pub mod simulated_db;

pub use counting_factory::CountingFactory;
pub use fixtures::{container_fixture, test_config, DockerHarness, VmHarness, TEST_SERVER_VERSION};
pub use mock_engine::MockContainerEngine;
pub use mock_vm::{MockAppliances, MockShell};
pub use simulated_db::{LivenessProbe, SimulatedDatabase};

use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a test-writer tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `universe=debug`.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| "universe=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
