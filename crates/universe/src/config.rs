//! Workflow configuration.
//!
//! `WorkflowConfig` is immutable once built and is copied into the fixture by
//! `UniverseWorkflow::init`. `FixtureOverrides` carries optional environment
//! tweaks applied on top of a fixture before the universe is materialized.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Default test name used for log partitioning.
pub const DEFAULT_TEST_NAME: &str = "universe-test";

pub const ENV_SERVER_VERSION: &str = "UNIVERSE_SERVER_VERSION";
pub const ENV_TEST_NAME: &str = "UNIVERSE_TEST_NAME";
pub const ENV_NUM_NODES: &str = "UNIVERSE_NUM_NODES";
pub const ENV_INITIAL_PORT: &str = "UNIVERSE_INITIAL_PORT";
pub const ENV_LOGGING_ENABLED: &str = "UNIVERSE_LOGGING_ENABLED";
pub const ENV_LOG_DIR: &str = "UNIVERSE_LOG_DIR";
pub const ENV_CLEANUP_ENABLED: &str = "UNIVERSE_CLEANUP_ENABLED";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Workflow-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Server build every node in the universe runs.
    pub server_version: String,

    /// Test name, used to partition per-test log directories.
    pub test_name: String,
}

impl WorkflowConfig {
    /// Build a validated config.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if either field is blank.
    pub fn new(
        server_version: impl Into<String>,
        test_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let server_version = server_version.into();
        let test_name = test_name.into();

        if server_version.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "server_version must not be empty".to_string(),
            ));
        }
        if test_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "test_name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            server_version,
            test_name,
        })
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let server_version = vars
            .get(ENV_SERVER_VERSION)
            .ok_or_else(|| ConfigError::MissingEnvVar(ENV_SERVER_VERSION.to_string()))?
            .clone();

        let test_name = vars
            .get(ENV_TEST_NAME)
            .cloned()
            .unwrap_or_else(|| DEFAULT_TEST_NAME.to_string());

        Self::new(server_version, test_name)
    }
}

/// Optional fixture overrides read from the environment.
///
/// Unset variables leave the fixture untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureOverrides {
    pub num_nodes: Option<usize>,
    pub initial_port: Option<u16>,
    pub logging_enabled: Option<bool>,
    pub log_dir: Option<PathBuf>,
    pub clean_up_enabled: Option<bool>,
}

impl FixtureOverrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Parse overrides from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the variable and the
    /// offending value when a set variable does not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let num_nodes = match vars.get(ENV_NUM_NODES) {
            Some(value) => {
                let parsed: usize = value.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "{ENV_NUM_NODES} must be a positive integer, got '{value}': {e}"
                    ))
                })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidValue(format!(
                        "{ENV_NUM_NODES} must be greater than 0, got '{value}'"
                    )));
                }
                Some(parsed)
            }
            None => None,
        };

        let initial_port = match vars.get(ENV_INITIAL_PORT) {
            Some(value) => {
                let parsed: u16 = value.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "{ENV_INITIAL_PORT} must be a valid port, got '{value}': {e}"
                    ))
                })?;
                if parsed == 0 {
                    return Err(ConfigError::InvalidValue(format!(
                        "{ENV_INITIAL_PORT} must be between 1 and 65535, got '{value}'"
                    )));
                }
                Some(parsed)
            }
            None => None,
        };

        let logging_enabled = vars
            .get(ENV_LOGGING_ENABLED)
            .map(|v| parse_bool(ENV_LOGGING_ENABLED, v))
            .transpose()?;

        let clean_up_enabled = vars
            .get(ENV_CLEANUP_ENABLED)
            .map(|v| parse_bool(ENV_CLEANUP_ENABLED, v))
            .transpose()?;

        let log_dir = vars.get(ENV_LOG_DIR).map(PathBuf::from);

        Ok(Self {
            num_nodes,
            initial_port,
            logging_enabled,
            log_dir,
            clean_up_enabled,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!(
            "{name} must be a boolean, got '{value}'"
        ))),
    }
}
