//! Node parameters.
//!
//! `NodeParams` is the substrate-independent descriptor of one server
//! instance. It is immutable once built and totally ordered so a cluster's
//! node set iterates deterministically.
//!
//! Equality, hashing and ordering consider identity fields only. The log
//! level, stop timeout and log-size quota are descriptive and ignored.

use crate::errors::{Result, UniverseError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Default graceful stop timeout.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Default log-size quota percentage.
pub const DEFAULT_LOG_SIZE_QUOTA: u8 = 100;

/// Role of a node within the universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    DatabaseServer,
    DatabaseClient,
    Metrics,
    Cassandra,
    Mangle,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::DatabaseServer => "database_server",
            NodeType::DatabaseClient => "database_client",
            NodeType::Metrics => "metrics",
            NodeType::Cassandra => "cassandra",
            NodeType::Mangle => "mangle",
        };
        write!(f, "{s}")
    }
}

/// Server log level, passed to the server with `-d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Where the server keeps its stream log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    #[default]
    Disk,
    Memory,
}

/// Server membership mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Cluster,
    Single,
}

/// Immutable descriptor of a single server instance.
///
/// Built with [`NodeParams::builder`]; validation happens in
/// [`NodeParamsBuilder::build`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeParams {
    cluster_name: String,
    name_prefix: String,
    node_type: NodeType,
    ports: Vec<u16>,
    log_level: LogLevel,
    #[serde(with = "duration_millis")]
    stop_timeout: Duration,
    enabled: bool,
    server_version: String,
    persistence: Persistence,
    mode: Mode,
    log_size_quota_percentage: u8,
}

impl NodeParams {
    /// Start building parameters for a node of `cluster_name`.
    pub fn builder(
        cluster_name: impl Into<String>,
        name_prefix: impl Into<String>,
    ) -> NodeParamsBuilder {
        NodeParamsBuilder::new(cluster_name.into(), name_prefix.into())
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// First configured port; the server listens on it.
    pub fn primary_port(&self) -> u16 {
        self.ports.first().copied().unwrap_or_default()
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn log_size_quota_percentage(&self) -> u8 {
        self.log_size_quota_percentage
    }

    /// Short name of the node within its cluster: `node{primaryPort}`.
    pub fn short_name(&self) -> String {
        format!("node{}", self.primary_port())
    }

    /// Full node name: `{cluster}-{prefix}-node{primaryPort}`.
    pub fn name(&self) -> String {
        full_node_name(&self.cluster_name, &self.name_prefix, &self.short_name())
    }

    /// Network endpoint of the server when reachable at `host`.
    pub fn endpoint(&self, host: &str) -> String {
        format!("{host}:{}", self.primary_port())
    }

    /// Relative directory of the on-disk stream log.
    pub fn stream_log_dir(&self) -> String {
        format!("{}/db", self.name())
    }

    /// Server command line for a node bound to `host`.
    pub fn server_args(&self, host: &str) -> Vec<String> {
        let mut args = vec!["-a".to_string(), host.to_string()];

        match self.persistence {
            Persistence::Disk => {
                args.push("-l".to_string());
                args.push(self.stream_log_dir());
            }
            Persistence::Memory => args.push("-m".to_string()),
        }

        if self.mode == Mode::Single {
            args.push("-s".to_string());
        }

        args.push(format!(
            "--log-size-quota-percentage={}",
            self.log_size_quota_percentage
        ));
        args.push("-d".to_string());
        args.push(self.log_level.to_string());
        args.push(self.primary_port().to_string());

        args
    }

    #[allow(clippy::type_complexity)]
    fn identity(&self) -> (&str, &str, &[u16], NodeType, bool, &str, Persistence, Mode) {
        (
            &self.cluster_name,
            &self.name_prefix,
            &self.ports,
            self.node_type,
            self.enabled,
            &self.server_version,
            self.persistence,
            self.mode,
        )
    }
}

/// Full node name as a pure function of its parts.
pub fn full_node_name(cluster_name: &str, name_prefix: &str, short_name: &str) -> String {
    format!("{cluster_name}-{name_prefix}-{short_name}")
}

impl PartialEq for NodeParams {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for NodeParams {}

impl Hash for NodeParams {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for NodeParams {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeParams {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

/// Fluent builder for [`NodeParams`].
#[derive(Debug, Clone)]
pub struct NodeParamsBuilder {
    cluster_name: String,
    name_prefix: String,
    node_type: NodeType,
    ports: Vec<u16>,
    log_level: LogLevel,
    stop_timeout: Duration,
    enabled: bool,
    server_version: Option<String>,
    persistence: Persistence,
    mode: Mode,
    log_size_quota_percentage: u8,
}

impl NodeParamsBuilder {
    fn new(cluster_name: String, name_prefix: String) -> Self {
        Self {
            cluster_name,
            name_prefix,
            node_type: NodeType::DatabaseServer,
            ports: Vec::new(),
            log_level: LogLevel::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            enabled: true,
            server_version: None,
            persistence: Persistence::default(),
            mode: Mode::default(),
            log_size_quota_percentage: DEFAULT_LOG_SIZE_QUOTA,
        }
    }

    #[must_use]
    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    /// Append a port. The first port added is the primary port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    #[must_use]
    pub fn ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.ports.extend(ports);
        self
    }

    #[must_use]
    pub fn log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    #[must_use]
    pub fn stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn server_version(mut self, server_version: impl Into<String>) -> Self {
        self.server_version = Some(server_version.into());
        self
    }

    #[must_use]
    pub fn persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn log_size_quota_percentage(mut self, quota: u8) -> Self {
        self.log_size_quota_percentage = quota;
        self
    }

    /// Validate and build the parameters.
    ///
    /// # Errors
    ///
    /// Returns `UniverseError::Configuration` if a name is blank, no port
    /// is set, a port is zero or repeated, the server version is missing,
    /// or the quota exceeds 100.
    pub fn build(self) -> Result<NodeParams> {
        if self.cluster_name.trim().is_empty() {
            return Err(UniverseError::Configuration(
                "node cluster name must not be empty".to_string(),
            ));
        }
        if self.name_prefix.trim().is_empty() {
            return Err(UniverseError::Configuration(format!(
                "node name prefix must not be empty (cluster {})",
                self.cluster_name
            )));
        }
        if self.ports.is_empty() {
            return Err(UniverseError::Configuration(format!(
                "node in cluster {} has no ports",
                self.cluster_name
            )));
        }
        if self.ports.contains(&0) {
            return Err(UniverseError::Configuration(format!(
                "node in cluster {} has port 0",
                self.cluster_name
            )));
        }
        let mut seen = self.ports.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.ports.len() {
            return Err(UniverseError::Configuration(format!(
                "node in cluster {} has duplicate ports: {:?}",
                self.cluster_name, self.ports
            )));
        }
        if self.log_size_quota_percentage > 100 {
            return Err(UniverseError::Configuration(format!(
                "log size quota must be within 0..=100, got {}",
                self.log_size_quota_percentage
            )));
        }
        let server_version = match self.server_version {
            Some(v) if !v.trim().is_empty() => v,
            _ => {
                return Err(UniverseError::Configuration(format!(
                    "server version not set for node in cluster {}",
                    self.cluster_name
                )))
            }
        };

        Ok(NodeParams {
            cluster_name: self.cluster_name,
            name_prefix: self.name_prefix,
            node_type: self.node_type,
            ports: self.ports,
            log_level: self.log_level,
            stop_timeout: self.stop_timeout,
            enabled: self.enabled,
            server_version,
            persistence: self.persistence,
            mode: self.mode,
            log_size_quota_percentage: self.log_size_quota_percentage,
        })
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn node(port: u16) -> NodeParamsBuilder {
        NodeParams::builder("mycluster", "db")
            .port(port)
            .server_version("0.4.1")
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_name_is_derived_from_cluster_prefix_and_port() {
        let params = node(9000).build().unwrap();
        assert_eq!(params.name(), "mycluster-db-node9000");
        assert_eq!(params.short_name(), "node9000");
        assert_eq!(params.endpoint("localhost"), "localhost:9000");
        assert_eq!(params.stream_log_dir(), "mycluster-db-node9000/db");
    }

    #[test]
    fn test_equality_ignores_descriptive_fields() {
        let a = node(9000).build().unwrap();
        let b = node(9000)
            .log_level(LogLevel::Trace)
            .stop_timeout(Duration::from_secs(30))
            .log_size_quota_percentage(10)
            .build()
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);

        let set: HashSet<NodeParams> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_equality_considers_identity_fields() {
        let a = node(9000).build().unwrap();
        let b = node(9000).persistence(Persistence::Memory).build().unwrap();
        let c = node(9000).node_type(NodeType::Metrics).build().unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_ordering_is_numeric_by_port() {
        let low = node(9000).build().unwrap();
        let high = node(10000).build().unwrap();
        assert!(low < high);
    }

    #[test]
    fn test_server_args_disk_cluster_mode() {
        let params = node(9000).build().unwrap();
        assert_eq!(
            params.server_args("10.0.0.5"),
            vec![
                "-a",
                "10.0.0.5",
                "-l",
                "mycluster-db-node9000/db",
                "--log-size-quota-percentage=100",
                "-d",
                "INFO",
                "9000",
            ]
        );
    }

    #[test]
    fn test_server_args_memory_single_mode() {
        let params = node(9001)
            .persistence(Persistence::Memory)
            .mode(Mode::Single)
            .log_level(LogLevel::Debug)
            .log_size_quota_percentage(50)
            .build()
            .unwrap();
        assert_eq!(
            params.server_args("host"),
            vec![
                "-a",
                "host",
                "-m",
                "-s",
                "--log-size-quota-percentage=50",
                "-d",
                "DEBUG",
                "9001",
            ]
        );
    }

    #[test]
    fn test_build_rejects_invalid_params() {
        let no_ports = NodeParams::builder("c", "db").server_version("1").build();
        assert!(matches!(no_ports, Err(UniverseError::Configuration(_))));

        let dup = node(9000).port(9000).build();
        assert!(matches!(dup, Err(UniverseError::Configuration(_))));

        let zero = node(0).build();
        assert!(matches!(zero, Err(UniverseError::Configuration(_))));

        let no_version = NodeParams::builder("c", "db").port(1).build();
        assert!(matches!(no_version, Err(UniverseError::Configuration(_))));

        let quota = node(9000).log_size_quota_percentage(101).build();
        assert!(matches!(quota, Err(UniverseError::Configuration(_))));

        let blank = NodeParams::builder(" ", "db")
            .port(1)
            .server_version("1")
            .build();
        assert!(matches!(blank, Err(UniverseError::Configuration(_))));
    }

    #[test]
    fn test_defaults() {
        let params = node(9000).build().unwrap();
        assert_eq!(params.node_type(), NodeType::DatabaseServer);
        assert_eq!(params.log_level(), LogLevel::Info);
        assert_eq!(params.stop_timeout(), DEFAULT_STOP_TIMEOUT);
        assert!(params.enabled());
        assert_eq!(params.persistence(), Persistence::Disk);
        assert_eq!(params.mode(), Mode::Cluster);
    }

    #[test]
    fn test_serde_keeps_descriptive_fields() {
        let params = node(9000)
            .stop_timeout(Duration::from_millis(2500))
            .log_level(LogLevel::Warn)
            .build()
            .unwrap();
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"stop_timeout\":2500"));
        assert!(json.contains("\"log_level\":\"WARN\""));

        let back: NodeParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stop_timeout(), Duration::from_millis(2500));
        assert_eq!(back.log_level(), LogLevel::Warn);
    }
}
