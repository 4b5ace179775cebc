//! Client configuration
//!
//! Validated once at client construction and immutable afterwards. Can be
//! built fluently or loaded from a YAML file.

use crate::cluster::NodeAddress;
use crate::error::{GlideError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Highest logical database index accepted for standalone clients
pub const MAX_DATABASE_ID: u32 = 15;

/// Which node serves read-only commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadFrom {
    /// Always the primary
    #[default]
    Primary,
    /// Round-robin over available replicas, primary as fallback
    PreferReplica,
    /// Replicas in the client's availability zone first
    AzAffinity,
    /// Same-AZ replicas, then a same-AZ primary, then any replica
    AzAffinityReplicasAndPrimary,
}

impl ReadFrom {
    pub fn is_az_aware(&self) -> bool {
        matches!(self, Self::AzAffinity | Self::AzAffinityReplicasAndPrimary)
    }

    pub fn reads_from_replicas(&self) -> bool {
        !matches!(self, Self::Primary)
    }
}

impl FromStr for ReadFrom {
    type Err = GlideError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "PRIMARY" => Ok(Self::Primary),
            "PREFER_REPLICA" => Ok(Self::PreferReplica),
            "AZ_AFFINITY" => Ok(Self::AzAffinity),
            "AZ_AFFINITY_REPLICAS_AND_PRIMARY" => Ok(Self::AzAffinityReplicasAndPrimary),
            other => Err(GlideError::Config(format!("unknown read_from '{}'", other))),
        }
    }
}

/// Username/password authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: String,
}

impl Credentials {
    pub fn new(username: Option<String>, password: impl Into<String>) -> Self {
        Self {
            username,
            password: password.into(),
        }
    }
}

/// Reconnection backoff policy
///
/// The delay before retry `n` is `factor * exponent_base^n` milliseconds,
/// capped at `max_delay_ms`, with `±jitter_percent` applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectStrategy {
    pub num_of_retries: u32,
    pub factor: f64,
    pub exponent_base: u32,
    pub jitter_percent: u32,
    pub max_delay_ms: u64,
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self {
            num_of_retries: 5,
            factor: 100.0,
            exponent_base: 2,
            jitter_percent: 20,
            max_delay_ms: 5000,
        }
    }
}

impl ReconnectStrategy {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// TLS options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Skip certificate and hostname verification
    pub insecure: bool,
    /// Extra PEM root certificate
    pub root_cert_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub connection_timeout_ms: u64,
    pub tls_config: TlsConfig,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 250,
            tls_config: TlsConfig::default(),
        }
    }
}

/// Background topology health checks (cluster only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicChecks {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for PeriodicChecks {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seed nodes
    pub addresses: Vec<NodeAddress>,
    pub use_tls: bool,
    pub credentials: Option<Credentials>,
    pub read_from: ReadFrom,
    /// Per network operation deadline
    pub request_timeout_ms: u64,
    pub reconnect_strategy: ReconnectStrategy,
    /// Logical database (standalone only)
    pub database_id: u32,
    pub client_name: Option<String>,
    pub client_az: Option<String>,
    pub advanced_config: AdvancedConfig,
    /// Defer all network I/O until the first command
    pub lazy_connect: bool,
    pub periodic_checks: PeriodicChecks,
    /// Maximum concurrent requests; excess requests are rejected
    pub inflight_requests_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            use_tls: false,
            credentials: None,
            read_from: ReadFrom::Primary,
            request_timeout_ms: 250,
            reconnect_strategy: ReconnectStrategy::default(),
            database_id: 0,
            client_name: None,
            client_az: None,
            advanced_config: AdvancedConfig::default(),
            lazy_connect: false,
            periodic_checks: PeriodicChecks::default(),
            inflight_requests_limit: 1000,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with the given seed addresses
    pub fn new(addresses: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ClientConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_tls_config(mut self, tls_config: TlsConfig) -> Self {
        self.advanced_config.tls_config = tls_config;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_read_from(mut self, read_from: ReadFrom) -> Self {
        self.read_from = read_from;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_reconnect_strategy(mut self, strategy: ReconnectStrategy) -> Self {
        self.reconnect_strategy = strategy;
        self
    }

    pub fn with_database_id(mut self, database_id: u32) -> Self {
        self.database_id = database_id;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn with_client_az(mut self, az: impl Into<String>) -> Self {
        self.client_az = Some(az.into());
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.advanced_config.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_lazy_connect(mut self, lazy: bool) -> Self {
        self.lazy_connect = lazy;
        self
    }

    pub fn with_periodic_checks(mut self, enabled: bool) -> Self {
        self.periodic_checks.enabled = enabled;
        self
    }

    pub fn with_inflight_requests_limit(mut self, limit: usize) -> Self {
        self.inflight_requests_limit = limit;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.advanced_config.connection_timeout_ms)
    }

    pub fn periodic_check_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_checks.interval_secs)
    }

    /// Validate configuration for a standalone or cluster client
    pub fn validate(&self, cluster_mode: bool) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(GlideError::Config(
                "at least one address is required".to_string(),
            ));
        }
        if let Some(addr) = self
            .addresses
            .iter()
            .find(|a| a.host.is_empty() || a.port == 0)
        {
            return Err(GlideError::Config(format!("invalid address '{}'", addr)));
        }
        if self.request_timeout_ms == 0 {
            return Err(GlideError::Config(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.advanced_config.connection_timeout_ms == 0 {
            return Err(GlideError::Config(
                "connection_timeout must be greater than zero".to_string(),
            ));
        }

        let strategy = &self.reconnect_strategy;
        if strategy.jitter_percent > 100 {
            return Err(GlideError::Config(
                "jitter_percent must be between 0 and 100".to_string(),
            ));
        }
        if strategy.factor <= 0.0 || !strategy.factor.is_finite() {
            return Err(GlideError::Config(
                "reconnect factor must be a positive number".to_string(),
            ));
        }
        if strategy.exponent_base < 1 {
            return Err(GlideError::Config(
                "exponent_base must be at least 1".to_string(),
            ));
        }

        if self.read_from.is_az_aware() && self.client_az.is_none() {
            return Err(GlideError::Config(format!(
                "{:?} requires client_az",
                self.read_from
            )));
        }

        if cluster_mode {
            if self.database_id != 0 {
                return Err(GlideError::Config(
                    "database_id is not supported in cluster mode".to_string(),
                ));
            }
            if self.periodic_checks.enabled && self.periodic_checks.interval_secs == 0 {
                return Err(GlideError::Config(
                    "periodic check interval must be greater than zero".to_string(),
                ));
            }
        } else if self.database_id > MAX_DATABASE_ID {
            return Err(GlideError::Config(format!(
                "database_id must be between 0 and {}",
                MAX_DATABASE_ID
            )));
        }

        if self.inflight_requests_limit == 0 {
            return Err(GlideError::Config(
                "inflight_requests_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
