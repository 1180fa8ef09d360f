//! Configuration schema definitions.
//!
//! Two kinds of configuration live here:
//! - `RuntimeConfig`: how this process finds and follows its configuration
//!   source (read once at startup from flags and an optional settings file)
//! - `DatabaseOptions`: the per-name options decoded from the source itself
//!
//! All types derive Serde traits and default every field so minimal
//! documents are accepted.

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::resilience::ReconnectPolicy;
use crate::source::remote::WatchOptions;

/// Root settings for the configuration runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Where configuration comes from and whether to follow it.
    pub source: SourceConfig,

    /// Watch reconnect behavior.
    pub reconnect: ReconnectConfig,

    /// Named resource pool behavior.
    pub pool: PoolConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl RuntimeConfig {
    /// Options handed to the registry when resolving the source.
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            enabled: self.source.watch,
            channel_capacity: self.source.channel_capacity,
            connect_timeout: Duration::from_millis(self.source.connect_timeout_ms),
            reconnect: self.reconnect.policy(),
        }
    }
}

/// Source settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Connection descriptor, e.g. `etcd://127.0.0.1:2379?key=app`.
    /// Empty means no configuration source.
    pub descriptor: String,

    /// Follow changes after the initial load.
    pub watch: bool,

    /// Dotted path of the table holding one entry per named resource.
    pub prefix: String,

    /// Capacity of the change channel between watcher and consumer.
    pub channel_capacity: usize,

    /// Deadline for the initial load, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            descriptor: String::new(),
            watch: false,
            prefix: "database".to_string(),
            channel_capacity: 16,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Reconnect settings for watch loops.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Re-subscribe after a dropped watch instead of failing closed.
    pub enabled: bool,

    pub max_attempts: u32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,
}

impl ReconnectConfig {
    /// Policy to apply, or `None` when reconnect is disabled.
    pub fn policy(&self) -> Option<ReconnectPolicy> {
        self.enabled.then(|| ReconnectPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        })
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            enabled: false,
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay_ms,
            max_delay_ms: policy.max_delay_ms,
        }
    }
}

/// What happens to a resource whose name disappears from a new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Keep serving the last-known resource.
    #[default]
    Retain,
    /// Release the resource and forget the name.
    Release,
}

/// Named resource pool settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub removal: RemovalPolicy,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9000".to_string(),
        }
    }
}

/// Per-name database pool options.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseOptions {
    /// URL-form data source name, e.g. `mysql://user:pw@db:3306/app`.
    pub dsn: String,

    /// Log every statement.
    pub debug: bool,

    /// Prefix prepended to table names.
    pub table_prefix: String,

    pub max_open_connections: u32,

    pub max_idle_connections: u32,

    /// Maximum lifetime of a pooled connection, in seconds.
    pub max_connection_lifetime_secs: u64,

    pub connect_timeout_secs: u64,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            debug: false,
            table_prefix: String::new(),
            max_open_connections: 100,
            max_idle_connections: 10,
            max_connection_lifetime_secs: 300,
            connect_timeout_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_settings_use_defaults() {
        let config: RuntimeConfig = toml::from_str("[source]\nwatch = true\n").unwrap();
        assert!(config.source.watch);
        assert_eq!(config.source.prefix, "database");
        assert_eq!(config.source.channel_capacity, 16);
        assert_eq!(config.pool.removal, RemovalPolicy::Retain);
        assert!(config.reconnect.policy().is_none());
    }

    #[test]
    fn test_watch_options_from_settings() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [source]
            watch = true
            connect_timeout_ms = 250

            [reconnect]
            enabled = true
            max_attempts = 2
            "#,
        )
        .unwrap();
        let options = config.watch_options();
        assert!(options.enabled);
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
        let policy = options.reconnect.unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.base_delay_ms, ReconnectPolicy::default().base_delay_ms);
    }

    #[test]
    fn test_database_option_defaults() {
        let options: DatabaseOptions = serde_json::from_str(r#"{"dsn": "mysql://db/app"}"#).unwrap();
        assert_eq!(options.max_open_connections, 100);
        assert_eq!(options.max_idle_connections, 10);
        assert_eq!(options.max_connection_lifetime_secs, 300);
        assert!(!options.debug);
    }

    #[test]
    fn test_removal_policy_names() {
        let config: RuntimeConfig = toml::from_str("[pool]\nremoval = \"release\"\n").unwrap();
        assert_eq!(config.pool.removal, RemovalPolicy::Release);
    }
}
