//! Configuration for sidereal-release.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::error::{ReleaseError, ReleaseResult};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SIDEREAL_RELEASE_";

/// Top-level configuration for the release service.
#[derive(Debug, Deserialize, Default)]
pub struct ReleaseConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Record store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// CI/CD executor configuration.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Outbound alert notification configuration.
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Health rule thresholds.
    #[serde(default)]
    pub health: HealthConfig,

    /// Deployment monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Pre-flight validation configuration.
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl ReleaseConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `release.toml` in the current directory (if present)
    /// 3. Environment variables with `SIDEREAL_RELEASE_` prefix
    pub fn load() -> ReleaseResult<Self> {
        Self::from_file("release.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ReleaseResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ReleaseError::Config(e.to_string()))
    }

    /// Dotted names of the settings that currently hold a non-empty value.
    ///
    /// Used by the required-configuration check; secrets are reported by
    /// presence only.
    #[must_use]
    pub fn configured_keys(&self) -> BTreeSet<String> {
        let candidates = [
            ("database.url", self.database.url.is_some()),
            ("executor.token", self.executor.token.is_some()),
            ("executor.owner", self.executor.owner.is_some()),
            ("executor.repository", self.executor.repository.is_some()),
            ("notifier.api_url", self.notifier.api_url.is_some()),
            ("notifier.api_key", self.notifier.api_key.is_some()),
            ("notifier.from_address", self.notifier.from_address.is_some()),
            ("notifier.recipients", !self.notifier.recipients.is_empty()),
        ];

        candidates
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(key, _)| key.to_owned())
            .collect()
    }
}

/// Deserialise an optional secret, treating empty strings as absent.
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

/// Deserialise an optional string, treating empty strings as absent.
fn deserialize_non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8084)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Without one the in-memory store is used.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub url: Option<String>,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// CI/CD executor configuration.
///
/// The token, owner and repository are only checked when a dispatch is
/// attempted.
#[derive(Debug, Deserialize)]
pub struct ExecutorConfig {
    /// Base URL of the executor API.
    #[serde(default = "default_executor_api_url")]
    pub api_url: String,

    /// Access token.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub token: Option<SecretString>,

    /// Repository owner.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub owner: Option<String>,

    /// Repository whose workflow performs the deployment.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub repository: Option<String>,

    /// Dispatch event type the workflow listens for.
    #[serde(default = "default_event_type")]
    pub event_type: String,

    /// Request timeout in seconds.
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_executor_api_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_event_type() -> String {
    "deploy".to_owned()
}

const fn default_executor_timeout_secs() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            api_url: default_executor_api_url(),
            token: None,
            owner: None,
            repository: None,
            event_type: default_event_type(),
            timeout_secs: default_executor_timeout_secs(),
        }
    }
}

/// Outbound alert notification configuration.
#[derive(Debug, Deserialize)]
pub struct NotifierConfig {
    /// Email API endpoint.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub api_url: Option<String>,

    /// Email API key. Without one alerts are only logged.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,

    /// Sender address.
    #[serde(default, deserialize_with = "deserialize_non_empty")]
    pub from_address: Option<String>,

    /// Recipient addresses.
    #[serde(default)]
    pub recipients: Vec<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_notifier_timeout_secs() -> u64 {
    10
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            from_address: None,
            recipients: Vec::new(),
            timeout_secs: default_notifier_timeout_secs(),
        }
    }
}

/// Thresholds and lookback windows for the health rules.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Lookback for service health records, in seconds.
    pub service_window_secs: u64,
    /// Response time above which a service is considered slow.
    pub latency_threshold_ms: u64,
    /// Lookback for failed payments, in seconds.
    pub payment_window_secs: u64,
    /// Failed payments tolerated within the window.
    pub failed_payment_threshold: u64,
    /// A device unseen for this long counts as offline, in seconds.
    pub device_offline_after_secs: u64,
    /// Offline devices tolerated.
    pub offline_device_threshold: u64,
    /// Lookback for frontend errors, in seconds.
    pub frontend_window_secs: u64,
    /// Frontend errors tolerated within the window.
    pub frontend_error_threshold: u64,
    /// Lookback for slow queries, in seconds.
    pub slow_query_window_secs: u64,
    /// Query duration above which a query is slow.
    pub slow_query_duration_ms: u64,
    /// Slow queries tolerated within the window.
    pub slow_query_threshold: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            service_window_secs: 5 * 60,
            latency_threshold_ms: 2_000,
            payment_window_secs: 60 * 60,
            failed_payment_threshold: 10,
            device_offline_after_secs: 30 * 60,
            offline_device_threshold: 10,
            frontend_window_secs: 15 * 60,
            frontend_error_threshold: 50,
            slow_query_window_secs: 5 * 60,
            slow_query_duration_ms: 1_000,
            slow_query_threshold: 10,
        }
    }
}

/// Deployment monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval between health polls, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Monitoring timeout used when a deploy request does not set one.
    #[serde(default = "default_monitor_timeout_ms")]
    pub default_timeout_ms: u64,
}

const fn default_poll_interval_secs() -> u64 {
    10
}

const fn default_monitor_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

impl MonitorConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            default_timeout_ms: default_monitor_timeout_ms(),
        }
    }
}

/// Pre-flight validation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Settings that must be configured for a release to be valid.
    #[serde(default = "default_required_keys")]
    pub required_keys: Vec<String>,

    /// Lowest acceptable recorded health score.
    #[serde(default = "default_min_health_score")]
    pub min_health_score: f64,
}

fn default_required_keys() -> Vec<String> {
    vec!["database.url".to_owned(), "notifier.api_key".to_owned()]
}

const fn default_min_health_score() -> f64 {
    80.0
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required_keys: default_required_keys(),
            min_health_score: default_min_health_score(),
        }
    }
}
