//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream content API configuration.
    pub youtube: YoutubeConfig,
    /// Daily quota budget configuration.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Job and content store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// In-process worker loop configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Periodic job scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upstream content API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeConfig {
    /// API key appended to every Data API request.
    pub api_key: String,
    /// Base URL of the Data API.
    #[serde(default = "default_youtube_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum ids per batched lookup.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries after the initial attempt for retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Jitter fraction in `[0, 1]` applied to each backoff delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Feed endpoint; the channel id is appended as `channel_id`.
    #[serde(default = "default_feed_base_url")]
    pub feed_base_url: String,
}

/// Daily quota budget configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Maximum number of units held by the bucket.
    #[serde(default = "default_quota_capacity")]
    pub capacity: u64,
    /// Units restored per refill interval.
    #[serde(default = "default_quota_capacity")]
    pub refill_amount: u64,
    /// Refill interval in seconds.
    #[serde(default = "default_refill_interval_secs")]
    pub refill_interval_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            capacity: default_quota_capacity(),
            refill_amount: default_quota_capacity(),
            refill_interval_secs: default_refill_interval_secs(),
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, state is lost on restart.
    #[default]
    Memory,
    /// Remote store reached through RPC calls.
    Rpc,
}

/// Job and content store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Base URL of the RPC endpoint (required for the `rpc` backend).
    #[serde(default)]
    pub url: Option<String>,
    /// Service key sent with every RPC call.
    #[serde(default)]
    pub service_key: Option<String>,
    /// Lease duration for claimed jobs in seconds (memory backend).
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            service_key: None,
            lease_secs: default_lease_secs(),
        }
    }
}

/// In-process worker loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Whether the server runs the dispatch loop on an interval.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between dispatch invocations.
    #[serde(default = "default_worker_interval_secs")]
    pub interval_secs: u64,
    /// Jobs claimed per invocation.
    #[serde(default = "default_worker_max_jobs")]
    pub max_jobs: u32,
    /// Worker identifier used for leases. Generated when absent.
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_worker_interval_secs(),
            max_jobs: default_worker_max_jobs(),
            worker_id: None,
        }
    }
}

/// Periodic job scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Whether the scheduler runs in this process.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between hot video refresh jobs.
    #[serde(default = "default_hot_interval_secs")]
    pub hot_videos_interval_secs: u64,
    /// Seconds between medium-age video refresh jobs.
    #[serde(default = "default_medium_interval_secs")]
    pub medium_videos_interval_secs: u64,
    /// Seconds between channel statistics refresh jobs.
    #[serde(default = "default_channel_stats_interval_secs")]
    pub channel_stats_interval_secs: u64,
    /// Seconds between feed due-checks.
    #[serde(default = "default_feed_check_interval_secs")]
    pub feed_check_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hot_videos_interval_secs: default_hot_interval_secs(),
            medium_videos_interval_secs: default_medium_interval_secs(),
            channel_stats_interval_secs: default_channel_stats_interval_secs(),
            feed_check_interval_secs: default_feed_check_interval_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_youtube_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_feed_base_url() -> String {
    "https://www.youtube.com/feeds/videos.json".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_batch_size() -> usize {
    50
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_jitter() -> f64 {
    0.1
}

const fn default_quota_capacity() -> u64 {
    10_000
}

const fn default_refill_interval_secs() -> u64 {
    86_400
}

const fn default_lease_secs() -> u64 {
    300
}

const fn default_worker_interval_secs() -> u64 {
    30
}

const fn default_worker_max_jobs() -> u32 {
    10
}

const fn default_hot_interval_secs() -> u64 {
    3600
}

const fn default_medium_interval_secs() -> u64 {
    6 * 3600
}

const fn default_channel_stats_interval_secs() -> u64 {
    86_400
}

const fn default_feed_check_interval_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `TUBEWATCH_ENV`)
    /// 4. Environment variables with `TUBEWATCH__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("TUBEWATCH_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("TUBEWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("TUBEWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(
            r#"
            [youtube]
            api_key = "secret"
            "#,
        );

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.youtube.batch_size, 50);
        assert_eq!(config.youtube.max_retries, 3);
        assert!(config.youtube.feed_base_url.starts_with("https://"));
        assert_eq!(config.quota.capacity, 10_000);
        assert_eq!(config.quota.refill_interval_secs, 86_400);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(!config.worker.enabled);
        assert_eq!(config.worker.max_jobs, 10);
    }

    #[test]
    fn test_rpc_backend_parses() {
        let config = parse(
            r#"
            [youtube]
            api_key = "secret"

            [store]
            backend = "rpc"
            url = "https://db.example.com"
            service_key = "service"
            "#,
        );

        assert_eq!(config.store.backend, StoreBackend::Rpc);
        assert_eq!(config.store.url.as_deref(), Some("https://db.example.com"));
    }
}
