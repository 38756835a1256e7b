//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::{Duration, OffsetDateTime};

/// Longest accepted cache TTL or sweep expiry, in days.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest accepted claim lease, in seconds.
pub const MAX_CLAIM_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

/// `now - window`, clamped to the Unix epoch.
///
/// Rows older than the returned cutoff are eligible for refresh. Stores only
/// accept timestamps they can format, so a window reaching before 1970 makes
/// nothing eligible instead of overflowing.
pub fn cutoff(now: OffsetDateTime, window: Duration) -> OffsetDateTime {
    now.checked_sub(window)
        .map_or(OffsetDateTime::UNIX_EPOCH, |at| at.max(OffsetDateTime::UNIX_EPOCH))
}

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum number of keys accepted per submitted operation (capped at 100).
    #[serde(default = "default_max_batch_keys")]
    pub max_batch_keys: usize,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Re-drive operations left in PROCESSING by a previous process on startup.
    #[serde(default = "default_resume_open_operations")]
    pub resume_open_operations: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_batch_keys() -> usize {
    crate::MAX_BATCH_KEYS
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_resume_open_operations() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_batch_keys: default_max_batch_keys(),
            metrics_enabled: default_metrics_enabled(),
            resume_open_operations: default_resume_open_operations(),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single instance deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer EASEL_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/easel.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("postgres max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                    _ => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                }
            }
        }
    }
}

/// Upstream lookup service configuration.
///
/// The default resolver issues `GET {base_url}{lookup_path}?{query_param}={key}`
/// and reads the artifact URL from the JSON response at `url_pointer`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default = "default_upstream_lookup_path")]
    pub lookup_path: String,
    #[serde(default = "default_upstream_query_param")]
    pub query_param: String,
    /// JSON pointer (RFC 6901) to the artifact URL in the lookup response.
    #[serde(default = "default_upstream_url_pointer")]
    pub url_pointer: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// User-Agent header sent upstream. Defaults to `easel/<version>`.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_upstream_base_url() -> String {
    "https://api.scryfall.com".to_string()
}

fn default_upstream_lookup_path() -> String {
    "/cards/named".to_string()
}

fn default_upstream_query_param() -> String {
    "exact".to_string()
}

fn default_upstream_url_pointer() -> String {
    "/image_uris/normal".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            lookup_path: default_upstream_lookup_path(),
            query_param: default_upstream_query_param(),
            url_pointer: default_upstream_url_pointer(),
            timeout_secs: default_upstream_timeout_secs(),
            user_agent: None,
        }
    }
}

impl UpstreamConfig {
    /// Get the request timeout as a std::time::Duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("upstream.base_url cannot be empty".to_string());
        }
        if !self.url_pointer.is_empty() && !self.url_pointer.starts_with('/') {
            return Err(format!(
                "upstream.url_pointer '{}' must be empty or start with '/'",
                self.url_pointer
            ));
        }
        if self.timeout_secs == 0 {
            return Err("upstream.timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Refresh coordinator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Days after the last successful fetch before an artifact is stale.
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u32,
    /// Fan-out concurrency for ensure/refresh over a batch of keys.
    #[serde(default = "default_refresh_concurrency")]
    pub concurrency: usize,
    /// Interval between follower reloads while another caller holds the claim.
    #[serde(default = "default_follower_poll_interval_ms")]
    pub follower_poll_interval_ms: u64,
    /// Longest a follower waits before giving up with a timeout error.
    #[serde(default = "default_follower_max_wait_secs")]
    pub follower_max_wait_secs: u64,
    /// A PROCESSING claim older than this may be re-claimed by anyone.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

fn default_cache_ttl_days() -> u32 {
    7
}

fn default_refresh_concurrency() -> usize {
    8
}

fn default_follower_poll_interval_ms() -> u64 {
    200
}

fn default_follower_max_wait_secs() -> u64 {
    60
}

fn default_claim_lease_secs() -> u64 {
    120
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cache_ttl_days: default_cache_ttl_days(),
            concurrency: default_refresh_concurrency(),
            follower_poll_interval_ms: default_follower_poll_interval_ms(),
            follower_max_wait_secs: default_follower_max_wait_secs(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

impl RefreshConfig {
    /// Get the cache TTL as a Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::days(i64::from(self.cache_ttl_days))
    }

    /// Get the claim lease as a Duration.
    pub fn claim_lease(&self) -> Duration {
        let secs = i64::try_from(self.claim_lease_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the follower poll interval as a std::time::Duration.
    pub fn follower_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.follower_poll_interval_ms)
    }

    /// Get the follower wait bound as a std::time::Duration.
    pub fn follower_max_wait(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.follower_max_wait_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("refresh.concurrency must be at least 1".to_string());
        }
        if self.follower_poll_interval_ms == 0 {
            return Err("refresh.follower_poll_interval_ms cannot be 0".to_string());
        }
        if self.claim_lease_secs == 0 {
            return Err("refresh.claim_lease_secs cannot be 0".to_string());
        }
        if self.claim_lease_secs > MAX_CLAIM_LEASE_SECS {
            return Err(format!(
                "refresh.claim_lease_secs {} exceeds maximum value {MAX_CLAIM_LEASE_SECS}",
                self.claim_lease_secs
            ));
        }
        if self.cache_ttl_days > MAX_RETENTION_DAYS {
            return Err(format!(
                "refresh.cache_ttl_days {} exceeds maximum value {MAX_RETENTION_DAYS}",
                self.cache_ttl_days
            ));
        }
        if self.follower_max_wait().as_millis() < u128::from(self.follower_poll_interval_ms) {
            return Err(
                "refresh.follower_max_wait_secs must cover at least one poll interval".to_string(),
            );
        }
        Ok(())
    }
}

/// Background sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Enable the periodic sweep (default: true).
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    /// Interval in seconds between sweep ticks.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Maximum rows selected per tick.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,
    /// Maximum concurrent upstream refreshes within one tick.
    #[serde(default = "default_sweep_max_concurrency")]
    pub max_concurrency: usize,
    /// Successful fetches older than this many days are refreshed proactively.
    #[serde(default = "default_sweep_expire_days")]
    pub expire_days: u32,
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_sweep_batch_size() -> u32 {
    100
}

fn default_sweep_max_concurrency() -> usize {
    4
}

fn default_sweep_expire_days() -> u32 {
    7
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval_secs(),
            batch_size: default_sweep_batch_size(),
            max_concurrency: default_sweep_max_concurrency(),
            expire_days: default_sweep_expire_days(),
        }
    }
}

impl SweepConfig {
    /// Get the tick interval as a std::time::Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Get the expiry window as a Duration.
    pub fn expire_after(&self) -> Duration {
        Duration::days(i64::from(self.expire_days))
    }

    pub fn validate(&self) -> Result<(), String> {
        // Zero would cause tokio::time::interval to panic
        if self.interval_secs == 0 {
            return Err("sweep.interval_secs cannot be 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("sweep.batch_size must be at least 1".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("sweep.max_concurrency must be at least 1".to_string());
        }
        if self.expire_days > MAX_RETENTION_DAYS {
            return Err(format!(
                "sweep.expire_days {} exceeds maximum value {MAX_RETENTION_DAYS}",
                self.expire_days
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Upstream lookup configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Refresh coordinator configuration.
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Background sweep configuration.
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Disables the background sweep and shortens the
    /// follower poll interval so coordination tests settle quickly.
    pub fn for_testing() -> Self {
        Self {
            sweep: SweepConfig {
                enabled: false,
                ..SweepConfig::default()
            },
            refresh: RefreshConfig {
                follower_poll_interval_ms: 20,
                follower_max_wait_secs: 5,
                ..RefreshConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.upstream.validate()?;
        self.refresh.validate()?;
        self.sweep.validate()?;
        Ok(())
    }
}
