//! Configuration management for nsrecruit
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. The engine consumes the result as a frozen struct.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ActionCategory;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// NationStates API identity and credentials
    pub api: ApiConfig,

    /// Per-category minimum intervals
    pub rate_limits: RateLimitConfig,

    /// Pool and send loop settings
    pub recruitment: RecruitmentConfig,

    /// Daily dump download settings
    pub dump: DumpConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Control API configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// NationStates API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API endpoint
    pub base_url: String,

    /// Contact string sent in the User-Agent (required by the API rules)
    pub contact: String,

    /// Home region that recruits are invited to
    pub region_name: String,

    /// API client key for telegrams
    pub client_key: Option<String>,

    /// Recruitment telegram template id
    pub telegram_id: Option<String>,

    /// Recruitment telegram secret key
    pub secret_key: Option<String>,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Minimum intervals between two executions of the same action category
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Any ordinary API query
    pub generic_interval_ms: u64,

    /// Non-recruitment telegram
    pub telegram_interval_secs: u64,

    /// Recruitment telegram
    pub recruitment_telegram_interval_secs: u64,

    /// Automated new nations harvest
    pub new_nations_interval_secs: u64,

    /// Automated region members harvest
    pub region_nations_interval_secs: u64,

    /// Longest single sleep while waiting for a category to open
    pub poll_step_ms: u64,

    /// Global ceiling: requests allowed per window
    pub global_max_requests: u32,

    /// Global ceiling window in seconds
    pub global_window_secs: u64,
}

/// Recruitment pool and loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecruitmentConfig {
    /// Run the automated send loop
    pub enabled: bool,

    /// Apply the name heuristics
    pub criteria_check: bool,

    /// Replenishment tops up `pending` to this size
    pub min_pool_size: usize,

    /// Regions replenishment may draw random members from
    pub regions_to_recruit_from: Vec<String>,

    /// Target size of the send loop working set
    pub batch_size: usize,

    /// Ingestion loop period in seconds
    pub ingestion_period_secs: u64,

    /// Replenishment loop period in seconds
    pub replenish_period_secs: u64,

    /// Back-off when the pool is empty, in seconds
    pub throttle_backoff_secs: u64,

    /// Pause after a fill that produced nothing, in seconds
    pub idle_retry_secs: u64,

    /// `reserved_api` rows older than this are re-queued
    pub reservation_grace_secs: u64,

    /// Replenishment gives up after this many transport failures in a row
    pub max_consecutive_transport_errors: u32,

    /// How long start waits for the first dump snapshot
    pub startup_timeout_secs: u64,

    /// How long stop waits for each loop to finish
    pub shutdown_timeout_secs: u64,
}

/// Daily dump configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub regions_url: String,
    pub nations_url: String,

    /// Background refresh period in seconds
    pub refresh_interval_secs: u64,

    /// Download timeout in seconds
    pub request_timeout_secs: u64,

    /// Download retries
    pub max_retries: u32,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_address: SocketAddr,
    pub enable_cors: bool,
    pub enable_request_logging: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://www.nationstates.net/cgi-bin/api.cgi"),
            contact: String::new(),
            region_name: String::new(),
            client_key: None,
            telegram_id: None,
            secret_key: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            generic_interval_ms: 600,
            telegram_interval_secs: 30,
            recruitment_telegram_interval_secs: 180,
            new_nations_interval_secs: 1_800,
            region_nations_interval_secs: 43_200,
            poll_step_ms: 1_000,
            global_max_requests: 50,
            global_window_secs: 30,
        }
    }
}

impl Default for RecruitmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            criteria_check: true,
            min_pool_size: 50,
            regions_to_recruit_from: Vec::new(),
            batch_size: 10,
            ingestion_period_secs: 300,
            replenish_period_secs: 1_800,
            throttle_backoff_secs: 900,
            idle_retry_secs: 60,
            reservation_grace_secs: 3_600,
            max_consecutive_transport_errors: 3,
            startup_timeout_secs: 600,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            regions_url: String::from("https://www.nationstates.net/pages/regions.xml.gz"),
            nations_url: String::from("https://www.nationstates.net/pages/nations.xml.gz"),
            refresh_interval_secs: 21_600,
            request_timeout_secs: 600,
            max_retries: 3,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/nsrecruit.db"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl RateLimitConfig {
    /// Minimum interval for an automated action of the given category
    #[must_use]
    pub fn interval(&self, category: ActionCategory) -> Duration {
        match category {
            ActionCategory::Generic => Duration::from_millis(self.generic_interval_ms),
            ActionCategory::Telegram => Duration::from_secs(self.telegram_interval_secs),
            ActionCategory::RecruitmentTelegram => {
                Duration::from_secs(self.recruitment_telegram_interval_secs)
            }
            ActionCategory::NewNations => Duration::from_secs(self.new_nations_interval_secs),
            ActionCategory::RegionNations => {
                Duration::from_secs(self.region_nations_interval_secs)
            }
        }
    }

    #[must_use]
    pub fn poll_step(&self) -> Duration {
        Duration::from_millis(self.poll_step_ms)
    }

    #[must_use]
    pub fn global_window(&self) -> Duration {
        Duration::from_secs(self.global_window_secs)
    }
}

impl RecruitmentConfig {
    #[must_use]
    pub fn ingestion_period(&self) -> Duration {
        Duration::from_secs(self.ingestion_period_secs)
    }

    #[must_use]
    pub fn replenish_period(&self) -> Duration {
        Duration::from_secs(self.replenish_period_secs)
    }

    #[must_use]
    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_secs(self.throttle_backoff_secs)
    }

    #[must_use]
    pub fn idle_retry(&self) -> Duration {
        Duration::from_secs(self.idle_retry_secs)
    }

    #[must_use]
    pub fn reservation_grace(&self) -> Duration {
        Duration::from_secs(self.reservation_grace_secs)
    }

    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl DumpConfig {
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Split a `;` separated region list, dropping blanks
fn parse_region_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(contact) = std::env::var("NSRECRUIT_CONTACT") {
            config.api.contact = contact;
        }
        if let Ok(region) = std::env::var("NSRECRUIT_REGION") {
            config.api.region_name = region;
        }
        if let Ok(base_url) = std::env::var("NSRECRUIT_API_URL") {
            config.api.base_url = base_url;
        }
        config.api.client_key = std::env::var("NSRECRUIT_CLIENT_KEY").ok();
        config.api.telegram_id = std::env::var("NSRECRUIT_TELEGRAM_ID").ok();
        config.api.secret_key = std::env::var("NSRECRUIT_SECRET_KEY").ok();

        if let Some(enabled) = env_parse("NSRECRUIT_ENABLE_RECRUITMENT") {
            config.recruitment.enabled = enabled;
        }
        if let Some(check) = env_parse("NSRECRUIT_CRITERIA_CHECK") {
            config.recruitment.criteria_check = check;
        }
        if let Some(size) = env_parse("NSRECRUIT_MIN_POOL_SIZE") {
            config.recruitment.min_pool_size = size;
        }
        if let Ok(regions) = std::env::var("NSRECRUIT_REGIONS_TO_RECRUIT_FROM") {
            config.recruitment.regions_to_recruit_from = parse_region_list(&regions);
        }

        if let Ok(path) = std::env::var("NSRECRUIT_SQLITE_PATH") {
            config.database.sqlite_path = PathBuf::from(path);
        }

        if let Ok(addr) = std::env::var("NSRECRUIT_BIND_ADDRESS") {
            config.server.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid NSRECRUIT_BIND_ADDRESS: {addr}"))?;
        }

        if let Ok(level) = std::env::var("NSRECRUIT_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("NSRECRUIT_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api.contact.trim().is_empty() {
            anyhow::bail!("api.contact must be set (NationStates requires a contact in the User-Agent)");
        }

        if self.api.region_name.trim().is_empty() {
            anyhow::bail!("api.region_name must be set");
        }

        if self.recruitment.enabled {
            let missing: Vec<&str> = [
                ("client_key", &self.api.client_key),
                ("telegram_id", &self.api.telegram_id),
                ("secret_key", &self.api.secret_key),
            ]
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(name, _)| name)
            .collect();

            if !missing.is_empty() {
                anyhow::bail!(
                    "recruitment is enabled but api credentials are missing: {}",
                    missing.join(", ")
                );
            }
        }

        if self.recruitment.batch_size == 0 {
            anyhow::bail!("recruitment.batch_size must be greater than 0");
        }

        if self.rate_limits.poll_step_ms == 0 {
            anyhow::bail!("rate_limits.poll_step_ms must be greater than 0");
        }

        if self.rate_limits.global_max_requests == 0 || self.rate_limits.global_window_secs == 0 {
            anyhow::bail!("rate_limits global ceiling must be positive");
        }

        if self.dump.refresh_interval_secs == 0 {
            anyhow::bail!("dump.refresh_interval_secs must be greater than 0");
        }

        Ok(())
    }

    /// Get API request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }
}
