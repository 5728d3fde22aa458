//! Centralized configuration management.
//!
//! All configuration is loaded from environment variables at startup.
//! This provides a single source of truth and fails fast if required config is missing.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub monitoring: MonitoringConfig,
    pub scraper: ScraperDefaults,
    pub embedding_worker: EmbeddingWorkerConfig,
    pub suggestions: SuggestionsSyncConfig,
    pub providers: ProviderConfig,
    pub process: ProcessConfig,
    pub observability: ObservabilityConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Supervisor liveness / restart configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Seconds between liveness checks over the instance set
    pub check_interval: Duration,
    /// Minimum age of a stopped/failed row before auto-restart fires
    pub restart_cooldown: Duration,
    /// Pause between detecting a dead handle and respawning it
    pub restart_delay: Duration,
    /// Retention window for api_usage rows
    pub usage_retention_days: i64,
}

/// Per-worker run parameter defaults. Individual scraper instances may
/// override any of these through their stored run config.
#[derive(Debug, Clone)]
pub struct ScraperDefaults {
    pub scrape_interval: Duration,
    pub posts_limit: u32,
    pub comment_batch: u32,
    pub subreddit_update_interval: Duration,
    pub sorting_methods: Vec<String>,
    pub max_comment_depth: u32,
    /// `None` expands every "more comments" stub, `Some(0)` skips expansion
    pub more_comments_limit: Option<u32>,
    /// Hard cap on subreddits per scraper instance
    pub max_subreddits_per_instance: usize,
    /// Keep this many requests in reserve before voluntarily sleeping
    pub min_remaining_budget: u32,
}

/// Enrichment worker configuration
#[derive(Debug, Clone)]
pub struct EmbeddingWorkerConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    pub batch_size: i64,
    pub max_retries: i32,
}

/// Suggestions sync worker configuration
#[derive(Debug, Clone)]
pub struct SuggestionsSyncConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    pub target_scraper_type: String,
}

/// Embedding / chat provider configuration.
///
/// Both providers are optional: when endpoint or key is missing the
/// enrichment worker degrades to idle rather than failing startup.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub embedding_deployment: String,
    pub chat_deployment: String,
    pub api_version: String,
    pub timeout: Duration,
}

/// Worker sub-process configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Path of the worker binary the supervisor spawns
    pub worker_binary: String,
    /// Prefix for deterministic handle names
    pub handle_prefix: String,
    /// Directory receiving per-handle log files
    pub logs_dir: String,
    /// Grace period before a stop escalates to SIGKILL
    pub stop_grace: Duration,
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub log_format: LogFormat,
}

/// Log format type
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// This should be called once at application startup.
    /// It will fail fast if required configuration is missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            monitoring: MonitoringConfig::from_env()?,
            scraper: ScraperDefaults::from_env()?,
            embedding_worker: EmbeddingWorkerConfig::from_env()?,
            suggestions: SuggestionsSyncConfig::from_env()?,
            providers: ProviderConfig::from_env()?,
            process: ProcessConfig::from_env()?,
            observability: ObservabilityConfig::from_env()?,
        })
    }
}

fn env_duration_secs(key: &str, default: &str) -> Result<Duration> {
    Ok(Duration::from_secs(
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse()
            .with_context(|| format!("{} must be a number of seconds", key))?,
    ))
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("DB_MAX_CONNECTIONS must be a number")?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("DB_MIN_CONNECTIONS must be a number")?,
            acquire_timeout: env_duration_secs("DB_ACQUIRE_TIMEOUT_SECS", "5")?,
            idle_timeout: env_duration_secs("DB_IDLE_TIMEOUT_SECS", "300")?,
            max_lifetime: env_duration_secs("DB_MAX_LIFETIME_SECS", "1800")?,
        })
    }
}

impl MonitoringConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            check_interval: env_duration_secs("MONITOR_CHECK_INTERVAL_SECS", "30")?,
            restart_cooldown: env_duration_secs("MONITOR_RESTART_COOLDOWN_SECS", "30")?,
            restart_delay: env_duration_secs("MONITOR_RESTART_DELAY_SECS", "5")?,
            usage_retention_days: env::var("API_USAGE_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("API_USAGE_RETENTION_DAYS must be a number")?,
        })
    }
}

impl ScraperDefaults {
    pub fn from_env() -> Result<Self> {
        let sorting_methods = env::var("SCRAPER_SORTING_METHODS")
            .unwrap_or_else(|_| "new,hot,rising".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // "-1" expands all stubs, "0" skips expansion entirely
        let more_comments_limit = match env::var("SCRAPER_MORE_COMMENTS_LIMIT")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<i64>()
            .context("SCRAPER_MORE_COMMENTS_LIMIT must be a number")?
        {
            n if n < 0 => None,
            n => Some(n as u32),
        };

        Ok(Self {
            scrape_interval: env_duration_secs("SCRAPER_INTERVAL_SECS", "300")?,
            posts_limit: env::var("SCRAPER_POSTS_LIMIT")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("SCRAPER_POSTS_LIMIT must be a number")?,
            comment_batch: env::var("SCRAPER_COMMENT_BATCH")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("SCRAPER_COMMENT_BATCH must be a number")?,
            subreddit_update_interval: env_duration_secs("SCRAPER_SUBREDDIT_UPDATE_SECS", "86400")?,
            sorting_methods,
            max_comment_depth: env::var("SCRAPER_MAX_COMMENT_DEPTH")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("SCRAPER_MAX_COMMENT_DEPTH must be a number")?,
            more_comments_limit,
            max_subreddits_per_instance: env::var("SCRAPER_MAX_SUBREDDITS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("SCRAPER_MAX_SUBREDDITS must be a number")?,
            min_remaining_budget: env::var("SCRAPER_MIN_REMAINING_BUDGET")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("SCRAPER_MIN_REMAINING_BUDGET must be a number")?,
        })
    }
}

impl EmbeddingWorkerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: env::var("EMBEDDING_WORKER_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            check_interval: env_duration_secs("EMBEDDING_WORKER_CHECK_INTERVAL_SECS", "60")?,
            batch_size: env::var("EMBEDDING_WORKER_BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("EMBEDDING_WORKER_BATCH_SIZE must be a number")?,
            max_retries: env::var("EMBEDDING_WORKER_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("EMBEDDING_WORKER_MAX_RETRIES must be a number")?,
        })
    }
}

impl SuggestionsSyncConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: env::var("SUGGESTIONS_SYNC_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                == "true",
            check_interval: env_duration_secs("SUGGESTIONS_CHECK_INTERVAL_SECS", "60")?,
            target_scraper_type: env::var("SUGGESTIONS_TARGET_SCRAPER_TYPE")
                .unwrap_or_else(|_| "posts".to_string()),
        })
    }
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: env::var("INFERENCE_API_ENDPOINT").ok().filter(|s| !s.is_empty()),
            api_key: env::var("INFERENCE_API_KEY").ok().filter(|s| !s.is_empty()),
            embedding_deployment: env::var("EMBEDDING_DEPLOYMENT")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            chat_deployment: env::var("CHAT_DEPLOYMENT")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            api_version: env::var("INFERENCE_API_VERSION")
                .unwrap_or_else(|_| "2024-02-01".to_string()),
            timeout: env_duration_secs("INFERENCE_API_TIMEOUT_SECS", "120")?,
        })
    }

    /// Both endpoint and key must be present for enrichment to run.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }
}

impl ProcessConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            worker_binary: env::var("WORKER_BINARY")
                .unwrap_or_else(|_| "subfleet-worker".to_string()),
            handle_prefix: env::var("WORKER_HANDLE_PREFIX")
                .unwrap_or_else(|_| "subfleet".to_string()),
            logs_dir: env::var("WORKER_LOGS_DIR").unwrap_or_else(|_| "./logs".to_string()),
            stop_grace: env_duration_secs("WORKER_STOP_GRACE_SECS", "30")?,
        })
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self> {
        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "json".to_string())
            .to_lowercase()
            .as_str()
        {
            "pretty" | "human" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        let service_name = env::var("OTEL_SERVICE_NAME")
            .or_else(|_| env::var("SERVICE_NAME"))
            .unwrap_or_else(|_| "subfleet".to_string());

        Ok(Self {
            service_name,
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty()),
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_requires_both_halves() {
        let base = ProviderConfig {
            endpoint: Some("https://inference.example".to_string()),
            api_key: None,
            embedding_deployment: "e".to_string(),
            chat_deployment: "c".to_string(),
            api_version: "2024-02-01".to_string(),
            timeout: Duration::from_secs(120),
        };
        assert!(!base.is_configured());

        let full = ProviderConfig {
            api_key: Some("key".to_string()),
            ..base
        };
        assert!(full.is_configured());
    }
}
