//! Pipeline configuration from environment variables

use super::engine::FailureMode;
use super::refine::CastPolicy;
use super::warehouse::is_plain_identifier;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Asset feed settings
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub limit: usize,
    pub timeout: Duration,
    /// Sent as a bearer token when set
    pub api_key: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: "https://api.coincap.io/v2/assets".to_string(),
            limit: 20,
            timeout: Duration::from_secs(10),
            api_key: None,
        }
    }
}

/// Configuration for one pipeline run
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub feed: FeedConfig,

    /// Directory holding object-store buckets
    pub object_store_root: PathBuf,

    /// Bucket that receives raw batches
    pub bucket: String,

    /// Directory holding one SQLite file per dataset
    pub warehouse_dir: PathBuf,

    /// Dataset containing the BRZ/SLV/GLD tables
    pub dataset: String,

    /// What a non-persist stage failure does to the run
    pub failure_mode: FailureMode,

    /// How the refiner treats numeric text it cannot parse
    pub cast_policy: CastPolicy,

    /// Add new feed fields to the staging table instead of ignoring them
    pub allow_field_addition: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            object_store_root: PathBuf::from("data/lake"),
            bucket: "lab-dados-gcp-raw".to_string(),
            warehouse_dir: PathBuf::from("data/warehouse"),
            dataset: "crypto_analytics".to_string(),
            failure_mode: FailureMode::Lenient,
            cast_policy: CastPolicy::Fail,
            allow_field_addition: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `COINCAP_FEED_URL` (default: https://api.coincap.io/v2/assets)
    /// - `COINCAP_API_KEY` (default: unset)
    /// - `FEED_LIMIT` (default: 20)
    /// - `FEED_TIMEOUT_SECS` (default: 10)
    /// - `OBJECT_STORE_ROOT` (default: data/lake)
    /// - `BUCKET_NAME` (default: lab-dados-gcp-raw)
    /// - `WAREHOUSE_DIR` (default: data/warehouse)
    /// - `DATASET_ID` (default: crypto_analytics)
    /// - `PIPELINE_FAILURE_MODE` (lenient | strict, default: lenient)
    /// - `REFINE_CAST_POLICY` (fail | null | skip, default: fail)
    /// - `STAGING_ALLOW_FIELD_ADDITION` (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let feed = FeedConfig {
            url: env::var("COINCAP_FEED_URL").unwrap_or(defaults.feed.url),
            limit: env::var("FEED_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.feed.limit),
            timeout: env::var("FEED_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.feed.timeout),
            api_key: env::var("COINCAP_API_KEY").ok().filter(|k| !k.is_empty()),
        };

        let failure_mode = match env::var("PIPELINE_FAILURE_MODE") {
            Ok(raw) => FailureMode::parse(&raw).unwrap_or_else(|| {
                log::warn!("Invalid PIPELINE_FAILURE_MODE '{}', defaulting to lenient", raw);
                defaults.failure_mode
            }),
            Err(_) => defaults.failure_mode,
        };

        let cast_policy = match env::var("REFINE_CAST_POLICY") {
            Ok(raw) => CastPolicy::parse(&raw).unwrap_or_else(|| {
                log::warn!("Invalid REFINE_CAST_POLICY '{}', defaulting to fail", raw);
                defaults.cast_policy
            }),
            Err(_) => defaults.cast_policy,
        };

        Self {
            feed,
            object_store_root: env::var("OBJECT_STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.object_store_root),
            bucket: env::var("BUCKET_NAME").unwrap_or(defaults.bucket),
            warehouse_dir: env::var("WAREHOUSE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.warehouse_dir),
            dataset: env::var("DATASET_ID").unwrap_or(defaults.dataset),
            failure_mode,
            cast_policy,
            allow_field_addition: env::var("STAGING_ALLOW_FIELD_ADDITION")
                .ok()
                .and_then(|s| s.to_lowercase().parse().ok())
                .unwrap_or(defaults.allow_field_addition),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_identifier(&self.dataset) {
            return Err(ConfigError::InvalidValue(format!(
                "DATASET_ID must be a plain identifier (letters, digits, _), got '{}'",
                self.dataset
            )));
        }

        if self.feed.limit == 0 {
            return Err(ConfigError::InvalidValue(
                "FEED_LIMIT must be greater than zero".to_string(),
            ));
        }

        if !self.feed.url.starts_with("http://") && !self.feed.url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "COINCAP_FEED_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 11] = [
        "COINCAP_FEED_URL",
        "COINCAP_API_KEY",
        "FEED_LIMIT",
        "FEED_TIMEOUT_SECS",
        "OBJECT_STORE_ROOT",
        "BUCKET_NAME",
        "WAREHOUSE_DIR",
        "DATASET_ID",
        "PIPELINE_FAILURE_MODE",
        "REFINE_CAST_POLICY",
        "STAGING_ALLOW_FIELD_ADDITION",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    // Both cases live in one test: env vars are process-global and tests run in parallel
    #[test]
    fn test_config_from_env() {
        // Default configuration when no env vars set
        clear_env();
        let config = PipelineConfig::from_env();

        assert_eq!(config.feed.url, "https://api.coincap.io/v2/assets");
        assert_eq!(config.feed.limit, 20);
        assert_eq!(config.feed.timeout, Duration::from_secs(10));
        assert!(config.feed.api_key.is_none());
        assert_eq!(config.bucket, "lab-dados-gcp-raw");
        assert_eq!(config.dataset, "crypto_analytics");
        assert_eq!(config.failure_mode, FailureMode::Lenient);
        assert_eq!(config.cast_policy, CastPolicy::Fail);
        assert!(!config.allow_field_addition);
        assert!(config.validate().is_ok());

        // Custom configuration from env vars
        env::set_var("FEED_LIMIT", "5");
        env::set_var("FEED_TIMEOUT_SECS", "3");
        env::set_var("DATASET_ID", "lab_ds");
        env::set_var("PIPELINE_FAILURE_MODE", "STRICT");
        env::set_var("REFINE_CAST_POLICY", "skip");
        env::set_var("STAGING_ALLOW_FIELD_ADDITION", "TRUE");
        env::set_var("COINCAP_API_KEY", "secret");

        let config = PipelineConfig::from_env();

        assert_eq!(config.feed.limit, 5);
        assert_eq!(config.feed.timeout, Duration::from_secs(3));
        assert_eq!(config.feed.api_key.as_deref(), Some("secret"));
        assert_eq!(config.dataset, "lab_ds");
        assert_eq!(config.failure_mode, FailureMode::Strict);
        assert_eq!(config.cast_policy, CastPolicy::SkipRow);
        assert!(config.allow_field_addition);

        // Garbage falls back to defaults
        env::set_var("FEED_LIMIT", "lots");
        env::set_var("PIPELINE_FAILURE_MODE", "yolo");
        let config = PipelineConfig::from_env();
        assert_eq!(config.feed.limit, 20);
        assert_eq!(config.failure_mode, FailureMode::Lenient);

        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.dataset = "crypto-analytics".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.feed.limit = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.feed.url = "ftp://example.com/assets".to_string();
        assert!(config.validate().is_err());
    }
}
