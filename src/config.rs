//! Configuration management for the transaction consumer

use crate::types::record::StreamPosition;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "FRAUD_CONSUMER_CONFIG";
/// Configuration file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// What to do with a record whose scoring failed
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoringFailurePolicy {
    /// Advance past the record; it is lost but the stream keeps moving
    #[default]
    Skip,
    /// Keep the cursor in place so the record is redelivered
    Retry,
}

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub mongo: MongoConfig,
    pub model: ModelConfig,
    pub consumer: ConsumerConfig,
    pub logging: LoggingConfig,
}

/// Redis stream configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis server URL
    pub url: String,
    /// Stream holding incoming transactions
    pub stream_key: String,
    /// XREAD block time in milliseconds (0 waits indefinitely)
    pub block_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            stream_key: "transactions".to_string(),
            block_ms: 0,
        }
    }
}

/// MongoDB store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    /// MongoDB connection string
    pub uri: String,
    /// Database holding the partitions and counters
    pub database: String,
    /// Partition for fraud verdicts
    pub fraud_collection: String,
    /// Partition for legitimate verdicts
    pub legit_collection: String,
    /// Collection holding counters and checkpoints
    pub counters_collection: String,
    /// Counter backing the fraud token sequence
    pub fraud_counter_key: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017/".to_string(),
            database: "RedisTransactions".to_string(),
            fraud_collection: "fraud_transactions".to_string(),
            legit_collection: "legit_transactions".to_string(),
            counters_collection: "counters".to_string(),
            fraud_counter_key: "fraud_token".to_string(),
        }
    }
}

/// Classifier artifact configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the ONNX export of the trained classifier
    pub path: String,
    /// Number of threads for ONNX inference (default: 1)
    pub onnx_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "models/xgboost_classifier.onnx".to_string(),
            onnx_threads: 1,
        }
    }
}

/// Consumer loop configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Position to start reading after; `None` means the checkpoint or the
    /// beginning of the stream
    pub start_position: Option<String>,
    /// Delay between reconnect attempts after a log failure
    pub reconnect_backoff_ms: u64,
    /// Delay before re-reading a record left for redelivery
    pub retry_delay_ms: u64,
    /// Handling of records whose scoring failed
    pub scoring_failure_policy: ScoringFailurePolicy,
    /// Persist the cursor after every advance and resume from it
    pub checkpoint: bool,
    /// Interval for periodic metrics summaries (0 disables)
    pub metrics_interval_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            start_position: None,
            reconnect_backoff_ms: 5000,
            retry_delay_ms: 1000,
            scoring_failure_policy: ScoringFailurePolicy::Skip,
            checkpoint: false,
            metrics_interval_secs: 30,
        }
    }
}

impl ConsumerConfig {
    /// Parsed start position, if one is configured
    pub fn start_position(&self) -> Result<Option<StreamPosition>> {
        self.start_position
            .as_deref()
            .map(|raw| {
                raw.parse::<StreamPosition>()
                    .with_context(|| format!("Invalid consumer.start_position {raw:?}"))
            })
            .transpose()
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the file named by `FRAUD_CONSUMER_CONFIG`,
    /// falling back to `config/config.toml`
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path, layered with
    /// `FRAUD_CONSUMER__SECTION__KEY` environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("FRAUD_CONSUMER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the consumer cannot run with
    pub fn validate(&self) -> Result<()> {
        self.consumer.start_position()?;
        if self.consumer.reconnect_backoff_ms == 0 {
            anyhow::bail!("consumer.reconnect_backoff_ms must be greater than 0");
        }
        if self.model.onnx_threads == 0 {
            anyhow::bail!("model.onnx_threads must be greater than 0");
        }
        if self.redis.stream_key.is_empty() {
            anyhow::bail!("redis.stream_key must not be empty");
        }
        Ok(())
    }
}
