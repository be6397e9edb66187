//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EngineError;
use crate::logging;
use crate::reconcile::{Backoff, PipelineSettings, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// An absent table carries no log level and fails `validate`
    #[serde(default = "unset_persistence")]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
}

/// Reconciliation schedule and retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Seconds between reconciliation passes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Rows per batched read and per upsert statement
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Attempts per pass step
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Days after creation a post's score keeps being copied
    #[serde(default = "default_retention_days")]
    pub score_retention_days: u32,

    /// Must be present in the file; an absent key is rejected by `validate`
    #[serde(default)]
    pub log_level: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            retry_count: default_retry_count(),
            timeout_secs: default_timeout(),
            score_retention_days: default_retention_days(),
            log_level: default_log_level(),
        }
    }
}

impl PersistenceConfig {
    /// Check the values a scheduler cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.interval_secs == 0 {
            return Err(EngineError::Config("interval_secs must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be greater than 0".into()));
        }
        if self.timeout_secs == 0 {
            return Err(EngineError::Config("timeout_secs must be greater than 0".into()));
        }
        logging::parse_level(&self.log_level)?;
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Linear backoff of one second per failed attempt
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_count,
            Duration::from_secs(self.timeout_secs),
            Backoff::Linear(Duration::from_secs(1)),
        )
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            retention_days: self.score_retention_days,
            batch_size: self.batch_size,
            retry: self.retry_policy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the SQLite database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Lifetime of a cached community ranking
    #[serde(default = "default_cache_ttl")]
    pub community_cache_ttl_secs: u64,

    /// Seconds between sweeps of expired community rankings
    #[serde(default = "default_cache_cleanup")]
    pub cache_cleanup_interval_secs: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            community_cache_ttl_secs: default_cache_ttl(),
            cache_cleanup_interval_secs: default_cache_cleanup(),
        }
    }
}

// Defaults
fn default_interval() -> u64 { 60 }
fn default_batch_size() -> usize { 500 }
fn default_retry_count() -> u32 { 3 }
fn default_timeout() -> u64 { 10 }
fn default_retention_days() -> u32 { 7 }
fn default_log_level() -> String { "info".to_string() }
fn default_cache_ttl() -> u64 { 60 }
fn default_cache_cleanup() -> u64 { 300 }
fn unset_persistence() -> PersistenceConfig {
    PersistenceConfig {
        log_level: String::new(),
        ..PersistenceConfig::default()
    }
}
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("forum-rank")
}

impl Config {
    /// Load from `path`; a missing file is an error
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(format!("invalid config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.persistence.validate()
    }
}
