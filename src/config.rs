use crate::error::{GriddleError, Result};
use crate::work::policy::{CommitStrategy, RefreshStrategy};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

const DEFAULT_QUEUE_COUNT: usize = 1;
const DEFAULT_QUEUE_SIZE: usize = 1000;
const DEFAULT_MAX_BULK_SIZE: usize = 100;
const DEFAULT_COMMIT_INTERVAL_MS: u64 = 1000;
const DEFAULT_WRITER_MEMORY_BYTES: usize = 20_000_000;

/// Resolved indexing configuration.
///
/// Values come from [`IndexingConfig::from_env`], a JSON file loaded with
/// [`IndexingConfig::load`], or are set directly by the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Shard (and therefore queue) count used for indexes created with the
    /// default sharding strategy. `1` means unsharded.
    pub queue_count: usize,
    /// Capacity of each serial work queue, in work sets.
    pub queue_size: usize,
    /// Maximum number of work items a queue drains into one batch.
    pub max_bulk_size: usize,
    /// Delay after the first uncommitted write before a scheduled background
    /// commit runs. `0` disables scheduled commits.
    pub commit_interval_ms: u64,
    pub commit_strategy: CommitStrategy,
    pub refresh_strategy: RefreshStrategy,
    /// Indexing buffer handed to each embedded shard writer.
    pub writer_memory_bytes: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        IndexingConfig {
            queue_count: DEFAULT_QUEUE_COUNT,
            queue_size: DEFAULT_QUEUE_SIZE,
            max_bulk_size: DEFAULT_MAX_BULK_SIZE,
            commit_interval_ms: DEFAULT_COMMIT_INTERVAL_MS,
            commit_strategy: CommitStrategy::None,
            refresh_strategy: RefreshStrategy::None,
            writer_memory_bytes: DEFAULT_WRITER_MEMORY_BYTES,
        }
    }
}

impl IndexingConfig {
    pub fn from_env() -> Self {
        IndexingConfig {
            queue_count: env::var("GRIDDLE_QUEUE_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_QUEUE_COUNT),
            queue_size: env::var("GRIDDLE_QUEUE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_QUEUE_SIZE),
            max_bulk_size: env::var("GRIDDLE_MAX_BULK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_BULK_SIZE),
            commit_interval_ms: env::var("GRIDDLE_COMMIT_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COMMIT_INTERVAL_MS),
            commit_strategy: env::var("GRIDDLE_COMMIT_STRATEGY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            refresh_strategy: env::var("GRIDDLE_REFRESH_STRATEGY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            writer_memory_bytes: env::var("GRIDDLE_WRITER_MEMORY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WRITER_MEMORY_BYTES),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IndexingConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_count == 0 {
            return Err(GriddleError::Config("queue_count must be > 0".to_string()));
        }
        if self.queue_size == 0 {
            return Err(GriddleError::Config("queue_size must be > 0".to_string()));
        }
        if self.max_bulk_size == 0 {
            return Err(GriddleError::Config("max_bulk_size must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn commit_interval(&self) -> Option<Duration> {
        (self.commit_interval_ms > 0).then(|| Duration::from_millis(self.commit_interval_ms))
    }
}
