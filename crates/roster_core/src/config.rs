//! Engine configuration.
//!
//! Every field has a default so partial JSON documents are accepted.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    /// A numeric field that must be positive was zero.
    ZeroValue(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid engine config: {err}"),
            Self::ZeroValue(field) => write!(f, "engine config `{field}` must be greater than 0"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::ZeroValue(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// TTL for cached pages, counts and joins.
    pub cache_ttl_secs: u64,
    /// Events per schedule page.
    pub page_size: u32,
    /// Maximum notification sends in flight for one batch.
    pub notify_concurrency: usize,
    /// Number of merge workers; changes for one event always land on the same one.
    pub merge_shards: usize,
    /// Queue depth per merge worker.
    pub merge_queue_capacity: usize,
    /// Delay before the single retry of an unresolved change reference.
    pub resolve_retry_delay_ms: u64,
    /// Buffered changes per live feed before slow subscribers lag.
    pub feed_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 600,
            page_size: 10,
            notify_concurrency: 4,
            merge_shards: 4,
            merge_queue_capacity: 256,
            resolve_retry_delay_ms: 50,
            feed_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 6] = [
            ("cache_ttl_secs", self.cache_ttl_secs == 0),
            ("page_size", self.page_size == 0),
            ("notify_concurrency", self.notify_concurrency == 0),
            ("merge_shards", self.merge_shards == 0),
            ("merge_queue_capacity", self.merge_queue_capacity == 0),
            ("feed_capacity", self.feed_capacity == 0),
        ];
        match checks.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(ConfigError::ZeroValue(*field)),
            None => Ok(()),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn resolve_retry_delay(&self) -> Duration {
        Duration::from_millis(self.resolve_retry_delay_ms)
    }
}
