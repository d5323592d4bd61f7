//! Engine and cache configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Configuration for opening an append-log [`Collection`](crate::Collection).
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Persist mutations as framed log entries (`{name}.collection`).
    ///
    /// When false the collection falls back to rewriting a single
    /// `{name}.json` snapshot of every live record on each flush.
    pub use_index_file: bool,

    /// How long queued mutations may wait before the background flush.
    pub flush_interval: Duration,

    /// Maximum number of queued mutations written per timer tick
    /// (0 = unlimited).
    pub max_items_per_flush: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            use_index_file: true,
            flush_interval: Duration::from_millis(1000),
            max_items_per_flush: 0,
        }
    }
}

impl CollectionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether mutations are appended to a log file.
    #[must_use]
    pub const fn use_index_file(mut self, value: bool) -> Self {
        self.use_index_file = value;
        self
    }

    /// Sets the background flush interval.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the per-tick flush limit.
    #[must_use]
    pub const fn max_items_per_flush(mut self, max: usize) -> Self {
        self.max_items_per_flush = max;
        self
    }

    pub(crate) fn validate(&self) -> CoreResult<()> {
        if self.flush_interval.is_zero() {
            return Err(CoreError::invalid_config("flush interval must be positive"));
        }
        Ok(())
    }
}

/// Configuration for a [`ConnectionCache`](crate::ConnectionCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Idle time after which an unused engine is evicted and closed.
    pub idle_timeout: Duration,

    /// How often a background sweeper looks for idle entries.
    ///
    /// `None` disables the sweeper; expired entries are then only
    /// evicted when the cache is next accessed.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sliding idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets or disables the background sweep interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_collection_config() {
        let config = CollectionConfig::default();
        assert!(config.use_index_file);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.max_items_per_flush, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = CollectionConfig::new()
            .use_index_file(false)
            .flush_interval(Duration::from_millis(50))
            .max_items_per_flush(10);

        assert!(!config.use_index_file);
        assert_eq!(config.flush_interval, Duration::from_millis(50));
        assert_eq!(config.max_items_per_flush, 10);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = CollectionConfig::new().flush_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn default_cache_config() {
        let config = CacheConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert!(config.sweep_interval.is_some());

        let config = config.sweep_interval(None);
        assert!(config.sweep_interval.is_none());
    }
}
