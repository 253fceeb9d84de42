/*!
 * Execution Configuration
 *
 * Worker pool sizing and naming for batch execution
 */

use crate::core::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Environment override for the overflow thread allowance
pub const ENV_OVERFLOW: &str = "GATHERKIT_OVERFLOW";
/// Environment override for worker thread names
pub const ENV_THREAD_PREFIX: &str = "GATHERKIT_THREAD_PREFIX";

const DEFAULT_OVERFLOW: usize = 1;
const DEFAULT_PREFIX: &str = "gatherkit-worker";

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Core threads, started one per submitted job up to this count
    pub threads: usize,
    /// Extra threads spawned lazily when every core thread is busy
    pub overflow: usize,
    /// Worker names are `{prefix}-{index}`
    pub thread_name_prefix: String,
}

impl PoolConfig {
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            overflow: DEFAULT_OVERFLOW,
            thread_name_prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Upper bound on live worker threads
    #[inline]
    pub fn max_threads(&self) -> usize {
        self.threads.saturating_add(self.overflow)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.threads == 0 {
            return Err(SyncError::invalid_argument(format!(
                "Invalid thread count: {}",
                self.threads
            )));
        }
        Ok(())
    }
}

/// Batch-level settings for [`ScatterGather`](crate::exec::ScatterGather)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatherConfig {
    pub overflow: usize,
    pub thread_name_prefix: String,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            overflow: DEFAULT_OVERFLOW,
            thread_name_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl GatherConfig {
    /// Defaults with environment overrides applied
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(ENV_OVERFLOW) {
            match raw.trim().parse() {
                Ok(overflow) => config.overflow = overflow,
                Err(e) => tracing::warn!(
                    var = ENV_OVERFLOW,
                    value = %raw,
                    error = %e,
                    "ignoring invalid override"
                ),
            }
        }

        if let Ok(prefix) = std::env::var(ENV_THREAD_PREFIX) {
            if !prefix.trim().is_empty() {
                config.thread_name_prefix = prefix;
            }
        }

        config
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SyncError::invalid_argument(format!("Invalid gather config: {}", e)))
    }

    /// Pool configuration for one batch with `threads` core workers
    pub fn pool_config(&self, threads: usize) -> PoolConfig {
        PoolConfig {
            threads,
            overflow: self.overflow,
            thread_name_prefix: self.thread_name_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_pool_config_validate() {
        assert!(PoolConfig::new(0).validate().is_err());
        let config = PoolConfig::new(4);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_threads(), 5);
    }

    #[test]
    fn test_from_json_partial() {
        let config = GatherConfig::from_json(r#"{"overflow": 3}"#).unwrap();
        assert_eq!(config.overflow, 3);
        assert_eq!(config.thread_name_prefix, DEFAULT_PREFIX);

        assert!(GatherConfig::from_json("{not json").is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(ENV_OVERFLOW, "2");
        std::env::set_var(ENV_THREAD_PREFIX, "batch");
        let config = GatherConfig::from_env();
        std::env::remove_var(ENV_OVERFLOW);
        std::env::remove_var(ENV_THREAD_PREFIX);

        assert_eq!(config.overflow, 2);
        assert_eq!(config.pool_config(8).thread_name_prefix, "batch");
        assert_eq!(config.pool_config(8).max_threads(), 10);
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        std::env::set_var(ENV_OVERFLOW, "lots");
        let config = GatherConfig::from_env();
        std::env::remove_var(ENV_OVERFLOW);
        assert_eq!(config.overflow, DEFAULT_OVERFLOW);
    }
}
