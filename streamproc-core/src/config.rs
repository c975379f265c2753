use std::{collections::HashMap, num::NonZeroUsize, time::Duration};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);
const MAX_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

const KEY_POOL_SIZE: &str = "async_pool_size";
const KEY_FLUSH_INTERVAL_MS: &str = "async_flush_interval_ms";
const KEY_MAX_EVENTS_PER_KEY: &str = "async_max_events_per_key";

/// Runtime configuration for one processor instance.
///
/// `async_pool_size = 0` disables asynchrony: the driver runs user
/// callbacks inline and finalizes them immediately, matching the
/// synchronous fallback described in the boundary properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads dedicated to this driver's pool.
    pub async_pool_size: usize,
    /// Interval of the periodic tick that drains queues when idle.
    pub async_flush_interval: Duration,
    /// Maximum number of events of the same key admitted before
    /// `process` starts blocking.
    pub async_max_events_per_key: NonZeroUsize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            async_pool_size: 0,
            async_flush_interval: DEFAULT_FLUSH_INTERVAL,
            async_max_events_per_key: NonZeroUsize::new(1).unwrap(),
        }
    }
}

impl RuntimeConfig {
    /// Builds a config from a host-supplied string map (the shape
    /// `app_configs`-style host APIs hand back), falling back to defaults
    /// for any key that is missing or fails to parse.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = map.get(KEY_POOL_SIZE) {
            match raw.parse::<usize>() {
                Ok(n) => config.async_pool_size = n,
                Err(_) => {
                    streamproc_log::warn!(
                        key = KEY_POOL_SIZE,
                        value = raw.as_str(),
                        "failed to parse config key, using default"
                    );
                }
            }
        }

        if let Some(raw) = map.get(KEY_FLUSH_INTERVAL_MS) {
            match raw.parse::<u64>() {
                Ok(ms) => config.async_flush_interval = clamp_interval(Duration::from_millis(ms)),
                Err(_) => {
                    streamproc_log::warn!(
                        key = KEY_FLUSH_INTERVAL_MS,
                        value = raw.as_str(),
                        "failed to parse config key, using default"
                    );
                }
            }
        }

        if let Some(raw) = map.get(KEY_MAX_EVENTS_PER_KEY) {
            match raw.parse::<usize>().ok().and_then(NonZeroUsize::new) {
                Some(n) => config.async_max_events_per_key = n,
                None => {
                    streamproc_log::warn!(
                        key = KEY_MAX_EVENTS_PER_KEY,
                        value = raw.as_str(),
                        "failed to parse config key, using default"
                    );
                }
            }
        }

        config
    }

    /// Whether the async pipeline should run at all for this instance.
    pub fn is_async_enabled(&self) -> bool {
        self.async_pool_size > 0
    }
}

fn clamp_interval(d: Duration) -> Duration {
    if d < MIN_FLUSH_INTERVAL {
        streamproc_log::warn!(?d, "async_flush_interval_ms below minimum, clamping");
        MIN_FLUSH_INTERVAL
    } else if d > MAX_FLUSH_INTERVAL {
        streamproc_log::warn!(?d, "async_flush_interval_ms above maximum, clamping");
        MAX_FLUSH_INTERVAL
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_async() {
        let config = RuntimeConfig::default();
        assert!(!config.is_async_enabled());
        assert_eq!(config.async_max_events_per_key.get(), 1);
    }

    #[test]
    fn parses_valid_map() {
        let mut map = HashMap::new();
        map.insert(KEY_POOL_SIZE.to_string(), "4".to_string());
        map.insert(KEY_FLUSH_INTERVAL_MS.to_string(), "25".to_string());
        map.insert(KEY_MAX_EVENTS_PER_KEY.to_string(), "3".to_string());

        let config = RuntimeConfig::from_map(&map);
        assert_eq!(config.async_pool_size, 4);
        assert_eq!(config.async_flush_interval, Duration::from_millis(25));
        assert_eq!(config.async_max_events_per_key.get(), 3);
    }

    #[test]
    fn clamps_out_of_range_interval() {
        let mut map = HashMap::new();
        map.insert(KEY_FLUSH_INTERVAL_MS.to_string(), "5000".to_string());
        let config = RuntimeConfig::from_map(&map);
        assert_eq!(config.async_flush_interval, MAX_FLUSH_INTERVAL);
    }

    #[test]
    fn falls_back_on_bad_value() {
        let mut map = HashMap::new();
        map.insert(KEY_POOL_SIZE.to_string(), "not-a-number".to_string());
        let config = RuntimeConfig::from_map(&map);
        assert_eq!(config.async_pool_size, RuntimeConfig::default().async_pool_size);
    }
}
