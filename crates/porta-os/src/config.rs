use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use porta::CoreConfig;

use crate::error::Result;

const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval between two scheduler ticks, in milliseconds.
    pub tick_interval_ms: u64,
    /// File where port configurations and persisted values are saved.
    ///
    /// Nothing is saved when missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
    /// Capacity of the notification channel.
    pub event_buffer: usize,
    /// Scheduler configuration.
    pub core: CoreConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            state_path: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            core: CoreConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Sets the tick interval.
    #[must_use]
    pub const fn tick_interval(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }

    /// Sets the state file.
    #[must_use]
    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Loads a [`RuntimeConfig`] from a `JSON` file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a valid configuration.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::RuntimeConfig;

    #[test]
    fn defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "state_path": "/var/lib/porta/state.json" }"#).unwrap();
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.core.persist_interval_ms, 5000);
        assert_eq!(
            config.state_path.as_deref(),
            Some(std::path::Path::new("/var/lib/porta/state.json"))
        );
    }

    #[test]
    fn nested_core_config() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{ "tick_interval_ms": 50, "core": { "persist_interval_ms": 1000 } }"#,
        )
        .unwrap();
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.core.persist_interval_ms, 1000);
        assert_eq!(config.state_path, None);
    }
}
