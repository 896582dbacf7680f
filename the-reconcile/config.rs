use std::time::Duration;

use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;

pub const DEFAULT_DEBOUNCE_MS: u64 = 250;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse reconciler config: {0}")]
  Deserialize(#[from] toml::de::Error),
  #[error("event-capacity must be greater than zero")]
  ZeroEventCapacity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ReconcilerConfig {
  /// Quiescence period after the last edit before a pass starts.
  pub debounce_ms:    u64,
  /// When off, every pass re-parses the whole buffer.
  pub incremental:    bool,
  pub event_capacity: usize,
  /// Prefix of the worker thread name.
  pub worker_name:    String,
}

impl Default for ReconcilerConfig {
  fn default() -> Self {
    Self {
      debounce_ms:    DEFAULT_DEBOUNCE_MS,
      incremental:    true,
      event_capacity: DEFAULT_EVENT_CAPACITY,
      worker_name:    "reconciler".to_string(),
    }
  }
}

impl ReconcilerConfig {
  pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(source)?;
    if config.event_capacity == 0 {
      return Err(ConfigError::ZeroEventCapacity);
    }
    Ok(config)
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn with_debounce(mut self, debounce: Duration) -> Self {
    self.debounce_ms = debounce.as_millis() as u64;
    self
  }

  pub fn with_incremental(mut self, incremental: bool) -> Self {
    self.incremental = incremental;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_source_yields_defaults() {
    let config = ReconcilerConfig::from_toml("").unwrap();
    assert_eq!(config, ReconcilerConfig::default());
    assert_eq!(config.debounce(), Duration::from_millis(250));
  }

  #[test]
  fn kebab_case_keys_override_defaults() {
    let config = ReconcilerConfig::from_toml(
      r#"
        debounce-ms = 40
        incremental = false
        worker-name = "outline"
      "#,
    )
    .unwrap();
    assert_eq!(config.debounce_ms, 40);
    assert!(!config.incremental);
    assert_eq!(config.worker_name, "outline");
    assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
  }

  #[test]
  fn unknown_keys_are_rejected() {
    let err = ReconcilerConfig::from_toml("debounce = 10").unwrap_err();
    assert!(matches!(err, ConfigError::Deserialize(_)));
  }

  #[test]
  fn zero_event_capacity_is_rejected() {
    let err = ReconcilerConfig::from_toml("event-capacity = 0").unwrap_err();
    assert!(matches!(err, ConfigError::ZeroEventCapacity));
  }
}
