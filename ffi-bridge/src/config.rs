//! Bridge configuration types
//!
//! This module defines the small set of knobs the bridge itself needs. Anything
//! scenario specific (fixture values, expectations) lives in the application.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Bridge`](crate::Bridge)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Upper bound used by `PendingCall::wait_default` (default: 5000ms)
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_ms: u64,

    /// Trace payload bytes of every delivery
    #[serde(default)]
    pub log_payloads: bool,

    /// Release registrations a synchronous call left unfired
    #[serde(default = "default_true")]
    pub release_unfired_sync: bool,
}

fn default_callback_timeout() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            callback_timeout_ms: default_callback_timeout(),
            log_payloads: false,
            release_unfired_sync: default_true(),
        }
    }
}

impl BridgeConfig {
    /// Create a new bridge configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the default callback timeout
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder method: enable payload tracing
    pub fn with_payload_logging(mut self, enabled: bool) -> Self {
        self.log_payloads = enabled;
        self
    }

    /// Builder method: keep or release unfired synchronous registrations
    pub fn with_release_unfired_sync(mut self, enabled: bool) -> Self {
        self.release_unfired_sync = enabled;
        self
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_config_builder() {
        let config = BridgeConfig::new()
            .with_callback_timeout(Duration::from_millis(250))
            .with_payload_logging(true)
            .with_release_unfired_sync(false);

        assert_eq!(config.callback_timeout_ms, 250);
        assert_eq!(config.callback_timeout(), Duration::from_millis(250));
        assert!(config.log_payloads);
        assert!(!config.release_unfired_sync);
    }

    #[test]
    fn test_defaults_match_serde_defaults() {
        let parsed: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, BridgeConfig::default());
        assert_eq!(parsed.callback_timeout_ms, 5000);
        assert!(parsed.release_unfired_sync);
    }

    #[test]
    fn test_partial_override() {
        let parsed: BridgeConfig = serde_json::from_str(r#"{"log_payloads": true}"#).unwrap();
        assert!(parsed.log_payloads);
        assert_eq!(parsed.callback_timeout_ms, 5000);
    }
}
