// Guard configuration: validated settings for detection, mitigation and relaying
//
// All delay values are expressed in seconds (f64) so the recognised option
// names map one-to-one onto the persisted JSON keys.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Finite, non-negative and small enough to become a `Duration`
fn is_delay(secs: f64) -> bool {
    secs >= 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}

/// Sliding-window classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Number of inter-packet delays scored per verdict
    pub window_size: usize,
    /// Verdict is positive when the combined score strictly exceeds this
    pub detection_threshold: f64,
    /// IPD history retained, as a multiple of `window_size`
    pub history_length: usize,
    /// Baseline samples collected before the baseline freezes
    pub baseline_capacity: usize,
    /// Only delays below this cutoff (seconds) are offered to the baseline
    pub baseline_cutoff_secs: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 30,
            detection_threshold: 0.65,
            history_length: 3,
            baseline_capacity: 100,
            baseline_cutoff_secs: 0.2,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(invalid("window_size must be greater than 0"));
        }
        if self.history_length == 0 {
            return Err(invalid("history_length must be greater than 0"));
        }
        if self.baseline_capacity == 0 {
            return Err(invalid("baseline_capacity must be greater than 0"));
        }
        if !self.detection_threshold.is_finite()
            || self.detection_threshold <= 0.0
            || self.detection_threshold >= 1.0
        {
            return Err(invalid("detection_threshold must lie strictly between 0 and 1"));
        }
        if !self.baseline_cutoff_secs.is_finite() || self.baseline_cutoff_secs <= 0.0 {
            return Err(invalid("baseline_cutoff_secs must be a positive number"));
        }
        Ok(())
    }

    /// Capacity of the IPD history ring
    pub fn history_capacity(&self) -> usize {
        self.window_size.saturating_mul(self.history_length)
    }

    /// Capacity of the raw timestamp ring
    pub fn timestamp_capacity(&self) -> usize {
        self.window_size.saturating_mul(2)
    }
}

/// Bounds and length of a mitigation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MitigationConfig {
    /// Lower bound of the injected delay (seconds)
    pub min_delay: f64,
    /// Upper bound of the injected delay (seconds)
    pub max_delay: f64,
    /// Packets perturbed after a session is armed
    pub session_length: u32,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            min_delay: 0.9,
            max_delay: 1.2,
            session_length: 10,
        }
    }
}

impl MitigationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_delay(self.min_delay) {
            return Err(invalid("min_delay must be a non-negative number of seconds in range"));
        }
        if !is_delay(self.max_delay) {
            return Err(invalid("max_delay must be a non-negative number of seconds in range"));
        }
        if self.min_delay > self.max_delay {
            return Err(invalid("min_delay must not exceed max_delay"));
        }
        if self.session_length == 0 {
            return Err(invalid("session_length must be greater than 0"));
        }
        Ok(())
    }
}

/// Ordinary per-packet processing jitter applied while no session is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundDelayConfig {
    /// Mean of the exponential delay (seconds); zero disables it
    pub mean_value: f64,
}

impl Default for BackgroundDelayConfig {
    fn default() -> Self {
        Self { mean_value: 5e-6 }
    }
}

impl BackgroundDelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_delay(self.mean_value) {
            return Err(invalid("mean_value must be a non-negative number of seconds in range"));
        }
        Ok(())
    }
}

/// Bounded exponential retry used when binding transport sockets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be greater than 0"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("backoff_multiplier must be at least 1.0"));
        }
        Ok(())
    }

    /// Delay to wait after the given (0-indexed) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms as u64).min(Duration::from_millis(self.max_delay_ms))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

/// Relay-level limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Flows tracked individually; extra flows share a per-channel overflow flow
    pub max_flows: usize,
    /// Events buffered per flow worker
    pub flow_queue_depth: usize,
    /// Consecutive publish failures tolerated on one flow before giving up
    pub max_consecutive_send_failures: u32,
    /// Socket bind retry policy
    pub bind_retry: RetryPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_flows: 1024,
            flow_queue_depth: 1024,
            max_consecutive_send_failures: 5,
            bind_retry: RetryPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_flows == 0 {
            return Err(invalid("max_flows must be greater than 0"));
        }
        if self.flow_queue_depth == 0 {
            return Err(invalid("flow_queue_depth must be greater than 0"));
        }
        self.bind_retry.validate()
    }
}

/// Complete guard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub detector: DetectorConfig,
    pub mitigation: MitigationConfig,
    pub background: BackgroundDelayConfig,
    pub relay: RelayConfig,
}

impl GuardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.mitigation.validate()?;
        self.background.validate()?;
        self.relay.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.window_size, 30);
        assert_eq!(config.mitigation.session_length, 10);
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = DetectorConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delays_too_large_for_duration_rejected() {
        let huge = MitigationConfig {
            min_delay: 1e20,
            max_delay: 1e20,
            session_length: 10,
        };
        assert!(huge.validate().is_err());

        let wide = MitigationConfig {
            max_delay: f64::MAX,
            ..Default::default()
        };
        assert!(wide.validate().is_err());

        assert!(BackgroundDelayConfig { mean_value: 1e30 }.validate().is_err());
        assert!(BackgroundDelayConfig { mean_value: f64::INFINITY }.validate().is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        for threshold in [0.0, 1.0, -0.2, f64::NAN] {
            let config = DetectorConfig {
                detection_threshold: threshold,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "threshold {threshold} accepted");
        }
    }

    #[test]
    fn test_inverted_mitigation_bounds_rejected() {
        let config = MitigationConfig {
            min_delay: 1.5,
            max_delay: 1.0,
            session_length: 10,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid(
                "min_delay must not exceed max_delay".to_string()
            ))
        );
    }

    #[test]
    fn test_equal_mitigation_bounds_accepted() {
        let config = MitigationConfig {
            min_delay: 1.0,
            max_delay: 1.0,
            session_length: 1,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_mean_rejected() {
        let config = BackgroundDelayConfig { mean_value: -1.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert!(policy.delay_for(1) > policy.delay_for(0));
        assert_eq!(policy.delay_for(20), Duration::from_millis(5_000));
        assert!(policy.should_retry(0));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GuardConfig =
            serde_json::from_str(r#"{"detector":{"window_size":50}}"#).unwrap();
        assert_eq!(config.detector.window_size, 50);
        assert_eq!(config.detector.detection_threshold, 0.65);
        assert_eq!(config.mitigation, MitigationConfig::default());
    }
}
