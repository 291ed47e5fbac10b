// Configuration management for the ctguard CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/ctguard/config.json
// - Linux: ~/.config/ctguard/config.json
// - Windows: %APPDATA%\ctguard\config.json

use anyhow::{Context, Result};
use ctguard_core::{GuardConfig, UdpEndpoints};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Detector, mitigation and relay settings
    pub guard: GuardConfig,

    /// UDP addresses for both relay sides
    pub udp: UdpEndpoints,
}

/// Keys accepted by `config get` / `config set`
pub const KEYS: &[&str] = &[
    "window_size",
    "detection_threshold",
    "history_length",
    "baseline_capacity",
    "baseline_cutoff_secs",
    "min_delay",
    "max_delay",
    "session_length",
    "mean_value",
    "max_flows",
    "flow_queue_depth",
    "max_consecutive_send_failures",
    "bind_max_attempts",
    "insecure_listen",
    "secure_listen",
    "insecure_peer",
    "secure_peer",
];

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("ctguard");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it on first use
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    /// Overwrite the default config file with defaults without reading it
    pub fn reset() -> Result<Self> {
        Self::reset_to(&Self::config_file()?)
    }

    pub fn reset_to(path: &Path) -> Result<Self> {
        let config = Config::default();
        config.save_to(path)?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config
            .guard
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Set a config value. The change is rejected if the result would not
    /// validate, leaving `self` untouched.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        let guard = &mut next.guard;
        match key {
            "window_size" => guard.detector.window_size = parse(key, value)?,
            "detection_threshold" => guard.detector.detection_threshold = parse(key, value)?,
            "history_length" => guard.detector.history_length = parse(key, value)?,
            "baseline_capacity" => guard.detector.baseline_capacity = parse(key, value)?,
            "baseline_cutoff_secs" => guard.detector.baseline_cutoff_secs = parse(key, value)?,
            "min_delay" => guard.mitigation.min_delay = parse(key, value)?,
            "max_delay" => guard.mitigation.max_delay = parse(key, value)?,
            "session_length" => guard.mitigation.session_length = parse(key, value)?,
            "mean_value" => guard.background.mean_value = parse(key, value)?,
            "max_flows" => guard.relay.max_flows = parse(key, value)?,
            "flow_queue_depth" => guard.relay.flow_queue_depth = parse(key, value)?,
            "max_consecutive_send_failures" => {
                guard.relay.max_consecutive_send_failures = parse(key, value)?
            }
            "bind_max_attempts" => guard.relay.bind_retry.max_attempts = parse(key, value)?,
            "insecure_listen" => next.udp.insecure_listen = parse_addr(key, value)?,
            "secure_listen" => next.udp.secure_listen = parse_addr(key, value)?,
            "insecure_peer" => next.udp.insecure_peer = parse_addr(key, value)?,
            "secure_peer" => next.udp.secure_peer = parse_addr(key, value)?,
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        next.guard.validate()?;
        *self = next;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        let guard = &self.guard;
        let value = match key {
            "window_size" => guard.detector.window_size.to_string(),
            "detection_threshold" => guard.detector.detection_threshold.to_string(),
            "history_length" => guard.detector.history_length.to_string(),
            "baseline_capacity" => guard.detector.baseline_capacity.to_string(),
            "baseline_cutoff_secs" => guard.detector.baseline_cutoff_secs.to_string(),
            "min_delay" => guard.mitigation.min_delay.to_string(),
            "max_delay" => guard.mitigation.max_delay.to_string(),
            "session_length" => guard.mitigation.session_length.to_string(),
            "mean_value" => guard.background.mean_value.to_string(),
            "max_flows" => guard.relay.max_flows.to_string(),
            "flow_queue_depth" => guard.relay.flow_queue_depth.to_string(),
            "max_consecutive_send_failures" => guard.relay.max_consecutive_send_failures.to_string(),
            "bind_max_attempts" => guard.relay.bind_retry.max_attempts.to_string(),
            "insecure_listen" => self.udp.insecure_listen.to_string(),
            "secure_listen" => self.udp.secure_listen.to_string(),
            "insecure_peer" => self.udp.insecure_peer.to_string(),
            "secure_peer" => self.udp.secure_peer.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        KEYS.iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr> {
    parse(key, value)
}
