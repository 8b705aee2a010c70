//! Configuration management for adaptd.
//!
//! Loads settings from /etc/adaptd/config.toml or uses defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/adaptd/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/adaptd/config.toml";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the telemetry/policy surface
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    // Trusted local network only
    "127.0.0.1:7850".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Dispatch retry/backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-attempt delivery timeout in milliseconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,

    /// Maximum delivery attempts per event
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wall-clock budget for the whole retry loop in milliseconds
    #[serde(default = "default_retry_budget")]
    pub retry_budget_ms: u64,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_attempt_timeout() -> u64 {
    3_000
}

fn default_max_attempts() -> u32 {
    4
}

fn default_retry_budget() -> u64 {
    20_000
}

fn default_initial_backoff() -> u64 {
    250
}

fn default_max_backoff() -> u64 {
    4_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout(),
            max_attempts: default_max_attempts(),
            retry_budget_ms: default_retry_budget(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Knowledge storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Directory for the audit log, export streams, and version registry
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Telemetry samples retained in memory per (policy, instance)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Adaptation events retained in memory
    #[serde(default = "default_event_limit")]
    pub event_limit: usize,
}

fn default_data_dir() -> String {
    "/var/lib/adaptd".to_string()
}

fn default_history_limit() -> usize {
    500
}

fn default_event_limit() -> usize {
    1_000
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_limit: default_history_limit(),
            event_limit: default_event_limit(),
        }
    }
}

/// Planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Fixed RNG seed for reproducible exploration; absent means seeded
    /// from entropy at startup.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { rng_seed: None }
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub planner: PlannerConfig,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path);
        Ok(config)
    }

    /// Save default config to path (for init)
    #[allow(dead_code)]
    pub fn save_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)?;
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:7850");
        assert_eq!(config.dispatch.max_attempts, 4);
        assert_eq!(config.knowledge.history_limit, 500);
        assert!(config.planner.rng_seed.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[server]
listen_addr = "0.0.0.0:9850"

[dispatch]
attempt_timeout_ms = 1000
max_attempts = 2

[planner]
rng_seed = 42
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9850");
        assert_eq!(config.dispatch.attempt_timeout_ms, 1000);
        assert_eq!(config.dispatch.max_attempts, 2);
        // Defaults for missing fields
        assert_eq!(config.dispatch.retry_budget_ms, 20_000);
        assert_eq!(config.planner.rng_seed, Some(42));
    }

    #[test]
    fn test_empty_sections_fall_back_safely() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.dispatch.initial_backoff_ms, 250);
        assert_eq!(config.knowledge.event_limit, 1_000);
    }
}
