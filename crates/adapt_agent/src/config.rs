//! Configuration for the managed-side agent.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/adapt-agent/config.toml";

/// Operating mode of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Apply tactics pushed/polled from the managing system.
    CommandDriven,
    /// Run the local MAPE cycle on a timer; the managing system observes.
    Autonomous,
}

/// Pipeline domain the agent fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentDomain {
    Regression,
    Vision,
}

fn default_mode() -> AgentMode {
    AgentMode::CommandDriven
}

fn default_domain() -> AgentDomain {
    AgentDomain::Regression
}

fn default_knowledge_dir() -> String {
    "/var/lib/adapt-agent/knowledge".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:7851".to_string()
}

fn default_poll_interval() -> u64 {
    crate::actuation::DEFAULT_POLL_INTERVAL_SECS
}

fn default_cycle_interval() -> u64 {
    40
}

fn default_min_score() -> f64 {
    0.7
}

fn default_max_energy() -> f64 {
    0.8
}

fn default_allow_retrain() -> bool {
    true
}

fn default_policy_id() -> String {
    "default".to_string()
}

fn default_instance_id() -> String {
    "instance-0".to_string()
}

/// Full agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_mode")]
    pub mode: AgentMode,

    #[serde(default = "default_domain")]
    pub domain: AgentDomain,

    /// Directory holding the model/command/metrics knowledge files
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,

    /// Tactic receiver bind address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Command-file poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Autonomous cycle interval in seconds
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Score floor for the local analyze step
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Energy ceiling for the local analyze step
    #[serde(default = "default_max_energy")]
    pub max_energy: f64,

    /// Whether this deployment can run retraining jobs
    #[serde(default = "default_allow_retrain")]
    pub allow_retrain: bool,

    /// Managing system base URL for telemetry reporting, if any
    #[serde(default)]
    pub managing_url: Option<String>,

    #[serde(default = "default_policy_id")]
    pub policy_id: String,

    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults must deserialize")
    }
}

impl AgentConfig {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH).unwrap_or_else(|e| {
            warn!("Config not found, using defaults: {}", e);
            AgentConfig::default()
        })
    }

    pub fn load_from_path(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        info!("Loaded config from {}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.mode, AgentMode::CommandDriven);
        assert_eq!(config.domain, AgentDomain::Regression);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.cycle_interval_secs, 40);
        assert!(config.allow_retrain);
        assert!(config.managing_url.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
mode = "autonomous"
domain = "vision"
cycle_interval_secs = 10
managing_url = "http://127.0.0.1:7850"
instance_id = "cam-3"
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mode, AgentMode::Autonomous);
        assert_eq!(config.domain, AgentDomain::Vision);
        assert_eq!(config.cycle_interval_secs, 10);
        assert_eq!(config.instance_id, "cam-3");
        // Defaults for missing fields
        assert_eq!(config.min_score, 0.7);
    }
}
