//! Adaptation policies: thresholds, tactic catalogs, and tuning knobs.
//!
//! A policy declares what "violation" means for the metrics the managed
//! system is contracted to report, and which remediation tactics the
//! planner may choose from for each violation class. Policies are
//! read-only to the loop during one analysis cycle; replacing a policy
//! resets the analysis state derived from it.

use crate::error::AdaptError;
use crate::state::Classification;
use serde::{Deserialize, Serialize};

/// Metrics the managed system is contracted to report. Threshold
/// definitions may only reference these names.
pub const CONTRACTED_METRICS: &[&str] = &["score", "normalized_energy"];

/// How a threshold bound is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    /// Compare against the fixed bound.
    Static,
    /// Compare against a running EMA baseline with a relative margin.
    Dynamic,
}

/// Which side of the bound counts as a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Values above the bound are violations (e.g. energy).
    Above,
    /// Values below the bound are violations (e.g. score).
    Below,
}

/// One thresholded metric within a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    pub metric: String,
    pub kind: ThresholdKind,
    pub bound: f64,
    pub direction: Direction,
}

impl MetricThreshold {
    /// True when `value` breaches the fixed bound.
    pub fn breached_by(&self, value: f64) -> bool {
        match self.direction {
            Direction::Above => value > self.bound,
            Direction::Below => value < self.bound,
        }
    }
}

/// Kind of remediation a tactic performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TacticKind {
    Switch,
    Retrain,
}

/// A candidate tactic in the catalog.
///
/// `expected_score` and `energy_cost` are the candidate's static profile,
/// used by the planner to keep only candidates that satisfy the violated
/// constraint's opposite bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticSpec {
    pub tactic_id: String,
    pub kind: TacticKind,
    /// Target model for a switch; ignored for retrain.
    #[serde(default)]
    pub target: Option<String>,
    /// Delivery endpoint on the managed side.
    pub endpoint: String,
    #[serde(default)]
    pub expected_score: Option<f64>,
    #[serde(default)]
    pub energy_cost: Option<f64>,
}

/// The concrete remediation chosen by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tactic {
    pub kind: TacticKind,
    pub target: Option<String>,
    pub endpoint: String,
}

impl Tactic {
    pub fn from_spec(spec: &TacticSpec) -> Self {
        Self {
            kind: spec.kind,
            target: spec.target.clone(),
            endpoint: spec.endpoint.clone(),
        }
    }
}

/// Candidate tactics per violation class. Order within each list is the
/// deterministic tie-break.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TacticCatalog {
    #[serde(default)]
    pub score_violation: Vec<TacticSpec>,
    #[serde(default)]
    pub energy_violation: Vec<TacticSpec>,
    #[serde(default)]
    pub drift_violation: Vec<TacticSpec>,
}

impl TacticCatalog {
    /// Candidates registered for a violation class.
    pub fn candidates_for(&self, classification: Classification) -> &[TacticSpec] {
        match classification {
            Classification::ScoreViolation => &self.score_violation,
            Classification::EnergyViolation => &self.energy_violation,
            Classification::DriftViolation => &self.drift_violation,
            Classification::Healthy => &[],
        }
    }
}

fn default_consecutive_violations() -> u32 {
    3
}

fn default_cooldown_cycles() -> u32 {
    3
}

fn default_p_explore() -> f64 {
    0.1
}

fn default_ema_alpha() -> f64 {
    0.3
}

fn default_recovery_window() -> u32 {
    10
}

fn default_dynamic_margin() -> f64 {
    0.2
}

fn default_dynamic_window() -> u32 {
    50
}

/// A registered adaptation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,

    /// Ordered threshold set; declaration order decides classification
    /// precedence among breached thresholds.
    pub thresholds: Vec<MetricThreshold>,

    #[serde(default)]
    pub tactics: TacticCatalog,

    /// Breaches must persist this many consecutive samples before any
    /// tactic is considered.
    #[serde(default = "default_consecutive_violations")]
    pub consecutive_violations_required: u32,

    /// Cycles after a delivered tactic during which dispatch is suppressed.
    #[serde(default = "default_cooldown_cycles")]
    pub cooldown_cycles_after_switch: u32,

    /// Probability of picking a random alternative instead of the best one.
    #[serde(default = "default_p_explore")]
    pub p_explore: f64,

    /// EMA weight for the currently active candidate's observed score.
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,

    /// KL divergence above which a sample classifies as drift.
    #[serde(default)]
    pub kl_threshold: Option<f64>,

    /// Samples a recovered instance must stay healthy before drift state
    /// is considered cleared.
    #[serde(default = "default_recovery_window")]
    pub recovery_window: u32,

    /// Relative deviation from the running baseline that a dynamic
    /// threshold tolerates.
    #[serde(default = "default_dynamic_margin")]
    pub dynamic_margin: f64,

    /// Number of samples the dynamic baseline averages over.
    #[serde(default = "default_dynamic_window")]
    pub dynamic_window: u32,
}

impl Policy {
    /// Validate a policy at registration time.
    ///
    /// Thresholds may only reference contracted metrics, and the tuning
    /// parameters must be sane probabilities/weights.
    pub fn validate(&self) -> Result<(), AdaptError> {
        if self.policy_id.trim().is_empty() {
            return Err(AdaptError::InvalidPolicy("empty policy_id".to_string()));
        }
        for threshold in &self.thresholds {
            if !CONTRACTED_METRICS.contains(&threshold.metric.as_str()) {
                return Err(AdaptError::InvalidPolicy(format!(
                    "unknown metric '{}' in thresholds",
                    threshold.metric
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.p_explore) {
            return Err(AdaptError::InvalidPolicy(format!(
                "p_explore out of range: {}",
                self.p_explore
            )));
        }
        if !(0.0..=1.0).contains(&self.ema_alpha) {
            return Err(AdaptError::InvalidPolicy(format!(
                "ema_alpha out of range: {}",
                self.ema_alpha
            )));
        }
        if let Some(kl) = self.kl_threshold {
            if kl < 0.0 {
                return Err(AdaptError::InvalidPolicy(format!(
                    "kl_threshold must be non-negative, got {}",
                    kl
                )));
            }
        }
        if self.dynamic_margin <= 0.0 {
            return Err(AdaptError::InvalidPolicy(format!(
                "dynamic_margin must be positive, got {}",
                self.dynamic_margin
            )));
        }
        Ok(())
    }

    /// Threshold definition for a metric, if the policy declares one.
    pub fn threshold_for(&self, metric: &str) -> Option<&MetricThreshold> {
        self.thresholds.iter().find(|t| t.metric == metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_policy() -> Policy {
        serde_json::from_value(serde_json::json!({
            "policy_id": "p1",
            "thresholds": [
                {"metric": "score", "kind": "static", "bound": 0.7, "direction": "below"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_applied_on_deserialize() {
        let policy = minimal_policy();
        assert_eq!(policy.consecutive_violations_required, 3);
        assert_eq!(policy.cooldown_cycles_after_switch, 3);
        assert_eq!(policy.p_explore, 0.1);
        assert_eq!(policy.ema_alpha, 0.3);
        assert_eq!(policy.dynamic_window, 50);
        assert!(policy.kl_threshold.is_none());
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let mut policy = minimal_policy();
        policy.thresholds.push(MetricThreshold {
            metric: "latency_p99".to_string(),
            kind: ThresholdKind::Static,
            bound: 1.0,
            direction: Direction::Above,
        });
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("latency_p99"));
    }

    #[test]
    fn test_out_of_range_tuning_rejected() {
        let mut policy = minimal_policy();
        policy.p_explore = 1.5;
        assert!(policy.validate().is_err());

        let mut policy = minimal_policy();
        policy.ema_alpha = -0.1;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_breach_directions() {
        let below = MetricThreshold {
            metric: "score".to_string(),
            kind: ThresholdKind::Static,
            bound: 0.7,
            direction: Direction::Below,
        };
        assert!(below.breached_by(0.6));
        assert!(!below.breached_by(0.7));
        assert!(!below.breached_by(0.9));

        let above = MetricThreshold {
            metric: "normalized_energy".to_string(),
            kind: ThresholdKind::Static,
            bound: 0.8,
            direction: Direction::Above,
        };
        assert!(above.breached_by(0.85));
        assert!(!above.breached_by(0.8));
    }

    #[test]
    fn test_catalog_lookup_by_classification() {
        let catalog = TacticCatalog {
            score_violation: vec![TacticSpec {
                tactic_id: "switch-up".to_string(),
                kind: TacticKind::Switch,
                target: Some("yolo_m".to_string()),
                endpoint: "http://localhost:9000/v1/tactic".to_string(),
                expected_score: Some(0.9),
                energy_cost: Some(0.7),
            }],
            ..Default::default()
        };
        assert_eq!(
            catalog.candidates_for(Classification::ScoreViolation).len(),
            1
        );
        assert!(catalog
            .candidates_for(Classification::EnergyViolation)
            .is_empty());
        assert!(catalog.candidates_for(Classification::Healthy).is_empty());
    }
}
