//! Per-(policy, instance) analysis state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of analyzing one telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Healthy,
    ScoreViolation,
    EnergyViolation,
    DriftViolation,
}

impl Classification {
    pub fn is_violation(self) -> bool {
        self != Classification::Healthy
    }
}

/// Running EMA baseline for one metric, used by dynamic thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBaseline {
    pub ema: f64,
    pub samples_seen: u32,
}

impl MetricBaseline {
    /// Fold a new observation into the baseline using the window-derived
    /// smoothing factor `2 / (window + 1)`.
    pub fn observe(&mut self, value: f64, window: u32) {
        if self.samples_seen == 0 {
            self.ema = value;
        } else {
            let alpha = 2.0 / (f64::from(window) + 1.0);
            self.ema = alpha * value + (1.0 - alpha) * self.ema;
        }
        self.samples_seen = self.samples_seen.saturating_add(1);
    }
}

impl Default for MetricBaseline {
    fn default() -> Self {
        Self {
            ema: 0.0,
            samples_seen: 0,
        }
    }
}

/// Totals surfaced in the knowledge view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounters {
    pub model_switches: u64,
    pub retrains: u64,
    pub dispatch_failures: u64,
}

/// Mutable state the loop keeps per (policy_id, instance_id).
///
/// Only ever read and written under that key's serialization lock; a cycle
/// either fully commits a new state or leaves the old one untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisState {
    pub consecutive_violation_count: u32,
    pub last_classification: Classification,
    /// EMA of observed score per candidate model. Only the currently
    /// active model is updated each cycle.
    pub ema_scores: BTreeMap<String, f64>,
    /// Remaining cooldown cycles during which dispatch is suppressed.
    pub recovery_cycles_remaining: u32,
    /// Dynamic-threshold baselines keyed by metric name.
    pub baselines: BTreeMap<String, MetricBaseline>,
    /// Timestamp of the newest accepted sample, for ordering checks.
    pub last_timestamp: Option<i64>,
    pub counters: EventCounters,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self {
            consecutive_violation_count: 0,
            last_classification: Classification::Healthy,
            ema_scores: BTreeMap::new(),
            recovery_cycles_remaining: 0,
            baselines: BTreeMap::new(),
            last_timestamp: None,
            counters: EventCounters::default(),
        }
    }
}

impl AnalysisState {
    /// EMA update for the active model: `alpha*observed + (1-alpha)*prev`.
    /// A model seen for the first time starts at its observed score.
    pub fn update_ema(&mut self, model: &str, observed_score: f64, alpha: f64) {
        let entry = self.ema_scores.entry(model.to_string());
        match entry {
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                let prev = *slot.get();
                slot.insert(alpha * observed_score + (1.0 - alpha) * prev);
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(observed_score);
            }
        }
    }
}
