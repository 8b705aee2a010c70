//! Planner - selects a concrete tactic for an actionable violation.
//!
//! Score/energy violations pick from the policy's candidate catalog with
//! an exploration/exploitation split over per-candidate EMA scores. Drift
//! violations consult the version registry for a stored model version
//! whose data-distribution signature is closest to the current one; when
//! nothing is close enough the tactic is a retrain.
//!
//! The planner is a pure function of its inputs given a seeded RNG.

use adapt_common::{
    AnalysisState, Classification, Direction, Policy, Tactic, TacticKind, TacticSpec,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// EMA score assumed for a candidate that has never been observed.
const UNSEEN_EMA: f64 = 0.5;

/// KL divergence values are clamped to this ceiling.
const KL_CLAMP: f64 = 10.0;

/// A stored model version and its training-data distribution signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSignature {
    pub version_id: String,
    /// Density histogram of the version's training data.
    pub histogram: Vec<f64>,
}

/// External collaborator holding trained model versions and the current
/// input-distribution signature per instance.
pub trait VersionRegistry: Send + Sync {
    fn version_signatures(&self, model: &str) -> Vec<VersionSignature>;
    fn current_signature(&self, policy_id: &str, instance_id: &str) -> Option<Vec<f64>>;
}

/// KL divergence between two histograms, with epsilon smoothing so empty
/// bins do not blow up, clamped to `[0, KL_CLAMP]`.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    if p.is_empty() || p.len() != q.len() {
        return KL_CLAMP;
    }
    const EPS: f64 = 1e-10;
    let p_sum: f64 = p.iter().sum::<f64>() + EPS * p.len() as f64;
    let q_sum: f64 = q.iter().sum::<f64>() + EPS * q.len() as f64;

    let mut divergence = 0.0;
    for (pi, qi) in p.iter().zip(q) {
        let pn = (pi + EPS) / p_sum;
        let qn = (qi + EPS) / q_sum;
        divergence += pn * (pn / qn).ln();
    }
    divergence.clamp(0.0, KL_CLAMP)
}

/// File-backed version registry: one directory per model, one
/// `signature.json` per version, and per-instance current signatures
/// under `current/`.
pub struct FileVersionRegistry {
    base_dir: PathBuf,
}

impl FileVersionRegistry {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn read_signature(path: &Path) -> Option<Vec<f64>> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl VersionRegistry for FileVersionRegistry {
    fn version_signatures(&self, model: &str) -> Vec<VersionSignature> {
        let model_dir = self.base_dir.join(model);
        let Ok(entries) = fs::read_dir(&model_dir) else {
            return vec![];
        };

        let mut versions: Vec<VersionSignature> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let version_id = entry.file_name().to_string_lossy().to_string();
                if !version_id.starts_with("version_") {
                    return None;
                }
                let histogram = Self::read_signature(&entry.path().join("signature.json"))?;
                Some(VersionSignature {
                    version_id,
                    histogram,
                })
            })
            .collect();
        versions.sort_by(|a, b| a.version_id.cmp(&b.version_id));
        versions
    }

    fn current_signature(&self, policy_id: &str, instance_id: &str) -> Option<Vec<f64>> {
        let path = self
            .base_dir
            .join("current")
            .join(format!("{}__{}.json", policy_id, instance_id));
        Self::read_signature(&path)
    }
}

/// Everything the planner needs for one decision.
pub struct PlanInput<'a> {
    pub policy: &'a Policy,
    pub state: &'a AnalysisState,
    pub classification: Classification,
    pub current_model: &'a str,
    pub policy_id: &'a str,
    pub instance_id: &'a str,
}

fn ema_of(state: &AnalysisState, spec: &TacticSpec) -> f64 {
    spec.target
        .as_deref()
        .and_then(|target| state.ema_scores.get(target).copied())
        .unwrap_or(UNSEEN_EMA)
}

/// True when a candidate's static profile satisfies the opposite bound of
/// the violated constraint.
fn satisfies_opposite_bound(policy: &Policy, class: Classification, spec: &TacticSpec) -> bool {
    let metric = match class {
        Classification::ScoreViolation => "score",
        Classification::EnergyViolation => "normalized_energy",
        _ => return true,
    };
    let Some(threshold) = policy.threshold_for(metric) else {
        return true;
    };
    match class {
        Classification::ScoreViolation => spec
            .expected_score
            .map(|s| match threshold.direction {
                Direction::Below => s >= threshold.bound,
                Direction::Above => s <= threshold.bound,
            })
            .unwrap_or(false),
        Classification::EnergyViolation => spec
            .energy_cost
            .map(|e| match threshold.direction {
                Direction::Above => e <= threshold.bound,
                Direction::Below => e >= threshold.bound,
            })
            .unwrap_or(false),
        _ => true,
    }
}

/// Candidates that would actually change something: switches away from the
/// current model, plus any retrain entries.
fn alternatives<'a>(candidates: &'a [TacticSpec], current_model: &str) -> Vec<&'a TacticSpec> {
    candidates
        .iter()
        .filter(|spec| match spec.kind {
            TacticKind::Switch => spec.target.as_deref() != Some(current_model),
            TacticKind::Retrain => true,
        })
        .collect()
}

/// Highest-EMA candidate; ties break by catalog order (strict greater-than
/// keeps the earliest maximum).
fn best_by_ema<'a>(state: &AnalysisState, candidates: &[&'a TacticSpec]) -> Option<&'a TacticSpec> {
    let mut best: Option<(&TacticSpec, f64)> = None;
    for spec in candidates {
        let ema = ema_of(state, spec);
        match best {
            Some((_, best_ema)) if ema <= best_ema => {}
            _ => best = Some((spec, ema)),
        }
    }
    best.map(|(spec, _)| spec)
}

/// Select a tactic for a score/energy violation.
fn plan_threshold_violation(input: &PlanInput<'_>, rng: &mut impl Rng) -> Option<Tactic> {
    let candidates = input.policy.tactics.candidates_for(input.classification);
    let alternatives = alternatives(candidates, input.current_model);
    if alternatives.is_empty() {
        warn!(
            "No alternative candidates for {:?} on policy '{}'",
            input.classification, input.policy_id
        );
        return None;
    }

    if rng.gen::<f64>() < input.policy.p_explore {
        let pick = alternatives[rng.gen_range(0..alternatives.len())];
        debug!(
            "Exploratory tactic '{}' for {}/{}",
            pick.tactic_id, input.policy_id, input.instance_id
        );
        return Some(Tactic::from_spec(pick));
    }

    let satisfying: Vec<&TacticSpec> = alternatives
        .iter()
        .copied()
        .filter(|spec| satisfies_opposite_bound(input.policy, input.classification, spec))
        .collect();

    // If no candidate profile satisfies the opposite bound, fall back to
    // the full alternative set rather than doing nothing.
    let pool = if satisfying.is_empty() {
        &alternatives
    } else {
        &satisfying
    };

    best_by_ema(input.state, pool).map(Tactic::from_spec)
}

/// Select a tactic for a drift violation: the stored version closest to
/// the current distribution, or a retrain when nothing is below the
/// policy's KL threshold.
fn plan_drift(input: &PlanInput<'_>, registry: &dyn VersionRegistry) -> Option<Tactic> {
    let candidates = input.policy.tactics.candidates_for(input.classification);
    let endpoint = candidates.first().map(|spec| spec.endpoint.clone())?;
    let kl_threshold = input.policy.kl_threshold.unwrap_or(f64::INFINITY);

    let best_version = registry
        .current_signature(input.policy_id, input.instance_id)
        .and_then(|current| {
            let mut best: Option<(String, f64)> = None;
            for version in registry.version_signatures(input.current_model) {
                let kl = kl_divergence(&current, &version.histogram);
                debug!(
                    "KL divergence for {}/{}: {:.4}",
                    input.current_model, version.version_id, kl
                );
                match &best {
                    Some((_, best_kl)) if kl >= *best_kl => {}
                    _ => best = Some((version.version_id, kl)),
                }
            }
            best
        })
        .filter(|(_, kl)| *kl < kl_threshold);

    match best_version {
        Some((version_id, kl)) => {
            debug!(
                "Version '{}' is below kl_threshold ({:.4}), switching",
                version_id, kl
            );
            Some(Tactic {
                kind: TacticKind::Switch,
                target: Some(version_id),
                endpoint,
            })
        }
        None => Some(Tactic {
            kind: TacticKind::Retrain,
            target: None,
            endpoint,
        }),
    }
}

/// Plan a tactic for an actionable classification.
pub fn plan(
    input: &PlanInput<'_>,
    registry: &dyn VersionRegistry,
    rng: &mut impl Rng,
) -> Option<Tactic> {
    match input.classification {
        Classification::Healthy => None,
        Classification::DriftViolation => plan_drift(input, registry),
        Classification::ScoreViolation | Classification::EnergyViolation => {
            plan_threshold_violation(input, rng)
        }
    }
}

/// Fallback after a rejected retrain: the best switch alternative by EMA,
/// no exploration.
pub fn fallback_switch(input: &PlanInput<'_>) -> Option<Tactic> {
    let candidates = input.policy.tactics.candidates_for(input.classification);
    let switches: Vec<&TacticSpec> = alternatives(candidates, input.current_model)
        .into_iter()
        .filter(|spec| spec.kind == TacticKind::Switch)
        .collect();
    best_by_ema(input.state, &switches).map(Tactic::from_spec)
}
