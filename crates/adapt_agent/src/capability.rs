//! MAPE capability interface for autonomous mode.
//!
//! A capability packages the four loop operations - monitor, analyze,
//! plan, execute - for one pipeline domain. Built-ins cover the
//! regression and vision pipelines; user-supplied implementations plug in
//! through the same trait.

use crate::actuation::ActuationSurface;
use adapt_common::atomic_file::write_atomic;
use adapt_common::{DeliveredTactic, TacticKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const METRICS_FILE: &str = "metrics.json";
const RETRAIN_REQUEST_FILE: &str = "retrain.requested";

/// Metrics the local pipeline publishes each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMetrics {
    pub score: f64,
    pub normalized_energy: f64,
    pub model_used: String,
    #[serde(default)]
    pub kl_div: Option<f64>,
}

/// The four loop operations, per domain.
#[async_trait]
pub trait MapeCapability: Send + Sync {
    fn domain(&self) -> &'static str;

    /// Models this capability can run, ordered by capacity (smallest
    /// first).
    fn models(&self) -> &[&'static str];

    /// Collect the current metrics from the local pipeline.
    async fn monitor(&self) -> Result<LocalMetrics>;

    /// Decide whether the metrics call for an adaptation.
    fn analyze(&self, metrics: &LocalMetrics) -> bool;

    /// Choose the replacement model, if a better one exists.
    fn plan(&self, metrics: &LocalMetrics) -> Option<String>;

    /// Apply a tactic locally.
    async fn execute(&self, tactic: &DeliveredTactic) -> Result<()>;
}

/// Shared behavior of the built-in capabilities: capacity-ordered model
/// ladders, a score floor, and an energy ceiling.
struct LadderCapability {
    surface: ActuationSurface,
    knowledge_dir: PathBuf,
    models: &'static [&'static str],
    min_score: f64,
    max_energy: f64,
}

impl LadderCapability {
    fn new(
        knowledge_dir: &Path,
        models: &'static [&'static str],
        min_score: f64,
        max_energy: f64,
    ) -> Self {
        Self {
            surface: ActuationSurface::new(knowledge_dir),
            knowledge_dir: knowledge_dir.to_path_buf(),
            models,
            min_score,
            max_energy,
        }
    }

    fn read_metrics(&self) -> Result<LocalMetrics> {
        let path = self.knowledge_dir.join(METRICS_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read metrics from {}", path.display()))?;
        let mut metrics: LocalMetrics =
            serde_json::from_str(&content).context("Failed to parse pipeline metrics")?;

        // The model file is authoritative for the active model.
        if let Some(active) = self.surface.read_active_model()? {
            metrics.model_used = active;
        }
        Ok(metrics)
    }

    fn needs_adaptation(&self, metrics: &LocalMetrics) -> bool {
        metrics.score < self.min_score || metrics.normalized_energy > self.max_energy
    }

    /// Step along the capacity ladder: down when burning too much energy,
    /// up when the score is too low. Energy wins when both are violated,
    /// since a hotter model would make the energy breach worse.
    fn next_model(&self, metrics: &LocalMetrics) -> Option<String> {
        let position = self
            .models
            .iter()
            .position(|m| *m == metrics.model_used)?;

        if metrics.normalized_energy > self.max_energy {
            position
                .checked_sub(1)
                .map(|down| self.models[down].to_string())
        } else if metrics.score < self.min_score {
            self.models.get(position + 1).map(|up| up.to_string())
        } else {
            None
        }
    }

    async fn apply(&self, tactic: &DeliveredTactic) -> Result<()> {
        match tactic.kind {
            TacticKind::Switch => {
                let target = tactic
                    .target
                    .as_deref()
                    .context("switch tactic without target")?;
                self.surface.write_active_model(target)?;
                info!("Capability switched active model to '{}'", target);
            }
            TacticKind::Retrain => {
                // Signal the training harness through its token file; the
                // retrain itself runs out of process.
                let request = self.knowledge_dir.join(RETRAIN_REQUEST_FILE);
                write_atomic(&request, &format!("{}\n", chrono::Utc::now().timestamp()))?;
                info!("Retrain requested via {}", request.display());
            }
        }
        Ok(())
    }
}

/// Regression pipeline: linear/svm/lstm over streaming sensor data.
pub struct RegressionCapability {
    inner: LadderCapability,
}

impl RegressionCapability {
    pub const MODELS: &'static [&'static str] = &["linear", "svm", "lstm"];

    pub fn new(knowledge_dir: &Path, min_score: f64, max_energy: f64) -> Self {
        Self {
            inner: LadderCapability::new(knowledge_dir, Self::MODELS, min_score, max_energy),
        }
    }
}

#[async_trait]
impl MapeCapability for RegressionCapability {
    fn domain(&self) -> &'static str {
        "regression"
    }

    fn models(&self) -> &[&'static str] {
        Self::MODELS
    }

    async fn monitor(&self) -> Result<LocalMetrics> {
        self.inner.read_metrics()
    }

    fn analyze(&self, metrics: &LocalMetrics) -> bool {
        self.inner.needs_adaptation(metrics)
    }

    fn plan(&self, metrics: &LocalMetrics) -> Option<String> {
        self.inner.next_model(metrics)
    }

    async fn execute(&self, tactic: &DeliveredTactic) -> Result<()> {
        self.inner.apply(tactic).await
    }
}

/// Vision pipeline: the yolo family over an image stream.
pub struct VisionCapability {
    inner: LadderCapability,
}

impl VisionCapability {
    pub const MODELS: &'static [&'static str] = &["yolo_n", "yolo_s", "yolo_m"];

    pub fn new(knowledge_dir: &Path, min_score: f64, max_energy: f64) -> Self {
        Self {
            inner: LadderCapability::new(knowledge_dir, Self::MODELS, min_score, max_energy),
        }
    }
}

#[async_trait]
impl MapeCapability for VisionCapability {
    fn domain(&self) -> &'static str {
        "vision"
    }

    fn models(&self) -> &[&'static str] {
        Self::MODELS
    }

    async fn monitor(&self) -> Result<LocalMetrics> {
        self.inner.read_metrics()
    }

    fn analyze(&self, metrics: &LocalMetrics) -> bool {
        self.inner.needs_adaptation(metrics)
    }

    fn plan(&self, metrics: &LocalMetrics) -> Option<String> {
        self.inner.next_model(metrics)
    }

    async fn execute(&self, tactic: &DeliveredTactic) -> Result<()> {
        self.inner.apply(tactic).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics(score: f64, energy: f64, model: &str) -> LocalMetrics {
        LocalMetrics {
            score,
            normalized_energy: energy,
            model_used: model.to_string(),
            kl_div: None,
        }
    }

    #[test]
    fn test_healthy_metrics_need_no_adaptation() {
        let dir = TempDir::new().unwrap();
        let cap = VisionCapability::new(dir.path(), 0.7, 0.8);

        assert!(!cap.analyze(&metrics(0.9, 0.3, "yolo_s")));
        assert!(cap.analyze(&metrics(0.5, 0.3, "yolo_s")));
        assert!(cap.analyze(&metrics(0.9, 0.95, "yolo_s")));
    }

    #[test]
    fn test_low_score_steps_up_the_ladder() {
        let dir = TempDir::new().unwrap();
        let cap = VisionCapability::new(dir.path(), 0.7, 0.8);

        assert_eq!(
            cap.plan(&metrics(0.5, 0.3, "yolo_n")).as_deref(),
            Some("yolo_s")
        );
        // Already at the top: nowhere to go.
        assert!(cap.plan(&metrics(0.5, 0.3, "yolo_m")).is_none());
    }

    #[test]
    fn test_high_energy_steps_down_and_wins_over_score() {
        let dir = TempDir::new().unwrap();
        let cap = VisionCapability::new(dir.path(), 0.7, 0.8);

        assert_eq!(
            cap.plan(&metrics(0.9, 0.95, "yolo_m")).as_deref(),
            Some("yolo_s")
        );
        // Both violated: shed energy rather than grow the model.
        assert_eq!(
            cap.plan(&metrics(0.5, 0.95, "yolo_s")).as_deref(),
            Some("yolo_n")
        );
        assert!(cap.plan(&metrics(0.9, 0.95, "yolo_n")).is_none());
    }

    #[test]
    fn test_regression_ladder_order() {
        let dir = TempDir::new().unwrap();
        let cap = RegressionCapability::new(dir.path(), 0.7, 0.8);
        assert_eq!(
            cap.plan(&metrics(0.5, 0.3, "svm")).as_deref(),
            Some("lstm")
        );
    }

    #[tokio::test]
    async fn test_monitor_prefers_model_file_over_metrics() {
        let dir = TempDir::new().unwrap();
        let cap = VisionCapability::new(dir.path(), 0.7, 0.8);

        write_atomic(
            &dir.path().join("metrics.json"),
            r#"{"score": 0.82, "normalized_energy": 0.4, "model_used": "yolo_n"}"#,
        )
        .unwrap();
        ActuationSurface::new(dir.path())
            .write_active_model("yolo_s")
            .unwrap();

        let metrics = cap.monitor().await.unwrap();
        assert_eq!(metrics.score, 0.82);
        assert_eq!(metrics.model_used, "yolo_s");
    }

    #[tokio::test]
    async fn test_execute_retrain_leaves_request_token() {
        let dir = TempDir::new().unwrap();
        let cap = RegressionCapability::new(dir.path(), 0.7, 0.8);

        cap.execute(&DeliveredTactic {
            kind: TacticKind::Retrain,
            target: None,
        })
        .await
        .unwrap();

        assert!(dir.path().join("retrain.requested").exists());
    }

    #[tokio::test]
    async fn test_execute_switch_rewrites_model_file() {
        let dir = TempDir::new().unwrap();
        let cap = VisionCapability::new(dir.path(), 0.7, 0.8);

        cap.execute(&DeliveredTactic {
            kind: TacticKind::Switch,
            target: Some("yolo_m".to_string()),
        })
        .await
        .unwrap();

        let surface = ActuationSurface::new(dir.path());
        assert_eq!(
            surface.read_active_model().unwrap().as_deref(),
            Some("yolo_m")
        );
    }
}
