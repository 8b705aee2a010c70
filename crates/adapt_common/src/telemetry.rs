//! Telemetry samples reported by managed instances.

use crate::error::AdaptError;
use serde::{Deserialize, Serialize};

/// One metrics sample from a managed instance. Immutable once stored;
/// timestamps strictly increase per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub policy_id: String,
    pub instance_id: String,
    /// Seconds since the epoch, assigned by the managed system.
    pub timestamp: i64,
    /// Composite quality score in [0, 1].
    pub score: f64,
    /// Energy use normalized to [0, 1] against the instance's budget.
    pub normalized_energy: f64,
    /// Model the instance was running when the sample was taken.
    pub model_used: String,
    /// KL divergence of the current input window against the reference
    /// distribution, when the instance computes it.
    #[serde(default)]
    pub kl_div: Option<f64>,
}

impl TelemetrySample {
    /// Validate field ranges at the ingestion boundary.
    pub fn validate(&self) -> Result<(), AdaptError> {
        if self.policy_id.trim().is_empty() {
            return Err(AdaptError::MalformedTelemetry(
                "empty policy_id".to_string(),
            ));
        }
        if self.instance_id.trim().is_empty() {
            return Err(AdaptError::MalformedTelemetry(
                "empty instance_id".to_string(),
            ));
        }
        if self.model_used.trim().is_empty() {
            return Err(AdaptError::MalformedTelemetry(
                "empty model_used".to_string(),
            ));
        }
        if !self.score.is_finite() || !(0.0..=1.0).contains(&self.score) {
            return Err(AdaptError::MalformedTelemetry(format!(
                "score out of range: {}",
                self.score
            )));
        }
        if !self.normalized_energy.is_finite() || !(0.0..=1.0).contains(&self.normalized_energy) {
            return Err(AdaptError::MalformedTelemetry(format!(
                "normalized_energy out of range: {}",
                self.normalized_energy
            )));
        }
        if let Some(kl) = self.kl_div {
            if !kl.is_finite() || kl < 0.0 {
                return Err(AdaptError::MalformedTelemetry(format!(
                    "kl_div must be non-negative, got {}",
                    kl
                )));
            }
        }
        Ok(())
    }

    /// Value of a contracted metric by name.
    pub fn metric_value(&self, metric: &str) -> Option<f64> {
        match metric {
            "score" => Some(self.score),
            "normalized_energy" => Some(self.normalized_energy),
            _ => None,
        }
    }
}

/// One row of the append-only knowledge export stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub timestamp: i64,
    pub score: f64,
    pub normalized_energy: f64,
    pub model_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kl_div: Option<f64>,
}

impl From<&TelemetrySample> for ExportRecord {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            timestamp: sample.timestamp,
            score: sample.score,
            normalized_energy: sample.normalized_energy,
            model_used: sample.model_used.clone(),
            kl_div: sample.kl_div,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySample {
        TelemetrySample {
            policy_id: "p1".to_string(),
            instance_id: "i1".to_string(),
            timestamp: 1_700_000_000,
            score: 0.85,
            normalized_energy: 0.4,
            model_used: "yolo_s".to_string(),
            kl_div: None,
        }
    }

    #[test]
    fn test_valid_sample_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_range_violations_rejected() {
        let mut s = sample();
        s.score = 1.2;
        assert!(s.validate().is_err());

        let mut s = sample();
        s.normalized_energy = -0.1;
        assert!(s.validate().is_err());

        let mut s = sample();
        s.kl_div = Some(-1.0);
        assert!(s.validate().is_err());

        let mut s = sample();
        s.score = f64::NAN;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_empty_ids_rejected() {
        let mut s = sample();
        s.instance_id = "  ".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_metric_lookup() {
        let s = sample();
        assert_eq!(s.metric_value("score"), Some(0.85));
        assert_eq!(s.metric_value("normalized_energy"), Some(0.4));
        assert_eq!(s.metric_value("latency"), None);
    }

    #[test]
    fn test_export_record_omits_missing_kl() {
        let record = ExportRecord::from(&sample());
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("kl_div"));
    }
}
