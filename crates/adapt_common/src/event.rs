//! Adaptation events and audit records.
//!
//! Events are append-only: once issued, only delivery bookkeeping
//! (`status`, `delivered`, `acked_at`, `attempts`) advances. Redeliveries
//! of the same decision reuse the original `event_id`, which is what the
//! managed side keys its idempotency on.

use crate::policy::{Tactic, TacticKind};
use crate::state::Classification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The tactic as it crosses the wire to the managed side. The delivery
/// endpoint itself is not part of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredTactic {
    pub kind: TacticKind,
    #[serde(default)]
    pub target: Option<String>,
}

/// Wire format of one tactic delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticDelivery {
    pub event_id: String,
    pub tactic: DeliveredTactic,
}

impl TacticDelivery {
    pub fn new(event_id: &str, tactic: &Tactic) -> Self {
        Self {
            event_id: event_id.to_string(),
            tactic: DeliveredTactic {
                kind: tactic.kind,
                target: tactic.target.clone(),
            },
        }
    }
}

/// Managed-side response to a delivery. Acceptance is receipt, not
/// completion; retraining finishes asynchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResponse {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Delivery lifecycle of an adaptation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Decision recorded, delivery not yet confirmed.
    Triggered,
    /// Managed side acknowledged receipt.
    Delivered,
    /// Retry budget exhausted; surfaced for operator visibility.
    Failed,
}

/// One planned adaptation and its delivery outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationEvent {
    pub event_id: String,
    pub policy_id: String,
    pub instance_id: String,
    pub tactic: Tactic,
    pub classification: Classification,
    /// Metric value that triggered the violation.
    pub trigger_value: f64,
    pub issued_at: DateTime<Utc>,
    pub status: EventStatus,
    pub attempts: u32,
    pub delivered: bool,
    #[serde(default)]
    pub acked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl AdaptationEvent {
    /// Create a freshly-triggered event with a new id.
    pub fn issue(
        policy_id: &str,
        instance_id: &str,
        tactic: Tactic,
        classification: Classification,
        trigger_value: f64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            policy_id: policy_id.to_string(),
            instance_id: instance_id.to_string(),
            tactic,
            classification,
            trigger_value,
            issued_at: Utc::now(),
            status: EventStatus::Triggered,
            attempts: 0,
            delivered: false,
            acked_at: None,
            failure_reason: None,
        }
    }

    pub fn mark_delivered(&mut self) {
        self.status = EventStatus::Delivered;
        self.delivered = true;
        self.acked_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: &str) {
        self.status = EventStatus::Failed;
        self.delivered = false;
        self.failure_reason = Some(reason.to_string());
    }
}

/// What an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    PolicyRegistered,
    TelemetryAccepted,
    TelemetryRejected,
    TacticDispatched,
    DispatchFailed,
    RetrainRejected,
}

/// One line of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub policy_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Stable reason code for rejections and failures.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, policy_id: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            policy_id: policy_id.to_string(),
            instance_id: None,
            reason: None,
            detail: None,
        }
    }

    pub fn instance(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TacticKind;

    fn tactic() -> Tactic {
        Tactic {
            kind: TacticKind::Switch,
            target: Some("yolo_n".to_string()),
            endpoint: "http://localhost:9000/v1/tactic".to_string(),
        }
    }

    #[test]
    fn test_issue_starts_triggered() {
        let event = AdaptationEvent::issue(
            "p1",
            "i1",
            tactic(),
            Classification::ScoreViolation,
            0.6,
        );
        assert_eq!(event.status, EventStatus::Triggered);
        assert!(!event.delivered);
        assert!(event.acked_at.is_none());
        assert!(!event.event_id.is_empty());
    }

    #[test]
    fn test_delivery_bookkeeping() {
        let mut event =
            AdaptationEvent::issue("p1", "i1", tactic(), Classification::ScoreViolation, 0.6);
        event.mark_delivered();
        assert_eq!(event.status, EventStatus::Delivered);
        assert!(event.delivered);
        assert!(event.acked_at.is_some());
    }

    #[test]
    fn test_failure_keeps_reason() {
        let mut event =
            AdaptationEvent::issue("p1", "i1", tactic(), Classification::EnergyViolation, 0.95);
        event.mark_failed("dispatch_timeout");
        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(event.failure_reason.as_deref(), Some("dispatch_timeout"));
    }

    #[test]
    fn test_fresh_events_get_distinct_ids() {
        let a = AdaptationEvent::issue("p1", "i1", tactic(), Classification::ScoreViolation, 0.6);
        let b = AdaptationEvent::issue("p1", "i1", tactic(), Classification::ScoreViolation, 0.6);
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_audit_record_builder() {
        let record = AuditRecord::new(AuditKind::TelemetryRejected, "p1")
            .instance("i1")
            .reason("out_of_order_sample");
        assert_eq!(record.kind, AuditKind::TelemetryRejected);
        assert_eq!(record.instance_id.as_deref(), Some("i1"));
        assert_eq!(record.reason.as_deref(), Some("out_of_order_sample"));
    }
}
