//! Error taxonomy for the adaptation loop.
//!
//! Validation errors are produced at the ingestion boundary and never reach
//! the analyzer or planner. Dispatch errors never roll back a planning
//! decision; they only prevent the cooldown window from being armed.

use thiserror::Error;

/// Errors surfaced by the adaptation control plane.
#[derive(Debug, Error)]
pub enum AdaptError {
    /// Telemetry payload failed validation; the sample was not stored.
    #[error("malformed telemetry: {0}")]
    MalformedTelemetry(String),

    /// Telemetry referenced a policy that was never registered.
    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),

    /// Sample timestamp did not strictly increase for its instance.
    #[error("out-of-order sample for {instance_id}: {timestamp} <= {last_timestamp}")]
    OutOfOrderSample {
        instance_id: String,
        timestamp: i64,
        last_timestamp: i64,
    },

    /// Policy registration was rejected.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// A single delivery attempt exceeded its timeout.
    #[error("dispatch attempt timed out after {0} ms")]
    DispatchTimeout(u64),

    /// The managed side refused the delivery (connection error or non-2xx).
    #[error("dispatch refused: {0}")]
    DispatchRefused(String),

    /// All retries exhausted; the event is permanently failed.
    #[error("dispatch failed permanently: {0}")]
    DispatchFailed(String),

    /// The managed side reported it cannot retrain.
    #[error("retrain rejected by managed system: {0}")]
    RetrainFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AdaptError {
    /// Stable reason code for the audit log.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AdaptError::MalformedTelemetry(_) => "malformed_telemetry",
            AdaptError::UnknownPolicy(_) => "unknown_policy",
            AdaptError::OutOfOrderSample { .. } => "out_of_order_sample",
            AdaptError::InvalidPolicy(_) => "invalid_policy",
            AdaptError::DispatchTimeout(_) => "dispatch_timeout",
            AdaptError::DispatchRefused(_) => "dispatch_refused",
            AdaptError::DispatchFailed(_) => "dispatch_failed",
            AdaptError::RetrainFailure(_) => "retrain_failure",
            AdaptError::Io(_) => "io_error",
            AdaptError::Serde(_) => "serde_error",
        }
    }
}
