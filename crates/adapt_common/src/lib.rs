//! Shared types for the adaptation control plane.
//!
//! Everything both sides of the loop agree on lives here: the policy and
//! telemetry data model, the adaptation event log schema, the error
//! taxonomy, and the atomic file-replace primitives used for cross-process
//! signaling.

pub mod atomic_file;
pub mod error;
pub mod event;
pub mod policy;
pub mod state;
pub mod telemetry;

pub use error::AdaptError;
pub use event::{
    AdaptationEvent, AuditKind, AuditRecord, DeliveredTactic, DeliveryResponse, EventStatus,
    TacticDelivery,
};
pub use policy::{
    Direction, MetricThreshold, Policy, Tactic, TacticCatalog, TacticKind, TacticSpec,
    ThresholdKind, CONTRACTED_METRICS,
};
pub use state::{AnalysisState, Classification, EventCounters, MetricBaseline};
pub use telemetry::{ExportRecord, TelemetrySample};
