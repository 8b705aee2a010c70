//! Managed-side adaptation agent.
//!
//! Receives tactics from the managing system (push over HTTP or pull via
//! the command file), applies them idempotently through a small state
//! machine, and actuates decisions as atomically-written knowledge files
//! consumed by the local inference loop. Also hosts the autonomous-mode
//! MAPE capability interface with regression and vision built-ins.

pub mod actuation;
pub mod capability;
pub mod config;
pub mod handler;
pub mod receiver;
pub mod runner;

pub use actuation::{ActuationSurface, Command};
pub use capability::{LocalMetrics, MapeCapability, RegressionCapability, VisionCapability};
pub use handler::{AdaptationHandler, ApplyOutcome, HandlerPhase};
