//! Agent loops: command-file polling and the autonomous MAPE cycle.

use crate::actuation::ActuationSurface;
use crate::capability::{LocalMetrics, MapeCapability};
use crate::handler::{AdaptationHandler, ApplyOutcome};
use adapt_common::{DeliveredTactic, TacticDelivery, TacticKind, TelemetrySample};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Reports autonomous-mode telemetry to the managing system.
pub struct TelemetryReporter {
    client: reqwest::Client,
    endpoint: String,
    policy_id: String,
    instance_id: String,
}

impl TelemetryReporter {
    pub fn new(managing_url: &str, policy_id: &str, instance_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build telemetry client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/telemetry", managing_url.trim_end_matches('/')),
            policy_id: policy_id.to_string(),
            instance_id: instance_id.to_string(),
        })
    }

    /// Best-effort: a missed report is caught up by the next cycle.
    pub async fn report(&self, metrics: &LocalMetrics) {
        let sample = TelemetrySample {
            policy_id: self.policy_id.clone(),
            instance_id: self.instance_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            score: metrics.score,
            normalized_energy: metrics.normalized_energy,
            model_used: metrics.model_used.clone(),
            kl_div: metrics.kl_div,
        };

        match self.client.post(&self.endpoint).json(&sample).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!("Telemetry report rejected: {}", response.status());
            }
            Err(e) => warn!("Telemetry report failed: {}", e),
            _ => {}
        }
    }
}

/// Check the command file once and apply a pending command, if any.
pub async fn poll_command_once(
    surface: &ActuationSurface,
    handler: &Arc<Mutex<AdaptationHandler>>,
) -> Result<Option<ApplyOutcome>> {
    let Some(command) = surface.take_command()? else {
        return Ok(None);
    };

    let delivery = TacticDelivery {
        event_id: command.event_id,
        tactic: command.tactic,
    };
    let mut handler = handler.lock().await;
    let outcome = handler.apply(&delivery)?;
    Ok(Some(outcome))
}

/// Command-driven mode: block on the command file at the configured poll
/// interval and apply whatever the managing system left there.
pub async fn run_command_loop(
    surface: ActuationSurface,
    handler: Arc<Mutex<AdaptationHandler>>,
    poll_interval: Duration,
) {
    info!(
        "Command loop polling every {:?} for deliveries",
        poll_interval
    );
    loop {
        tokio::time::sleep(poll_interval).await;
        match poll_command_once(&surface, &handler).await {
            Ok(Some(outcome)) => info!("Command applied: {:?}", outcome),
            Ok(None) => {}
            Err(e) => warn!("Command poll failed: {}", e),
        }
    }
}

/// One autonomous MAPE cycle: monitor, analyze, plan, execute. Returns
/// the model switched to, if the cycle adapted.
pub async fn autonomous_cycle_once(
    capability: &dyn MapeCapability,
    reporter: Option<&TelemetryReporter>,
) -> Result<Option<String>> {
    let metrics = capability.monitor().await?;

    if let Some(reporter) = reporter {
        reporter.report(&metrics).await;
    }

    if !capability.analyze(&metrics) {
        return Ok(None);
    }

    let Some(target) = capability.plan(&metrics) else {
        info!("Violation detected but no alternative model available");
        return Ok(None);
    };

    capability
        .execute(&DeliveredTactic {
            kind: TacticKind::Switch,
            target: Some(target.clone()),
        })
        .await?;
    info!("Autonomous cycle switched to '{}'", target);
    Ok(Some(target))
}

/// Autonomous mode: run the local MAPE cycle on a fixed timer. The
/// managing system only observes through the reported telemetry.
pub async fn run_autonomous_loop(
    capability: Arc<dyn MapeCapability>,
    reporter: Option<TelemetryReporter>,
    cycle_interval: Duration,
) {
    info!(
        "Autonomous {} loop running every {:?}",
        capability.domain(),
        cycle_interval
    );
    loop {
        tokio::time::sleep(cycle_interval).await;
        match autonomous_cycle_once(capability.as_ref(), reporter.as_ref()).await {
            Ok(Some(target)) => info!("Adapted to '{}'", target),
            Ok(None) => {}
            Err(e) => warn!("Autonomous cycle failed: {}", e),
        }
    }
}
