//! Managed-side adaptation agent binary.
//!
//! Command-driven mode runs the tactic receiver plus the command-file
//! polling loop; autonomous mode runs the local MAPE cycle on a timer and
//! optionally reports telemetry back to the managing system.

use adapt_agent::actuation::ActuationSurface;
use adapt_agent::capability::{MapeCapability, RegressionCapability, VisionCapability};
use adapt_agent::config::{AgentConfig, AgentDomain, AgentMode};
use adapt_agent::handler::AdaptationHandler;
use adapt_agent::receiver::{self, ReceiverState};
use adapt_agent::runner::{self, TelemetryReporter};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("adapt-agent v{} starting", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load();
    let knowledge_dir = Path::new(&config.knowledge_dir);
    std::fs::create_dir_all(knowledge_dir)?;

    match config.mode {
        AgentMode::CommandDriven => {
            let surface = ActuationSurface::new(knowledge_dir);
            let handler = Arc::new(Mutex::new(AdaptationHandler::new(
                surface.clone(),
                config.allow_retrain,
            )));

            let poll_surface = surface.clone();
            let poll_handler = Arc::clone(&handler);
            let poll_interval = Duration::from_secs(config.poll_interval_secs);
            tokio::spawn(async move {
                runner::run_command_loop(poll_surface, poll_handler, poll_interval).await;
            });

            let state = Arc::new(ReceiverState { handler });
            receiver::run(&config.listen_addr, state).await
        }
        AgentMode::Autonomous => {
            let capability: Arc<dyn MapeCapability> = match config.domain {
                AgentDomain::Regression => Arc::new(RegressionCapability::new(
                    knowledge_dir,
                    config.min_score,
                    config.max_energy,
                )),
                AgentDomain::Vision => Arc::new(VisionCapability::new(
                    knowledge_dir,
                    config.min_score,
                    config.max_energy,
                )),
            };

            let reporter = match &config.managing_url {
                Some(url) => Some(TelemetryReporter::new(
                    url,
                    &config.policy_id,
                    &config.instance_id,
                )?),
                None => None,
            };

            runner::run_autonomous_loop(
                capability,
                reporter,
                Duration::from_secs(config.cycle_interval_secs),
            )
            .await;
            Ok(())
        }
    }
}
