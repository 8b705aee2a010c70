//! HTTP server for adaptd.

use crate::audit::{AuditLogger, ExportLog};
use crate::config::Config;
use crate::cycle::AdaptationCycle;
use crate::dispatcher::{Dispatcher, HttpTransport};
use crate::knowledge::KnowledgeStore;
use crate::planner::FileVersionRegistry;
use crate::routes;
use anyhow::Result;
use axum::Router;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub cycle: AdaptationCycle,
    pub start_time: Instant,
}

impl AppState {
    /// Assemble the full loop from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let data_dir = Path::new(&config.knowledge.data_dir);

        let store = Arc::new(KnowledgeStore::new(
            config.knowledge.history_limit,
            config.knowledge.event_limit,
        ));
        let audit = Arc::new(AuditLogger::new(data_dir).await?);
        let export = Arc::new(ExportLog::new(data_dir).await?);
        let registry = Arc::new(FileVersionRegistry::new(data_dir.join("versions")));

        let transport = Arc::new(HttpTransport::new(Duration::from_millis(
            config.dispatch.attempt_timeout_ms,
        ))?);
        let dispatcher = Arc::new(Dispatcher::new(transport, config.dispatch.clone()));

        let rng = match config.planner.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        Ok(Self {
            cycle: AdaptationCycle::new(store, dispatcher, audit, export, registry, rng),
            start_time: Instant::now(),
        })
    }
}

/// Run the HTTP server
pub async fn run(config: Config, state: AppState) -> Result<()> {
    let state = Arc::new(state);

    let app = Router::new()
        .merge(routes::telemetry_routes())
        .merge(routes::policy_routes())
        .merge(routes::knowledge_routes())
        .merge(routes::event_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    info!("  Listening on http://{}", config.server.listen_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
