//! HTTP receiver for pushed tactic deliveries.
//!
//! Accepting a delivery acknowledges receipt only; a retrain completes
//! asynchronously and its effect is visible to the managing system
//! through the next telemetry cycle.

use crate::handler::{AdaptationHandler, ApplyOutcome};
use adapt_common::{DeliveryResponse, TacticDelivery};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Shared receiver state.
pub struct ReceiverState {
    pub handler: Arc<Mutex<AdaptationHandler>>,
}

pub fn routes(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/v1/tactic", post(receive_tactic))
        .with_state(state)
}

async fn receive_tactic(
    State(state): State<Arc<ReceiverState>>,
    Json(delivery): Json<TacticDelivery>,
) -> Result<Json<DeliveryResponse>, (StatusCode, String)> {
    info!(
        "Received tactic {:?} (event {})",
        delivery.tactic.kind, delivery.event_id
    );

    let outcome = {
        let mut handler = state.handler.lock().await;
        handler.apply(&delivery).map_err(|e| {
            error!("Failed to apply tactic: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?
    };

    let response = match outcome {
        ApplyOutcome::Applied | ApplyOutcome::DuplicateIgnored | ApplyOutcome::Deferred => {
            DeliveryResponse {
                accepted: true,
                reason: None,
            }
        }
        ApplyOutcome::RetrainUnavailable => DeliveryResponse {
            accepted: false,
            reason: Some("retrain_failure".to_string()),
        },
    };
    Ok(Json(response))
}

/// Serve the receiver until the process exits.
pub async fn run(listen_addr: &str, state: Arc<ReceiverState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("  Tactic receiver listening on http://{}", listen_addr);
    axum::serve(listener, routes(state)).await?;
    Ok(())
}
