use axum::{Json, Router, extract::State, routing::get};
use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
/// Return the current health status and live connection count.
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let connections = state.registry().connection_count();

    match state.store().health_check().await {
        Ok(()) => Json(HealthResponse::ok(connections)),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            Json(HealthResponse::degraded(connections))
        }
    }
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/health", get(health))
}
