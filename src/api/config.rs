//! Config API endpoints

use axum::{Json, extract::State as AxumState, http::StatusCode, response::IntoResponse};
use serde_json::json;
use tracing::error;

use crate::SharedState;

/// POST /api/reload - Reload configuration from disk
/// In-flight dispatches keep the snapshot they started with
pub async fn reload_config_endpoint(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    match state.config.reload().await {
        Ok(snapshot) => Json(json!({
            "status": "success",
            "message": "Configuration reloaded successfully",
            "repository_rules": snapshot.rules.len(),
        }))
        .into_response(),
        Err(e) => {
            error!("Failed to reload config: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": e.to_string()
                })),
            )
                .into_response()
        }
    }
}
