//! Health and status endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::SharedState;
use crate::history::{DispatchRecord, DispatchStatus};

const DEFAULT_STATUS_LIMIT: usize = 10;
const MAX_STATUS_LIMIT: usize = 100;

/// Root health check endpoint
/// Supports ?format=json for detailed JSON response
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<RootQuery>,
) -> impl IntoResponse {
    if params.format.as_deref() == Some("json") {
        let snapshot = state.config.snapshot();
        Json(json!({
            "name": "simple_git_notifier",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "repository_rules": snapshot.rules.len(),
            "status": "healthy"
        }))
        .into_response()
    } else {
        "simple_git_notifier - healthy".into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RootQuery {
    pub format: Option<String>,
}

/// Query parameters for `/status`
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// Filter by `owner/name`
    pub repo: Option<String>,
    /// Filter by status (running, success, failed)
    pub status: Option<String>,
    /// Number of records (default: 10, max: 100)
    pub limit: Option<usize>,
}

/// GET /status - server info and recent dispatches, newest first
pub async fn status(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<StatusQuery>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_STATUS_LIMIT)
        .min(MAX_STATUS_LIMIT);

    let (dispatches, running): (Vec<DispatchRecord>, usize) = {
        let history = state.history.lock().await;
        let status = params.status.as_deref().and_then(DispatchStatus::parse);
        let dispatches = history.filtered(params.repo.as_deref(), status, limit);
        (dispatches, history.running_count())
    };

    let snapshot = state.config.snapshot();

    Json(json!({
        "server": {
            "name": "simple_git_notifier",
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "dispatches": {
            "running_count": running,
            "filtered": dispatches,
            "filtered_count": dispatches.len(),
        },
        "config": {
            "repository_rules": snapshot.rules.len(),
            "silent_init": snapshot.silent_init,
        }
    }))
}

/// GET /status/{id} - a single dispatch record
pub async fn get_dispatch(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let history = state.history.lock().await;
    match history.get(&id) {
        Some(record) => Json(record.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Dispatch not found"})),
        )
            .into_response(),
    }
}
