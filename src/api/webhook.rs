//! Webhook handler for push events

use axum::{
    Json,
    body::to_bytes,
    extract::{ConnectInfo, Request, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::auth::{is_ip_allowed, verify_github_signature};
use crate::dispatch::DispatchOutcome;
use crate::event::{WebhookPayload, parse_payload};
use crate::history::DispatchRecord;

/// Payloads larger than this are refused
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Handles the webhook POST request.
///
/// A matched push is acknowledged with 202 straight away; mirroring and
/// notification run in a background task and land in the history.
pub async fn handle_webhook(AxumState(state): AxumState<SharedState>, request: Request) -> Response {
    let snapshot = state.config.snapshot();

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    if !is_ip_allowed(&snapshot.allowed_ips, client_ip) {
        warn!("Rejected webhook from address {:?}", client_ip);
        return StatusCode::FORBIDDEN.into_response();
    }

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            info!("Could not read webhook body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Some(secret) = &snapshot.webhook_secret {
        let Some(signature) = parts
            .headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
        else {
            error!("Webhook secret is configured, but no signature header supplied.");
            return StatusCode::UNAUTHORIZED.into_response();
        };
        if !verify_github_signature(secret, &body, signature) {
            error!("Webhook signature verification failed!");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let event_type = parts
        .headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok());

    let event = match parse_payload(&body, event_type) {
        Ok(WebhookPayload::Ping { zen }) => {
            info!("Received ping: {}", zen);
            return (StatusCode::OK, Json(json!({"status": "pong"}))).into_response();
        }
        Ok(WebhookPayload::Ignored { event_type }) => {
            info!("Not push event; Received {:?} event", event_type);
            return StatusCode::NO_CONTENT.into_response();
        }
        Ok(WebhookPayload::Push(event)) => event,
        Err(e) => {
            info!("Rejected webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})))
                .into_response();
        }
    };
    debug!("{:#?}", &event);

    let Some(plan) = state.dispatcher.plan(event) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let record = DispatchRecord::new(&plan.event);
    let dispatch_id = record.id.clone();
    {
        let mut history = state.history.lock().await;
        history.set_capacity(snapshot.history_size);
        history.add(record);
    }
    info!(
        "Created dispatch {} for '{}' ({})",
        dispatch_id,
        plan.event.repo_id(),
        plan.event.sha_range()
    );

    let shared_state = state.clone();
    let id = dispatch_id.clone();
    tokio::spawn(async move {
        let outcome = shared_state.dispatcher.execute(plan).await;
        let mut history = shared_state.history.lock().await;
        let updated = match outcome {
            DispatchOutcome::Done { .. } => {
                info!("Dispatch {} completed successfully.", id);
                history.update(&id, |r| r.mark_success())
            }
            DispatchOutcome::Failed(e) => {
                error!("Dispatch {} failed: {}", id, e);
                history.update(&id, |r| r.mark_failed(e.to_string()))
            }
            DispatchOutcome::NoMatch => {
                history.update(&id, |r| r.mark_failed("no matching rule".to_string()))
            }
        };
        if !updated {
            debug!("Dispatch {} finished after leaving the history", id);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"dispatch_id": dispatch_id})),
    )
        .into_response()
}
