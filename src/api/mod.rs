//! HTTP surface: webhook intake, health, status and config reload

pub mod config;
pub mod status;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use config::reload_config_endpoint;
pub use status::{get_dispatch, root, status};
pub use webhook::handle_webhook;

pub fn build_app(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/webhook", routing::post(handle_webhook))
        .route("/status", routing::get(status))
        .route("/status/{id}", routing::get(get_dispatch))
        .route("/api/reload", routing::post(reload_config_endpoint))
        .with_state(state)
}
