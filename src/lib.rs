pub mod api;
pub mod args;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod history;
pub mod logging;
pub mod mirror;
pub mod notifier;
pub mod rules;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use config::ConfigStore;
use dispatch::Dispatcher;
use history::DispatchHistory;

pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub dispatcher: Dispatcher,
    pub history: Mutex<DispatchHistory>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let history_size = config.snapshot().history_size;
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&config)),
            history: Mutex::new(DispatchHistory::new(history_size)),
            config,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
