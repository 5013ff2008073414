pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod logging;
pub mod pipeline;
pub mod signature;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use command::CommandRunner;
use config::DeployConfig;
use history::DeployHistory;

pub struct AppState {
    pub config: DeployConfig,
    pub runner: Arc<dyn CommandRunner>,
    /// Held for the whole pipeline so deliveries never touch the checkout concurrently.
    pub deploy_lock: Mutex<()>,
    pub history: Mutex<DeployHistory>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: DeployConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let history = DeployHistory::new(config.history_size);
        Self {
            config,
            runner,
            deploy_lock: Mutex::new(()),
            history: Mutex::new(history),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
