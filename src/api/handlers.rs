//! Health and status endpoints

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use crate::SharedState;

const DEFAULT_STATUS_LIMIT: usize = 10;

/// Root health check endpoint
pub async fn root() -> &'static str {
    "deploy_hook - healthy"
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub limit: Option<usize>,
}

/// Returns server information and recent deploys, newest first.
/// Supports `?limit=N`.
pub async fn status(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<StatusQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_STATUS_LIMIT);
    let in_progress = state.deploy_lock.try_lock().is_err();
    let history = state.history.lock().await;
    let recent = history.recent(limit);

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "deploy": {
            "branch": state.config.branch,
            "tracked_ref": state.config.tracked_ref(),
            "service_name": state.config.service_name,
            "repo_path": state.config.repo_path,
            "in_progress": in_progress,
        },
        "history": {
            "count": history.len(),
            "recent": recent,
        }
    }))
}
