//! HTTP surface: the webhook endpoint plus health and status.

pub mod handlers;
pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing};

use crate::SharedState;

pub use handlers::{root, status};
pub use webhook::handle_webhook;

/// GitHub caps webhook payloads at 25 MB; axum's default is 2 MiB.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 25 * 1024 * 1024;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/status", routing::get(status))
        .route(
            "/webhook",
            routing::post(handle_webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES)),
        )
        .with_state(state)
}
