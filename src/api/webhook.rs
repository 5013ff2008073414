//! Webhook handler for GitHub push events

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{error, info};

use crate::SharedState;
use crate::event::{EVENT_HEADER, EventDecision, filter_event};
use crate::history::DeployRecord;
use crate::pipeline::run_pipeline;
use crate::signature::{SIGNATURE_HEADER, verify_signature};

/// Handles the GitHub webhook POST request.
///
/// The signature is checked before anything else is looked at; only a
/// verified push to the tracked branch reaches the pipeline.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!("Received request on /webhook");

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&body, &state.config.secret, signature) {
        error!("Invalid webhook signature, rejecting request");
        return StatusCode::FORBIDDEN.into_response();
    }

    let event = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok());
    let push = match filter_event(event, &body, &state.config.tracked_ref()) {
        Ok(EventDecision::Deploy(push)) => push,
        Ok(EventDecision::IgnoreEvent(_)) => {
            return (StatusCode::OK, "Ignoring non-push event").into_response();
        }
        Ok(EventDecision::IgnoreRef(git_ref)) => {
            return (StatusCode::OK, format!("Ignoring push to {}", git_ref)).into_response();
        }
        Err(e) => {
            error!("Could not parse JSON payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    info!(
        "Push to branch {} received (commit {:?}). Starting update.",
        state.config.branch, push.commit_sha
    );

    // Run detached so a dropped connection cannot cancel a half-finished deploy.
    let shared_state = state.clone();
    let deploy = tokio::spawn(async move {
        let _guard = shared_state.deploy_lock.lock().await;
        let started_at = Utc::now();
        let outcome = run_pipeline(&shared_state.config, shared_state.runner.as_ref()).await;
        shared_state
            .history
            .lock()
            .await
            .push(DeployRecord::new(&push, started_at, &outcome));
        outcome
    });

    match deploy.await {
        Ok(outcome) => (outcome.http_status, outcome.message).into_response(),
        Err(e) => {
            error!("Deploy task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
