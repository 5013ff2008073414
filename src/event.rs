//! Event type and branch filtering for incoming deliveries.

use serde_json::Value;
use tracing::{debug, info};

pub const EVENT_HEADER: &str = "X-GitHub-Event";
const PUSH_EVENT: &str = "push";
const MAX_COMMIT_MSG_LEN: usize = 500;

/// Fields of a push payload that the deploy pipeline cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPayload {
    pub git_ref: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub pusher: Option<String>,
}

impl PushPayload {
    /// Extract push data from a parsed payload. Anything but an object is rejected.
    pub fn from_value(payload: &Value) -> Result<Self, PayloadError> {
        let object = payload.as_object().ok_or(PayloadError::NotAnObject)?;

        // Missing ref never matches a tracked branch
        let git_ref = match object.get("ref") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let commit_sha = object
            .get("after")
            .and_then(|v| v.as_str())
            .map(String::from);
        let commit_message = object
            .get("head_commit")
            .and_then(|c| c.get("message"))
            .and_then(|v| v.as_str())
            .map(|s| {
                if s.chars().count() > MAX_COMMIT_MSG_LEN {
                    let cut: String = s.chars().take(MAX_COMMIT_MSG_LEN).collect();
                    format!("{}... (truncated)", cut)
                } else {
                    s.to_string()
                }
            });
        let pusher = object
            .get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Self {
            git_ref,
            commit_sha,
            commit_message,
            pusher,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,
}

/// Result of filtering a delivery that already passed signature checks.
#[derive(Debug, PartialEq, Eq)]
pub enum EventDecision {
    /// Push to the tracked branch, run the pipeline.
    Deploy(PushPayload),
    /// Not a push event; carries the received event name if any.
    IgnoreEvent(Option<String>),
    /// Push to some other ref.
    IgnoreRef(String),
}

/// Decide what to do with a delivery given its event header and raw body.
///
/// The body is only parsed for push events, so a malformed non-push
/// delivery is still ignored rather than rejected.
pub fn filter_event(
    event: Option<&str>,
    body: &[u8],
    tracked_ref: &str,
) -> Result<EventDecision, PayloadError> {
    if event != Some(PUSH_EVENT) {
        info!("Ignoring event {:?}", event);
        return Ok(EventDecision::IgnoreEvent(event.map(String::from)));
    }

    let payload: Value = serde_json::from_slice(body)?;
    let push = PushPayload::from_value(&payload)?;
    debug!("Push payload: {:?}", push);

    if push.git_ref != tracked_ref {
        info!(
            "Push is not to the tracked ref {}, received {:?}",
            tracked_ref, push.git_ref
        );
        return Ok(EventDecision::IgnoreRef(push.git_ref));
    }

    Ok(EventDecision::Deploy(push))
}
