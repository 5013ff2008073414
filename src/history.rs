use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::event::PushPayload;
use crate::pipeline::{DeployOutcome, DeployStatus, StepReport};

/// One pipeline run, kept for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeployRecord {
    pub id: String,
    pub git_ref: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub pusher: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: DeployStatus,
    pub http_status: u16,
    pub message: String,
    pub steps: Vec<StepReport>,
}

impl DeployRecord {
    pub fn new(push: &PushPayload, started_at: DateTime<Utc>, outcome: &DeployOutcome) -> Self {
        let completed_at = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            git_ref: push.git_ref.clone(),
            commit_sha: push.commit_sha.clone(),
            commit_message: push.commit_message.clone(),
            pusher: push.pusher.clone(),
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
            status: outcome.status,
            http_status: outcome.http_status.as_u16(),
            message: outcome.message.clone(),
            steps: outcome.steps.clone(),
        }
    }
}

/// Bounded in-memory history, oldest entries are dropped first.
#[derive(Debug)]
pub struct DeployHistory {
    records: VecDeque<DeployRecord>,
    max_records: usize,
}

impl DeployHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_records,
        }
    }

    pub fn push(&mut self, record: DeployRecord) {
        if self.max_records == 0 {
            return;
        }
        while self.records.len() >= self.max_records {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent records first.
    pub fn recent(&self, limit: usize) -> Vec<DeployRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn last(&self) -> Option<&DeployRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
