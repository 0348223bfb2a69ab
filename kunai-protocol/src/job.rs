use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope of a job pushed onto a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob<T> {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Queue key receiving the [`JobReport`], if anyone is waiting for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub payload: T,
}

impl<T> QueuedJob<T> {
    pub fn new(payload: T, reply_to: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            reply_to,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "camelCase")]
pub enum JobEvent<T> {
    Complete(T),
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport<T> {
    pub job_id: Uuid,
    pub time: DateTime<Utc>,
    pub event: JobEvent<T>,
}

impl<T> JobReport<T> {
    pub fn new(job_id: Uuid, event: JobEvent<T>) -> Self {
        Self {
            job_id,
            time: Utc::now(),
            event,
        }
    }
}

/// Live progress of an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub current: usize,
    pub total: usize,
    pub payload: String,
    pub time: DateTime<Utc>,
}
