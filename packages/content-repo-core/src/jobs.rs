//! Job queue collaborator for deferred stage transitions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Options passed with a published job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Earliest time the job may run
    pub start_after: Option<DateTime<Utc>>,
}

/// External job queue.
pub trait JobQueue: Send + Sync {
    /// Publishes a job and returns its id.
    fn publish(&self, job_name: &str, payload: Value, options: PublishOptions) -> Result<String>;
}

/// Whether a deferred transition targets a collection record or a global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobTarget {
    Collection,
    Global,
}

/// Payload of a deferred stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionJob {
    #[serde(rename = "type")]
    pub target: JobTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Value>,
    pub stage: String,
}

impl TransitionJob {
    /// Name of the collection or global the job targets.
    pub fn target_name(&self) -> Option<&str> {
        match self.target {
            JobTarget::Collection => self.collection.as_deref(),
            JobTarget::Global => self.global.as_deref(),
        }
    }
}

/// Job held by `InMemoryJobQueue`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub start_after: Option<DateTime<Utc>>,
}

/// Process-local queue; jobs are drained by the embedding application.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<QueuedJob>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the queued jobs in publish order.
    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Removes and returns every job whose start time has passed.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<QueuedJob> {
        let mut jobs = self.jobs.lock();
        let (due, pending): (Vec<QueuedJob>, Vec<QueuedJob>) = jobs
            .drain(..)
            .partition(|job| job.start_after.map_or(true, |at| at <= now));
        *jobs = pending;
        due
    }
}

impl JobQueue for InMemoryJobQueue {
    fn publish(&self, job_name: &str, payload: Value, options: PublishOptions) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.jobs.lock().push(QueuedJob {
            id: id.clone(),
            name: job_name.to_string(),
            payload,
            start_after: options.start_after,
        });
        Ok(id)
    }
}
