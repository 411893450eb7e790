//! Workflow stage transitions.
//!
//! A transition never changes the live record. It appends a version tagged
//! with the target stage, which stage reads then serve. A transition
//! scheduled in the future is handed to the job queue and replayed through
//! `Repository::handle_job` when due.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{key_of, Collection};
use crate::access::{AccessOperation, RequestContext};
use crate::error::{RepoError, Result};
use crate::hooks::{AfterChange, ChangeOperation};
use crate::jobs::{JobTarget, PublishOptions, TransitionJob};
use crate::registry::Repository;
use crate::Record;

/// Options of a stage transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOptions {
    /// Target stage
    pub stage: String,
    /// Defers the transition to this time when it lies in the future
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl TransitionOptions {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            scheduled_at: None,
        }
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Result of `transition_stage`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Version appended; carries the (unchanged) live record
    Applied(Record),
    /// Job published for later
    Scheduled { record: Record, job_id: String },
}

impl TransitionOutcome {
    pub fn record(&self) -> &Record {
        match self {
            TransitionOutcome::Applied(record) | TransitionOutcome::Scheduled { record, .. } => {
                record
            }
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, TransitionOutcome::Scheduled { .. })
    }
}

/// Result of `Repository::handle_job`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Applied(Record),
    /// The job no longer applies; carries the reason
    Skipped(String),
}

impl<'r> Collection<'r> {
    fn check_transition_stage(&self, stage: &str) -> Result<()> {
        match self.runtime.definition.options.versioning.workflow() {
            Some(workflow) if workflow.has_stage(stage) => Ok(()),
            _ => Err(RepoError::UnknownStage {
                collection: self.name().to_string(),
                stage: stage.to_string(),
            }),
        }
    }

    fn transition_job(&self, id: &Value, stage: &str) -> TransitionJob {
        let name = Some(self.name().to_string());
        if self.runtime.is_global {
            TransitionJob {
                target: JobTarget::Global,
                collection: None,
                global: name,
                record_id: None,
                stage: stage.to_string(),
            }
        } else {
            TransitionJob {
                target: JobTarget::Collection,
                collection: name,
                global: None,
                record_id: Some(id.clone()),
                stage: stage.to_string(),
            }
        }
    }

    /// Moves a record to a workflow stage.
    ///
    /// # Arguments
    /// * `id` - Record primary key
    /// * `options` - Target stage and optional schedule
    ///
    /// # Returns
    /// `Scheduled` with the job id when `scheduled_at` lies in the future,
    /// otherwise `Applied` once the stage version is committed.
    pub fn transition_stage(
        &self,
        ctx: &RequestContext,
        id: &Value,
        options: TransitionOptions,
    ) -> Result<TransitionOutcome> {
        self.check_transition_stage(&options.stage)?;
        let definition = &self.runtime.definition;
        let access = definition
            .access
            .write_filter(self.name(), AccessOperation::Update, ctx)?;

        if let Some(at) = options.scheduled_at.filter(|at| *at > Utc::now()) {
            let view = self.repo.store().read();
            let record = self
                .load(&view, ctx, id, false)?
                .filter(|record| access.matches(record))
                .ok_or_else(|| RepoError::not_found(self.name(), id))?;
            let job = self.transition_job(id, &options.stage);
            let payload =
                serde_json::to_value(&job).map_err(|e| RepoError::JobQueue(e.to_string()))?;
            let job_id = self.repo.jobs().publish(
                &self.repo.config().transition_job_name,
                payload,
                PublishOptions {
                    start_after: Some(at),
                },
            )?;
            tracing::info!(
                collection = self.name(),
                id = %key_of(id),
                stage = %options.stage,
                scheduled_at = %at,
                job_id = %job_id,
                "scheduled stage transition"
            );
            return Ok(TransitionOutcome::Scheduled {
                record: self.finish(record, ctx)?,
                job_id,
            });
        }

        let record = self.in_transaction("transition", |tx| {
            let record = self
                .load(&*tx, ctx, id, false)?
                .filter(|record| access.matches(record))
                .ok_or_else(|| RepoError::not_found(self.name(), id))?;
            self.append_version(tx, ctx, id, ChangeOperation::Transition, Some(&options.stage))?;
            definition.hooks.run_after_change(&AfterChange {
                collection: self.name(),
                operation: ChangeOperation::Transition,
                context: ctx,
                record: &record,
                original: Some(&record),
            })?;
            Ok(record)
        })?;
        tracing::info!(
            collection = self.name(),
            id = %key_of(id),
            stage = %options.stage,
            "stage transitioned"
        );
        Ok(TransitionOutcome::Applied(self.finish(record, ctx)?))
    }
}

impl Repository {
    /// Runs a job published by a scheduled transition.
    ///
    /// The target is re-checked when the job runs: a collection, stage or
    /// record that has since disappeared skips the job with a warning.
    ///
    /// # Arguments
    /// * `job_name` - Name the job was published under
    /// * `payload` - Job payload
    pub fn handle_job(&self, job_name: &str, payload: &Value) -> Result<JobOutcome> {
        if job_name != self.config().transition_job_name {
            return Err(RepoError::JobQueue(format!("unknown job '{job_name}'")));
        }
        let job: TransitionJob = serde_json::from_value(payload.clone())
            .map_err(|e| RepoError::JobQueue(format!("invalid transition payload: {e}")))?;
        let target = job
            .target_name()
            .ok_or_else(|| RepoError::JobQueue("transition payload names no target".into()))?;

        let skip = |reason: String| -> Result<JobOutcome> {
            tracing::warn!(job = job_name, collection = target, reason = %reason, "skipped transition job");
            Ok(JobOutcome::Skipped(reason))
        };

        let runtime = match self.runtime(target) {
            Ok(runtime) if runtime.is_global == (job.target == JobTarget::Global) => runtime,
            _ => return skip(format!("'{target}' is not registered")),
        };
        let collection = Collection::new(self, runtime);
        if collection.check_transition_stage(&job.stage).is_err() {
            return skip(format!("stage '{}' is not declared for '{target}'", job.stage));
        }

        let id = match job.target {
            JobTarget::Global => match collection.singleton_id()? {
                Some(id) => id,
                None => return skip(format!("global '{target}' has no record")),
            },
            JobTarget::Collection => job
                .record_id
                .clone()
                .ok_or_else(|| RepoError::JobQueue("transition payload has no recordId".into()))?,
        };

        let ctx = RequestContext::system();
        let view = self.store().read();
        let exists = collection.load(&view, &ctx, &id, false)?.is_some();
        drop(view);
        if !exists {
            return skip(format!("record '{}' no longer exists", key_of(&id)));
        }

        match collection.transition_stage(&ctx, &id, TransitionOptions::new(job.stage.clone()))? {
            TransitionOutcome::Applied(record) | TransitionOutcome::Scheduled { record, .. } => {
                Ok(JobOutcome::Applied(record))
            }
        }
    }
}
