//! Producer side of the pipeline: create the durable record, then hand
//! delivery to the broker. Record-first ordering means a crash between
//! the two steps leaves a queued row the reconciliation sweep can
//! re-enqueue, never an orphaned queue entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::job::{Job, JobType, NewJob, SubjectRef};
use crate::services::queue::{JobBroker, QueuedPayload, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What a reconciliation sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Running rows abandoned by a lost worker, returned to the queue.
    pub recovered_running: usize,
    /// Stale queued rows re-enqueued (lost between record and enqueue,
    /// or whose delivery disappeared).
    pub requeued_stale: usize,
}

/// Entry point for submitting AI jobs.
pub struct Producer {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn JobBroker>,
    default_max_attempts: i32,
}

impl Producer {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn JobBroker>,
        default_max_attempts: i32,
    ) -> Self {
        Self {
            store,
            broker,
            default_max_attempts,
        }
    }

    /// Create the job record in `queued`, then enqueue it. An enqueue
    /// failure is not fatal to the submission: the record stays queued
    /// and `reconcile` will re-enqueue it.
    pub async fn submit(
        &self,
        job_type: JobType,
        subject: SubjectRef,
        input: serde_json::Value,
        max_attempts: Option<i32>,
    ) -> Result<Job, StoreError> {
        let job = self
            .store
            .create_job(NewJob {
                job_type,
                subject,
                input,
                max_attempts: max_attempts.unwrap_or(self.default_max_attempts).max(1),
            })
            .await?;

        metrics::counter!("ai_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job.id,
            %job_type,
            %subject,
            max_attempts = job.max_attempts,
            "Job submitted"
        );

        if let Err(e) = self.enqueue_job(&job).await {
            tracing::warn!(
                job_id = %job.id,
                error = %e,
                "Enqueue failed; record left queued for reconciliation"
            );
        }

        Ok(job)
    }

    async fn enqueue_job(&self, job: &Job) -> Result<(), QueueError> {
        self.broker
            .enqueue(&QueuedPayload {
                job_id: job.id,
                job_type: job.job_type,
            })
            .await
    }

    /// Re-deliver work the queue lost track of: running rows abandoned
    /// longer than `stall_cutoff` ago and queued rows untouched for as
    /// long. Duplicate deliveries this may cause are harmless; the
    /// store's guarded claim rejects them.
    pub async fn reconcile(&self, stall_cutoff: Duration) -> Result<ReconcileReport, ProducerError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stall_cutoff).unwrap_or(chrono::Duration::zero());

        let mut report = ReconcileReport::default();

        for job in self.store.recover_stalled_running(cutoff).await? {
            self.enqueue_job(&job).await?;
            report.recovered_running += 1;
            tracing::warn!(job_id = %job.id, "Recovered job abandoned by lost worker");
        }

        for job in self.store.queued_jobs_older_than(cutoff).await? {
            self.enqueue_job(&job).await?;
            report.requeued_stale += 1;
            tracing::info!(job_id = %job.id, "Re-enqueued stale queued job");
        }

        Ok(report)
    }

    /// Read-only status lookup, for polling surfaces.
    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.store.get_job(id).await
    }

    /// Read-only listing of a subject's jobs, optionally by type.
    pub async fn list_jobs_for_subject(
        &self,
        subject: SubjectRef,
        job_type: Option<JobType>,
    ) -> Result<Vec<Job>, StoreError> {
        self.store.list_jobs_for_subject(subject, job_type).await
    }

    /// Human review decision on a `needs_review` job.
    pub async fn resolve_review(
        &self,
        id: Uuid,
        accept: bool,
    ) -> Result<Option<Job>, StoreError> {
        let resolved = self.store.resolve_review(id, accept).await?;
        if let Some(job) = &resolved {
            tracing::info!(job_id = %job.id, accept, status = %job.status, "Review resolved");
        }
        Ok(resolved)
    }
}
