//! Bounded worker pool: leases jobs from the broker, runs the matching
//! handler, and writes every status transition through the store's
//! guarded updates. This module is the only writer of job status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;

use crate::db::catalog::WardrobeCatalog;
use crate::db::store::{ClaimOutcome, JobStore, StoreError};
use crate::models::job::{Confidence, Job, JobType};
use crate::services::ai::ModelClient;
use crate::services::handlers::{run_handler, HandlerError, HandlerOutput};
use crate::services::queue::{JobBroker, LeasedJob, QueueError};
use crate::services::retry::{should_retry, RetryPolicy};

/// Per-type confidence thresholds below which a successful result is
/// held for human review instead of auto-succeeding.
#[derive(Debug, Clone)]
pub struct ReviewPolicy {
    pub default_threshold: f64,
    pub per_type: HashMap<JobType, f64>,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            default_threshold: 0.6,
            per_type: HashMap::new(),
        }
    }
}

impl ReviewPolicy {
    pub fn with_default_threshold(threshold: f64) -> Self {
        Self {
            default_threshold: threshold,
            per_type: HashMap::new(),
        }
    }

    pub fn threshold_for(&self, job_type: JobType) -> f64 {
        self.per_type
            .get(&job_type)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Results without confidence scoring (image renders) auto-succeed.
    pub fn needs_review(&self, job_type: JobType, confidence: Option<&Confidence>) -> bool {
        confidence
            .map(|c| c.overall < self.threshold_for(job_type))
            .unwrap_or(false)
    }
}

/// Pool tuning knobs, all fixed configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub handler_timeout: Duration,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            handler_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Fixed-size pool of concurrent job executors. Concurrency is bounded by
/// the number of outstanding leases; a full pool delays new leases rather
/// than rejecting work, which is the backpressure toward the rate-limited
/// provider.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn JobBroker>,
    catalog: Arc<dyn WardrobeCatalog>,
    model: Arc<dyn ModelClient>,
    retry: RetryPolicy,
    review: ReviewPolicy,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn JobBroker>,
        catalog: Arc<dyn WardrobeCatalog>,
        model: Arc<dyn ModelClient>,
        retry: RetryPolicy,
        review: ReviewPolicy,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            store,
            broker,
            catalog,
            model,
            retry,
            review,
            config,
        }
    }

    /// Run `concurrency` lease loops until the process is stopped.
    pub async fn run(self: Arc<Self>) {
        let loops = (0..self.config.concurrency).map(|slot| {
            let pool = Arc::clone(&self);
            let worker_id = format!("worker-{slot}");
            async move {
                tracing::info!(%worker_id, "Worker slot started");
                loop {
                    match pool.process_next(&worker_id).await {
                        Ok(true) => {}
                        Ok(false) => sleep(pool.config.poll_interval).await,
                        Err(e) => {
                            tracing::error!(%worker_id, error = %e, "Error processing job, backing off");
                            sleep(pool.config.poll_interval).await;
                        }
                    }
                }
            }
        });

        join_all(loops).await;
    }

    /// Lease and process at most one job. Returns Ok(true) if a delivery
    /// was handled, Ok(false) if the queue was empty.
    pub async fn process_next(&self, worker_id: &str) -> Result<bool, WorkerError> {
        let lease = match self
            .broker
            .lease(worker_id, self.config.visibility_timeout)
            .await?
        {
            Some(lease) => lease,
            None => {
                if let Ok(depth) = self.broker.queue_depth().await {
                    metrics::gauge!("ai_jobs_queue_depth").set(depth as f64);
                }
                return Ok(false);
            }
        };

        self.process_lease(worker_id, lease).await?;
        Ok(true)
    }

    async fn process_lease(&self, worker_id: &str, lease: LeasedJob) -> Result<(), WorkerError> {
        let job_id = lease.payload.job_id;

        let job = match self.store.claim_running(job_id).await? {
            ClaimOutcome::Claimed(job) => job,
            ClaimOutcome::AlreadyRunning => {
                // Duplicate delivery: another attempt is live. Hand the
                // delivery back after a beat; no attempt was counted.
                tracing::debug!(%worker_id, %job_id, "Duplicate delivery, releasing lease");
                self.broker
                    .release(&lease, self.config.poll_interval)
                    .await?;
                return Ok(());
            }
            ClaimOutcome::Unavailable => {
                // Terminal, missing, or out of attempts: drop the delivery
                // so finished work never circulates again.
                tracing::debug!(%worker_id, %job_id, "Job not claimable, dropping delivery");
                self.broker.complete(&lease).await?;
                return Ok(());
            }
        };

        tracing::info!(
            %worker_id,
            %job_id,
            job_type = %job.job_type,
            subject = %job.subject,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        let started = std::time::Instant::now();
        let outcome = match tokio::time::timeout(
            self.config.handler_timeout,
            run_handler(&job, self.catalog.as_ref(), self.model.as_ref()),
        )
        .await
        {
            Ok(result) => result,
            // A stuck provider call must not occupy a worker slot forever.
            Err(_) => Err(HandlerError::Transient(format!(
                "handler exceeded {}s deadline",
                self.config.handler_timeout.as_secs()
            ))),
        };
        metrics::histogram!("ai_job_processing_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => self.finish_success(worker_id, &job, &lease, result).await,
            Err(error) => self.finish_failure(worker_id, &job, &lease, error).await,
        }
    }

    async fn finish_success(
        &self,
        worker_id: &str,
        job: &Job,
        lease: &LeasedJob,
        result: HandlerOutput,
    ) -> Result<(), WorkerError> {
        let needs_review = self
            .review
            .needs_review(job.job_type, result.confidence.as_ref());

        let recorded = self
            .store
            .record_success(
                job.id,
                result.output,
                result.confidence,
                &result.model_name,
                needs_review,
            )
            .await?;

        if !recorded {
            // The guard refused: the row left running behind our back
            // (e.g. a reconciliation sweep). The result is discarded.
            tracing::warn!(%worker_id, job_id = %job.id, "Success write refused by status guard");
            self.broker.complete(lease).await?;
            return Ok(());
        }

        self.broker.complete(lease).await?;

        if needs_review {
            metrics::counter!("ai_jobs_review_total").increment(1);
        } else {
            metrics::counter!("ai_jobs_succeeded_total").increment(1);
        }

        tracing::info!(
            %worker_id,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            needs_review,
            "Job completed"
        );
        Ok(())
    }

    async fn finish_failure(
        &self,
        worker_id: &str,
        job: &Job,
        lease: &LeasedJob,
        error: HandlerError,
    ) -> Result<(), WorkerError> {
        let message = error.to_string();

        if should_retry(job.attempts, job.max_attempts, &error) {
            let delay = self.retry.backoff_delay(job.attempts);
            let requeued = self.store.requeue(job.id, &message).await?;
            if requeued {
                self.broker.release(lease, delay).await?;
                metrics::counter!("ai_jobs_retried_total").increment(1);
                tracing::info!(
                    %worker_id,
                    job_id = %job.id,
                    attempt = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Job re-queued for retry"
                );
            } else {
                tracing::warn!(%worker_id, job_id = %job.id, "Requeue refused by status guard");
                self.broker.complete(lease).await?;
            }
            return Ok(());
        }

        let recorded = self.store.record_failure(job.id, &message).await?;
        if !recorded {
            tracing::warn!(%worker_id, job_id = %job.id, "Failure write refused by status guard");
        }
        self.broker.complete(lease).await?;
        metrics::counter!("ai_jobs_failed_total").increment(1);

        tracing::warn!(
            %worker_id,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            error = %message,
            "Job failed terminally"
        );
        Ok(())
    }
}
