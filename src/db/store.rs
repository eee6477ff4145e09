use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Confidence, Job, JobStatus, JobType, NewJob, SubjectRef};

/// Outcome of attempting the queued -> running claim for a delivered job.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The guarded transition succeeded; this worker owns the attempt.
    Claimed(Job),
    /// Another worker already holds a running attempt (duplicate delivery).
    AlreadyRunning,
    /// The job is terminal, missing, or out of attempts; drop the delivery.
    Unavailable,
}

/// Durable persistence for job records. The store is the single source of
/// truth for job state; every mutation is a status-guarded transition so
/// two workers can never both complete the same job under at-least-once
/// delivery.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list_jobs_for_subject(
        &self,
        subject: SubjectRef,
        job_type: Option<JobType>,
    ) -> Result<Vec<Job>, StoreError>;

    /// Compare-and-set queued -> running, counting one attempt. Refused if
    /// the row is not queued, if attempts are exhausted, or if another job
    /// for the same (subject, type) is already running.
    async fn claim_running(&self, id: Uuid) -> Result<ClaimOutcome, StoreError>;

    /// running -> succeeded (or needs_review). Clears any previous error.
    /// Returns false if the row was not in running (guard failed).
    async fn record_success(
        &self,
        id: Uuid,
        output: serde_json::Value,
        confidence: Option<Confidence>,
        model_name: &str,
        needs_review: bool,
    ) -> Result<bool, StoreError>;

    /// running -> failed, terminal. Sets completed_at.
    async fn record_failure(&self, id: Uuid, error: &str) -> Result<bool, StoreError>;

    /// running -> queued for a retryable failure, preserving the error
    /// message for observability until the next attempt clears it.
    async fn requeue(&self, id: Uuid, error: &str) -> Result<bool, StoreError>;

    /// needs_review -> succeeded or failed, by human decision.
    async fn resolve_review(&self, id: Uuid, accept: bool) -> Result<Option<Job>, StoreError>;

    /// Queued rows last touched before the cutoff; candidates for
    /// re-enqueue by the reconciliation sweep.
    async fn queued_jobs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError>;

    /// Return running rows abandoned before the cutoff (worker crash) to
    /// queued, or to failed when their attempts are exhausted. Returns the
    /// rows moved back to queued so the caller can re-enqueue them.
    async fn recover_stalled_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("corrupt job row: {0}")]
    Corrupt(String),
}

const JOB_COLUMNS: &str = "id, job_type, status, subject_kind, subject_id, input, attempts, \
     max_attempts, output, confidence, error, model_name, created_at, completed_at";

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let type_str: String = row.try_get("job_type")?;
    let job_type: JobType = type_str
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown job_type '{type_str}'")))?;

    let status_str: String = row.try_get("status")?;
    let status: JobStatus = status_str
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown status '{status_str}'")))?;

    let subject_kind: String = row.try_get("subject_kind")?;
    let subject_id: Uuid = row.try_get("subject_id")?;
    let subject = SubjectRef::from_parts(&subject_kind, subject_id)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown subject_kind '{subject_kind}'")))?;

    let confidence: Option<serde_json::Value> = row.try_get("confidence")?;
    let confidence = confidence
        .map(serde_json::from_value::<Confidence>)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("bad confidence payload: {e}")))?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type,
        status,
        subject,
        input: row.try_get("input")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        output: row.try_get("output")?,
        confidence,
        error: row.try_get("error")?,
        model_name: row.try_get("model_name")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Postgres-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ai_jobs (id, job_type, status, subject_kind, subject_id, input, max_attempts)
            VALUES ($1, $2, 'queued', $3, $4, $5, $6)
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(new.job_type.to_string())
        .bind(new.subject.kind())
        .bind(new.subject.id())
        .bind(&new.input)
        .bind(new.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ai_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs_for_subject(
        &self,
        subject: SubjectRef,
        job_type: Option<JobType>,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM ai_jobs
            WHERE subject_kind = $1 AND subject_id = $2
              AND ($3::text IS NULL OR job_type = $3)
            ORDER BY created_at DESC
            "#,
        ))
        .bind(subject.kind())
        .bind(subject.id())
        .bind(job_type.map(|t| t.to_string()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn claim_running(&self, id: Uuid) -> Result<ClaimOutcome, StoreError> {
        let claimed = sqlx::query(&format!(
            r#"
            UPDATE ai_jobs
            SET status = 'running', attempts = attempts + 1, started_at = NOW()
            WHERE id = $1 AND status = 'queued' AND attempts < max_attempts
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match claimed {
            Ok(Some(row)) => Ok(ClaimOutcome::Claimed(job_from_row(&row)?)),
            Ok(None) => {
                // Guard refused; classify by the current row status.
                let status: Option<String> =
                    sqlx::query_scalar("SELECT status FROM ai_jobs WHERE id = $1")
                        .bind(id)
                        .fetch_optional(&self.pool)
                        .await?;

                match status.as_deref() {
                    Some("running") => Ok(ClaimOutcome::AlreadyRunning),
                    _ => Ok(ClaimOutcome::Unavailable),
                }
            }
            // The partial unique index rejects a second running job for the
            // same (subject, type); treat it like a duplicate delivery.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(ClaimOutcome::AlreadyRunning)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record_success(
        &self,
        id: Uuid,
        output: serde_json::Value,
        confidence: Option<Confidence>,
        model_name: &str,
        needs_review: bool,
    ) -> Result<bool, StoreError> {
        let status = if needs_review {
            JobStatus::NeedsReview
        } else {
            JobStatus::Succeeded
        };
        let confidence_json = confidence
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("unserializable confidence: {e}")))?;

        let result = sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = $2,
                output = $3,
                confidence = $4,
                model_name = $5,
                error = NULL,
                completed_at = CASE WHEN $2 = 'succeeded' THEN NOW() ELSE completed_at END
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(output)
        .bind(confidence_json)
        .bind(model_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = 'failed', error = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = 'queued', error = $2
            WHERE id = $1 AND status = 'running' AND attempts < max_attempts
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn resolve_review(&self, id: Uuid, accept: bool) -> Result<Option<Job>, StoreError> {
        let status = if accept {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE ai_jobs
            SET status = $2,
                completed_at = NOW(),
                output = CASE WHEN $2 = 'failed' THEN NULL ELSE output END,
                confidence = CASE WHEN $2 = 'failed' THEN NULL ELSE confidence END,
                error = CASE WHEN $2 = 'failed' THEN 'rejected in review' ELSE error END
            WHERE id = $1 AND status = 'needs_review'
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn queued_jobs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM ai_jobs
            WHERE status = 'queued' AND COALESCE(started_at, created_at) < $1
            ORDER BY created_at ASC
            "#,
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn recover_stalled_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        // Exhausted rows cannot go back to queued; they fail terminally.
        sqlx::query(
            r#"
            UPDATE ai_jobs
            SET status = 'failed',
                error = 'worker lost mid-attempt; attempts exhausted',
                completed_at = NOW()
            WHERE status = 'running' AND started_at < $1 AND attempts >= max_attempts
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            UPDATE ai_jobs
            SET status = 'queued', error = 'worker lost mid-attempt'
            WHERE status = 'running' AND started_at < $1 AND attempts < max_attempts
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }
}
