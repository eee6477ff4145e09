use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{Job, JobType, SubjectRef};

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub job_type: JobType,
    pub subject: SubjectRef,
    #[serde(default)]
    pub input: serde_json::Value,
    pub max_attempts: Option<i32>,
}

/// POST /api/v1/jobs — submit an AI job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Job>), StatusCode> {
    let job = state
        .producer
        .submit(req.job_type, req.subject, req.input, req.max_attempts)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to submit job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/jobs/:job_id — job status and result, for UI polling.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, StatusCode> {
    let job = state
        .producer
        .get_job(job_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(job))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub job_type: Option<JobType>,
}

/// GET /api/v1/subjects/:kind/:id/jobs — all jobs for a domain entity.
pub async fn list_jobs_for_subject(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Job>>, StatusCode> {
    let subject = SubjectRef::from_parts(&kind, id).ok_or(StatusCode::BAD_REQUEST)?;

    let jobs = state
        .producer
        .list_jobs_for_subject(subject, params.job_type)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list jobs");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(jobs))
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub accept: bool,
}

/// POST /api/v1/jobs/:job_id/review — resolve a needs_review job.
pub async fn resolve_review(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<Job>, StatusCode> {
    let job = state
        .producer
        .resolve_review(job_id, req.accept)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to resolve review");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        // Not found, or not awaiting review.
        .ok_or(StatusCode::CONFLICT)?;

    Ok(Json(job))
}
