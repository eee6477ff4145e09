//! Per-type job handlers.
//!
//! Each handler is a pure mapping from (job, catalog, model client) to a
//! structured result. Handlers resolve their own auxiliary inputs, call
//! the model exactly once, and return classified errors; retry decisions
//! belong to the worker pool alone.

use crate::db::catalog::WardrobeCatalog;
use crate::db::store::StoreError;
use crate::models::job::{Confidence, Job, JobType};
use crate::services::ai::{AiError, ModelClient};

mod catalog_image;
mod extract_label;
mod generate_outfit;
mod infer_item;
mod outfit_visualization;

/// Classified handler failure. Retry vs. terminal is a data decision made
/// by the pool from this classification, never control flow inside a
/// handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Worth re-queuing: provider timeouts, rate limits, storage blips.
    #[error("transient: {0}")]
    Transient(String),

    /// Never retried: bad input, missing subject data, contract failures.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<AiError> for HandlerError {
    fn from(e: AiError) -> Self {
        match e {
            AiError::Transient(msg) => Self::Transient(msg),
            AiError::Fatal(msg) => Self::Fatal(msg),
        }
    }
}

// A failed catalog read is an infrastructure blip, not bad input.
impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        Self::Transient(format!("catalog read failed: {e}"))
    }
}

/// Successful handler result, ready to persist on the job record.
#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub output: serde_json::Value,
    pub confidence: Option<Confidence>,
    pub model_name: String,
}

/// Dispatch a job to its handler by type. The closed enum makes an
/// unhandled type a compile error rather than a runtime one.
pub async fn run_handler(
    job: &Job,
    catalog: &dyn WardrobeCatalog,
    model: &dyn ModelClient,
) -> Result<HandlerOutput, HandlerError> {
    match job.job_type {
        JobType::CatalogImage => catalog_image::run(job, catalog, model).await,
        JobType::InferItem => infer_item::run(job, catalog, model).await,
        JobType::ExtractLabel => extract_label::run(job, catalog, model).await,
        JobType::GenerateOutfit => generate_outfit::run(job, catalog, model).await,
        JobType::GenerateOutfitVisualization => {
            outfit_visualization::run(job, catalog, model).await
        }
    }
}

/// The item a job operates on, or a fatal error for the wrong subject kind.
fn require_item_subject(job: &Job) -> Result<uuid::Uuid, HandlerError> {
    match job.subject {
        crate::models::job::SubjectRef::Item(id) => Ok(id),
        other => Err(HandlerError::Fatal(format!(
            "{} requires an item subject, got {other}",
            job.job_type
        ))),
    }
}

fn require_outfit_subject(job: &Job) -> Result<uuid::Uuid, HandlerError> {
    match job.subject {
        crate::models::job::SubjectRef::Outfit(id) => Ok(id),
        other => Err(HandlerError::Fatal(format!(
            "{} requires an outfit subject, got {other}",
            job.job_type
        ))),
    }
}

/// Validate that model-rendered bytes are a decodable image; anything
/// else is a provider contract failure.
fn require_image_bytes(bytes: &[u8]) -> Result<(), HandlerError> {
    image::guess_format(bytes)
        .map(|_| ())
        .map_err(|e| HandlerError::Fatal(format!("model returned non-image data: {e}")))
}
