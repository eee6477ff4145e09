use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of AI work a job performs. Determines which handler executes
/// and what input/output shapes are expected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    CatalogImage,
    InferItem,
    ExtractLabel,
    GenerateOutfit,
    GenerateOutfitVisualization,
}

/// Status of an AI job in the async pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    NeedsReview,
}

impl JobStatus {
    /// Terminal statuses are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Legal transitions of the job state machine.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, Running)
                | (Running, Succeeded)
                | (Running, NeedsReview)
                | (Running, Queued)
                | (Running, Failed)
                | (NeedsReview, Succeeded)
                | (NeedsReview, Failed)
        )
    }
}

/// Reference to the domain entity a job operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SubjectRef {
    Item(Uuid),
    Outfit(Uuid),
}

impl SubjectRef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Item(_) => "item",
            Self::Outfit(_) => "outfit",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Item(id) | Self::Outfit(id) => *id,
        }
    }

    /// Reassemble from the two persisted columns.
    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "item" => Some(Self::Item(id)),
            "outfit" => Some(Self::Outfit(id)),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Confidence scoring attached to a successful result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// Aggregate score in [0.0, 1.0].
    pub overall: f64,
    /// Per-field scores, keyed by output field name.
    #[serde(default)]
    pub fields: BTreeMap<String, f64>,
}

impl Confidence {
    /// Build from per-field scores. The aggregate is the weakest field,
    /// so one dubious attribute is enough to route a result to review.
    pub fn from_fields(fields: BTreeMap<String, f64>) -> Self {
        let overall = fields
            .values()
            .copied()
            .fold(1.0, f64::min)
            .clamp(0.0, 1.0);
        Self { overall, fields }
    }
}

/// An AI job record. The store row is the single source of truth for
/// job state; the queue only carries delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub subject: SubjectRef,
    /// Parameters needed to (re)run the job; survives process restarts.
    pub input: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub output: Option<serde_json::Value>,
    pub confidence: Option<Confidence>,
    pub error: Option<String>,
    pub model_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether another execution attempt may be started.
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Parameters for creating a job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub subject: SubjectRef,
    pub input: serde_json::Value,
    pub max_attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_exits() {
        for target in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::NeedsReview,
        ] {
            assert!(!JobStatus::Succeeded.can_transition_to(target));
            assert!(!JobStatus::Failed.can_transition_to(target));
        }
    }

    #[test]
    fn running_can_requeue_but_queued_cannot_complete() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn job_type_round_trips_through_strings() {
        let t: JobType = "generate_outfit_visualization".parse().unwrap();
        assert_eq!(t, JobType::GenerateOutfitVisualization);
        assert_eq!(JobType::InferItem.to_string(), "infer_item");
    }

    #[test]
    fn confidence_uses_weakest_field() {
        let fields = BTreeMap::from([
            ("category".to_string(), 0.95),
            ("material".to_string(), 0.4),
        ]);
        let c = Confidence::from_fields(fields);
        assert_eq!(c.overall, 0.4);
    }
}
