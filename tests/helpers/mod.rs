//! In-memory doubles for the pipeline's collaborator seams, so the
//! worker-pool scenarios run without live Postgres/Redis/provider.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use wardrobe_jobs::db::catalog::WardrobeCatalog;
use wardrobe_jobs::db::store::{ClaimOutcome, JobStore, StoreError};
use wardrobe_jobs::models::job::{Confidence, Job, JobStatus, JobType, NewJob, SubjectRef};
use wardrobe_jobs::models::wardrobe::{ItemProfile, OutfitContext};
use wardrobe_jobs::services::ai::{AiError, ModelClient};
use wardrobe_jobs::services::queue::{JobBroker, LeasedJob, QueuedPayload, QueueError};

/// Enough of a PNG that `image::guess_format` accepts it.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

// ---------------------------------------------------------------------------
// Job store

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    started: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let job = Job {
            id: Uuid::new_v4(),
            job_type: new.job_type,
            status: JobStatus::Queued,
            subject: new.subject,
            input: new.input,
            attempts: 0,
            max_attempts: new.max_attempts,
            output: None,
            confidence: None,
            error: None,
            model_name: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn list_jobs_for_subject(
        &self,
        subject: SubjectRef,
        job_type: Option<JobType>,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.subject == subject && job_type.map(|t| j.job_type == t).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| std::cmp::Reverse(j.created_at));
        Ok(jobs)
    }

    async fn claim_running(&self, id: Uuid) -> Result<ClaimOutcome, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();

        let Some(job) = jobs.get(&id) else {
            return Ok(ClaimOutcome::Unavailable);
        };

        match job.status {
            JobStatus::Running => Ok(ClaimOutcome::AlreadyRunning),
            JobStatus::Queued if job.attempts < job.max_attempts => {
                let duplicate_running = jobs.values().any(|other| {
                    other.id != id
                        && other.status == JobStatus::Running
                        && other.subject == job.subject
                        && other.job_type == job.job_type
                });
                if duplicate_running {
                    return Ok(ClaimOutcome::AlreadyRunning);
                }

                let job = jobs.get_mut(&id).unwrap();
                job.status = JobStatus::Running;
                job.attempts += 1;
                self.started.lock().unwrap().insert(id, Utc::now());
                Ok(ClaimOutcome::Claimed(job.clone()))
            }
            _ => Ok(ClaimOutcome::Unavailable),
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
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }

        job.status = if needs_review {
            JobStatus::NeedsReview
        } else {
            JobStatus::Succeeded
        };
        job.output = Some(output);
        job.confidence = confidence;
        job.model_name = Some(model_name.to_string());
        job.error = None;
        if !needs_review {
            job.completed_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }

        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn requeue(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Running || job.attempts >= job.max_attempts {
            return Ok(false);
        }

        job.status = JobStatus::Queued;
        job.error = Some(error.to_string());
        Ok(true)
    }

    async fn resolve_review(&self, id: Uuid, accept: bool) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::NeedsReview {
            return Ok(None);
        }

        if accept {
            job.status = JobStatus::Succeeded;
        } else {
            job.status = JobStatus::Failed;
            job.output = None;
            job.confidence = None;
            job.error = Some("rejected in review".to_string());
        }
        job.completed_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn queued_jobs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let started = self.started.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Queued
                    && *started.get(&j.id).unwrap_or(&j.created_at) < cutoff
            })
            .cloned()
            .collect())
    }

    async fn recover_stalled_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let started = self.started.lock().unwrap();
        let mut recovered = Vec::new();

        for job in jobs.values_mut() {
            if job.status != JobStatus::Running {
                continue;
            }
            let Some(started_at) = started.get(&job.id) else {
                continue;
            };
            if *started_at >= cutoff {
                continue;
            }

            if job.attempts < job.max_attempts {
                job.status = JobStatus::Queued;
                job.error = Some("worker lost mid-attempt".to_string());
                recovered.push(job.clone());
            } else {
                job.status = JobStatus::Failed;
                job.error = Some("worker lost mid-attempt; attempts exhausted".to_string());
                job.completed_at = Some(Utc::now());
            }
        }

        Ok(recovered)
    }
}

// ---------------------------------------------------------------------------
// Broker

#[derive(Default)]
struct BrokerState {
    queue: VecDeque<String>,
    inflight: HashMap<String, (String, DateTime<Utc>)>,
    delayed: Vec<(String, DateTime<Utc>)>,
    dead: Vec<String>,
}

#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    fail_enqueue: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next enqueue calls fail, to exercise the record-first
    /// submit ordering.
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    pub fn dead_letters(&self) -> Vec<String> {
        self.state.lock().unwrap().dead.clone()
    }

    pub fn enqueue_raw(&self, raw: &str) {
        self.state.lock().unwrap().queue.push_back(raw.to_string());
    }

    fn redeliver_due(state: &mut BrokerState) {
        let now = Utc::now();

        let (due, pending): (Vec<_>, Vec<_>) = state
            .delayed
            .drain(..)
            .partition(|(_, ready_at)| *ready_at <= now);
        state.delayed = pending;
        for (raw, _) in due {
            state.queue.push_back(raw);
        }

        let expired: Vec<String> = state
            .inflight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some((raw, _)) = state.inflight.remove(&token) {
                state.queue.push_back(raw);
            }
        }
    }
}

#[async_trait]
impl JobBroker for MemoryBroker {
    async fn enqueue(&self, payload: &QueuedPayload) -> Result<(), QueueError> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(QueueError::Serialize(
                <serde_json::Error as serde::de::Error>::custom("enqueue unavailable"),
            ));
        }
        let raw = serde_json::to_string(payload)?;
        self.state.lock().unwrap().queue.push_back(raw);
        Ok(())
    }

    async fn lease(
        &self,
        _worker_id: &str,
        visibility: Duration,
    ) -> Result<Option<LeasedJob>, QueueError> {
        let mut state = self.state.lock().unwrap();
        Self::redeliver_due(&mut state);

        loop {
            let Some(raw) = state.queue.pop_front() else {
                return Ok(None);
            };

            let payload: QueuedPayload = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(_) => {
                    state.dead.push(raw);
                    continue;
                }
            };

            let token = Uuid::new_v4().to_string();
            let deadline =
                Utc::now() + chrono::Duration::from_std(visibility).unwrap_or_else(|_| chrono::Duration::zero());
            state.inflight.insert(token.clone(), (raw.clone(), deadline));

            return Ok(Some(LeasedJob {
                token,
                payload,
                raw,
            }));
        }
    }

    async fn complete(&self, lease: &LeasedJob) -> Result<(), QueueError> {
        self.state.lock().unwrap().inflight.remove(&lease.token);
        Ok(())
    }

    async fn release(&self, lease: &LeasedJob, delay: Duration) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.inflight.remove(&lease.token);
        if delay.is_zero() {
            state.queue.push_back(lease.raw.clone());
        } else {
            let ready_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            state.delayed.push((lease.raw.clone(), ready_at));
        }
        Ok(())
    }

    async fn deadletter(&self, lease: &LeasedJob) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.inflight.remove(&lease.token);
        state.dead.push(lease.raw.clone());
        Ok(())
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().unwrap().queue.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catalog

#[derive(Default)]
pub struct MemoryCatalog {
    items: Mutex<HashMap<Uuid, ItemProfile>>,
    images: Mutex<HashMap<(Uuid, String), Vec<u8>>>,
    outfits: Mutex<HashMap<Uuid, (Option<String>, Option<String>, Vec<Uuid>)>>,
    rendered: Mutex<Vec<(SubjectRef, Vec<u8>)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, name: &str, category: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.items.lock().unwrap().insert(
            id,
            ItemProfile {
                id,
                name: name.to_string(),
                category: Some(category.to_string()),
                subcategory: None,
                brand: None,
                colors: vec!["black".to_string()],
                notes: None,
            },
        );
        id
    }

    pub fn add_image(&self, item_id: Uuid, kind: &str, bytes: Vec<u8>) {
        self.images
            .lock()
            .unwrap()
            .insert((item_id, kind.to_string()), bytes);
    }

    pub fn add_outfit(&self, occasion: Option<&str>, item_ids: Vec<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.outfits.lock().unwrap().insert(
            id,
            (None, occasion.map(str::to_string), item_ids),
        );
        id
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered.lock().unwrap().len()
    }
}

#[async_trait]
impl WardrobeCatalog for MemoryCatalog {
    async fn item_profile(&self, item_id: Uuid) -> Result<Option<ItemProfile>, StoreError> {
        Ok(self.items.lock().unwrap().get(&item_id).cloned())
    }

    async fn item_image(&self, item_id: Uuid, kind: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .get(&(item_id, kind.to_string()))
            .cloned())
    }

    async fn outfit_context(&self, outfit_id: Uuid) -> Result<Option<OutfitContext>, StoreError> {
        let outfits = self.outfits.lock().unwrap();
        let Some((title, occasion, item_ids)) = outfits.get(&outfit_id) else {
            return Ok(None);
        };
        let items = self.items.lock().unwrap();
        Ok(Some(OutfitContext {
            id: outfit_id,
            title: title.clone(),
            occasion: occasion.clone(),
            items: item_ids
                .iter()
                .filter_map(|id| items.get(id).cloned())
                .collect(),
        }))
    }

    async fn wardrobe_items(&self) -> Result<Vec<ItemProfile>, StoreError> {
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn save_rendered_image(
        &self,
        subject: SubjectRef,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        self.rendered
            .lock()
            .unwrap()
            .push((subject, bytes.to_vec()));
        Ok(format!("rendered/{}", Uuid::new_v4()))
    }
}

// ---------------------------------------------------------------------------
// Model client

/// Scripted model: pops one canned outcome per call, counting calls so
/// tests can assert exactly-one-call-per-attempt.
#[derive(Default)]
pub struct ScriptedModel {
    completions: Mutex<VecDeque<Result<serde_json::Value, AiError>>>,
    renders: Mutex<VecDeque<Result<Vec<u8>, AiError>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, outcome: Result<serde_json::Value, AiError>) {
        self.completions.lock().unwrap().push_back(outcome);
    }

    pub fn push_render(&self, outcome: Result<Vec<u8>, AiError>) {
        self.renders.lock().unwrap().push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-model-1"
    }

    async fn complete_json(
        &self,
        _prompt: &str,
        _images: &[Vec<u8>],
    ) -> Result<serde_json::Value, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::Fatal("no scripted completion".into())))
    }

    async fn render_image(
        &self,
        _prompt: &str,
        _references: &[Vec<u8>],
    ) -> Result<Vec<u8>, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.renders
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::Fatal("no scripted render".into())))
    }
}

/// A well-formed infer_item model response with uniform confidence.
pub fn infer_response(confidence: f64) -> serde_json::Value {
    serde_json::json!({
        "attributes": {
            "category": "tops",
            "subcategory": "t-shirt",
            "colors": ["black"],
            "pattern": "solid",
            "material": "cotton",
            "seasons": ["summer"],
            "formality": "casual"
        },
        "confidence": {
            "category": confidence,
            "colors": confidence,
            "material": confidence,
        }
    })
}

/// Invariants every job record must satisfy at rest.
pub fn assert_job_invariants(job: &Job) {
    assert!(
        job.attempts <= job.max_attempts,
        "attempts {} exceeded ceiling {}",
        job.attempts,
        job.max_attempts
    );

    let has_result = job.output.is_some();
    let result_allowed = matches!(job.status, JobStatus::Succeeded | JobStatus::NeedsReview);
    assert_eq!(
        has_result, result_allowed,
        "output present ({has_result}) must match status {:?}",
        job.status
    );
    if job.confidence.is_some() {
        assert!(result_allowed, "confidence present in status {:?}", job.status);
    }

    if job.completed_at.is_some() {
        assert!(
            job.status.is_terminal(),
            "completed_at set in non-terminal status {:?}",
            job.status
        );
    }
}
