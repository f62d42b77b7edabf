//! In-memory doubles for the service seams, shared by unit tests across modules.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::llm_client::embeddings::Embedder;
use crate::llm_client::{LlmError, TextModel};
use crate::models::candidate::{CandidateMatch, CandidateRow, Classification, NewCandidate};
use crate::models::ranking_job::{RankingJobRow, RankingJobStatus};
use crate::store::{CandidateStore, ObjectStore, RankingJobStore, StorageError, StoreError};

/// Plain-text resume body long enough to pass the minimum-text gate.
pub fn resume_text(name: &str, email: &str) -> String {
    format!(
        "{name}\n{email}\nSoftware Engineer with seven years building backend services \
         in Rust and Go. Led migration of billing platform to event sourcing."
    )
}

/// A well-formed extraction response for `name` / `email`.
pub fn resume_json(name: &str, email: &str) -> String {
    serde_json::json!({
        "name": name,
        "email": email,
        "phone": null,
        "role": "Software Engineer",
        "experience": 7,
        "skills": ["Rust", "Go"],
        "summary": "Backend engineer.",
        "location": "Lisbon, Portugal",
        "willing_to_relocate": false
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Replays a fixed script of responses, one per call, recording every prompt.
/// Once the script runs out every call fails with a 500.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn throttled() -> LlmError {
        LlmError::Throttled {
            status: 429,
            message: "rate limited".to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _system: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(LlmError::Api {
                    status: 500,
                    message: "script exhausted".to_string(),
                })
            })
    }
}

/// Returns the same vector for every input, or a fixed error.
pub struct FixedEmbedder {
    vector: Option<Vec<f32>>,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            vector: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vector.clone().ok_or(LlmError::Api {
            status: 503,
            message: "embedding service unavailable".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectStore {
    stored: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    fail_uploads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    /// Keys currently present (uploaded and not removed).
    pub fn stored_keys(&self) -> Vec<String> {
        self.stored.lock().unwrap().clone()
    }

    pub fn removed_keys(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        key: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Upload {
                key: key.to_string(),
                message: "bucket unavailable".to_string(),
            });
        }
        self.stored.lock().unwrap().push(key.to_string());
        Ok(key.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!("http://storage.test/resumes-bucket/{path}")
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        self.stored.lock().unwrap().retain(|k| !keys.contains(k));
        self.removed.lock().unwrap().extend(keys.iter().cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Candidate store
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StoredCandidate {
    id: Uuid,
    candidate: NewCandidate,
    match_score: Option<f64>,
    justification: Option<String>,
    embedding: Option<Vec<f32>>,
    location_checked: bool,
}

impl StoredCandidate {
    fn row(&self) -> CandidateRow {
        let c = &self.candidate;
        CandidateRow {
            id: self.id,
            name: c.name.clone(),
            email: c.email.clone(),
            phone: c.phone.clone(),
            role: c.role.clone(),
            experience: c.experience,
            skills: c.skills.clone(),
            summary: c.summary.clone(),
            resume_text: c.resume_text.clone(),
            status: c.status.as_str().to_string(),
            source: c.source.clone(),
            source_url: c.source_url.clone(),
            resume_url: c.resume_url.clone(),
            applied_date: c.applied_date,
            match_score: self.match_score,
            ai_justification: self.justification.clone(),
            location: c.location.clone(),
            willing_to_relocate: c.willing_to_relocate,
            position: c.classification.position.clone(),
            job_opening: c.classification.job_opening.clone(),
            domain: c.classification.domain.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Enforces one candidate per (case-insensitive) email, like the unique index.
#[derive(Default)]
pub struct MemoryCandidateStore {
    rows: Mutex<Vec<StoredCandidate>>,
    insert_failure: Mutex<Option<String>>,
    lookup_blind: AtomicBool,
    resolve_fails: AtomicBool,
    match_calls: Mutex<Vec<(f64, i64)>>,
}

impl MemoryCandidateStore {
    pub fn rows(&self) -> Vec<NewCandidate> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.candidate.clone())
            .collect()
    }

    pub fn fail_inserts(&self, message: &str) {
        *self.insert_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Makes `find_id_by_email` miss, so only the unique constraint can catch duplicates.
    pub fn blind_lookups(&self) {
        self.lookup_blind.store(true, Ordering::SeqCst);
    }

    pub fn fail_resolution(&self) {
        self.resolve_fails.store(true, Ordering::SeqCst);
    }

    pub fn seed(&self, candidate: NewCandidate) -> Uuid {
        let id = Uuid::new_v4();
        self.rows.lock().unwrap().push(StoredCandidate {
            id,
            candidate,
            match_score: None,
            justification: None,
            embedding: None,
            location_checked: false,
        });
        id
    }

    pub fn score_of(&self, id: Uuid) -> Option<(f64, String)> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| Some((r.match_score?, r.justification.clone()?)))
    }

    pub fn embedding_of(&self, id: Uuid) -> Option<Vec<f32>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.embedding.clone())
    }

    pub fn set_embedding_sync(&self, id: Uuid, embedding: Vec<f32>) {
        if let Some(r) = self.rows.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.embedding = Some(embedding);
        }
    }

    pub fn match_calls(&self) -> Vec<(f64, i64)> {
        self.match_calls.lock().unwrap().clone()
    }

    pub fn location_of(&self, id: Uuid) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.candidate.location.clone())
    }
}

pub fn sample_candidate(name: &str, email: &str) -> NewCandidate {
    NewCandidate {
        name: name.to_string(),
        email: email.to_string(),
        phone: None,
        role: "Software Engineer".to_string(),
        experience: 5,
        skills: vec!["Rust".to_string()],
        summary: "Backend engineer.".to_string(),
        resume_text: resume_text(name, email),
        status: crate::models::candidate::CandidateStatus::New,
        source: crate::models::candidate::source::BULK_UPLOAD.to_string(),
        source_url: None,
        resume_url: None,
        applied_date: Utc::now().date_naive(),
        location: None,
        willing_to_relocate: None,
        classification: Classification::default(),
    }
}

fn matches_filter(c: &NewCandidate, filter: &Classification) -> bool {
    fn eq(field: &Option<String>, wanted: &Option<String>) -> bool {
        wanted.is_none() || field == wanted
    }
    eq(&c.classification.position, &filter.position)
        && eq(&c.classification.job_opening, &filter.job_opening)
        && eq(&c.classification.domain, &filter.domain)
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        f64::from(dot / (na * nb))
    }
}

#[async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn find_id_by_email(&self, email: &str) -> Result<Option<Uuid>, StoreError> {
        if self.lookup_blind.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.candidate.email.eq_ignore_ascii_case(email))
            .map(|r| r.id))
    }

    async fn insert(&self, candidate: &NewCandidate) -> Result<Uuid, StoreError> {
        if let Some(message) = self.insert_failure.lock().unwrap().clone() {
            return Err(StoreError::Database(sqlx::Error::Protocol(message)));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|r| r.candidate.email.eq_ignore_ascii_case(&candidate.email))
        {
            return Err(StoreError::Duplicate(format!(
                "duplicate key value violates unique constraint (email {})",
                candidate.email
            )));
        }
        let id = Uuid::new_v4();
        rows.push(StoredCandidate {
            id,
            candidate: candidate.clone(),
            match_score: None,
            justification: None,
            embedding: None,
            location_checked: false,
        });
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CandidateRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .map(StoredCandidate::row))
    }

    async fn resolve_ids(&self, filter: &Classification) -> Result<Vec<Uuid>, StoreError> {
        if self.resolve_fails.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches_filter(&r.candidate, filter))
            .map(|r| r.id)
            .collect())
    }

    async fn update_match(
        &self,
        id: Uuid,
        score: f64,
        justification: &str,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("candidate {id}")))?;
        row.match_score = Some(score);
        row.justification = Some(justification.to_string());
        Ok(())
    }

    async fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<(), StoreError> {
        self.set_embedding_sync(id, embedding.to_vec());
        Ok(())
    }

    async fn match_by_embedding(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<CandidateMatch>, StoreError> {
        self.match_calls.lock().unwrap().push((threshold, limit));
        let mut hits: Vec<CandidateMatch> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| {
                let similarity = cosine(r.embedding.as_deref()?, embedding);
                (similarity > threshold).then(|| CandidateMatch {
                    id: r.id,
                    name: r.candidate.name.clone(),
                    email: r.candidate.email.clone(),
                    role: r.candidate.role.clone(),
                    experience: r.candidate.experience,
                    skills: r.candidate.skills.clone(),
                    summary: r.candidate.summary.clone(),
                    similarity,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(hits)
    }

    async fn missing_location(&self, limit: i64) -> Result<Vec<CandidateRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.candidate.location.is_none()
                    && !r.location_checked
                    && !r.candidate.resume_text.is_empty()
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .map(StoredCandidate::row)
            .collect())
    }

    async fn set_location(
        &self,
        id: Uuid,
        location: Option<&str>,
        willing_to_relocate: Option<bool>,
    ) -> Result<(), StoreError> {
        if let Some(r) = self.rows.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.candidate.location = location.map(str::to_string);
            r.location_checked = true;
            if willing_to_relocate.is_some() {
                r.candidate.willing_to_relocate = willing_to_relocate;
            }
        }
        Ok(())
    }

    async fn ranked(&self, limit: i64) -> Result<Vec<CandidateRow>, StoreError> {
        let mut rows: Vec<CandidateRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.match_score.is_some())
            .map(StoredCandidate::row)
            .collect();
        rows.sort_by(|a, b| {
            b.match_score
                .unwrap_or(0.0)
                .total_cmp(&a.match_score.unwrap_or(0.0))
        });
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Ranking jobs
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRankingJobStore {
    jobs: Mutex<Vec<RankingJobRow>>,
    /// Every processed count ever written, in order.
    progress: Mutex<Vec<i32>>,
}

impl MemoryRankingJobStore {
    pub fn job(&self, id: Uuid) -> Option<RankingJobRow> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    pub fn progress_writes(&self) -> Vec<i32> {
        self.progress.lock().unwrap().clone()
    }
}

#[async_trait]
impl RankingJobStore for MemoryRankingJobStore {
    async fn create(
        &self,
        job_description: &str,
        filter: &Classification,
    ) -> Result<RankingJobRow, StoreError> {
        let job = RankingJobRow {
            id: Uuid::new_v4(),
            job_description: job_description.to_string(),
            status: RankingJobStatus::Queued.as_str().to_string(),
            total_candidates: 0,
            processed_candidates: 0,
            error_message: None,
            filter_position: filter.position.clone(),
            filter_job_opening: filter.job_opening.clone(),
            filter_domain: filter.domain.clone(),
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RankingJobRow>, StoreError> {
        Ok(self.job(id))
    }

    async fn set_total(&self, id: Uuid, total: i32) -> Result<(), StoreError> {
        if let Some(job) = self.jobs.lock().unwrap().iter_mut().find(|j| j.id == id) {
            job.total_candidates = total.max(0);
        }
        Ok(())
    }

    async fn set_processed(&self, id: Uuid, processed: i32) -> Result<(), StoreError> {
        if let Some(job) = self.jobs.lock().unwrap().iter_mut().find(|j| j.id == id) {
            job.processed_candidates = processed.max(0).min(job.total_candidates);
            self.progress.lock().unwrap().push(job.processed_candidates);
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        next: RankingJobStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("ranking job {id}")))?;
        let current = RankingJobStatus::parse(&job.status)
            .ok_or_else(|| StoreError::InvalidTransition(job.status.clone()))?;
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition(format!(
                "{} -> {}",
                current.as_str(),
                next.as_str()
            )));
        }
        job.status = next.as_str().to_string();
        if let Some(message) = error_message {
            job.error_message = Some(message.to_string());
        }
        if next.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}
