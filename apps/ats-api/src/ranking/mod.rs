//! LLM Ranking Scheduler: scores stored candidates against a job description one at a time.
//!
//! Flow per candidate: load profile → prompt → ranking model → first JSON object →
//!       score + justification → clamp to [0, 100] → persist.
//!
//! A single candidate's failure is recorded and the loop moves on. Only errors that
//! make the scoring service itself unusable can stop a run, and only when the caller asks.

pub mod handlers;
pub mod jobs;
pub mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ingest::batch::BatchProgress;
use crate::llm_client::prompts::truncate_chars;
use crate::llm_client::{first_json_object, strip_json_fences, LlmError, TextModel};
use crate::models::candidate::{CandidateRow, Classification};
use crate::store::{CandidateStore, StoreError};
use crate::throttle::RateLimiter;

use prompts::{RANKING_PROMPT, RANKING_SYSTEM};

/// Shorter descriptions carry too little signal to score against.
pub const MIN_JOB_DESCRIPTION_CHARS: usize = 50;
const MAX_JOB_DESCRIPTION_CHARS: usize = 4000;
const MAX_PROFILE_RESUME_CHARS: usize = 6000;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Job description must be at least 50 characters")]
    JobDescriptionTooShort,

    #[error("Candidate {0} not found")]
    CandidateNotFound(Uuid),

    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),

    #[error("Unparseable score response: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RankingError {
    fn is_fatal(&self) -> bool {
        matches!(self, RankingError::Model(e) if e.is_fatal())
    }
}

/// Which candidates a run covers.
#[derive(Debug, Clone, PartialEq)]
pub enum RankingTarget {
    Candidates(Vec<Uuid>),
    Filter(Classification),
}

impl RankingTarget {
    /// Explicit ids are taken as given; a filter is resolved against the store.
    pub async fn resolve(&self, store: &dyn CandidateStore) -> Result<Vec<Uuid>, StoreError> {
        match self {
            RankingTarget::Candidates(ids) => Ok(ids.clone()),
            RankingTarget::Filter(filter) => {
                if filter.is_empty() {
                    info!("No filter given, ranking every stored candidate");
                }
                store.resolve_ids(filter).await
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingOutcome {
    pub candidate_id: Uuid,
    pub candidate_name: Option<String>,
    pub success: bool,
    pub score: Option<f64>,
    pub justification: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when a fatal model error stopped the run early.
    pub fatal_error: Option<String>,
    /// Scored candidates by descending score (ties keep input order), then failures.
    pub results: Vec<RankingOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Every failure is per-candidate; the loop always reaches the end.
    TolerateAll,
    /// Stop when the scoring service itself is unreachable or rejects our credentials.
    StopOnFatal,
}

/// Receives progress after each candidate.
#[async_trait]
pub trait RankingObserver: Send + Sync {
    async fn started(&self, _total: usize) {}
    async fn scored(&self, index: usize, outcome: &RankingOutcome, progress: &BatchProgress);
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RankingEvent {
    Started {
        total: usize,
    },
    Scored {
        index: usize,
        outcome: RankingOutcome,
        progress: BatchProgress,
    },
    Completed(RankingSummary),
}

impl RankingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RankingEvent::Started { .. } => "started",
            RankingEvent::Scored { .. } => "scored",
            RankingEvent::Completed(_) => "completed",
        }
    }
}

/// Forwards progress to a live client.
pub struct ChannelObserver {
    tx: mpsc::Sender<RankingEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<RankingEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl RankingObserver for ChannelObserver {
    async fn started(&self, total: usize) {
        let _ = self.tx.send(RankingEvent::Started { total }).await;
    }

    async fn scored(&self, index: usize, outcome: &RankingOutcome, progress: &BatchProgress) {
        let _ = self
            .tx
            .send(RankingEvent::Scored {
                index,
                outcome: outcome.clone(),
                progress: progress.clone(),
            })
            .await;
    }
}

pub struct RankingScheduler {
    candidates: Arc<dyn CandidateStore>,
    model: Arc<dyn TextModel>,
    limiter: Arc<dyn RateLimiter>,
}

impl RankingScheduler {
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        model: Arc<dyn TextModel>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            candidates,
            model,
            limiter,
        }
    }

    pub fn candidates(&self) -> &Arc<dyn CandidateStore> {
        &self.candidates
    }

    /// Scores `candidate_ids` in order.
    pub async fn run(
        &self,
        job_description: &str,
        candidate_ids: &[Uuid],
        policy: FailurePolicy,
        observer: Option<&dyn RankingObserver>,
    ) -> RankingSummary {
        let total = candidate_ids.len();
        if let Some(observer) = observer {
            observer.started(total).await;
        }
        info!("Ranking {total} candidates");

        let mut results = Vec::with_capacity(total);
        let mut fatal_error = None;

        for (index, &id) in candidate_ids.iter().enumerate() {
            let _permit = self.limiter.acquire().await;

            let mut stop = false;
            let outcome = match self.score_candidate(job_description, id).await {
                Ok(scored) => scored,
                Err((name, e)) => {
                    warn!("Ranking candidate {id} failed: {e}");
                    if policy == FailurePolicy::StopOnFatal && e.is_fatal() {
                        fatal_error = Some(e.to_string());
                        stop = true;
                    }
                    RankingOutcome {
                        candidate_id: id,
                        candidate_name: name,
                        success: false,
                        score: None,
                        justification: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            let label = outcome
                .candidate_name
                .clone()
                .unwrap_or_else(|| id.to_string());
            let progress = BatchProgress::new(index + 1, total, &label);
            if let Some(observer) = observer {
                observer.scored(index, &outcome, &progress).await;
            }
            results.push(outcome);
            if stop {
                break;
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        sort_by_score(&mut results);

        info!("Ranking finished: {succeeded} scored, {failed} failed");
        RankingSummary {
            total,
            succeeded,
            failed,
            fatal_error,
            results,
        }
    }

    async fn score_candidate(
        &self,
        job_description: &str,
        id: Uuid,
    ) -> Result<RankingOutcome, (Option<String>, RankingError)> {
        let candidate = match self.candidates.get(id).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return Err((None, RankingError::CandidateNotFound(id))),
            Err(e) => return Err((None, e.into())),
        };
        let name = Some(candidate.name.clone());

        let prompt = RANKING_PROMPT
            .replace(
                "{job_description}",
                truncate_chars(job_description.trim(), MAX_JOB_DESCRIPTION_CHARS),
            )
            .replace("{candidate_profile}", &candidate_profile(&candidate));

        let response = self
            .model
            .complete(&prompt, RANKING_SYSTEM)
            .await
            .map_err(|e| (name.clone(), e.into()))?;
        let (score, justification) =
            parse_score(&response).map_err(|e| (name.clone(), e))?;

        self.candidates
            .update_match(id, score, &justification)
            .await
            .map_err(|e| (name.clone(), e.into()))?;

        Ok(RankingOutcome {
            candidate_id: id,
            candidate_name: name,
            success: true,
            score: Some(score),
            justification: Some(justification),
            error: None,
        })
    }
}

pub fn validate_job_description(job_description: &str) -> Result<&str, RankingError> {
    let trimmed = job_description.trim();
    if trimmed.chars().count() < MIN_JOB_DESCRIPTION_CHARS {
        return Err(RankingError::JobDescriptionTooShort);
    }
    Ok(trimmed)
}

/// Profile block sent to the ranking model. Resume text is bounded.
pub fn candidate_profile(c: &CandidateRow) -> String {
    let mut profile = format!(
        "Name: {}\nRole: {}\nExperience: {} years\nSkills: {}\n",
        c.name,
        c.role,
        c.experience,
        c.skills.join(", ")
    );
    if let Some(location) = &c.location {
        profile.push_str(&format!("Location: {location}\n"));
    }
    if !c.summary.is_empty() {
        profile.push_str(&format!("Summary: {}\n", c.summary));
    }
    if !c.resume_text.is_empty() {
        profile.push_str("\nResume:\n");
        profile.push_str(truncate_chars(&c.resume_text, MAX_PROFILE_RESUME_CHARS));
    }
    profile
}

/// Extracts `(score, justification)` from the first JSON object in the response.
pub fn parse_score(response: &str) -> Result<(f64, String), RankingError> {
    let text = strip_json_fences(response);
    let object = first_json_object(text)
        .ok_or_else(|| RankingError::Parse("no JSON object in response".to_string()))?;
    let value: Value =
        serde_json::from_str(object).map_err(|e| RankingError::Parse(e.to_string()))?;

    let raw = value
        .get("match_score")
        .or_else(|| value.get("score"))
        .ok_or_else(|| RankingError::Parse("missing match_score".to_string()))?;
    let score = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite())
    .ok_or_else(|| RankingError::Parse(format!("non-numeric match_score: {raw}")))?;

    let justification = ["reasoning", "justification", "explanation"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().replace('\0', ""))
        .unwrap_or_default();

    Ok((clamp_score(score), justification))
}

pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Descending score; stable, so equal scores keep their input order. Failures sort last.
fn sort_by_score(results: &mut [RankingOutcome]) {
    results.sort_by(|a, b| {
        let a = a.score.unwrap_or(f64::NEG_INFINITY);
        let b = b.score.unwrap_or(f64::NEG_INFINITY);
        b.total_cmp(&a)
    });
}
