//! Candidate Ingestion: one file in, one candidate record (or a structured failure) out.
//!
//! Flow: validate type → upload to object storage → extract text → length gate →
//!       structured extraction → duplicate check → insert → embed.
//!
//! Every failure is returned as an `IngestOutcome`; nothing escapes to the batch loop.
//! The uploaded file is removed again only for duplicates and failed inserts.

pub mod backfill;
pub mod batch;
pub mod handlers;
pub mod imports;
pub mod sources;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::extraction::fields::{pre_extract, ContactFields};
use crate::extraction::structured::{extract_profile, strip_nul, CandidateProfile};
use crate::extraction::text::{extract_text, FileKind};
use crate::llm_client::embeddings::Embedder;
use crate::llm_client::prompts::truncate_chars;
use crate::llm_client::retry::RetryPolicy;
use crate::llm_client::TextModel;
use crate::models::candidate::{CandidateStatus, Classification, NewCandidate};
use crate::store::{CandidateStore, ObjectStore, StoreError};

/// Below this many characters of extracted text there is too little signal to continue.
pub const MIN_TEXT_CHARS: usize = 50;
const EMBED_RESUME_CHARS: usize = 2000;

/// One uploaded document.
#[derive(Debug, Clone)]
pub struct IngestFile {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Caller-supplied values that take precedence over model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestOverrides {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub experience: Option<i32>,
    pub role: Option<String>,
    pub skills: Option<Vec<String>>,
}

impl IngestOverrides {
    fn name(&self) -> Option<String> {
        non_empty(self.name.as_deref())
    }

    fn email(&self) -> Option<String> {
        non_empty(self.email.as_deref()).map(|e| e.to_lowercase())
    }

    /// A name and an email: enough to insert a record with no resume at all.
    pub fn has_identity(&self) -> bool {
        self.name().is_some() && self.email().is_some()
    }
}

/// Per-request context shared by every item of a batch.
#[derive(Debug, Clone, Default)]
pub struct IngestMetadata {
    pub classification: Classification,
    pub source: String,
    pub source_url: Option<String>,
    pub overrides: IngestOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestFailure {
    InvalidInput,
    Storage,
    Fetch,
    Extraction,
    Model,
    Validation,
    Duplicate,
    Persistence,
}

impl IngestFailure {
    /// Failures caused by the document itself (or reaching it), not by the record.
    pub fn is_resume_problem(&self) -> bool {
        matches!(
            self,
            IngestFailure::InvalidInput
                | IngestFailure::Storage
                | IngestFailure::Fetch
                | IngestFailure::Extraction
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub success: bool,
    pub message: String,
    pub candidate_id: Option<Uuid>,
    pub candidate_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<IngestFailure>,
}

impl IngestOutcome {
    pub fn created(id: Uuid, name: &str) -> Self {
        Self {
            success: true,
            message: format!("Added {name}"),
            candidate_id: Some(id),
            candidate_name: Some(name.to_string()),
            failure: None,
        }
    }

    pub fn failed(failure: IngestFailure, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            candidate_id: None,
            candidate_name: None,
            failure: Some(failure),
        }
    }

    fn named(mut self, name: &str) -> Self {
        self.candidate_name = Some(name.to_string());
        self
    }
}

/// Coordinates storage, extraction, and persistence for a single document.
pub struct IngestService {
    objects: Arc<dyn ObjectStore>,
    candidates: Arc<dyn CandidateStore>,
    model: Arc<dyn TextModel>,
    embedder: Option<Arc<dyn Embedder>>,
    retry: RetryPolicy,
}

impl IngestService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        candidates: Arc<dyn CandidateStore>,
        model: Arc<dyn TextModel>,
        embedder: Option<Arc<dyn Embedder>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            objects,
            candidates,
            model,
            embedder,
            retry,
        }
    }

    pub async fn ingest_one(&self, file: IngestFile, meta: &IngestMetadata) -> IngestOutcome {
        let IngestFile {
            file_name,
            mime_type,
            bytes,
        } = file;

        // 1. Type gate: nothing is stored for unsupported files
        let kind = match FileKind::detect(&file_name, mime_type.as_deref()) {
            Ok(kind) => kind,
            Err(e) => return IngestOutcome::failed(IngestFailure::InvalidInput, e.to_string()),
        };

        // 2. Persist the raw file
        let key = storage_key(&file_name, Utc::now().timestamp_millis());
        let path = match self
            .objects
            .upload(&key, bytes.clone(), kind.content_type())
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!("Upload of {file_name} failed: {e}");
                return IngestOutcome::failed(
                    IngestFailure::Storage,
                    format!("Storage upload failed: {e}"),
                );
            }
        };
        let resume_url = self.objects.public_url(&path);

        // 3–4. Text extraction; the stored file is kept for manual review on failure
        let text = match extract_text(bytes, kind).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Text extraction failed for {file_name}: {e}");
                return IngestOutcome::failed(
                    IngestFailure::Extraction,
                    format!("Text extraction failed: {e}"),
                );
            }
        };
        let text_chars = text.chars().count();
        if text_chars < MIN_TEXT_CHARS {
            warn!("{file_name}: only {text_chars} characters extracted");
            return IngestOutcome::failed(
                IngestFailure::InvalidInput,
                format!("Insufficient text extracted ({text_chars} characters)"),
            );
        }

        // 5. Structured extraction, record-first when the caller supplied identity
        let pre = pre_extract(&text);
        let overrides_usable = meta.overrides.name().is_some()
            && (meta.overrides.email().is_some() || pre.email.is_some());

        let profile =
            match extract_profile(self.model.as_ref(), self.retry, &text, &pre).await {
                Ok(Some(profile)) => Some(profile),
                Ok(None) if overrides_usable => None,
                Ok(None) => {
                    return IngestOutcome::failed(
                        IngestFailure::Validation,
                        "Skipped — insufficient data (no name or email found)",
                    );
                }
                Err(e) if overrides_usable => {
                    warn!("AI extraction failed for {file_name}, using supplied fields: {e}");
                    None
                }
                Err(e) => {
                    warn!("AI extraction failed for {file_name}: {e}");
                    return IngestOutcome::failed(
                        IngestFailure::Model,
                        format!("AI extraction failed: {e}"),
                    );
                }
            };

        let Some(candidate) = compose_candidate(profile, &pre, &text, meta, Some(resume_url))
        else {
            return IngestOutcome::failed(
                IngestFailure::Validation,
                "Skipped — insufficient data (no name or email found)",
            );
        };

        // 6–9. Dedup, insert, compensate
        self.persist(candidate, Some(path)).await
    }

    /// Dedup check, insert, and compensating removal of `stored_path` on failure.
    async fn persist(&self, candidate: NewCandidate, stored_path: Option<String>) -> IngestOutcome {
        match self.candidates.find_id_by_email(&candidate.email).await {
            Ok(Some(_)) => {
                self.compensate(stored_path).await;
                return IngestOutcome::failed(
                    IngestFailure::Duplicate,
                    format!("Candidate with email {} already exists", candidate.email),
                )
                .named(&candidate.name);
            }
            Ok(None) => {}
            Err(e) => {
                self.compensate(stored_path).await;
                return IngestOutcome::failed(
                    IngestFailure::Persistence,
                    format!("Database error: {e}"),
                );
            }
        }

        match self.candidates.insert(&candidate).await {
            Ok(id) => {
                info!("Ingested candidate {} <{}> as {id}", candidate.name, candidate.email);
                self.embed_candidate(id, &candidate).await;
                IngestOutcome::created(id, &candidate.name)
            }
            // Unique constraint caught a concurrent insert of the same email
            Err(StoreError::Duplicate(_)) => {
                self.compensate(stored_path).await;
                IngestOutcome::failed(
                    IngestFailure::Duplicate,
                    format!("Candidate with email {} already exists", candidate.email),
                )
                .named(&candidate.name)
            }
            Err(e) => {
                self.compensate(stored_path).await;
                IngestOutcome::failed(IngestFailure::Persistence, format!("Database error: {e}"))
            }
        }
    }

    /// Inserts a candidate built only from caller-supplied fields (spreadsheet row without a resume).
    pub async fn insert_from_overrides(&self, meta: &IngestMetadata) -> IngestOutcome {
        let pre = ContactFields::default();
        match compose_candidate(None, &pre, "", meta, None) {
            Some(candidate) => self.persist(candidate, None).await,
            None => IngestOutcome::failed(
                IngestFailure::Validation,
                "Skipped — row needs at least a name and an email",
            ),
        }
    }

    async fn compensate(&self, stored_path: Option<String>) {
        let Some(path) = stored_path else {
            return;
        };
        match self.objects.remove(std::slice::from_ref(&path)).await {
            Ok(()) => info!("Removed orphaned upload {path}"),
            Err(e) => warn!("Compensating removal of {path} failed: {e}"),
        }
    }

    /// Best-effort: a missing embedding only hides the candidate from similarity search.
    async fn embed_candidate(&self, id: Uuid, candidate: &NewCandidate) {
        let Some(embedder) = &self.embedder else {
            return;
        };
        let text = embedding_text(candidate);
        match embedder.embed(&text).await {
            Ok(vector) => {
                if let Err(e) = self.candidates.set_embedding(id, &vector).await {
                    warn!("Storing embedding for {id} failed: {e}");
                }
            }
            Err(e) => warn!("Embedding candidate {id} failed: {e}"),
        }
    }
}

/// Merges model output, caller overrides and metadata into an insertable row.
/// Returns `None` when neither source yields a name and an email.
pub fn compose_candidate(
    profile: Option<CandidateProfile>,
    pre: &ContactFields,
    resume_text: &str,
    meta: &IngestMetadata,
    resume_url: Option<String>,
) -> Option<NewCandidate> {
    let overrides = &meta.overrides;
    let profile = profile.as_ref();

    let name = overrides
        .name()
        .or_else(|| profile.map(|p| p.name.clone()))?;
    let email = overrides
        .email()
        .or_else(|| profile.map(|p| p.email.clone()))
        .or_else(|| pre.email.clone())
        .filter(|e| !e.is_empty())?;

    Some(NewCandidate {
        name: strip_nul(&name),
        email: strip_nul(&email),
        phone: non_empty(overrides.phone.as_deref())
            .or_else(|| profile.and_then(|p| p.phone.clone()))
            .or_else(|| pre.phone.clone()),
        role: non_empty(overrides.role.as_deref())
            .or_else(|| profile.map(|p| p.role.clone()))
            .unwrap_or_default(),
        experience: overrides
            .experience
            .or_else(|| profile.map(|p| p.experience))
            .unwrap_or(0)
            .max(0),
        skills: overrides
            .skills
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| profile.map(|p| p.skills.clone()))
            .unwrap_or_default(),
        summary: profile.map(|p| p.summary.clone()).unwrap_or_default(),
        resume_text: resume_text.to_string(),
        status: CandidateStatus::New,
        source: meta.source.clone(),
        source_url: meta.source_url.clone(),
        resume_url,
        applied_date: Utc::now().date_naive(),
        location: non_empty(overrides.location.as_deref())
            .or_else(|| profile.and_then(|p| p.location.clone())),
        willing_to_relocate: profile.and_then(|p| p.willing_to_relocate),
        classification: meta.classification.clone(),
    })
}

/// `resumes/<millis>_<nonce>_<sanitized name>`; distinct for concurrent uploads of the same name.
pub fn storage_key(file_name: &str, timestamp_millis: i64) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    let sanitized = if sanitized.is_empty() { "resume" } else { sanitized };
    let nonce = Uuid::new_v4().simple().to_string();
    format!("resumes/{timestamp_millis}_{}_{sanitized}", &nonce[..8])
}

fn embedding_text(candidate: &NewCandidate) -> String {
    format!(
        "{}\n{}\nSkills: {}\n{}\n{}",
        candidate.name,
        candidate.role,
        candidate.skills.join(", "),
        candidate.summary,
        truncate_chars(&candidate.resume_text, EMBED_RESUME_CHARS)
    )
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
