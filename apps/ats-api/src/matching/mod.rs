//! Embedding & Vector Matcher: job description → embedding → top candidates by cosine similarity.
//!
//! Errors propagate to the caller; a failed search is never reported as "no matches".

pub mod handlers;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::llm_client::embeddings::Embedder;
use crate::llm_client::LlmError;
use crate::models::candidate::CandidateMatch;
use crate::store::{CandidateStore, StoreError};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Job description is empty")]
    EmptyQuery,

    #[error("Embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("Similarity search failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    pub threshold: f64,
    pub limit: i64,
}

pub struct VectorMatcher {
    embedder: Arc<dyn Embedder>,
    candidates: Arc<dyn CandidateStore>,
    defaults: MatchParams,
}

impl VectorMatcher {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        candidates: Arc<dyn CandidateStore>,
        defaults: MatchParams,
    ) -> Self {
        Self {
            embedder,
            candidates,
            defaults,
        }
    }

    pub fn defaults(&self) -> MatchParams {
        self.defaults
    }

    /// Most similar candidates first, at most `params.limit`, all above `params.threshold`.
    pub async fn find_matches(
        &self,
        job_description: &str,
        params: MatchParams,
    ) -> Result<Vec<CandidateMatch>, MatchError> {
        let query = job_description.trim();
        if query.is_empty() {
            return Err(MatchError::EmptyQuery);
        }

        let embedding = self.embedder.embed(query).await?;
        let mut matches = self
            .candidates
            .match_by_embedding(&embedding, params.threshold, params.limit.max(1))
            .await?;
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        info!(
            "Vector match returned {} candidates (threshold {}, limit {})",
            matches.len(),
            params.threshold,
            params.limit
        );
        Ok(matches)
    }
}
