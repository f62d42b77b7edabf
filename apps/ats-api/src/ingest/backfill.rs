//! Location backfill: re-reads stored resume text for candidates ingested
//! before location extraction existed, one model call per candidate.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::extraction::prompts::{LOCATION_EXTRACT_PROMPT, LOCATION_EXTRACT_SYSTEM};
use crate::extraction::structured::{parse_model_json, strip_nul, MAX_RESUME_CHARS};
use crate::llm_client::prompts::truncate_chars;
use crate::llm_client::retry::{with_backoff, RetryPolicy};
use crate::llm_client::TextModel;
use crate::store::{CandidateStore, StoreError};
use crate::throttle::RateLimiter;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillSummary {
    pub scanned: usize,
    pub updated: usize,
    pub not_found: usize,
    pub failed: usize,
}

pub struct LocationBackfill {
    candidates: Arc<dyn CandidateStore>,
    model: Arc<dyn TextModel>,
    limiter: Arc<dyn RateLimiter>,
    retry: RetryPolicy,
}

impl LocationBackfill {
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        model: Arc<dyn TextModel>,
        limiter: Arc<dyn RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            candidates,
            model,
            limiter,
            retry,
        }
    }

    /// Processes up to `limit` unchecked candidates lacking a location. Only listing
    /// failures abort; a failed candidate is counted, skipped, and retried next run.
    pub async fn run(&self, limit: i64) -> Result<BackfillSummary, StoreError> {
        let pending = self.candidates.missing_location(limit).await?;
        let mut summary = BackfillSummary {
            scanned: pending.len(),
            ..Default::default()
        };

        for candidate in pending {
            let _permit = self.limiter.acquire().await;

            let prompt = LOCATION_EXTRACT_PROMPT.replace(
                "{resume_text}",
                truncate_chars(&candidate.resume_text, MAX_RESUME_CHARS),
            );
            let response = match with_backoff(self.retry, || {
                self.model.complete(&prompt, LOCATION_EXTRACT_SYSTEM)
            })
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("Location extraction failed for {}: {e}", candidate.id);
                    summary.failed += 1;
                    continue;
                }
            };

            let parsed = match parse_model_json(&response) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Unparseable location response for {}: {e}", candidate.id);
                    summary.failed += 1;
                    continue;
                }
            };

            let location = parsed
                .get("location")
                .and_then(|v| v.as_str())
                .map(|l| strip_nul(l.trim()))
                .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("null"));
            let relocate = parsed.get("willing_to_relocate").and_then(|v| v.as_bool());

            // A miss is still recorded so later runs move past this row
            let saved = self
                .candidates
                .set_location(candidate.id, location.as_deref(), relocate)
                .await;
            match (saved, location) {
                (Ok(()), Some(_)) => summary.updated += 1,
                (Ok(()), None) => summary.not_found += 1,
                (Err(e), _) => {
                    warn!("Saving location for {} failed: {e}", candidate.id);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Location backfill: {} scanned, {} updated, {} not found, {} failed",
            summary.scanned, summary.updated, summary.not_found, summary.failed
        );
        Ok(summary)
    }
}
