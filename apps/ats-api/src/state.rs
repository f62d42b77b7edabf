use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::ingest::backfill::LocationBackfill;
use crate::ingest::batch::{BatchRegistry, BatchRunner};
use crate::ingest::sources::RemoteFetcher;
use crate::ingest::IngestService;
use crate::llm_client::embeddings::Embedder;
use crate::llm_client::retry::RetryPolicy;
use crate::llm_client::TextModel;
use crate::matching::{MatchParams, VectorMatcher};
use crate::ranking::jobs::RankingJobRunner;
use crate::ranking::RankingScheduler;
use crate::store::{CandidateStore, ObjectStore, RankingJobStore};
use crate::throttle::IntervalLimiter;

/// External collaborators the services are built from.
pub struct Collaborators {
    pub objects: Arc<dyn ObjectStore>,
    pub candidates: Arc<dyn CandidateStore>,
    pub ranking_jobs: Arc<dyn RankingJobStore>,
    pub extraction_model: Arc<dyn TextModel>,
    pub ranking_model: Arc<dyn TextModel>,
    pub embedder: Arc<dyn Embedder>,
    pub fetcher: Arc<dyn RemoteFetcher>,
}

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub candidates: Arc<dyn CandidateStore>,
    pub ingest: Arc<IngestService>,
    pub batches: Arc<BatchRunner>,
    /// Abort flags of running upload batches, for the cancel endpoint.
    pub registry: BatchRegistry,
    pub fetcher: Arc<dyn RemoteFetcher>,
    pub backfill: Arc<LocationBackfill>,
    pub matcher: Arc<VectorMatcher>,
    pub ranking: Arc<RankingScheduler>,
    pub ranking_jobs: Arc<RankingJobRunner>,
}

impl AppState {
    pub fn build(c: Collaborators, pipeline: &PipelineConfig) -> Self {
        let retry = RetryPolicy::default();
        // One limiter per downstream model so ingestion and ranking do not starve each other
        let ingest_limiter = Arc::new(IntervalLimiter::sequential(pipeline.ingest_delay));
        let ranking_limiter = Arc::new(IntervalLimiter::sequential(pipeline.ranking_delay));

        let ingest = Arc::new(IngestService::new(
            c.objects,
            c.candidates.clone(),
            c.extraction_model.clone(),
            Some(c.embedder.clone()),
            retry,
        ));
        let ranking = Arc::new(RankingScheduler::new(
            c.candidates.clone(),
            c.ranking_model,
            ranking_limiter,
        ));

        Self {
            ingest,
            batches: Arc::new(BatchRunner::new(
                ingest_limiter.clone(),
                pipeline.max_batch_items,
            )),
            registry: BatchRegistry::default(),
            fetcher: c.fetcher,
            backfill: Arc::new(LocationBackfill::new(
                c.candidates.clone(),
                c.extraction_model,
                ingest_limiter,
                retry,
            )),
            matcher: Arc::new(VectorMatcher::new(
                c.embedder,
                c.candidates.clone(),
                MatchParams {
                    threshold: pipeline.match_threshold,
                    limit: pipeline.match_limit,
                },
            )),
            ranking_jobs: Arc::new(RankingJobRunner::new(c.ranking_jobs, ranking.clone())),
            ranking,
            candidates: c.candidates,
        }
    }
}
