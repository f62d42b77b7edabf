use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::candidate::{CandidateRow, Classification};
use crate::models::ranking_job::RankingJobRow;
use crate::ranking::{
    validate_job_description, ChannelObserver, FailurePolicy, RankingEvent, RankingSummary,
    RankingTarget,
};
use crate::routes::sse::event_stream;
use crate::state::AppState;

const DEFAULT_RANKED_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct RankingRequest {
    pub job_description: String,
    /// Explicit shortlist. When absent or empty `filter` selects candidates.
    #[serde(default)]
    pub candidate_ids: Vec<Uuid>,
    #[serde(default)]
    pub filter: Classification,
}

impl RankingRequest {
    fn target(&self) -> RankingTarget {
        if self.candidate_ids.is_empty() {
            RankingTarget::Filter(self.filter.clone())
        } else {
            RankingTarget::Candidates(self.candidate_ids.clone())
        }
    }
}

/// POST /api/v1/rankings
/// Scores synchronously; every per-candidate failure is reported in the summary.
pub async fn handle_rank(
    State(state): State<AppState>,
    Json(req): Json<RankingRequest>,
) -> Result<Json<RankingSummary>, AppError> {
    let jd = validate_job_description(&req.job_description)?;
    let ids = req.target().resolve(state.candidates.as_ref()).await?;

    let summary = state
        .ranking
        .run(jd, &ids, FailurePolicy::TolerateAll, None)
        .await;
    Ok(Json(summary))
}

/// POST /api/v1/rankings/stream
pub async fn handle_rank_stream(
    State(state): State<AppState>,
    Json(req): Json<RankingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let jd = validate_job_description(&req.job_description)?.to_string();
    let ids = req.target().resolve(state.candidates.as_ref()).await?;

    let (tx, rx) = mpsc::channel(64);
    let ranking = state.ranking.clone();
    tokio::spawn(async move {
        let observer = ChannelObserver::new(tx.clone());
        let summary = ranking
            .run(&jd, &ids, FailurePolicy::TolerateAll, Some(&observer))
            .await;
        let _ = tx.send(RankingEvent::Completed(summary)).await;
    });

    Ok(event_stream(rx))
}

/// POST /api/v1/ranking-jobs
pub async fn handle_create_ranking_job(
    State(state): State<AppState>,
    Json(req): Json<RankingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let jd = validate_job_description(&req.job_description)?.to_string();
    let job = state.ranking_jobs.start(jd, req.target()).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/ranking-jobs/:id
pub async fn handle_get_ranking_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RankingJobRow>, AppError> {
    let job = state
        .ranking_jobs
        .jobs()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ranking job {id} not found")))?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct RankedQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/candidates/ranked
pub async fn handle_ranked_candidates(
    State(state): State<AppState>,
    Query(params): Query<RankedQuery>,
) -> Result<Json<Vec<CandidateRow>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_RANKED_LIMIT).clamp(1, 500);
    Ok(Json(state.candidates.ranked(limit).await?))
}
