use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::matching::MatchParams;
use crate::models::candidate::CandidateMatch;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub job_description: String,
    pub threshold: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub matches: Vec<CandidateMatch>,
}

/// POST /api/v1/match
pub async fn handle_match(
    State(state): State<AppState>,
    Json(req): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let defaults = state.matcher.defaults();
    let params = MatchParams {
        threshold: req.threshold.unwrap_or(defaults.threshold).clamp(-1.0, 1.0),
        limit: req.limit.unwrap_or(defaults.limit).clamp(1, 100),
    };

    let matches = state
        .matcher
        .find_matches(&req.job_description, params)
        .await?;
    Ok(Json(MatchResponse { matches }))
}
