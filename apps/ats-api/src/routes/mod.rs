pub mod health;
pub mod sse;

use axum::{
    routing::{get, post},
    Router,
};

use crate::ingest::handlers as ingest;
use crate::matching::handlers as matching;
use crate::ranking::handlers as ranking;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Ingestion
        .route("/api/v1/candidates/upload", post(ingest::handle_upload))
        .route(
            "/api/v1/candidates/upload/stream",
            post(ingest::handle_upload_stream),
        )
        .route(
            "/api/v1/candidates/import/spreadsheet",
            post(ingest::handle_import_spreadsheet),
        )
        .route(
            "/api/v1/candidates/import/drive",
            post(ingest::handle_import_drive),
        )
        .route(
            "/api/v1/batches/:id/cancel",
            post(ingest::handle_cancel_batch),
        )
        .route(
            "/api/v1/candidates/backfill-locations",
            post(ingest::handle_backfill_locations),
        )
        // Matching and ranking
        .route(
            "/api/v1/candidates/ranked",
            get(ranking::handle_ranked_candidates),
        )
        .route("/api/v1/match", post(matching::handle_match))
        .route("/api/v1/rankings", post(ranking::handle_rank))
        .route("/api/v1/rankings/stream", post(ranking::handle_rank_stream))
        .route(
            "/api/v1/ranking-jobs",
            post(ranking::handle_create_ranking_job),
        )
        .route(
            "/api/v1/ranking-jobs/:id",
            get(ranking::handle_get_ranking_job),
        )
        .with_state(state)
}
