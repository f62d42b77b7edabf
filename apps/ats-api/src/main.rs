mod config;
mod db;
mod errors;
mod extraction;
mod ingest;
mod llm_client;
mod matching;
mod models;
mod ranking;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod throttle;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::ingest::sources::HttpFetcher;
use crate::llm_client::embeddings::EmbeddingClient;
use crate::llm_client::{LlmClient, EXTRACTION_MODEL, RANKING_MODEL};
use crate::routes::build_router;
use crate::state::{AppState, Collaborators};
use crate::store::{PgCandidateStore, PgRankingJobStore, S3ObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ATS API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let objects = S3ObjectStore::new(s3, config.s3_bucket.clone(), config.s3_public_url.clone());
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Initialize model clients
    let extraction_model = LlmClient::new(config.anthropic_api_key.clone(), EXTRACTION_MODEL)?;
    let ranking_model = LlmClient::new(config.anthropic_api_key.clone(), RANKING_MODEL)?;
    let embedder = EmbeddingClient::new(
        config.embedding_api_url.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.embedding_dimensions,
    )?;
    info!(
        "LLM clients initialized (extraction: {}, ranking: {}, embeddings: {})",
        extraction_model.model(),
        ranking_model.model(),
        config.embedding_model
    );

    let state = AppState::build(
        Collaborators {
            objects: Arc::new(objects),
            candidates: Arc::new(PgCandidateStore::new(db.clone())),
            ranking_jobs: Arc::new(PgRankingJobStore::new(db)),
            extraction_model: Arc::new(extraction_model),
            ranking_model: Arc::new(ranking_model),
            embedder: Arc::new(embedder),
            fetcher: Arc::new(HttpFetcher::new()?),
        },
        &config.pipeline,
    );

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "ats-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.s3_region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    let s3 = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3)
}
