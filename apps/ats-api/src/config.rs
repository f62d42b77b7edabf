use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_public_url: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub embedding_api_key: String,
    pub embedding_api_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub port: u16,
    pub rust_log: String,
    pub pipeline: PipelineConfig,
}

/// Tunables for the ingestion and ranking loops.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum spacing between two ingestion items.
    pub ingest_delay: Duration,
    /// Minimum spacing between two ranking calls (the ranking model is throttled harder).
    pub ranking_delay: Duration,
    pub max_batch_items: usize,
    pub match_threshold: f64,
    pub match_limit: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest_delay: Duration::from_millis(500),
            ranking_delay: Duration::from_millis(6500),
            max_batch_items: 50,
            match_threshold: 0.5,
            match_limit: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = PipelineConfig::default();
        let s3_endpoint = require_env("S3_ENDPOINT")?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_public_url: std::env::var("S3_PUBLIC_URL").unwrap_or_else(|_| s3_endpoint.clone()),
            s3_endpoint,
            s3_region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            embedding_api_key: require_env("EMBEDDING_API_KEY")?,
            embedding_api_url: std::env::var("EMBEDDING_API_URL")
                .unwrap_or_else(|_| "https://api.voyageai.com/v1/embeddings".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "voyage-3".to_string()),
            embedding_dimensions: parse_env("EMBEDDING_DIMENSIONS", 1024)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pipeline: PipelineConfig {
                ingest_delay: Duration::from_millis(parse_env(
                    "INGEST_DELAY_MS",
                    defaults.ingest_delay.as_millis() as u64,
                )?),
                ranking_delay: Duration::from_millis(parse_env(
                    "RANKING_DELAY_MS",
                    defaults.ranking_delay.as_millis() as u64,
                )?),
                max_batch_items: parse_env("MAX_BATCH_ITEMS", defaults.max_batch_items)?,
                match_threshold: parse_env("MATCH_THRESHOLD", defaults.match_threshold)?,
                match_limit: parse_env("MATCH_LIMIT", defaults.match_limit)?,
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
