use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::candidate::{CandidateMatch, CandidateRow, Classification, NewCandidate};
use crate::store::StoreError;

const CANDIDATE_COLUMNS: &str = "id, name, email, phone, role, experience, skills, summary, \
    resume_text, status, source, source_url, resume_url, applied_date, match_score, ai_justification, \
    location, willing_to_relocate, position, job_opening, domain, created_at";

#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn find_id_by_email(&self, email: &str) -> Result<Option<Uuid>, StoreError>;

    /// Inserts a candidate. Fails with `StoreError::Duplicate` when the email is taken.
    async fn insert(&self, candidate: &NewCandidate) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<CandidateRow>, StoreError>;

    /// Ids of candidates matching every set field of the filter, oldest first.
    /// An empty filter selects all candidates.
    async fn resolve_ids(&self, filter: &Classification) -> Result<Vec<Uuid>, StoreError>;

    async fn update_match(
        &self,
        id: Uuid,
        score: f64,
        justification: &str,
    ) -> Result<(), StoreError>;

    async fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<(), StoreError>;

    /// Top `limit` candidates with cosine similarity above `threshold`, most similar first.
    async fn match_by_embedding(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<CandidateMatch>, StoreError>;

    /// Unchecked candidates with no location but some resume text, oldest first.
    async fn missing_location(&self, limit: i64) -> Result<Vec<CandidateRow>, StoreError>;

    /// Stores the outcome of a location lookup and marks the row as checked,
    /// so a `None` location is not picked up again by `missing_location`.
    async fn set_location(
        &self,
        id: Uuid,
        location: Option<&str>,
        willing_to_relocate: Option<bool>,
    ) -> Result<(), StoreError>;

    /// Candidates with a match score, highest first.
    async fn ranked(&self, limit: i64) -> Result<Vec<CandidateRow>, StoreError>;
}

/// PostgreSQL implementation backed by the `candidates` table.
pub struct PgCandidateStore {
    pool: PgPool,
}

impl PgCandidateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateStore for PgCandidateStore {
    async fn find_id_by_email(&self, email: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT id FROM candidates WHERE lower(email) = lower($1) LIMIT 1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn insert(&self, c: &NewCandidate) -> Result<Uuid, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO candidates
                (name, email, phone, role, experience, skills, summary, resume_text,
                 status, source, source_url, resume_url, applied_date, location,
                 willing_to_relocate, position, job_opening, domain)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING id
            "#,
        )
        .bind(&c.name)
        .bind(&c.email)
        .bind(&c.phone)
        .bind(&c.role)
        .bind(c.experience)
        .bind(&c.skills)
        .bind(&c.summary)
        .bind(&c.resume_text)
        .bind(c.status.as_str())
        .bind(&c.source)
        .bind(&c.source_url)
        .bind(&c.resume_url)
        .bind(c.applied_date)
        .bind(&c.location)
        .bind(c.willing_to_relocate)
        .bind(&c.classification.position)
        .bind(&c.classification.job_opening)
        .bind(&c.classification.domain)
        .fetch_one(&self.pool)
        .await?;

        info!("Inserted candidate {id} ({})", c.email);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CandidateRow>, StoreError> {
        Ok(sqlx::query_as::<_, CandidateRow>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn resolve_ids(&self, filter: &Classification) -> Result<Vec<Uuid>, StoreError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT id FROM candidates
            WHERE ($1::text IS NULL OR position = $1)
              AND ($2::text IS NULL OR job_opening = $2)
              AND ($3::text IS NULL OR domain = $3)
            ORDER BY created_at, id
            "#,
        )
        .bind(&filter.position)
        .bind(&filter.job_opening)
        .bind(&filter.domain)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn update_match(
        &self,
        id: Uuid,
        score: f64,
        justification: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE candidates SET match_score = $1, ai_justification = $2 WHERE id = $3",
        )
        .bind(score)
        .bind(justification)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("candidate {id}")));
        }
        Ok(())
    }

    async fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<(), StoreError> {
        sqlx::query("UPDATE candidates SET embedding = $1 WHERE id = $2")
            .bind(Vector::from(embedding.to_vec()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn match_by_embedding(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: i64,
    ) -> Result<Vec<CandidateMatch>, StoreError> {
        Ok(sqlx::query_as::<_, CandidateMatch>(
            r#"
            SELECT id, name, email, role, experience, skills, summary, similarity
            FROM match_candidates($1, $2, $3)
            ORDER BY similarity DESC
            "#,
        )
        .bind(Vector::from(embedding.to_vec()))
        .bind(threshold)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn missing_location(&self, limit: i64) -> Result<Vec<CandidateRow>, StoreError> {
        Ok(sqlx::query_as::<_, CandidateRow>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates \
             WHERE location IS NULL AND location_checked_at IS NULL AND resume_text <> '' \
             ORDER BY created_at, id LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn set_location(
        &self,
        id: Uuid,
        location: Option<&str>,
        willing_to_relocate: Option<bool>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE candidates
            SET location = $1,
                willing_to_relocate = COALESCE($2, willing_to_relocate),
                location_checked_at = now()
            WHERE id = $3
            "#,
        )
        .bind(location)
        .bind(willing_to_relocate)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ranked(&self, limit: i64) -> Result<Vec<CandidateRow>, StoreError> {
        Ok(sqlx::query_as::<_, CandidateRow>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates \
             WHERE match_score IS NOT NULL \
             ORDER BY match_score DESC, created_at, id LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}
