use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::candidate::Classification;
use crate::models::ranking_job::{RankingJobRow, RankingJobStatus};
use crate::store::StoreError;

#[async_trait]
pub trait RankingJobStore: Send + Sync {
    /// Creates a job in `queued` state.
    async fn create(
        &self,
        job_description: &str,
        filter: &Classification,
    ) -> Result<RankingJobRow, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<RankingJobRow>, StoreError>;

    async fn set_total(&self, id: Uuid, total: i32) -> Result<(), StoreError>;

    /// Records progress. Never exceeds the job's total.
    async fn set_processed(&self, id: Uuid, processed: i32) -> Result<(), StoreError>;

    /// Moves the job forward. Rejects backward or repeated transitions.
    async fn transition(
        &self,
        id: Uuid,
        next: RankingJobStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Statuses from which `next` may be entered.
pub fn predecessors(next: RankingJobStatus) -> Vec<&'static str> {
    use RankingJobStatus::*;
    [Queued, Processing, Completed, Failed]
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .map(|s| s.as_str())
        .collect()
}

pub struct PgRankingJobStore {
    pool: PgPool,
}

impl PgRankingJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RankingJobStore for PgRankingJobStore {
    async fn create(
        &self,
        job_description: &str,
        filter: &Classification,
    ) -> Result<RankingJobRow, StoreError> {
        Ok(sqlx::query_as::<_, RankingJobRow>(
            r#"
            INSERT INTO ranking_jobs
                (job_description, status, total_candidates, processed_candidates,
                 filter_position, filter_job_opening, filter_domain)
            VALUES ($1, $2, 0, 0, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(job_description)
        .bind(RankingJobStatus::Queued.as_str())
        .bind(&filter.position)
        .bind(&filter.job_opening)
        .bind(&filter.domain)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RankingJobRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, RankingJobRow>("SELECT * FROM ranking_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_total(&self, id: Uuid, total: i32) -> Result<(), StoreError> {
        sqlx::query("UPDATE ranking_jobs SET total_candidates = $1 WHERE id = $2")
            .bind(total.max(0))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_processed(&self, id: Uuid, processed: i32) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE ranking_jobs SET processed_candidates = LEAST($1, total_candidates) WHERE id = $2",
        )
        .bind(processed.max(0))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        next: RankingJobStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let allowed: Vec<&str> = predecessors(next);
        let result = sqlx::query(
            r#"
            UPDATE ranking_jobs
            SET status = $1,
                error_message = COALESCE($2, error_message),
                completed_at = CASE WHEN $3 THEN now() ELSE completed_at END
            WHERE id = $4 AND status = ANY($5)
            "#,
        )
        .bind(next.as_str())
        .bind(error_message)
        .bind(next.is_terminal())
        .bind(id)
        .bind(&allowed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition(format!(
                "ranking job {id} cannot move to {}",
                next.as_str()
            )));
        }
        Ok(())
    }
}
