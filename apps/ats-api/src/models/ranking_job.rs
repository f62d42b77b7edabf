use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RankingJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingJobStatus::Queued => "queued",
            RankingJobStatus::Processing => "processing",
            RankingJobStatus::Completed => "completed",
            RankingJobStatus::Failed => "failed",
        }
    }

    /// Reads a status back from a stored row (in-memory doubles only; SQL filters by string).
    #[cfg(test)]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(RankingJobStatus::Queued),
            "processing" => Some(RankingJobStatus::Processing),
            "completed" => Some(RankingJobStatus::Completed),
            "failed" => Some(RankingJobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RankingJobStatus::Completed | RankingJobStatus::Failed)
    }

    /// Status only moves forward: queued → processing → {completed | failed}.
    /// A queued job may fail directly (e.g. candidate resolution failed).
    pub fn can_transition_to(&self, next: RankingJobStatus) -> bool {
        use RankingJobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing) | (Queued, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RankingJobRow {
    pub id: Uuid,
    pub job_description: String,
    pub status: String,
    pub total_candidates: i32,
    pub processed_candidates: i32,
    pub error_message: Option<String>,
    pub filter_position: Option<String>,
    pub filter_job_opening: Option<String>,
    pub filter_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
