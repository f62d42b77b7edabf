use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Pipeline stage of a candidate. Stored as its display string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    New,
    Screening,
    Interview,
    #[serde(rename = "Final Round")]
    FinalRound,
    Selected,
    Rejected,
    #[serde(rename = "Talent Pool")]
    TalentPool,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::New => "New",
            CandidateStatus::Screening => "Screening",
            CandidateStatus::Interview => "Interview",
            CandidateStatus::FinalRound => "Final Round",
            CandidateStatus::Selected => "Selected",
            CandidateStatus::Rejected => "Rejected",
            CandidateStatus::TalentPool => "Talent Pool",
        }
    }
}

/// Source channel tags written to `candidates.source`.
pub mod source {
    pub const BULK_UPLOAD: &str = "Bulk Upload";
    pub const SPREADSHEET_IMPORT: &str = "Spreadsheet Import";
    pub const GOOGLE_DRIVE: &str = "Google Drive";
}

/// A row of the `candidates` table (embedding column excluded).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub experience: i32,
    pub skills: Vec<String>,
    pub summary: String,
    pub resume_text: String,
    pub status: String,
    pub source: String,
    pub source_url: Option<String>,
    pub resume_url: Option<String>,
    pub applied_date: NaiveDate,
    pub match_score: Option<f64>,
    pub ai_justification: Option<String>,
    pub location: Option<String>,
    pub willing_to_relocate: Option<bool>,
    pub position: Option<String>,
    pub job_opening: Option<String>,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to insert a candidate. `id`, `created_at` and the
/// ranking fields are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCandidate {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub experience: i32,
    pub skills: Vec<String>,
    pub summary: String,
    pub resume_text: String,
    pub status: CandidateStatus,
    pub source: String,
    pub source_url: Option<String>,
    pub resume_url: Option<String>,
    pub applied_date: NaiveDate,
    pub location: Option<String>,
    pub willing_to_relocate: Option<bool>,
    pub classification: Classification,
}

/// Optional position / job opening / domain tags used purely for filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub position: Option<String>,
    pub job_opening: Option<String>,
    pub domain: Option<String>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.job_opening.is_none() && self.domain.is_none()
    }
}

/// One similarity-search hit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateMatch {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub experience: i32,
    pub skills: Vec<String>,
    pub summary: String,
    pub similarity: f64,
}
