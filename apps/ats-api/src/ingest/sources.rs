//! Ingestion sources other than direct upload: spreadsheet rows and remote files.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use csv::ReaderBuilder;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ingest::IngestOverrides;

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const GOOGLE_NATIVE_PREFIX: &str = "application/vnd.google-apps.";
/// Remote resumes larger than this are refused.
pub const MAX_REMOTE_BYTES: usize = 10 * 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

static DRIVE_SHARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://drive\.google\.com/(?:file/d/|open\?id=)([A-Za-z0-9_-]+)")
        .expect("drive share regex is valid")
});

// ---------------------------------------------------------------------------
// Spreadsheet rows
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("Failed to read spreadsheet: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet needs a 'name' and an 'email' column")]
    MissingColumns,
}

/// One candidate row. Everything is optional at parse time; validation happens at insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetRow {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub experience: Option<i32>,
    pub skills: Vec<String>,
    pub location: Option<String>,
    pub resume_url: Option<String>,
}

impl SpreadsheetRow {
    /// Label shown in the progress queue.
    pub fn label(&self, row_number: usize) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| format!("Row {row_number}"))
    }

    pub fn overrides(&self) -> IngestOverrides {
        IngestOverrides {
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            location: self.location.clone(),
            experience: self.experience,
            role: self.role.clone(),
            skills: (!self.skills.is_empty()).then(|| self.skills.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Name,
    Email,
    Phone,
    Role,
    Experience,
    Skills,
    Location,
    ResumeUrl,
}

fn column_for(header: &str) -> Option<Column> {
    let normalized: String = header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    match normalized.trim_matches('_') {
        "name" | "full_name" | "candidate_name" => Some(Column::Name),
        "email" | "e_mail" | "email_address" => Some(Column::Email),
        "phone" | "phone_number" | "mobile" => Some(Column::Phone),
        "role" | "title" | "job_title" | "current_role" => Some(Column::Role),
        "experience" | "years" | "years_of_experience" | "experience_years" => {
            Some(Column::Experience)
        }
        "skills" => Some(Column::Skills),
        "location" | "city" => Some(Column::Location),
        "resume_url" | "resume" | "resume_link" | "cv" | "cv_url" => Some(Column::ResumeUrl),
        _ => None,
    }
}

/// Parses a CSV export into rows. Headers are matched case-insensitively with common aliases.
pub fn parse_spreadsheet(bytes: &[u8]) -> Result<Vec<SpreadsheetRow>, SpreadsheetError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let columns: HashMap<Column, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .filter_map(|(idx, header)| column_for(header).map(|col| (col, idx)))
        .collect();
    if !columns.contains_key(&Column::Name) || !columns.contains_key(&Column::Email) {
        return Err(SpreadsheetError::MissingColumns);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = |col: Column| {
            columns
                .get(&col)
                .and_then(|&idx| record.get(idx))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let row = SpreadsheetRow {
            name: cell(Column::Name),
            email: cell(Column::Email).map(|e| e.to_lowercase()),
            phone: cell(Column::Phone),
            role: cell(Column::Role),
            experience: cell(Column::Experience).and_then(|e| leading_years(&e)),
            skills: cell(Column::Skills)
                .map(|s| {
                    s.split([',', ';', '|'])
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            location: cell(Column::Location),
            resume_url: cell(Column::ResumeUrl),
        };
        if row != SpreadsheetRow::default() {
            rows.push(row);
        }
    }

    debug!("Parsed {} spreadsheet rows", rows.len());
    Ok(rows)
}

/// `"5"`, `"5.5"`, `"5+ yrs"` → 5.
fn leading_years(raw: &str) -> Option<i32> {
    let digits: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits
        .parse::<f64>()
        .ok()
        .filter(|y| y.is_finite())
        .map(|y| y.floor().clamp(0.0, 80.0) as i32)
}

/// Rewrites Drive share links to their direct-download form; other URLs pass through.
pub fn direct_download_url(url: &str) -> String {
    match DRIVE_SHARE_RE.captures(url.trim()) {
        Some(caps) => format!("https://drive.google.com/uc?export=download&id={}", &caps[1]),
        None => url.trim().to_string(),
    }
}

/// File name for a fetched URL: its last path segment, or a fallback.
pub fn file_name_from_url(url: &str, fallback: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    without_scheme
        .split_once('/')
        .and_then(|(_host, path)| path.rsplit('/').next())
        .filter(|seg| seg.contains('.'))
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

// ---------------------------------------------------------------------------
// Cloud drive files
// ---------------------------------------------------------------------------

/// A file handle returned by the Drive picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub url: Option<String>,
}

impl DriveFile {
    pub fn is_google_native(&self) -> bool {
        self.mime_type.starts_with(GOOGLE_NATIVE_PREFIX)
    }

    /// Native Docs/Sheets are exported to PDF; binary files are downloaded as-is.
    pub fn download_url(&self) -> String {
        if self.is_google_native() {
            format!(
                "{DRIVE_FILES_URL}/{}/export?mimeType=application%2Fpdf",
                self.id
            )
        } else {
            format!("{DRIVE_FILES_URL}/{}?alt=media", self.id)
        }
    }

    /// File name and MIME type of the bytes `download_url` yields.
    pub fn downloaded_as(&self) -> (String, String) {
        if self.is_google_native() {
            let name = if self.name.to_lowercase().ends_with(".pdf") {
                self.name.clone()
            } else {
                format!("{}.pdf", self.name)
            };
            (name, "application/pdf".to_string())
        } else {
            (self.name.clone(), self.mime_type.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// Remote fetching
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Remote file is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<FetchedFile, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<FetchedFile, FetchError> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(len) = response.content_length() {
            let size = usize::try_from(len).unwrap_or(usize::MAX);
            if size > MAX_REMOTE_BYTES {
                return Err(FetchError::TooLarge {
                    size,
                    max: MAX_REMOTE_BYTES,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let bytes = response.bytes().await?.to_vec();
        if bytes.len() > MAX_REMOTE_BYTES {
            return Err(FetchError::TooLarge {
                size: bytes.len(),
                max: MAX_REMOTE_BYTES,
            });
        }

        info!("Fetched {} bytes from {url}", bytes.len());
        Ok(FetchedFile {
            bytes,
            content_type,
        })
    }
}
