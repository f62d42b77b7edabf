use std::future::Future;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::ingest::backfill::BackfillSummary;
use crate::ingest::batch::{BatchError, BatchEvent, BatchSummary};
use crate::ingest::sources::{parse_spreadsheet, DriveFile};
use crate::ingest::{IngestFile, IngestMetadata, IngestOutcome};
use crate::models::candidate::{source, Classification};
use crate::routes::sse::event_stream;
use crate::state::AppState;

const DEFAULT_BACKFILL_LIMIT: i64 = 100;
const EVENT_BUFFER: usize = 64;

/// Files plus shared form fields of a multipart upload.
struct UploadForm {
    files: Vec<IngestFile>,
    classification: Classification,
    batch_id: Option<Uuid>,
}

async fn read_upload_form(
    multipart: &mut Multipart,
    max_files: usize,
) -> Result<UploadForm, AppError> {
    let mut form = UploadForm {
        files: Vec::new(),
        classification: Classification::default(),
        batch_id: None,
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" | "files[]" => {
                if form.files.len() >= max_files {
                    return Err(BatchError::TooLarge {
                        count: form.files.len() + 1,
                        max: max_files,
                    }
                    .into());
                }
                let file_name = field.file_name().unwrap_or("resume").to_string();
                let mime_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?.to_vec();
                form.files.push(IngestFile {
                    file_name,
                    mime_type,
                    bytes,
                });
            }
            "position" => form.classification.position = non_empty(field.text().await?),
            "job_opening" => form.classification.job_opening = non_empty(field.text().await?),
            "domain" => form.classification.domain = non_empty(field.text().await?),
            "batch_id" => form.batch_id = Some(parse_batch_id(&field.text().await?)?),
            _ => {}
        }
    }
    Ok(form)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_batch_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("Invalid batch_id: {raw}")))
}

/// Runs a batch registered under `batch_id` so it can be cancelled while in flight.
async fn run_registered<T, F, Fut>(
    state: &AppState,
    batch_id: Uuid,
    items: Vec<(String, T)>,
    events: Option<&mpsc::Sender<BatchEvent>>,
    work: F,
) -> Result<BatchSummary, BatchError>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = IngestOutcome>,
{
    let abort = state.registry.register(batch_id)?;
    let result = state
        .batches
        .run(batch_id, items, &abort, events, work)
        .await;
    state.registry.finish(batch_id);
    result
}

fn labelled(files: Vec<IngestFile>) -> Vec<(String, IngestFile)> {
    files
        .into_iter()
        .map(|f| (f.file_name.clone(), f))
        .collect()
}

/// POST /api/v1/candidates/upload
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchSummary>, AppError> {
    let form = read_upload_form(&mut multipart, state.batches.max_items()).await?;
    state.batches.validate(form.files.len())?;

    let batch_id = form.batch_id.unwrap_or_else(Uuid::new_v4);
    let meta = IngestMetadata {
        classification: form.classification,
        source: source::BULK_UPLOAD.to_string(),
        ..Default::default()
    };
    let ingest = state.ingest.clone();
    let summary = run_registered(&state, batch_id, labelled(form.files), None, |file| {
        ingest.ingest_one(file, &meta)
    })
    .await?;
    Ok(Json(summary))
}

/// POST /api/v1/candidates/upload/stream
/// Same as `upload`, answered with an SSE stream of per-item events.
pub async fn handle_upload_stream(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_upload_form(&mut multipart, state.batches.max_items()).await?;
    state.batches.validate(form.files.len())?;

    let batch_id = form.batch_id.unwrap_or_else(Uuid::new_v4);
    let meta = IngestMetadata {
        classification: form.classification,
        source: source::BULK_UPLOAD.to_string(),
        ..Default::default()
    };
    let items = labelled(form.files);
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    // The batch outlives a disconnected client; only cancel stops it
    let task_state = state.clone();
    tokio::spawn(async move {
        let ingest = task_state.ingest.clone();
        if let Err(e) = run_registered(&task_state, batch_id, items, Some(&tx), |file| {
            ingest.ingest_one(file, &meta)
        })
        .await
        {
            error!("Streaming batch {batch_id} rejected: {e}");
        }
    });

    Ok(event_stream(rx))
}

/// POST /api/v1/candidates/import/spreadsheet
pub async fn handle_import_spreadsheet(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchSummary>, AppError> {
    let form = read_upload_form(&mut multipart, 1).await?;
    let sheet = form
        .files
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Validation("Missing spreadsheet file".to_string()))?;

    let rows = parse_spreadsheet(&sheet.bytes)?;
    state.batches.validate(rows.len())?;
    info!("Importing {} rows from {}", rows.len(), sheet.file_name);

    let batch_id = form.batch_id.unwrap_or_else(Uuid::new_v4);
    let meta = IngestMetadata {
        classification: form.classification,
        source: source::SPREADSHEET_IMPORT.to_string(),
        ..Default::default()
    };
    let items = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| (row.label(i + 1), row))
        .collect();

    let ingest = state.ingest.clone();
    let fetcher = state.fetcher.clone();
    let summary = run_registered(&state, batch_id, items, None, |row| {
        ingest.import_row(fetcher.as_ref(), row, &meta)
    })
    .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct DriveImportRequest {
    pub files: Vec<DriveFile>,
    pub access_token: String,
    #[serde(flatten)]
    pub classification: Classification,
    pub batch_id: Option<Uuid>,
}

/// POST /api/v1/candidates/import/drive
pub async fn handle_import_drive(
    State(state): State<AppState>,
    Json(req): Json<DriveImportRequest>,
) -> Result<Json<BatchSummary>, AppError> {
    if req.access_token.trim().is_empty() {
        return Err(AppError::Validation("access_token is required".to_string()));
    }
    state.batches.validate(req.files.len())?;

    let batch_id = req.batch_id.unwrap_or_else(Uuid::new_v4);
    let meta = IngestMetadata {
        classification: req.classification,
        source: source::GOOGLE_DRIVE.to_string(),
        ..Default::default()
    };
    let items = req
        .files
        .into_iter()
        .map(|f| (f.name.clone(), f))
        .collect();

    let ingest = state.ingest.clone();
    let fetcher = state.fetcher.clone();
    let token = req.access_token;
    let summary = run_registered(&state, batch_id, items, None, |file| {
        ingest.ingest_drive_file(fetcher.as_ref(), file, &token, &meta)
    })
    .await?;
    Ok(Json(summary))
}

/// POST /api/v1/batches/:id/cancel
pub async fn handle_cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.registry.cancel(batch_id) {
        return Err(AppError::NotFound(format!("No running batch {batch_id}")));
    }
    info!("Cancellation requested for batch {batch_id}");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "batch_id": batch_id, "cancelled": true })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BackfillQuery {
    pub limit: Option<i64>,
}

/// POST /api/v1/candidates/backfill-locations
pub async fn handle_backfill_locations(
    State(state): State<AppState>,
    Query(params): Query<BackfillQuery>,
) -> Result<Json<BackfillSummary>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_BACKFILL_LIMIT).clamp(1, 1000);
    Ok(Json(state.backfill.run(limit).await?))
}
