//! Remote-source entry points: drive files and spreadsheet rows become `IngestFile`s
//! (or direct inserts) and flow through the same orchestrator.

use tracing::{info, warn};

use crate::ingest::sources::{
    direct_download_url, file_name_from_url, DriveFile, RemoteFetcher, SpreadsheetRow,
};
use crate::ingest::{IngestFailure, IngestFile, IngestMetadata, IngestOutcome, IngestService};

impl IngestService {
    /// Downloads (or exports) a picked drive file with the caller's token and ingests it.
    pub async fn ingest_drive_file(
        &self,
        fetcher: &dyn RemoteFetcher,
        file: DriveFile,
        access_token: &str,
        meta: &IngestMetadata,
    ) -> IngestOutcome {
        let url = file.download_url();
        let fetched = match fetcher.fetch(&url, Some(access_token)).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Drive download of {} failed: {e}", file.name);
                return IngestOutcome::failed(
                    IngestFailure::Fetch,
                    format!("Download failed: {e}"),
                );
            }
        };

        let (file_name, mime_type) = file.downloaded_as();
        let mut meta = meta.clone();
        meta.source_url = file.url.clone();
        self.ingest_one(
            IngestFile {
                file_name,
                mime_type: Some(mime_type),
                bytes: fetched.bytes,
            },
            &meta,
        )
        .await
    }

    /// Imports one spreadsheet row. Row fields override model output. A row that
    /// carries a name and an email is kept even when its resume cannot be used.
    pub async fn import_row(
        &self,
        fetcher: &dyn RemoteFetcher,
        row: SpreadsheetRow,
        meta: &IngestMetadata,
    ) -> IngestOutcome {
        let mut meta = meta.clone();
        meta.overrides = row.overrides();

        let Some(resume_url) = row.resume_url.clone() else {
            return self.insert_from_overrides(&meta).await;
        };
        meta.source_url = Some(resume_url.clone());

        let url = direct_download_url(&resume_url);
        let outcome = match fetcher.fetch(&url, None).await {
            Ok(fetched) => {
                // Without a file name in the URL the response content type decides the kind
                let fallback = row.label(0);
                self.ingest_one(
                    IngestFile {
                        file_name: file_name_from_url(&url, &fallback),
                        mime_type: fetched.content_type,
                        bytes: fetched.bytes,
                    },
                    &meta,
                )
                .await
            }
            Err(e) => {
                warn!("Resume download from {resume_url} failed: {e}");
                IngestOutcome::failed(IngestFailure::Fetch, format!("Resume download failed: {e}"))
            }
        };

        match outcome.failure {
            Some(kind) if kind.is_resume_problem() && meta.overrides.has_identity() => {
                info!(
                    "Resume for {} unusable ({}), importing row fields only",
                    row.label(0),
                    outcome.message
                );
                let mut inserted = self.insert_from_overrides(&meta).await;
                if inserted.success {
                    inserted.message =
                        format!("{} (resume not attached: {})", inserted.message, outcome.message);
                }
                inserted
            }
            _ => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::ingest::sources::{FetchError, FetchedFile};
    use crate::llm_client::retry::RetryPolicy;
    use crate::testing::{
        resume_json, resume_text, sample_candidate, MemoryCandidateStore, MemoryObjectStore,
        ScriptedModel,
    };

    /// Serves a fixed body and records (url, bearer) pairs.
    struct StaticFetcher {
        body: Option<(Vec<u8>, Option<String>)>,
        requests: Mutex<Vec<(String, Option<String>)>>,
    }

    impl StaticFetcher {
        fn serving(body: &str, content_type: Option<&str>) -> Self {
            Self {
                body: Some((body.as_bytes().to_vec(), content_type.map(String::from))),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn not_found() -> Self {
            Self {
                body: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteFetcher for StaticFetcher {
        async fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<FetchedFile, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), bearer.map(String::from)));
            match &self.body {
                Some((bytes, content_type)) => Ok(FetchedFile {
                    bytes: bytes.clone(),
                    content_type: content_type.clone(),
                }),
                None => Err(FetchError::Status {
                    status: 404,
                    url: url.to_string(),
                }),
            }
        }
    }

    fn service(
        model: ScriptedModel,
    ) -> (IngestService, Arc<MemoryCandidateStore>, Arc<MemoryObjectStore>) {
        let objects = Arc::new(MemoryObjectStore::default());
        let candidates = Arc::new(MemoryCandidateStore::default());
        let service = IngestService::new(
            objects.clone(),
            candidates.clone(),
            Arc::new(model),
            None,
            RetryPolicy::default(),
        );
        (service, candidates, objects)
    }

    fn meta() -> IngestMetadata {
        IngestMetadata {
            source: "Google Drive".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_drive_file_uses_token_and_records_source_url() {
        let (service, candidates, _objects) =
            service(ScriptedModel::new(vec![Ok(resume_json("Jane Doe", "jane@doe.dev"))]));
        let fetcher =
            StaticFetcher::serving(&resume_text("Jane Doe", "jane@doe.dev"), Some("text/plain"));
        let file = DriveFile {
            id: "f1".to_string(),
            name: "jane.txt".to_string(),
            mime_type: "text/plain".to_string(),
            url: Some("https://drive.google.com/file/d/f1/view".to_string()),
        };

        let outcome = service
            .ingest_drive_file(&fetcher, file, "ya29.token", &meta())
            .await;
        assert!(outcome.success, "{}", outcome.message);

        let requests = fetcher.requests.lock().unwrap().clone();
        assert!(requests[0].0.ends_with("/f1?alt=media"));
        assert_eq!(requests[0].1.as_deref(), Some("ya29.token"));

        let row = &candidates.rows()[0];
        assert_eq!(row.source, "Google Drive");
        assert_eq!(
            row.source_url.as_deref(),
            Some("https://drive.google.com/file/d/f1/view")
        );
    }

    #[tokio::test]
    async fn test_drive_download_failure_is_an_item_error() {
        let (service, candidates, objects) = service(ScriptedModel::new(vec![]));
        let file = DriveFile {
            id: "gone".to_string(),
            name: "gone.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            url: None,
        };
        let outcome = service
            .ingest_drive_file(&StaticFetcher::not_found(), file, "t", &meta())
            .await;
        assert_eq!(outcome.failure, Some(IngestFailure::Fetch));
        assert!(candidates.rows().is_empty());
        assert!(objects.stored_keys().is_empty());
    }

    #[tokio::test]
    async fn test_row_without_resume_is_inserted_directly() {
        let (service, candidates, _objects) = service(ScriptedModel::new(vec![]));
        let row = SpreadsheetRow {
            name: Some("Sam Roe".to_string()),
            email: Some("sam@roe.dev".to_string()),
            experience: Some(4),
            skills: vec!["Python".to_string()],
            ..Default::default()
        };
        let outcome = service
            .import_row(&StaticFetcher::not_found(), row, &meta())
            .await;
        assert!(outcome.success);
        let stored = &candidates.rows()[0];
        assert_eq!(stored.experience, 4);
        assert_eq!(stored.skills, vec!["Python"]);
    }

    #[tokio::test]
    async fn test_row_with_resume_link_fetches_and_prefers_row_fields() {
        let (service, candidates, _objects) = service(ScriptedModel::new(vec![Ok(resume_json(
            "Model Name",
            "model@x.dev",
        ))]));
        let fetcher =
            StaticFetcher::serving(&resume_text("Model Name", "model@x.dev"), Some("text/plain"));
        let row = SpreadsheetRow {
            name: Some("Row Name".to_string()),
            email: Some("row@x.dev".to_string()),
            resume_url: Some("https://drive.google.com/file/d/abc/view".to_string()),
            ..Default::default()
        };
        let outcome = service.import_row(&fetcher, row, &meta()).await;
        assert!(outcome.success, "{}", outcome.message);

        let requests = fetcher.requests.lock().unwrap().clone();
        assert_eq!(
            requests[0].0,
            "https://drive.google.com/uc?export=download&id=abc"
        );
        assert_eq!(requests[0].1, None);
        let stored = &candidates.rows()[0];
        assert_eq!(stored.name, "Row Name");
        assert_eq!(stored.email, "row@x.dev");
        assert_eq!(stored.role, "Software Engineer");
    }

    fn identified_row() -> SpreadsheetRow {
        SpreadsheetRow {
            name: Some("Row Name".to_string()),
            email: Some("row@x.dev".to_string()),
            role: Some("Data Engineer".to_string()),
            resume_url: Some("https://files.example.com/cv/row.pdf".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_row_survives_failed_resume_download() {
        let (service, candidates, _objects) = service(ScriptedModel::new(vec![]));
        let outcome = service
            .import_row(&StaticFetcher::not_found(), identified_row(), &meta())
            .await;

        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("resume not attached"));
        assert!(outcome.message.contains("404"));
        let stored = &candidates.rows()[0];
        assert_eq!(stored.name, "Row Name");
        assert_eq!(stored.email, "row@x.dev");
        assert_eq!(stored.role, "Data Engineer");
        assert_eq!(stored.resume_url, None);
        assert_eq!(
            stored.source_url.as_deref(),
            Some("https://files.example.com/cv/row.pdf")
        );
    }

    #[tokio::test]
    async fn test_row_survives_undecodable_resume() {
        let (service, candidates, _objects) = service(ScriptedModel::new(vec![]));
        let fetcher =
            StaticFetcher::serving("this is not a pdf at all", Some("application/pdf"));
        let outcome = service.import_row(&fetcher, identified_row(), &meta()).await;

        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("Text extraction failed"));
        assert_eq!(candidates.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_row_survives_too_short_resume() {
        let (service, candidates, _objects) = service(ScriptedModel::new(vec![]));
        let fetcher = StaticFetcher::serving("Row Name, row@x.dev", Some("text/plain"));
        let row = SpreadsheetRow {
            resume_url: Some("https://files.example.com/cv/row.txt".to_string()),
            ..identified_row()
        };
        let outcome = service.import_row(&fetcher, row, &meta()).await;

        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("Insufficient text"));
        assert_eq!(candidates.rows()[0].email, "row@x.dev");
    }

    #[tokio::test]
    async fn test_row_without_identity_still_fails_on_bad_resume() {
        let (service, candidates, _objects) = service(ScriptedModel::new(vec![]));
        let row = SpreadsheetRow {
            name: Some("No Email".to_string()),
            resume_url: Some("https://files.example.com/cv/none.pdf".to_string()),
            ..Default::default()
        };
        let outcome = service
            .import_row(&StaticFetcher::not_found(), row, &meta())
            .await;

        assert_eq!(outcome.failure, Some(IngestFailure::Fetch));
        assert!(candidates.rows().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_row_is_not_retried_without_resume() {
        let (service, candidates, _objects) = service(ScriptedModel::new(vec![]));
        candidates.seed(sample_candidate("Row Name", "row@x.dev"));
        let fetcher = StaticFetcher::serving(
            &resume_text("Row Name", "row@x.dev"),
            Some("text/plain"),
        );
        let row = SpreadsheetRow {
            resume_url: Some("https://files.example.com/cv/row.txt".to_string()),
            ..identified_row()
        };
        let outcome = service.import_row(&fetcher, row, &meta()).await;

        assert_eq!(outcome.failure, Some(IngestFailure::Duplicate));
        assert_eq!(candidates.rows().len(), 1);
    }
}
