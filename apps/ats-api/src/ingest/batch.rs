//! Batch Processor: sequential, rate-limited processing of N items with
//! per-item status, progress events, and cooperative cancellation.
//!
//! Items run one at a time in submission order; a failed item never stops the
//! batch. The abort flag is checked between items, so an in-flight item always
//! finishes before the batch stops.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ingest::IngestOutcome;
use crate::throttle::RateLimiter;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Batch contains no items")]
    Empty,

    #[error("Batch of {count} items exceeds the limit of {max}")]
    TooLarge { count: usize, max: usize },

    #[error("Batch {0} is already running")]
    AlreadyRunning(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    pub file_name: String,
    pub status: QueueStatus,
    pub message: Option<String>,
    pub candidate_name: Option<String>,
}

impl QueueItem {
    fn pending(file_name: String) -> Self {
        Self {
            file_name,
            status: QueueStatus::Pending,
            message: None,
            candidate_name: None,
        }
    }

    fn finish(&mut self, outcome: &IngestOutcome) {
        self.status = if outcome.success {
            QueueStatus::Success
        } else {
            QueueStatus::Error
        };
        self.message = Some(outcome.message.clone());
        self.candidate_name = outcome.candidate_name.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub percent: u8,
    pub current: String,
}

impl BatchProgress {
    pub fn new(processed: usize, total: usize, current: &str) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((processed * 100) / total).min(100) as u8
        };
        Self {
            processed,
            total,
            percent,
            current: current.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because the batch was cancelled.
    pub skipped: usize,
    pub aborted: bool,
    pub items: Vec<QueueItem>,
}

impl BatchSummary {
    fn from_queue(batch_id: Uuid, items: Vec<QueueItem>, aborted: bool) -> Self {
        let count = |status| items.iter().filter(|i| i.status == status).count();
        Self {
            batch_id,
            total: items.len(),
            succeeded: count(QueueStatus::Success),
            failed: count(QueueStatus::Error),
            skipped: count(QueueStatus::Pending),
            aborted,
            items,
        }
    }
}

/// Events streamed to a live client while a batch runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        batch_id: Uuid,
        total: usize,
    },
    Item {
        index: usize,
        item: QueueItem,
    },
    Progress(BatchProgress),
    Completed(BatchSummary),
}

impl BatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::Started { .. } => "started",
            BatchEvent::Item { .. } => "item",
            BatchEvent::Progress(_) => "progress",
            BatchEvent::Completed(_) => "completed",
        }
    }
}

/// Cooperative cancellation shared between a running batch and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Abort flags of batches currently running, keyed by batch id.
#[derive(Debug, Clone, Default)]
pub struct BatchRegistry {
    active: Arc<Mutex<HashMap<Uuid, AbortFlag>>>,
}

impl BatchRegistry {
    /// Fails when `batch_id` is still running, so its cancel handle stays reachable.
    pub fn register(&self, batch_id: Uuid) -> Result<AbortFlag, BatchError> {
        let mut active = self.lock();
        if active.contains_key(&batch_id) {
            return Err(BatchError::AlreadyRunning(batch_id));
        }
        let flag = AbortFlag::default();
        active.insert(batch_id, flag.clone());
        Ok(flag)
    }

    pub fn finish(&self, batch_id: Uuid) {
        self.lock().remove(&batch_id);
    }

    /// Returns false when no batch with that id is running.
    pub fn cancel(&self, batch_id: Uuid) -> bool {
        match self.lock().get(&batch_id) {
            Some(flag) => {
                flag.abort();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, AbortFlag>> {
        // A panic while holding the map cannot leave it inconsistent
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct BatchRunner {
    limiter: Arc<dyn RateLimiter>,
    max_items: usize,
}

impl BatchRunner {
    pub fn new(limiter: Arc<dyn RateLimiter>, max_items: usize) -> Self {
        Self { limiter, max_items }
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn validate(&self, count: usize) -> Result<(), BatchError> {
        if count == 0 {
            return Err(BatchError::Empty);
        }
        if count > self.max_items {
            return Err(BatchError::TooLarge {
                count,
                max: self.max_items,
            });
        }
        Ok(())
    }

    /// Processes `items` (label, payload) in order through `work`.
    ///
    /// Events go to `events` when present; a disconnected receiver does not stop the batch.
    pub async fn run<T, F, Fut>(
        &self,
        batch_id: Uuid,
        items: Vec<(String, T)>,
        abort: &AbortFlag,
        events: Option<&mpsc::Sender<BatchEvent>>,
        mut work: F,
    ) -> Result<BatchSummary, BatchError>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = IngestOutcome>,
    {
        self.validate(items.len())?;

        let total = items.len();
        let mut queue: Vec<QueueItem> = items
            .iter()
            .map(|(label, _)| QueueItem::pending(label.clone()))
            .collect();

        emit(events, BatchEvent::Started { batch_id, total }).await;
        info!("Batch {batch_id}: processing {total} items");

        let mut aborted = false;
        for (index, (label, payload)) in items.into_iter().enumerate() {
            if abort.is_aborted() {
                warn!("Batch {batch_id} cancelled after {index} of {total} items");
                aborted = true;
                break;
            }

            let _permit = self.limiter.acquire().await;
            // The wait for the limiter may have outlasted a cancel request
            if abort.is_aborted() {
                warn!("Batch {batch_id} cancelled after {index} of {total} items");
                aborted = true;
                break;
            }

            queue[index].status = QueueStatus::Processing;
            emit(
                events,
                BatchEvent::Item {
                    index,
                    item: queue[index].clone(),
                },
            )
            .await;

            let outcome = work(payload).await;
            if !outcome.success {
                warn!("Batch {batch_id}: {label} failed: {}", outcome.message);
            }
            queue[index].finish(&outcome);

            emit(
                events,
                BatchEvent::Item {
                    index,
                    item: queue[index].clone(),
                },
            )
            .await;
            emit(
                events,
                BatchEvent::Progress(BatchProgress::new(index + 1, total, &label)),
            )
            .await;
        }

        let summary = BatchSummary::from_queue(batch_id, queue, aborted);
        info!(
            "Batch {batch_id} finished: {} succeeded, {} failed, {} skipped",
            summary.succeeded, summary.failed, summary.skipped
        );
        emit(events, BatchEvent::Completed(summary.clone())).await;
        Ok(summary)
    }
}

async fn emit(events: Option<&mpsc::Sender<BatchEvent>>, event: BatchEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestFailure, IngestFile, IngestMetadata, IngestService};
    use crate::llm_client::retry::RetryPolicy;
    use crate::testing::{
        resume_json, resume_text, MemoryCandidateStore, MemoryObjectStore, ScriptedModel,
    };
    use crate::throttle::IntervalLimiter;
    use std::time::Duration;

    fn runner(max_items: usize) -> BatchRunner {
        BatchRunner::new(
            Arc::new(IntervalLimiter::sequential(Duration::from_millis(500))),
            max_items,
        )
    }

    fn labels(n: usize) -> Vec<(String, usize)> {
        (1..=n).map(|i| (format!("file{i}.pdf"), i)).collect()
    }

    fn ok(i: usize) -> IngestOutcome {
        IngestOutcome::created(Uuid::new_v4(), &format!("Candidate {i}"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_item_does_not_stop_batch() {
        let summary = runner(50)
            .run(Uuid::new_v4(), labels(5), &AbortFlag::default(), None, |i| async move {
                if i == 3 {
                    IngestOutcome::failed(IngestFailure::Extraction, "pdf-decode-failed: bad xref")
                } else {
                    ok(i)
                }
            })
            .await
            .unwrap();

        let statuses: Vec<QueueStatus> = summary.items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                QueueStatus::Success,
                QueueStatus::Success,
                QueueStatus::Error,
                QueueStatus::Success,
                QueueStatus::Success
            ]
        );
        let names: Vec<&str> = summary.items.iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["file1.pdf", "file2.pdf", "file3.pdf", "file4.pdf", "file5.pdf"]
        );
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);
        assert!(!summary.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_are_spaced_by_limiter() {
        let started = tokio::time::Instant::now();
        runner(50)
            .run(Uuid::new_v4(), labels(3), &AbortFlag::default(), None, |i| async move { ok(i) })
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_empty_batches() {
        let r = runner(2);
        assert_eq!(
            r.validate(3),
            Err(BatchError::TooLarge { count: 3, max: 2 })
        );
        assert_eq!(r.validate(0), Err(BatchError::Empty));

        let mut calls = 0;
        let result = r
            .run(Uuid::new_v4(), labels(3), &AbortFlag::default(), None, |i| {
                calls += 1;
                async move { ok(i) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_before_next_item() {
        let abort = AbortFlag::default();
        let flag = abort.clone();
        let summary = runner(50)
            .run(Uuid::new_v4(), labels(5), &abort, None, |i| {
                let flag = flag.clone();
                async move {
                    if i == 2 {
                        flag.abort();
                    }
                    ok(i)
                }
            })
            .await
            .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.items[2].status, QueueStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_report_item_transitions_and_progress() {
        let (tx, mut rx) = mpsc::channel(64);
        runner(50)
            .run(Uuid::new_v4(), labels(2), &AbortFlag::default(), Some(&tx), |i| async move {
                ok(i)
            })
            .await
            .unwrap();
        drop(tx);

        let mut names = Vec::new();
        let mut last_progress = None;
        while let Some(event) = rx.recv().await {
            names.push(event.name());
            if let BatchEvent::Progress(p) = &event {
                last_progress = Some(p.clone());
            }
        }
        assert_eq!(
            names,
            vec!["started", "item", "item", "progress", "item", "item", "progress", "completed"]
        );
        let last = last_progress.unwrap();
        assert_eq!((last.processed, last.total, last.percent), (2, 2, 100));
        assert_eq!(last.current, "file2.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_limiter_wait_skips_next_item() {
        let abort = AbortFlag::default();
        let flag = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            flag.abort();
        });

        let mut calls = 0;
        let summary = runner(50)
            .run(Uuid::new_v4(), labels(5), &abort, None, |i| {
                calls += 1;
                async move { ok(i) }
            })
            .await
            .unwrap();

        assert_eq!(calls, 1);
        assert!(summary.aborted);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 4);
    }

    #[test]
    fn test_registry_rejects_active_batch_id() {
        let registry = BatchRegistry::default();
        let id = Uuid::new_v4();
        let first = registry.register(id).unwrap();

        assert_eq!(registry.register(id).unwrap_err(), BatchError::AlreadyRunning(id));
        assert!(registry.cancel(id));
        assert!(first.is_aborted());

        registry.finish(id);
        assert!(registry.register(id).is_ok());
    }

    #[test]
    fn test_registry_cancel_only_known_batches() {
        let registry = BatchRegistry::default();
        let id = Uuid::new_v4();
        let flag = registry.register(id).unwrap();
        assert!(!registry.cancel(Uuid::new_v4()));
        assert!(registry.cancel(id));
        assert!(flag.is_aborted());
        registry.finish(id);
        assert!(!registry.cancel(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disguised_pdf_fails_alone_in_file_batch() {
        let objects = Arc::new(MemoryObjectStore::default());
        let candidates = Arc::new(MemoryCandidateStore::default());
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(resume_json("Ana One", "ana@one.dev")),
            Ok(resume_json("Cal Three", "cal@three.dev")),
        ]));
        let service = IngestService::new(
            objects,
            candidates.clone(),
            model,
            None,
            RetryPolicy::default(),
        );
        let meta = IngestMetadata::default();

        let file = |name: &str, body: Vec<u8>| IngestFile {
            file_name: name.to_string(),
            mime_type: None,
            bytes: body,
        };
        let items = vec![
            (
                "ana.txt".to_string(),
                file("ana.txt", resume_text("Ana One", "ana@one.dev").into_bytes()),
            ),
            (
                "notes.pdf".to_string(),
                file("notes.pdf", b"plain text pretending to be a pdf document".to_vec()),
            ),
            (
                "cal.txt".to_string(),
                file("cal.txt", resume_text("Cal Three", "cal@three.dev").into_bytes()),
            ),
        ];

        let summary = runner(50)
            .run(Uuid::new_v4(), items, &AbortFlag::default(), None, |f| {
                service.ingest_one(f, &meta)
            })
            .await
            .unwrap();

        let statuses: Vec<QueueStatus> = summary.items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![QueueStatus::Success, QueueStatus::Error, QueueStatus::Success]
        );
        assert!(summary.items[1]
            .message
            .as_deref()
            .unwrap()
            .contains("pdf-decode-failed"));
        assert_eq!(candidates.rows().len(), 2);
    }
}
