//! Asynchronous ranking jobs: created and returned immediately, scored in the
//! background, polled through the `ranking_jobs` row.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ingest::batch::BatchProgress;
use crate::models::ranking_job::{RankingJobRow, RankingJobStatus};
use crate::ranking::{
    FailurePolicy, RankingObserver, RankingOutcome, RankingScheduler, RankingTarget,
};
use crate::store::{RankingJobStore, StoreError};

/// Persists per-candidate progress onto the job row.
struct JobProgress {
    jobs: Arc<dyn RankingJobStore>,
    job_id: Uuid,
}

#[async_trait]
impl RankingObserver for JobProgress {
    async fn scored(&self, _index: usize, _outcome: &RankingOutcome, progress: &BatchProgress) {
        let processed = i32::try_from(progress.processed).unwrap_or(i32::MAX);
        if let Err(e) = self.jobs.set_processed(self.job_id, processed).await {
            warn!("Recording progress for ranking job {} failed: {e}", self.job_id);
        }
    }
}

pub struct RankingJobRunner {
    jobs: Arc<dyn RankingJobStore>,
    scheduler: Arc<RankingScheduler>,
}

impl RankingJobRunner {
    pub fn new(jobs: Arc<dyn RankingJobStore>, scheduler: Arc<RankingScheduler>) -> Self {
        Self { jobs, scheduler }
    }

    pub fn jobs(&self) -> &Arc<dyn RankingJobStore> {
        &self.jobs
    }

    /// Creates a queued job and starts scoring it on a background task.
    pub async fn start(
        self: &Arc<Self>,
        job_description: String,
        target: RankingTarget,
    ) -> Result<RankingJobRow, StoreError> {
        let filter = match &target {
            RankingTarget::Filter(filter) => filter.clone(),
            RankingTarget::Candidates(_) => Default::default(),
        };
        let job = self.jobs.create(&job_description, &filter).await?;
        info!("Created ranking job {}", job.id);

        let runner = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            runner.execute(job_id, &job_description, target).await;
        });

        Ok(job)
    }

    /// Runs a job to a terminal state. Per-candidate failures still complete the job;
    /// resolution failures and fatal model errors fail it.
    pub async fn execute(&self, job_id: Uuid, job_description: &str, target: RankingTarget) {
        let ids = match target.resolve(self.scheduler.candidates().as_ref()).await {
            Ok(ids) => ids,
            Err(e) => {
                self.fail(job_id, &format!("Failed to resolve candidates: {e}"))
                    .await;
                return;
            }
        };

        let outcome = async {
            self.jobs
                .set_total(job_id, i32::try_from(ids.len()).unwrap_or(i32::MAX))
                .await?;
            self.jobs
                .transition(job_id, RankingJobStatus::Processing, None)
                .await
        }
        .await;
        if let Err(e) = outcome {
            self.fail(job_id, &format!("Failed to start job: {e}")).await;
            return;
        }

        let observer = JobProgress {
            jobs: self.jobs.clone(),
            job_id,
        };
        let summary = self
            .scheduler
            .run(job_description, &ids, FailurePolicy::StopOnFatal, Some(&observer))
            .await;

        match summary.fatal_error {
            Some(message) => {
                self.fail(job_id, &format!("Scoring service unavailable: {message}"))
                    .await
            }
            None => {
                let note = (summary.failed > 0).then(|| {
                    format!(
                        "{} of {} candidates failed to score",
                        summary.failed, summary.total
                    )
                });
                match self
                    .jobs
                    .transition(job_id, RankingJobStatus::Completed, note.as_deref())
                    .await
                {
                    Ok(()) => info!(
                        "Ranking job {job_id} completed: {} scored, {} failed",
                        summary.succeeded, summary.failed
                    ),
                    Err(e) => error!("Completing ranking job {job_id} failed: {e}"),
                }
            }
        }
    }

    async fn fail(&self, job_id: Uuid, message: &str) {
        error!("Ranking job {job_id} failed: {message}");
        if let Err(e) = self
            .jobs
            .transition(job_id, RankingJobStatus::Failed, Some(message))
            .await
        {
            error!("Marking ranking job {job_id} failed did not persist: {e}");
        }
    }
}
