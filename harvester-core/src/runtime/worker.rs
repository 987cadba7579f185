use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerSettings;
use crate::error::Result;
use crate::jobs::{DispatchStatus, JobDispatcher};
use crate::queue::{JobRecord, WorkQueue};

/// Single queue consumer. The pool is `concurrency` of these sharing one
/// queue and one dispatcher.
#[derive(Clone)]
pub struct QueueWorker {
    id: String,
    queue: Arc<dyn WorkQueue>,
    dispatcher: Arc<dyn JobDispatcher>,
    settings: WorkerSettings,
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl QueueWorker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn WorkQueue>,
        dispatcher: Arc<dyn JobDispatcher>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            dispatcher,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs at most one job. `Ok(None)` when the queue was empty.
    ///
    /// A job that keeps losing its lease is failed once it has used up
    /// `max_attempts` without being dispatched again.
    pub async fn run_next(&self) -> Result<Option<(JobRecord, DispatchStatus)>> {
        let Some(job) = self.queue.dequeue(self.settings.lease_ttl()).await? else {
            return Ok(None);
        };

        if job.attempts > self.settings.max_attempts {
            let error = format!(
                "gave up after {} attempts: {}",
                self.settings.max_attempts,
                job.error.as_deref().unwrap_or("lease expired")
            );
            warn!(target: "harvest::worker", job = %job.key, %error, "job exhausted its attempts");
            self.queue
                .fail(&job.key, &error, self.settings.failure_ttl())
                .await?;
            return Ok(Some((job, DispatchStatus::Failed { error })));
        }

        tracing::trace!(
            target: "harvest::worker",
            worker = %self.id,
            job = %job.key,
            attempt = job.attempts,
            "dispatching job"
        );
        let status = match self.dispatcher.dispatch(&job).await {
            DispatchStatus::Retry { error } if job.attempts >= self.settings.max_attempts => {
                DispatchStatus::Failed {
                    error: format!("gave up after {} attempts: {error}", job.attempts),
                }
            }
            status => status,
        };

        match &status {
            DispatchStatus::Success => {
                self.queue.complete(&job.key, job.result_ttl).await?;
            }
            DispatchStatus::Discarded { reason } => {
                debug!(target: "harvest::worker", job = %job.key, %reason, "job discarded");
                self.queue.complete(&job.key, job.result_ttl).await?;
            }
            DispatchStatus::Retry { error } => {
                let delay = self.settings.retry_delay(job.attempts);
                warn!(
                    target: "harvest::worker",
                    job = %job.key,
                    attempt = job.attempts,
                    ?delay,
                    %error,
                    "job will be retried"
                );
                self.queue.retry(&job.key, error, delay).await?;
            }
            DispatchStatus::Failed { error } => {
                warn!(target: "harvest::worker", job = %job.key, %error, "job failed");
                self.queue
                    .fail(&job.key, error, self.settings.failure_ttl())
                    .await?;
            }
        }

        Ok(Some((job, status)))
    }

    /// Processes jobs until the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.run_next().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let idle = self.settings.poll_interval();
        loop {
            if shutdown.is_cancelled() {
                info!("Worker {} shutting down", self.id);
                break;
            }

            let wait = match self.run_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => idle,
                Err(err) => {
                    warn!(target: "harvest::worker", worker = %self.id, "queue error: {err}");
                    idle
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Worker {} shutting down", self.id);
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
