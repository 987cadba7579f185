//! Runtime supervisor: periodic controller loops plus the worker pool, all
//! tied to one shutdown token.

mod worker;

pub use worker::QueueWorker;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backfill::BackfillController;
use crate::config::WorkerSettings;
use crate::error::{HarvestError, Result};
use crate::jobs::JobDispatcher;
use crate::queue::WorkQueue;
use crate::scanner::EligibilityScanner;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Runs `tick` immediately, then again `interval` after each run finishes,
/// until `shutdown` fires. A tick in progress is never interrupted; ticks
/// that can take long watch the token themselves.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                info!("{} shutting down", name);
                break;
            }
            tick().await;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("{} shutting down", name);
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

pub struct HarvesterRuntime {
    backfill: Arc<BackfillController>,
    scanner: Arc<EligibilityScanner>,
    queue: Arc<dyn WorkQueue>,
    dispatcher: Arc<dyn JobDispatcher>,
    worker_settings: WorkerSettings,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for HarvesterRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvesterRuntime")
            .field("backfill", &self.backfill)
            .field("scanner", &self.scanner)
            .field("worker_settings", &self.worker_settings)
            .field("cancelled", &self.shutdown_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl HarvesterRuntime {
    pub fn new(
        backfill: Arc<BackfillController>,
        scanner: Arc<EligibilityScanner>,
        queue: Arc<dyn WorkQueue>,
        dispatcher: Arc<dyn JobDispatcher>,
        worker_settings: WorkerSettings,
    ) -> Self {
        Self {
            backfill,
            scanner,
            queue,
            dispatcher,
            worker_settings,
            shutdown_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub async fn start(&self) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(HarvestError::Cancelled(
                "runtime was already shut down".to_string(),
            ));
        }

        let mut handles = self.handles.lock().await;
        handles.push(self.spawn_backfill_loop());
        handles.push(self.spawn_scan_loop());

        let group = format!("harvest-{}", std::process::id());
        for i in 0..self.worker_settings.concurrency.max(1) {
            let worker = QueueWorker::new(
                format!("{group}-w{i}"),
                Arc::clone(&self.queue),
                Arc::clone(&self.dispatcher),
                self.worker_settings,
            );
            handles.push(tokio::spawn(worker.run(self.shutdown_token.clone())));
        }

        info!(
            workers = self.worker_settings.concurrency.max(1),
            backfill_interval = ?self.backfill.settings().interval(),
            scan_interval = ?self.scanner.settings().interval(),
            "harvester runtime started"
        );
        Ok(())
    }

    fn spawn_backfill_loop(&self) -> JoinHandle<()> {
        let backfill = Arc::clone(&self.backfill);
        spawn_periodic(
            "Backfill loop",
            backfill.settings().interval(),
            self.shutdown_token.clone(),
            move || {
                let backfill = Arc::clone(&backfill);
                async move {
                    if let Err(err) = backfill.run_once().await {
                        warn!(target: "harvest::backfill", "backfill run failed: {err}");
                    }
                }
            },
        )
    }

    fn spawn_scan_loop(&self) -> JoinHandle<()> {
        let scanner = Arc::clone(&self.scanner);
        let shutdown = self.shutdown_token.clone();
        spawn_periodic(
            "Scan loop",
            scanner.settings().interval(),
            self.shutdown_token.clone(),
            move || {
                let scanner = Arc::clone(&scanner);
                let shutdown = shutdown.clone();
                async move {
                    match scanner.run_full_scan_until(&shutdown).await {
                        Ok(_) | Err(HarvestError::Cancelled(_)) => {}
                        Err(err) => warn!(target: "harvest::scan", "scan run failed: {err}"),
                    }
                }
            },
        )
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown of harvester runtime");
        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };

        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Runtime task failed: {:?}", e),
                Err(_) => warn!("Runtime task timed out during shutdown"),
            }
        }

        info!("Harvester runtime shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn periodic_task_runs_immediately_and_stops_on_cancel() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let counter = Arc::clone(&runs);

        let handle = spawn_periodic(
            "test loop",
            Duration::from_millis(10),
            shutdown.clone(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops")
            .expect("loop task");

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
