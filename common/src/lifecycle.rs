// Process-lifetime glue between the registry, the orchestrator and the live scheduler

use crate::orchestrator::{ReconcileReport, SchedulerOrchestrator};
use crate::scheduler::CronScheduler;
use crate::store::ConfigurationStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn, Instrument};

/// HostedLifecycle runs the initial reconcile, starts the scheduler and
/// re-reconciles on every registry change
pub struct HostedLifecycle {
    orchestrator: Arc<SchedulerOrchestrator>,
    scheduler: Arc<CronScheduler>,
    ready: AtomicBool,
    stop: watch::Sender<bool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl HostedLifecycle {
    /// Reconcile while the scheduler is in standby, then start firing and
    /// watching for changes
    ///
    /// The subscription is taken before the initial pass so an edit racing
    /// with startup still triggers a follow-up pass.
    #[instrument(skip_all)]
    pub async fn start(
        store: Arc<ConfigurationStore>,
        orchestrator: Arc<SchedulerOrchestrator>,
        scheduler: Arc<CronScheduler>,
    ) -> (Arc<Self>, ReconcileReport) {
        let mut changes = store.subscribe();
        let _ = changes.borrow_and_update();

        let report = orchestrator.reconcile().await;
        scheduler.start();

        let (stop, stop_rx) = watch::channel(false);
        let lifecycle = Arc::new(Self {
            orchestrator: orchestrator.clone(),
            scheduler,
            ready: AtomicBool::new(true),
            stop,
            watcher: Mutex::new(None),
        });

        let watcher = tokio::spawn(
            watch_changes(orchestrator, changes, stop_rx)
                .instrument(tracing::info_span!("registry_watcher")),
        );
        *lifecycle
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(watcher);

        info!(
            live_jobs = lifecycle.scheduler.job_count(),
            failures = report.failures.len(),
            "Hosted lifecycle started"
        );
        (lifecycle, report)
    }

    /// True once the initial pass completed and until shutdown begins
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn orchestrator(&self) -> &Arc<SchedulerOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Arc<CronScheduler> {
        &self.scheduler
    }

    /// Stop reacting to changes, then drain the scheduler
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }

        self.stop.send_replace(true);
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                warn!(error = %e, "Registry watcher ended abnormally");
            }
        }

        self.scheduler.shutdown(grace).await;
        info!("Hosted lifecycle stopped");
    }
}

/// Reconcile after every registry change until told to stop
///
/// Several changes arriving during one pass collapse into a single follow-up
/// pass because the watch channel keeps only the latest revision.
async fn watch_changes(
    orchestrator: Arc<SchedulerOrchestrator>,
    mut changes: watch::Receiver<u64>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("Registry dropped, watcher exiting");
                    break;
                }
                let revision = *changes.borrow_and_update();
                debug!(revision = revision, "Registry changed, reconciling");
                orchestrator.reconcile().await;
            }
            _ = stop_requested(&mut stop) => break,
        }
    }
    debug!("Registry watcher stopped");
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
