use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use common::lifecycle::HostedLifecycle;
use common::models::TriggerOutcome;
use common::orchestrator::SchedulerOrchestrator;
use common::scheduler::CronScheduler;
use common::store::ConfigurationStore;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigurationStore>,
    pub lifecycle: Arc<HostedLifecycle>,
    pub outcomes: broadcast::Sender<TriggerOutcome>,
    pub metrics: Option<PrometheusHandle>,
    /// Cancelled once shutdown begins; long-lived responses end on it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<ConfigurationStore>,
        lifecycle: Arc<HostedLifecycle>,
        outcomes: broadcast::Sender<TriggerOutcome>,
        metrics: Option<PrometheusHandle>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            lifecycle,
            outcomes,
            metrics,
            shutdown,
        }
    }

    pub fn orchestrator(&self) -> &Arc<SchedulerOrchestrator> {
        self.lifecycle.orchestrator()
    }

    pub fn scheduler(&self) -> &Arc<CronScheduler> {
        self.lifecycle.scheduler()
    }
}
