// In-process cron scheduler engine
//
// Each job runs in its own task. The job's binding (spec snapshot, parsed
// schedule, paused flag) lives in a watch channel, so an update is a single
// atomic swap the job observes between fires. Fires run inline in the job task,
// which gives at most one concurrent execution per job.

use crate::config::{MisfirePolicy, SchedulerConfig};
use crate::errors::SchedulerError;
use crate::executor::JobExecutor;
use crate::models::{JobIdentity, ScheduleSpec};
use crate::schedule;
use crate::scheduler::{LiveJob, LiveScheduler};
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// Configuration for the scheduler engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub misfire_policy: MisfirePolicy,
    /// Jobs whose cron interval is shorter than this are flagged when installed
    pub trigger_timeout: Option<Duration>,
}

impl From<&SchedulerConfig> for EngineConfig {
    fn from(settings: &SchedulerConfig) -> Self {
        Self {
            misfire_policy: settings.misfire_policy,
            trigger_timeout: Some(settings.trigger_timeout()),
        }
    }
}

/// Fire times sampled when looking for the tightest gap in a schedule
const INTERVAL_SAMPLES: usize = 16;

/// Scheduler lifecycle: jobs may be registered in standby but only fire while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Standby,
    Running,
    ShuttingDown,
}

#[derive(Clone)]
struct JobBinding {
    spec: Arc<ScheduleSpec>,
    schedule: Arc<CronSchedule>,
    time_zone: Tz,
    paused: bool,
}

impl JobBinding {
    fn new(spec: Arc<ScheduleSpec>, paused: bool) -> Result<Self, SchedulerError> {
        let schedule = schedule::parse_cron_expression(&spec.cron_expression)?;
        Ok(Self {
            time_zone: spec.resolved_time_zone(),
            schedule: Arc::new(schedule),
            spec,
            paused,
        })
    }

    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        schedule::next_fire_after(&self.schedule, self.time_zone, after)
    }

    /// The schedule's tightest gap between fires, if it is below `timeout`
    fn interval_below(&self, timeout: Duration, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let timeout = chrono::Duration::from_std(timeout).ok()?;
        schedule::shortest_interval(&self.schedule, self.time_zone, now, INTERVAL_SAMPLES)
            .filter(|interval| *interval < timeout)
    }
}

struct JobHandle {
    binding: watch::Sender<JobBinding>,
    task: JoinHandle<()>,
}

/// Live scheduler backed by tokio tasks and the `cron` crate
pub struct CronScheduler {
    executor: Arc<dyn JobExecutor>,
    config: EngineConfig,
    jobs: Mutex<HashMap<JobIdentity, JobHandle>>,
    /// Tasks of deleted jobs that may still be finishing a fire
    retired: Mutex<Vec<JoinHandle<()>>>,
    state: watch::Sender<SchedulerState>,
}

impl CronScheduler {
    /// Create a scheduler in standby
    pub fn new(executor: Arc<dyn JobExecutor>, config: EngineConfig) -> Self {
        let (state, _) = watch::channel(SchedulerState::Standby);
        Self {
            executor,
            config,
            jobs: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            state,
        }
    }

    /// A fire that runs up to the timeout overlaps later fire times of a tighter schedule
    fn warn_if_interval_below_timeout(&self, binding: &JobBinding) {
        let Some(timeout) = self.config.trigger_timeout else {
            return;
        };
        if let Some(interval) = binding.interval_below(timeout, Utc::now()) {
            warn!(
                trigger = %binding.spec.name,
                cron = %binding.spec.cron_expression,
                interval_seconds = interval.num_seconds(),
                timeout_seconds = timeout.as_secs(),
                misfire_policy = ?self.config.misfire_policy,
                "Cron interval is shorter than the trigger timeout"
            );
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Leave standby and start firing jobs
    pub fn start(&self) {
        let started = self.state.send_if_modified(|state| {
            if *state == SchedulerState::Standby {
                *state = SchedulerState::Running;
                true
            } else {
                false
            }
        });
        if started {
            info!(
                jobs = self.lock_jobs().len(),
                misfire_policy = ?self.config.misfire_policy,
                "Live scheduler started"
            );
        }
    }

    /// Stop admitting fires and wait for in-flight fires to finish
    ///
    /// Fires still running after `grace` are aborted.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        if self.state.send_replace(SchedulerState::ShuttingDown) == SchedulerState::ShuttingDown {
            return;
        }

        // Dropping each binding sender closes the job's channel
        let mut tasks: Vec<JoinHandle<()>> = {
            let mut jobs = self.lock_jobs();
            jobs.drain().map(|(_, handle)| handle.task).collect()
        };
        tasks.extend(self.lock_retired().drain(..));

        info!(
            tasks = tasks.len(),
            grace_seconds = grace.as_secs(),
            "Shutting down live scheduler, waiting for in-flight fires"
        );

        let drained =
            tokio::time::timeout(grace, futures::future::join_all(tasks.iter_mut())).await;
        if drained.is_err() {
            warn!("Shutdown grace period elapsed, aborting remaining fires");
            for task in &tasks {
                task.abort();
            }
        }

        telemetry::update_live_jobs(0);
        info!("Live scheduler stopped");
    }

    /// Next fire time of an active job
    pub fn next_fire_time(&self, identity: &JobIdentity) -> Option<DateTime<Utc>> {
        let jobs = self.lock_jobs();
        let binding = jobs.get(identity)?.binding.borrow().clone();
        if binding.paused {
            return None;
        }
        binding.next_after(Utc::now())
    }

    pub fn job_count(&self) -> usize {
        self.lock_jobs().len()
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<JobIdentity, JobHandle>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_retired(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_accepting(&self) -> Result<(), SchedulerError> {
        if self.state() == SchedulerState::ShuttingDown {
            return Err(SchedulerError::ShuttingDown);
        }
        Ok(())
    }

    /// Apply `update` to a job's binding; `Ok(None)` leaves it untouched
    fn modify_job<F>(&self, identity: &JobIdentity, op: &str, update: F) -> Result<(), SchedulerError>
    where
        F: FnOnce(&JobBinding) -> Result<Option<JobBinding>, SchedulerError>,
    {
        self.ensure_accepting()?;
        let jobs = self.lock_jobs();
        let handle = jobs
            .get(identity)
            .ok_or_else(|| SchedulerError::JobNotFound(identity.clone()))?;

        let current = handle.binding.borrow().clone();
        if let Some(next) = update(&current)? {
            handle.binding.send_replace(next);
            debug!(job = %identity, op = op, "Live job updated");
        }
        Ok(())
    }
}

#[async_trait]
impl LiveScheduler for CronScheduler {
    async fn create_job(
        &self,
        identity: &JobIdentity,
        spec: Arc<ScheduleSpec>,
    ) -> Result<(), SchedulerError> {
        self.ensure_accepting()?;
        let binding = JobBinding::new(spec, false)?;
        self.warn_if_interval_below_timeout(&binding);

        let count = {
            let mut jobs = self.lock_jobs();
            if jobs.contains_key(identity) {
                return Err(SchedulerError::JobExists(identity.clone()));
            }

            let (binding_tx, binding_rx) = watch::channel(binding);
            let task = tokio::spawn(
                run_job(
                    identity.clone(),
                    binding_rx,
                    self.state.subscribe(),
                    self.executor.clone(),
                    self.config.misfire_policy,
                )
                .instrument(info_span!("job", job = %identity)),
            );
            jobs.insert(
                identity.clone(),
                JobHandle {
                    binding: binding_tx,
                    task,
                },
            );
            jobs.len()
        };

        telemetry::update_live_jobs(count);
        debug!(job = %identity, "Live job created");
        Ok(())
    }

    async fn reschedule(
        &self,
        identity: &JobIdentity,
        cron_expression: String,
        time_zone: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.modify_job(identity, "reschedule", |current| {
            let spec = (*current.spec)
                .clone()
                .with_cron_expression(cron_expression)
                .with_time_zone(time_zone);
            let binding = JobBinding::new(Arc::new(spec), current.paused)?;
            self.warn_if_interval_below_timeout(&binding);
            Ok(Some(binding))
        })
    }

    async fn replace_job(
        &self,
        identity: &JobIdentity,
        spec: Arc<ScheduleSpec>,
    ) -> Result<(), SchedulerError> {
        self.modify_job(identity, "replace", |current| {
            let binding = JobBinding::new(spec, current.paused)?;
            self.warn_if_interval_below_timeout(&binding);
            Ok(Some(binding))
        })
    }

    async fn pause(&self, identity: &JobIdentity) -> Result<(), SchedulerError> {
        self.modify_job(identity, "pause", |current| {
            if current.paused {
                return Ok(None);
            }
            let mut next = current.clone();
            next.paused = true;
            Ok(Some(next))
        })
    }

    async fn resume(&self, identity: &JobIdentity) -> Result<(), SchedulerError> {
        self.modify_job(identity, "resume", |current| {
            if !current.paused {
                return Ok(None);
            }
            let mut next = current.clone();
            next.paused = false;
            Ok(Some(next))
        })
    }

    async fn delete(&self, identity: &JobIdentity) -> Result<(), SchedulerError> {
        self.ensure_accepting()?;
        let (handle, count) = {
            let mut jobs = self.lock_jobs();
            let handle = jobs
                .remove(identity)
                .ok_or_else(|| SchedulerError::JobNotFound(identity.clone()))?;
            (handle, jobs.len())
        };

        // Closing the channel ends the job loop; a fire already running completes first
        drop(handle.binding);
        let mut retired = self.lock_retired();
        retired.retain(|task| !task.is_finished());
        retired.push(handle.task);
        drop(retired);

        telemetry::update_live_jobs(count);
        debug!(job = %identity, "Live job deleted");
        Ok(())
    }

    async fn list_jobs(&self) -> Vec<LiveJob> {
        let now = Utc::now();
        let jobs = self.lock_jobs();
        let mut live: Vec<LiveJob> = jobs
            .iter()
            .map(|(identity, handle)| {
                let binding = handle.binding.borrow();
                LiveJob {
                    identity: identity.clone(),
                    spec: binding.spec.clone(),
                    paused: binding.paused,
                    next_fire_time: if binding.paused {
                        None
                    } else {
                        binding.next_after(now)
                    },
                }
            })
            .collect();
        live.sort_by(|a, b| a.identity.cmp(&b.identity));
        live
    }
}

/// Job loop: sleep until the next fire time, fire, repeat
async fn run_job(
    identity: JobIdentity,
    mut binding_rx: watch::Receiver<JobBinding>,
    mut state_rx: watch::Receiver<SchedulerState>,
    executor: Arc<dyn JobExecutor>,
    policy: MisfirePolicy,
) {
    if !wait_until_running(&mut state_rx).await {
        return;
    }

    // Scheduled time of the previous fire, cleared whenever the binding changes
    let mut anchor: Option<DateTime<Utc>> = None;
    let mut last_fired: Option<DateTime<Utc>> = None;

    loop {
        let binding = binding_rx.borrow_and_update().clone();

        if binding.paused {
            anchor = None;
            debug!("Job paused");
            if wait_for_update(&mut binding_rx, &mut state_rx).await {
                continue;
            }
            break;
        }

        let now = Utc::now();
        let Some(fire_at) = next_fire(&binding, anchor, last_fired, now, policy) else {
            info!(
                cron = %binding.spec.cron_expression,
                "Schedule has no further fire times, waiting for an update"
            );
            if wait_for_update(&mut binding_rx, &mut state_rx).await {
                continue;
            }
            break;
        };

        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = binding_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // The new trigger starts from now; no catch-up
                anchor = None;
                continue;
            }
            _ = shutdown_requested(&mut state_rx) => break,
        }

        if *state_rx.borrow() != SchedulerState::Running {
            break;
        }

        fire(&identity, &binding.spec, executor.as_ref()).await;
        anchor = Some(fire_at);
        last_fired = Some(fire_at);

        match binding_rx.has_changed() {
            Err(_) => break,
            Ok(true) => anchor = None,
            Ok(false) => {}
        }
    }

    debug!("Job loop finished");
}

/// Choose the next fire time strictly after the last fired one
fn next_fire(
    binding: &JobBinding,
    anchor: Option<DateTime<Utc>>,
    last_fired: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: MisfirePolicy,
) -> Option<DateTime<Utc>> {
    if let Some(anchor) = anchor {
        let scheduled = binding.next_after(anchor)?;
        if scheduled > now {
            return Some(scheduled);
        }
        // Fire times passed while the previous fire was still running
        return match policy {
            MisfirePolicy::Skip => {
                debug!(missed = %scheduled, "Skipping missed fire time");
                binding.next_after(now)
            }
            MisfirePolicy::FireOnce => {
                debug!(missed = %scheduled, "Firing once for missed fire time");
                Some(now)
            }
        };
    }

    let floor = last_fired.map_or(now, |last| last.max(now));
    binding.next_after(floor)
}

/// Run one fire; executor panics are contained here
async fn fire(identity: &JobIdentity, spec: &ScheduleSpec, executor: &dyn JobExecutor) {
    match AssertUnwindSafe(executor.execute(spec)).catch_unwind().await {
        Ok(outcome) => debug!(
            success = outcome.is_success(),
            duration_ms = outcome.duration_ms,
            "Fire completed"
        ),
        Err(_) => error!(
            job = %identity,
            trigger = %spec.name,
            "Trigger executor panicked, job stays scheduled"
        ),
    }
}

async fn wait_until_running(state_rx: &mut watch::Receiver<SchedulerState>) -> bool {
    match state_rx
        .wait_for(|state| *state != SchedulerState::Standby)
        .await
    {
        Ok(state) => *state == SchedulerState::Running,
        Err(_) => false,
    }
}

async fn shutdown_requested(state_rx: &mut watch::Receiver<SchedulerState>) {
    let _ = state_rx
        .wait_for(|state| *state == SchedulerState::ShuttingDown)
        .await;
}

/// Returns true when the binding changed, false when the job should stop
async fn wait_for_update(
    binding_rx: &mut watch::Receiver<JobBinding>,
    state_rx: &mut watch::Receiver<SchedulerState>,
) -> bool {
    tokio::select! {
        changed = binding_rx.changed() => changed.is_ok(),
        _ = shutdown_requested(state_rx) => false,
    }
}
