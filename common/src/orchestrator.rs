// Scheduler orchestrator: converges the live scheduler onto the trigger registry
//
// A pass is diff-and-apply. `plan` compares desired specs against live jobs and
// yields per-trigger action lists; `reconcile` applies them. Failures are
// isolated per trigger: the first failing action stops that trigger's remaining
// actions and the pass moves on.

use crate::errors::SchedulerError;
use crate::models::{JobIdentity, ScheduleSpec};
use crate::scheduler::{LiveJob, LiveScheduler};
use crate::store::ConfigurationStore;
use crate::telemetry;
use crate::validation;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// One scheduler call planned for a job
#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    Create(Arc<ScheduleSpec>),
    Reschedule {
        cron_expression: String,
        time_zone: Option<String>,
    },
    Replace(Arc<ScheduleSpec>),
    Resume,
    Pause,
    Delete,
}

impl JobAction {
    pub fn operation(&self) -> &'static str {
        match self {
            JobAction::Create(_) => "create",
            JobAction::Reschedule { .. } => "reschedule",
            JobAction::Replace(_) => "replace",
            JobAction::Resume => "resume",
            JobAction::Pause => "pause",
            JobAction::Delete => "delete",
        }
    }

    /// Actions that install new spec values in the scheduler
    fn installs_spec(&self) -> bool {
        matches!(
            self,
            JobAction::Create(_) | JobAction::Reschedule { .. } | JobAction::Replace(_)
        )
    }
}

/// Ordered actions for one job
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub identity: JobIdentity,
    /// Desired spec, absent for deletions
    pub spec: Option<Arc<ScheduleSpec>>,
    pub actions: Vec<JobAction>,
}

impl PlannedChange {
    fn display_name(&self) -> &str {
        self.spec
            .as_ref()
            .map_or(self.identity.as_str(), |spec| spec.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub changes: Vec<PlannedChange>,
    /// Desired specs that need no scheduler call
    pub unchanged: usize,
    /// Names skipped because an earlier spec has the same identity
    pub duplicates: Vec<String>,
}

impl ReconcilePlan {
    pub fn call_count(&self) -> usize {
        self.changes.iter().map(|change| change.actions.len()).sum()
    }
}

/// Compute the scheduler calls that make `live` match `desired`
pub fn plan(desired: &[ScheduleSpec], live: &[LiveJob]) -> ReconcilePlan {
    let live_by_identity: HashMap<&JobIdentity, &LiveJob> =
        live.iter().map(|job| (&job.identity, job)).collect();

    let mut result = ReconcilePlan::default();
    let mut seen: HashSet<JobIdentity> = HashSet::with_capacity(desired.len());

    for spec in desired {
        let identity = spec.identity();
        if !seen.insert(identity.clone()) {
            result.duplicates.push(spec.name.clone());
            continue;
        }

        let actions = plan_job(spec, live_by_identity.get(&identity).copied());
        if actions.is_empty() {
            result.unchanged += 1;
        } else {
            result.changes.push(PlannedChange {
                identity,
                spec: Some(Arc::new(spec.clone())),
                actions,
            });
        }
    }

    let mut orphans: Vec<&LiveJob> = live
        .iter()
        .filter(|job| !seen.contains(&job.identity))
        .collect();
    orphans.sort_by(|a, b| a.identity.cmp(&b.identity));
    result
        .changes
        .extend(orphans.into_iter().map(|job| PlannedChange {
            identity: job.identity.clone(),
            spec: None,
            actions: vec![JobAction::Delete],
        }));

    result
}

fn plan_job(spec: &ScheduleSpec, live: Option<&LiveJob>) -> Vec<JobAction> {
    let Some(job) = live else {
        return if spec.enabled {
            vec![JobAction::Create(Arc::new(spec.clone()))]
        } else {
            Vec::new()
        };
    };

    if !spec.enabled {
        return if job.paused {
            Vec::new()
        } else {
            vec![JobAction::Pause]
        };
    }

    let mut actions = Vec::new();
    if !job.spec.same_payload(spec) {
        actions.push(JobAction::Replace(Arc::new(spec.clone())));
    } else if !job.spec.same_schedule(spec) {
        actions.push(JobAction::Reschedule {
            cron_expression: spec.cron_expression.clone(),
            time_zone: spec.time_zone.clone(),
        });
    }
    if job.paused {
        actions.push(JobAction::Resume);
    }
    actions
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub name: String,
    pub operation: String,
    pub error: String,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub rescheduled: usize,
    pub replaced: usize,
    pub paused: usize,
    pub resumed: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    /// Number of scheduler calls that succeeded
    pub fn mutations(&self) -> usize {
        self.created + self.rescheduled + self.replaced + self.paused + self.resumed + self.deleted
    }

    pub fn is_noop(&self) -> bool {
        self.mutations() == 0 && self.failures.is_empty()
    }

    fn record(&mut self, action: &JobAction) {
        match action {
            JobAction::Create(_) => self.created += 1,
            JobAction::Reschedule { .. } => self.rescheduled += 1,
            JobAction::Replace(_) => self.replaced += 1,
            JobAction::Resume => self.resumed += 1,
            JobAction::Pause => self.paused += 1,
            JobAction::Delete => self.deleted += 1,
        }
    }

    fn fail(&mut self, name: &str, operation: &str, error: impl ToString) {
        self.failures.push(ReconcileFailure {
            name: name.to_string(),
            operation: operation.to_string(),
            error: error.to_string(),
        });
    }
}

/// SchedulerOrchestrator owns the live scheduler's job table
pub struct SchedulerOrchestrator {
    store: Arc<ConfigurationStore>,
    scheduler: Arc<dyn LiveScheduler>,
    reconcile_lock: Mutex<()>,
}

impl SchedulerOrchestrator {
    pub fn new(store: Arc<ConfigurationStore>, scheduler: Arc<dyn LiveScheduler>) -> Self {
        Self {
            store,
            scheduler,
            reconcile_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }

    /// Run one reconciliation pass
    ///
    /// Passes never overlap; a caller arriving mid-pass waits and then runs a
    /// pass against the registry as it is at that point.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> ReconcileReport {
        let _guard = self.reconcile_lock.lock().await;

        let desired = self.store.get_all();
        let live = self.scheduler.list_jobs().await;
        let plan = plan(&desired, &live);

        let mut report = ReconcileReport {
            unchanged: plan.unchanged,
            ..ReconcileReport::default()
        };

        for name in &plan.duplicates {
            error!(trigger = %name, "Duplicate trigger identity reached reconciliation, skipping");
            report.fail(name, "plan", "duplicate trigger identity");
        }

        for change in plan.changes {
            self.apply(change, &mut report).await;
        }

        if report.is_noop() {
            debug!(unchanged = report.unchanged, "Reconciliation found nothing to change");
        } else {
            info!(
                created = report.created,
                rescheduled = report.rescheduled,
                replaced = report.replaced,
                paused = report.paused,
                resumed = report.resumed,
                deleted = report.deleted,
                unchanged = report.unchanged,
                failures = report.failures.len(),
                "Reconciliation pass applied"
            );
        }
        telemetry::record_reconcile(&report);

        report
    }

    async fn apply(&self, change: PlannedChange, report: &mut ReconcileReport) {
        let name = change.display_name().to_string();

        // Specs loaded from disk may carry field errors; they never reach the scheduler
        if let Some(spec) = &change.spec {
            if change.actions.iter().any(JobAction::installs_spec) {
                if let Err(e) = validation::validate_spec(spec) {
                    warn!(trigger = %name, error = %e, "Trigger is invalid, keeping its last applied state");
                    report.fail(&name, "validate", e);
                    return;
                }
            }
        }

        for action in change.actions {
            let operation = action.operation();
            match self.apply_action(&change.identity, &action).await {
                Ok(()) => {
                    debug!(trigger = %name, operation = operation, "Scheduler operation applied");
                    report.record(&action);
                }
                Err(e) => {
                    error!(
                        trigger = %name,
                        operation = operation,
                        error = %e,
                        "Scheduler operation failed, skipping remaining operations for trigger"
                    );
                    report.fail(&name, operation, e);
                    break;
                }
            }
        }
    }

    async fn apply_action(
        &self,
        identity: &JobIdentity,
        action: &JobAction,
    ) -> Result<(), SchedulerError> {
        match action {
            JobAction::Create(spec) => self.scheduler.create_job(identity, spec.clone()).await,
            JobAction::Reschedule {
                cron_expression,
                time_zone,
            } => {
                self.scheduler
                    .reschedule(identity, cron_expression.clone(), time_zone.clone())
                    .await
            }
            JobAction::Replace(spec) => self.scheduler.replace_job(identity, spec.clone()).await,
            JobAction::Resume => self.scheduler.resume(identity).await,
            JobAction::Pause => self.scheduler.pause(identity).await,
            JobAction::Delete => self.scheduler.delete(identity).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScheduleError;
    use crate::models::HttpMethod;
    use crate::scheduler::MockLiveScheduler;
    use crate::sink::MemorySink;

    const EVERY_MINUTE: &str = "0 * * * * ?";

    fn spec(name: &str) -> ScheduleSpec {
        ScheduleSpec::new(name, format!("http://svc/{}", name), EVERY_MINUTE)
    }

    fn live(spec: &ScheduleSpec, paused: bool) -> LiveJob {
        LiveJob {
            identity: spec.identity(),
            spec: Arc::new(spec.clone()),
            paused,
            next_fire_time: None,
        }
    }

    fn operations(plan: &ReconcilePlan, name: &str) -> Vec<&'static str> {
        let identity = JobIdentity::from_name(name);
        plan.changes
            .iter()
            .filter(|change| change.identity == identity)
            .flat_map(|change| change.actions.iter().map(JobAction::operation))
            .collect()
    }

    #[test]
    fn test_plan_creates_enabled_specs() {
        let desired = vec![spec("a"), spec("b").with_enabled(false)];
        let plan = plan(&desired, &[]);

        assert_eq!(operations(&plan, "a"), vec!["create"]);
        assert!(operations(&plan, "b").is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn test_plan_is_empty_when_converged() {
        let a = spec("a");
        let b = spec("b").with_enabled(false);
        let plan = plan(&[a.clone(), b.clone()], &[live(&a, false), live(&b, true)]);

        assert_eq!(plan.call_count(), 0);
        assert_eq!(plan.unchanged, 2);
    }

    #[test]
    fn test_plan_cron_change_is_a_reschedule() {
        let before = spec("a");
        let after = before.clone().with_cron_expression("0 */5 * * * ?");
        let plan = plan(&[after], &[live(&before, false)]);

        assert_eq!(operations(&plan, "a"), vec!["reschedule"]);
    }

    #[test]
    fn test_plan_time_zone_change_is_a_reschedule() {
        let before = spec("a");
        let after = before
            .clone()
            .with_time_zone(Some("Europe/Berlin".to_string()));
        let plan = plan(&[after], &[live(&before, false)]);

        assert_eq!(operations(&plan, "a"), vec!["reschedule"]);
    }

    #[test]
    fn test_plan_payload_change_is_a_replace() {
        let before = spec("a");
        let after = before
            .clone()
            .with_method(HttpMethod::Get)
            .with_header("X-Token", "abc")
            .with_cron_expression("0 0 * * * ?");
        let plan = plan(&[after.clone()], &[live(&before, false)]);

        assert_eq!(
            plan.changes[0].actions,
            vec![JobAction::Replace(Arc::new(after))]
        );
    }

    #[test]
    fn test_plan_disable_pauses_and_enable_resumes() {
        let a = spec("a");
        let disabled = plan(&[a.clone().with_enabled(false)], &[live(&a, false)]);
        assert_eq!(operations(&disabled, "a"), vec!["pause"]);

        let enabled = plan(&[a.clone()], &[live(&a, true)]);
        assert_eq!(operations(&enabled, "a"), vec!["resume"]);
    }

    #[test]
    fn test_plan_edited_while_paused_replaces_then_resumes() {
        let a = spec("a");
        let edited = a.clone().with_url("http://svc/new");
        let plan = plan(&[edited], &[live(&a, true)]);

        assert_eq!(operations(&plan, "a"), vec!["replace", "resume"]);
    }

    #[test]
    fn test_plan_deletes_orphans_and_treats_rename_as_delete_create() {
        let old = spec("old-name");
        let renamed = ScheduleSpec::new("new-name", old.url.clone(), EVERY_MINUTE);
        let plan = plan(&[renamed], &[live(&old, false)]);

        assert_eq!(operations(&plan, "new-name"), vec!["create"]);
        assert_eq!(operations(&plan, "old-name"), vec!["delete"]);
    }

    #[test]
    fn test_plan_case_only_rename_is_a_replace() {
        let before = spec("Ping");
        let after = ScheduleSpec::new("PING", before.url.clone(), EVERY_MINUTE);
        let plan = plan(&[after], &[live(&before, false)]);

        assert_eq!(operations(&plan, "ping"), vec!["replace"]);
    }

    #[test]
    fn test_plan_skips_duplicate_identities() {
        let plan = plan(&[spec("dup"), spec("DUP")], &[]);

        assert_eq!(operations(&plan, "dup"), vec!["create"]);
        assert_eq!(plan.duplicates, vec!["DUP".to_string()]);
    }

    async fn store_with(specs: Vec<ScheduleSpec>) -> Arc<ConfigurationStore> {
        Arc::new(
            ConfigurationStore::load(Arc::new(MemorySink::with_specs(specs)))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_trigger() {
        let store = store_with(vec![spec("bad"), spec("good")]).await;

        let mut scheduler = MockLiveScheduler::new();
        scheduler.expect_list_jobs().returning(Vec::new);
        scheduler
            .expect_create_job()
            .withf(|identity, _| identity.as_str() == "bad")
            .times(1)
            .returning(|_, _| {
                Err(SchedulerError::InvalidSchedule(
                    ScheduleError::InvalidCronExpression {
                        expression: "x".to_string(),
                        reason: "rejected".to_string(),
                    },
                ))
            });
        scheduler
            .expect_create_job()
            .withf(|identity, _| identity.as_str() == "good")
            .times(1)
            .returning(|_, _| Ok(()));

        let orchestrator = SchedulerOrchestrator::new(store, Arc::new(scheduler));
        let report = orchestrator.reconcile().await;

        assert_eq!(report.created, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "bad");
        assert_eq!(report.failures[0].operation, "create");
    }

    #[tokio::test]
    async fn test_failed_replace_skips_resume() {
        let current = spec("a");
        let store = store_with(vec![current.clone().with_url("http://svc/changed")]).await;

        let mut scheduler = MockLiveScheduler::new();
        let live_job = live(&current, true);
        scheduler
            .expect_list_jobs()
            .returning(move || vec![live_job.clone()]);
        scheduler
            .expect_replace_job()
            .times(1)
            .returning(|identity, _| Err(SchedulerError::JobNotFound(identity.clone())));
        scheduler.expect_resume().never();

        let orchestrator = SchedulerOrchestrator::new(store, Arc::new(scheduler));
        let report = orchestrator.reconcile().await;

        assert_eq!(report.mutations(), 0);
        assert_eq!(report.failures[0].operation, "replace");
    }

    #[tokio::test]
    async fn test_invalid_loaded_spec_never_reaches_scheduler() {
        let broken = ScheduleSpec::new("broken", "ftp://svc/file", EVERY_MINUTE);
        let store = store_with(vec![broken]).await;

        let mut scheduler = MockLiveScheduler::new();
        scheduler.expect_list_jobs().returning(Vec::new);
        scheduler.expect_create_job().never();

        let orchestrator = SchedulerOrchestrator::new(store, Arc::new(scheduler));
        let report = orchestrator.reconcile().await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, "validate");
    }

    #[tokio::test]
    async fn test_converged_pass_makes_no_mutating_calls() {
        let a = spec("a");
        let store = store_with(vec![a.clone()]).await;

        let mut scheduler = MockLiveScheduler::new();
        let live_job = live(&a, false);
        scheduler
            .expect_list_jobs()
            .returning(move || vec![live_job.clone()]);
        scheduler.expect_create_job().never();
        scheduler.expect_reschedule().never();
        scheduler.expect_replace_job().never();
        scheduler.expect_pause().never();
        scheduler.expect_resume().never();
        scheduler.expect_delete().never();

        let orchestrator = SchedulerOrchestrator::new(store, Arc::new(scheduler));
        let report = orchestrator.reconcile().await;

        assert!(report.is_noop());
        assert_eq!(report.unchanged, 1);
    }
}
