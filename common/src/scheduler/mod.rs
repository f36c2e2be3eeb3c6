// Live scheduler: owns the jobs and timers that actually fire triggers

pub mod engine;

use crate::errors::SchedulerError;
use crate::models::{JobIdentity, ScheduleSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use engine::{CronScheduler, EngineConfig, SchedulerState};

/// Snapshot of one job as currently applied in the live scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct LiveJob {
    pub identity: JobIdentity,
    /// Spec the job is bound to; fires use exactly these values
    pub spec: Arc<ScheduleSpec>,
    pub paused: bool,
    pub next_fire_time: Option<DateTime<Utc>>,
}

/// Operations the orchestrator applies to the live scheduler
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveScheduler: Send + Sync {
    /// Register a new job; the first fire is the next cron time after now
    async fn create_job(
        &self,
        identity: &JobIdentity,
        spec: Arc<ScheduleSpec>,
    ) -> Result<(), SchedulerError>;

    /// Change only the cron expression and time zone of a job
    async fn reschedule(
        &self,
        identity: &JobIdentity,
        cron_expression: String,
        time_zone: Option<String>,
    ) -> Result<(), SchedulerError>;

    /// Atomically swap a job's trigger and payload
    async fn replace_job(
        &self,
        identity: &JobIdentity,
        spec: Arc<ScheduleSpec>,
    ) -> Result<(), SchedulerError>;

    /// Stop firing a job while keeping it registered
    async fn pause(&self, identity: &JobIdentity) -> Result<(), SchedulerError>;

    async fn resume(&self, identity: &JobIdentity) -> Result<(), SchedulerError>;

    /// Unregister a job entirely
    async fn delete(&self, identity: &JobIdentity) -> Result<(), SchedulerError>;

    async fn list_jobs(&self) -> Vec<LiveJob>;
}
