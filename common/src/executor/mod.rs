// Executor module for trigger execution

pub mod http;

use crate::models::{ScheduleSpec, TriggerOutcome};
use async_trait::async_trait;

pub use http::HttpTriggerExecutor;

/// JobExecutor is the callable the live scheduler invokes at each fire
///
/// Implementations classify every failure into the returned outcome; nothing
/// escapes back into the scheduler.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, spec: &ScheduleSpec) -> TriggerOutcome;
}
