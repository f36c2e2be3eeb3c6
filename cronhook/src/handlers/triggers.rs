use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::errors::ValidationError;
use common::models::{HttpMethod, JobIdentity, ScheduleSpec};
use common::orchestrator::ReconcileReport;
use common::scheduler::{LiveJob, LiveScheduler};

/// Request body for creating or updating a trigger
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub name: String,
    pub url: String,
    pub cron_expression: String,
    pub method: Option<String>,
    pub time_zone: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub enabled: Option<bool>,
}

impl TryFrom<TriggerRequest> for ScheduleSpec {
    type Error = ValidationError;

    fn try_from(req: TriggerRequest) -> Result<Self, Self::Error> {
        let method = match req.method.as_deref() {
            Some(method) => method.parse::<HttpMethod>()?,
            None => HttpMethod::default(),
        };
        let time_zone = req
            .time_zone
            .map(|tz| tz.trim().to_string())
            .filter(|tz| !tz.is_empty());

        Ok(ScheduleSpec {
            name: req.name,
            url: req.url.trim().to_string(),
            cron_expression: req.cron_expression.trim().to_string(),
            method,
            time_zone,
            headers: req.headers,
            enabled: req.enabled.unwrap_or(true),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub names: Vec<String>,
}

/// Whether the live scheduler currently holds a job for the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Active,
    Paused,
    /// Not yet reconciled, or rejected by the scheduler
    Absent,
}

/// Trigger with its live scheduling state
#[derive(Debug, Serialize)]
pub struct TriggerView {
    #[serde(flatten)]
    pub spec: ScheduleSpec,
    pub live: LiveStatus,
    pub next_fire_time: Option<DateTime<Utc>>,
}

impl TriggerView {
    fn new(spec: ScheduleSpec, live: Option<&LiveJob>) -> Self {
        let (live, next_fire_time) = match live {
            Some(job) if job.paused => (LiveStatus::Paused, None),
            Some(job) => (LiveStatus::Active, job.next_fire_time),
            None => (LiveStatus::Absent, None),
        };
        Self {
            spec,
            live,
            next_fire_time,
        }
    }
}

async fn live_jobs(state: &AppState) -> HashMap<JobIdentity, LiveJob> {
    state
        .scheduler()
        .list_jobs()
        .await
        .into_iter()
        .map(|job| (job.identity.clone(), job))
        .collect()
}

async fn view_of(state: &AppState, spec: ScheduleSpec) -> TriggerView {
    let jobs = live_jobs(state).await;
    let job = jobs.get(&spec.identity());
    TriggerView::new(spec, job)
}

fn find(state: &AppState, name: &str) -> Result<ScheduleSpec, ErrorResponse> {
    state
        .store
        .get(name)
        .ok_or_else(|| ErrorResponse::not_found(name))
}

/// List all triggers in registry order
#[tracing::instrument(skip(state))]
pub async fn list_triggers(
    State(state): State<AppState>,
) -> Result<SuccessResponse<Vec<TriggerView>>, ErrorResponse> {
    let jobs = live_jobs(&state).await;
    let views = state
        .store
        .get_all()
        .iter()
        .map(|spec| TriggerView::new(spec.clone(), jobs.get(&spec.identity())))
        .collect();

    Ok(SuccessResponse::new(views))
}

#[tracing::instrument(skip(state))]
pub async fn get_trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<SuccessResponse<TriggerView>, ErrorResponse> {
    let spec = find(&state, &name)?;
    Ok(SuccessResponse::new(view_of(&state, spec).await))
}

/// Create a trigger, or replace the one with the same name
#[tracing::instrument(skip(state, req))]
pub async fn create_trigger(
    State(state): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<SuccessResponse<ScheduleSpec>, ErrorResponse> {
    let spec = ScheduleSpec::try_from(req)?;
    state.store.upsert(spec.clone(), None).await?;

    tracing::info!(trigger = %spec.name, "Trigger saved");
    Ok(SuccessResponse::new(spec))
}

/// Update the trigger stored under `name`; the body may rename it
#[tracing::instrument(skip(state, req))]
pub async fn update_trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<TriggerRequest>,
) -> Result<SuccessResponse<ScheduleSpec>, ErrorResponse> {
    let spec = ScheduleSpec::try_from(req)?;
    state.store.upsert(spec.clone(), Some(name.as_str())).await?;

    tracing::info!(original = %name, trigger = %spec.name, "Trigger updated");
    Ok(SuccessResponse::new(spec))
}

#[tracing::instrument(skip(state))]
pub async fn delete_trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<SuccessResponse<ScheduleSpec>, ErrorResponse> {
    let removed = state.store.remove(&name).await?;

    tracing::info!(trigger = %removed.name, "Trigger deleted");
    Ok(SuccessResponse::new(removed))
}

#[tracing::instrument(skip(state))]
pub async fn enable_trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<SuccessResponse<ScheduleSpec>, ErrorResponse> {
    set_enabled(state, name, true).await
}

#[tracing::instrument(skip(state))]
pub async fn disable_trigger(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<SuccessResponse<ScheduleSpec>, ErrorResponse> {
    set_enabled(state, name, false).await
}

async fn set_enabled(
    state: AppState,
    name: String,
    enabled: bool,
) -> Result<SuccessResponse<ScheduleSpec>, ErrorResponse> {
    // Built from the committed spec so a concurrent delete cannot turn this into a 404
    let spec = state.store.set_enabled(&name, enabled).await?;

    tracing::info!(trigger = %spec.name, enabled = enabled, "Trigger state changed");
    Ok(SuccessResponse::new(spec))
}

/// Reorder the registry; the body must list every trigger exactly once
#[tracing::instrument(skip(state, req))]
pub async fn reorder_triggers(
    State(state): State<AppState>,
    Json(req): Json<ReorderRequest>,
) -> Result<SuccessResponse<Vec<String>>, ErrorResponse> {
    state.store.reorder(&req.names).await?;

    let order = state
        .store
        .get_all()
        .iter()
        .map(|spec| spec.name.clone())
        .collect();
    Ok(SuccessResponse::new(order))
}

/// Run a reconciliation pass now and return its report
#[tracing::instrument(skip(state))]
pub async fn reconcile(
    State(state): State<AppState>,
) -> Result<SuccessResponse<ReconcileReport>, ErrorResponse> {
    if !state.lifecycle.is_ready() {
        return Err(ErrorResponse::new("unavailable", "Scheduler is shutting down"));
    }

    let report = state.orchestrator().reconcile().await;
    Ok(SuccessResponse::new(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Option<&str>) -> TriggerRequest {
        TriggerRequest {
            name: "ping-a".to_string(),
            url: " http://svc/a ".to_string(),
            cron_expression: "0 * * * * ?".to_string(),
            method: method.map(str::to_string),
            time_zone: Some("  ".to_string()),
            headers: HashMap::new(),
            enabled: None,
        }
    }

    #[test]
    fn test_request_defaults() {
        let spec = ScheduleSpec::try_from(request(None)).unwrap();

        assert_eq!(spec.method, HttpMethod::Post);
        assert_eq!(spec.url, "http://svc/a");
        assert_eq!(spec.time_zone, None);
        assert!(spec.enabled);
    }

    #[test]
    fn test_request_method_is_case_insensitive() {
        let spec = ScheduleSpec::try_from(request(Some("get"))).unwrap();
        assert_eq!(spec.method, HttpMethod::Get);
    }

    #[test]
    fn test_request_rejects_unknown_method() {
        assert!(ScheduleSpec::try_from(request(Some("TRACE"))).is_err());
    }

    #[test]
    fn test_view_reports_live_status() {
        let spec = ScheduleSpec::try_from(request(None)).unwrap();
        let job = LiveJob {
            identity: spec.identity(),
            spec: std::sync::Arc::new(spec.clone()),
            paused: true,
            next_fire_time: None,
        };

        assert_eq!(TriggerView::new(spec.clone(), Some(&job)).live, LiveStatus::Paused);
        assert_eq!(TriggerView::new(spec, None).live, LiveStatus::Absent);
    }
}
