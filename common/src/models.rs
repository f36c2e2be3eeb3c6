use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::ValidationError;
use crate::schedule;

// ============================================================================
// Trigger Models
// ============================================================================

/// ScheduleSpec describes one cron-scheduled HTTP trigger (the desired-state unit)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub name: String,
    pub url: String,
    pub cron_expression: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ScheduleSpec {
    /// Create an enabled POST trigger with no headers, evaluated in UTC
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            cron_expression: cron_expression.into(),
            method: HttpMethod::default(),
            time_zone: None,
            headers: HashMap::new(),
            enabled: true,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_time_zone(mut self, time_zone: Option<String>) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn with_cron_expression(mut self, cron_expression: impl Into<String>) -> Self {
        self.cron_expression = cron_expression.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Key correlating this spec with its live job
    pub fn identity(&self) -> JobIdentity {
        JobIdentity::from_name(&self.name)
    }

    /// Time zone the cron expression is evaluated in (UTC when absent or unknown)
    pub fn resolved_time_zone(&self) -> Tz {
        schedule::resolve_time_zone(self.time_zone.as_deref())
    }

    /// True when both specs fire at the same times
    pub fn same_schedule(&self, other: &ScheduleSpec) -> bool {
        self.cron_expression.trim() == other.cron_expression.trim()
            && self.resolved_time_zone() == other.resolved_time_zone()
    }

    /// True when both specs issue the same request
    pub fn same_payload(&self, other: &ScheduleSpec) -> bool {
        self.name == other.name
            && self.method == other.method
            && self.url == other.url
            && self.headers == other.headers
    }
}

/// JobIdentity is the case-insensitive key derived from a trigger name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobIdentity(String);

impl JobIdentity {
    pub fn from_name(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// HttpMethod represents HTTP request methods a trigger may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(ValidationError::invalid(
                "method",
                format!("unsupported HTTP method '{}'", other),
            )),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

// ============================================================================
// Outcome Models
// ============================================================================

/// TriggerOutcome records the result of one fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub fire_id: Uuid,
    pub fired_at: DateTime<Utc>,
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    pub kind: OutcomeKind,
    pub duration_ms: u64,
}

impl TriggerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Success { .. })
    }

    /// HTTP status, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            OutcomeKind::Success { status } | OutcomeKind::HttpError { status } => Some(status),
            OutcomeKind::Transport { .. } => None,
        }
    }

    /// Short label used for log fields and metric labels
    pub fn reason(&self) -> &'static str {
        match &self.kind {
            OutcomeKind::Success { .. } => "success",
            OutcomeKind::HttpError { status } if *status >= 500 => "server_error",
            OutcomeKind::HttpError { .. } => "client_error",
            OutcomeKind::Transport { kind, .. } => kind.as_str(),
        }
    }
}

/// OutcomeKind classifies a fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeKind {
    Success {
        status: u16,
    },
    HttpError {
        status: u16,
    },
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

/// TransportErrorKind distinguishes failures where no response was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Other => "transport",
        }
    }
}
