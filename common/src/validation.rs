// Field validation for trigger specs, applied before any registry change

use crate::errors::ValidationError;
use crate::models::ScheduleSpec;
use crate::schedule;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;

/// URL schemes a trigger may call
pub const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Maximum trigger name length in characters
pub const MAX_NAME_LENGTH: usize = 200;

/// Validate every field of a spec
pub fn validate_spec(spec: &ScheduleSpec) -> Result<(), ValidationError> {
    validate_name(&spec.name)?;
    validate_url(&spec.url)?;
    validate_headers(spec)?;
    if spec.cron_expression.trim().is_empty() {
        return Err(ValidationError::MissingField("cron_expression".to_string()));
    }
    schedule::validate_cron_expression(&spec.cron_expression, spec.resolved_time_zone())?;
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField("name".to_string()));
    }
    if trimmed.len() != name.len() {
        return Err(ValidationError::invalid(
            "name",
            "must not start or end with whitespace",
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::invalid(
            "name",
            format!("must be at most {} characters", MAX_NAME_LENGTH),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(ValidationError::invalid(
            "name",
            "must not contain control characters",
        ));
    }
    Ok(())
}

pub fn validate_url(url: &str) -> Result<Url, ValidationError> {
    if url.trim().is_empty() {
        return Err(ValidationError::MissingField("url".to_string()));
    }
    let parsed = Url::parse(url).map_err(|e| ValidationError::invalid("url", e.to_string()))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(ValidationError::invalid(
            "url",
            format!(
                "scheme '{}' is not allowed (expected one of {})",
                parsed.scheme(),
                ALLOWED_SCHEMES.join(", ")
            ),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::invalid("url", "must include a host"));
    }
    Ok(parsed)
}

fn validate_headers(spec: &ScheduleSpec) -> Result<(), ValidationError> {
    for (name, value) in &spec.headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ValidationError::invalid("headers", format!("invalid header name '{}'", name))
        })?;
        HeaderValue::from_str(value).map_err(|_| {
            ValidationError::invalid(
                "headers",
                format!("invalid value for header '{}'", name),
            )
        })?;
    }
    Ok(())
}
