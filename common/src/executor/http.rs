// HTTP trigger executor implementation

use crate::errors::ExecutionError;
use crate::executor::JobExecutor;
use crate::models::{
    HttpMethod, OutcomeKind, ScheduleSpec, TransportErrorKind, TriggerOutcome,
};
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Most bytes of an error response body read for failure logs
const BODY_SNIPPET_LIMIT: usize = 512;

/// HttpTriggerExecutor fires HTTP requests for trigger specs
pub struct HttpTriggerExecutor {
    client: Client,
    timeout: Duration,
    outcomes: broadcast::Sender<TriggerOutcome>,
}

impl HttpTriggerExecutor {
    /// Create a new executor with the specified per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, ExecutionError> {
        let (outcomes, _) = broadcast::channel(256);
        Self::with_outcomes(timeout, outcomes)
    }

    /// Create a new executor publishing outcomes on an existing channel
    pub fn with_outcomes(
        timeout: Duration,
        outcomes: broadcast::Sender<TriggerOutcome>,
    ) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cronhook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExecutionError::ClientBuildFailed(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            outcomes,
        })
    }

    /// Subscribe to the outcome of every fire
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerOutcome> {
        self.outcomes.subscribe()
    }

    pub fn outcome_sender(&self) -> broadcast::Sender<TriggerOutcome> {
        self.outcomes.clone()
    }

    /// Convert HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Options => Method::OPTIONS,
        }
    }

    /// Map a reqwest error onto the transport taxonomy
    fn classify_error(err: &reqwest::Error) -> TransportErrorKind {
        if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        }
    }

    /// Send the request and classify the result
    async fn send(&self, spec: &ScheduleSpec) -> OutcomeKind {
        let mut request = self
            .client
            .request(Self::convert_method(spec.method), &spec.url)
            .timeout(self.timeout);

        for (key, value) in &spec.headers {
            request = request.header(key, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return OutcomeKind::Transport {
                    kind: Self::classify_error(&e),
                    message: error_chain(&e),
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            return OutcomeKind::Success {
                status: status.as_u16(),
            };
        }

        // Body is only read for diagnostics; a failed read does not change the classification
        let body = read_body_snippet(response, BODY_SNIPPET_LIMIT).await;
        tracing::debug!(
            trigger = %spec.name,
            status = status.as_u16(),
            body = %body,
            "Trigger target returned an error response"
        );

        OutcomeKind::HttpError {
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl JobExecutor for HttpTriggerExecutor {
    #[tracing::instrument(skip(self, spec), fields(trigger = %spec.name, method = %spec.method))]
    async fn execute(&self, spec: &ScheduleSpec) -> TriggerOutcome {
        let fired_at = Utc::now();
        let started = Instant::now();

        let kind = self.send(spec).await;

        let outcome = TriggerOutcome {
            fire_id: Uuid::new_v4(),
            fired_at,
            name: spec.name.clone(),
            method: spec.method,
            url: spec.url.clone(),
            kind,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        match &outcome.kind {
            OutcomeKind::Success { status } => tracing::info!(
                url = %outcome.url,
                status = status,
                duration_ms = outcome.duration_ms,
                "Trigger succeeded"
            ),
            OutcomeKind::HttpError { status } => tracing::warn!(
                url = %outcome.url,
                status = status,
                duration_ms = outcome.duration_ms,
                "Trigger target responded with a non-success status"
            ),
            OutcomeKind::Transport { kind, message } => tracing::warn!(
                url = %outcome.url,
                reason = kind.as_str(),
                error = %message,
                duration_ms = outcome.duration_ms,
                "Trigger request failed"
            ),
        }

        telemetry::record_trigger_outcome(&outcome);
        // No subscribers is fine
        let _ = self.outcomes.send(outcome.clone());

        outcome
    }
}

/// Render an error with its sources, e.g. "error sending request: connection refused"
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Read at most `limit` bytes of the body, leaving the rest of the stream unread
async fn read_body_snippet(mut response: reqwest::Response, limit: usize) -> String {
    let mut snippet = Vec::with_capacity(limit.min(1024));
    while snippet.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = (limit - snippet.len()).min(chunk.len());
                snippet.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&snippet).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_method() {
        assert_eq!(
            HttpTriggerExecutor::convert_method(HttpMethod::Get),
            Method::GET
        );
        assert_eq!(
            HttpTriggerExecutor::convert_method(HttpMethod::Post),
            Method::POST
        );
        assert_eq!(
            HttpTriggerExecutor::convert_method(HttpMethod::Delete),
            Method::DELETE
        );
    }

    #[tokio::test]
    async fn test_http_executor_creation() {
        let executor = HttpTriggerExecutor::new(Duration::from_secs(30));
        assert!(executor.is_ok());
    }

    #[tokio::test]
    async fn test_error_body_snippet_is_bounded() {
        use wiremock::matchers::path;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(path("/big"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(1024 * 1024)))
            .mount(&server)
            .await;

        let response = reqwest::get(format!("{}/big", server.uri())).await.unwrap();
        let snippet = read_body_snippet(response, 16).await;
        assert_eq!(snippet, "x".repeat(16));

        let response = reqwest::get(format!("{}/big", server.uri())).await.unwrap();
        let snippet = read_body_snippet(response, BODY_SNIPPET_LIMIT).await;
        assert_eq!(snippet.len(), BODY_SNIPPET_LIMIT);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_failure() {
        let executor = HttpTriggerExecutor::new(Duration::from_secs(5)).unwrap();
        let mut outcomes = executor.subscribe();
        // Port 9 on loopback: nothing listens there
        let spec = ScheduleSpec::new("dead", "http://127.0.0.1:9/hook", "0 * * * * ?");

        let outcome = executor.execute(&spec).await;
        assert!(matches!(outcome.kind, OutcomeKind::Transport { .. }));
        assert_eq!(outcome.name, "dead");

        let published = outcomes.recv().await.unwrap();
        assert_eq!(published.fire_id, outcome.fire_id);
    }
}
