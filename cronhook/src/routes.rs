use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    let api_routes = Router::new()
        .route(
            "/api/triggers",
            get(handlers::triggers::list_triggers).post(handlers::triggers::create_trigger),
        )
        .route("/api/triggers/order", put(handlers::triggers::reorder_triggers))
        .route(
            "/api/triggers/:name",
            get(handlers::triggers::get_trigger)
                .put(handlers::triggers::update_trigger)
                .delete(handlers::triggers::delete_trigger),
        )
        .route(
            "/api/triggers/:name/enable",
            put(handlers::triggers::enable_trigger),
        )
        .route(
            "/api/triggers/:name/disable",
            put(handlers::triggers::disable_trigger),
        )
        .route("/api/reconcile", post(handlers::triggers::reconcile))
        .route(
            "/api/outcomes/stream",
            get(handlers::outcomes::outcome_stream),
        );

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use common::executor::HttpTriggerExecutor;
    use common::lifecycle::HostedLifecycle;
    use common::orchestrator::SchedulerOrchestrator;
    use common::scheduler::{CronScheduler, EngineConfig};
    use common::sink::JsonFileSink;
    use common::store::ConfigurationStore;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    async fn test_app() -> (Router, AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(JsonFileSink::new(dir.path().join("triggers.json")));
        let store = Arc::new(ConfigurationStore::load(sink).await.unwrap());
        let executor = HttpTriggerExecutor::new(Duration::from_secs(5)).unwrap();
        let outcomes = executor.outcome_sender();
        let scheduler = Arc::new(CronScheduler::new(Arc::new(executor), EngineConfig::default()));
        let orchestrator = Arc::new(SchedulerOrchestrator::new(store.clone(), scheduler.clone()));
        let (lifecycle, _) = HostedLifecycle::start(store.clone(), orchestrator, scheduler).await;

        let state = AppState::new(store, lifecycle, outcomes, None, CancellationToken::new());
        (create_router(state.clone()), state, dir)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn trigger(name: &str) -> Value {
        json!({
            "name": name,
            "url": format!("http://svc/{}", name),
            "cron_expression": "0 * * * * ?",
        })
    }

    #[tokio::test]
    async fn test_create_and_list_triggers() {
        let (app, state, _dir) = test_app().await;

        let (status, body) = send(&app, "POST", "/api/triggers", Some(trigger("ping-a"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["method"], "POST");

        state.lifecycle.orchestrator().reconcile().await;
        let (status, body) = send(&app, "GET", "/api/triggers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["name"], "ping-a");
        assert_eq!(body["data"][0]["live"], "active");
        assert!(body["data"][0]["next_fire_time"].is_string());

        state.lifecycle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_validation_and_not_found_errors() {
        let (app, state, _dir) = test_app().await;

        let mut bad = trigger("bad");
        bad["url"] = json!("ftp://svc/bad");
        let (status, body) = send(&app, "POST", "/api/triggers", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert!(body["trace_id"].is_string());

        let (status, body) = send(&app, "GET", "/api/triggers/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, _) = send(&app, "PUT", "/api/triggers/missing/disable", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.lifecycle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_case_insensitive_duplicate_is_rejected() {
        let (app, state, _dir) = test_app().await;

        send(&app, "POST", "/api/triggers", Some(trigger("ping-a"))).await;
        let (status, _) = send(&app, "PUT", "/api/triggers/ping-a", Some(trigger("other"))).await;
        assert_eq!(status, StatusCode::OK);

        send(&app, "POST", "/api/triggers", Some(trigger("ping-b"))).await;
        let (status, body) =
            send(&app, "PUT", "/api/triggers/ping-b", Some(trigger("OTHER"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert_eq!(state.store.get_all().len(), 2);

        state.lifecycle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_disable_enable_reorder_and_delete() {
        let (app, state, _dir) = test_app().await;
        send(&app, "POST", "/api/triggers", Some(trigger("a"))).await;
        send(&app, "POST", "/api/triggers", Some(trigger("b"))).await;

        let (status, body) = send(&app, "PUT", "/api/triggers/a/disable", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["enabled"], false);

        let (status, body) = send(
            &app,
            "PUT",
            "/api/triggers/order",
            Some(json!({ "names": ["b", "a"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!(["b", "a"]));

        let (status, _) = send(
            &app,
            "PUT",
            "/api/triggers/order",
            Some(json!({ "names": ["b"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "POST", "/api/reconcile", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["failures"].as_array().unwrap().is_empty());

        let (status, _) = send(&app, "DELETE", "/api/triggers/a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.store.get("a").is_none());

        state.lifecycle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_open_outcome_stream_does_not_block_shutdown() {
        let (app, state, _dir) = test_app().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(crate::serve(listener, app, state.shutdown.clone()));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /api/outcomes/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut head = [0u8; 256];
        let read = client.read(&mut head).await.unwrap();
        assert!(String::from_utf8_lossy(&head[..read]).starts_with("HTTP/1.1 200 OK"));

        // Client stays connected while the server shuts down
        state.shutdown.cancel();
        let finished = tokio::time::timeout(Duration::from_secs(5), server).await;
        assert!(matches!(finished, Ok(Ok(Ok(())))));

        state.lifecycle.shutdown(Duration::from_secs(1)).await;
        drop(client);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (app, state, _dir) = test_app().await;

        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        let (status, _) = send(&app, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state.lifecycle.shutdown(Duration::from_secs(1)).await;
        let (status, _) = send(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
