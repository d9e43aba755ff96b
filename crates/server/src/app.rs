//! HTTP surface: dispatch trigger and health check.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;
use tubewatch_common::{AppError, AppResult};
use tubewatch_queue::{DispatchError, DispatchReport, DispatchRequest, Dispatcher};
use tubewatch_youtube::{QuotaManager, QuotaStatus};

/// Shared router state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub quota: Arc<QuotaManager>,
}

/// Build the router with tracing and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/dispatch", post(dispatch))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Claim and run one batch of jobs. An empty body uses the defaults.
async fn dispatch(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<DispatchReport>> {
    let request: DispatchRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DispatchRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid dispatch request: {e}")))?
    };
    debug!(?request, "Dispatch requested");

    let report = state.dispatcher.dispatch(request).await.map_err(|e| match e {
        DispatchError::InvalidJobType(e) => AppError::BadRequest(e.to_string()),
        DispatchError::Claim(_) => AppError::Queue(e.to_string()),
    })?;

    Ok(Json(report))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    version: &'static str,
    worker_id: String,
    quota: QuotaStatus,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        worker_id: state.dispatcher.worker_id().to_string(),
        quota: state.quota.status().await,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use tubewatch_queue::{
        EnqueueRequest, FailPoint, HandlerOutcome, JobRunner, JobStore, JobType, MemoryStore,
    };
    use tubewatch_youtube::QuotaConfig;

    struct CountingRunner;

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, _job_type: JobType, _payload: &Value) -> HandlerOutcome {
            HandlerOutcome::success(1)
        }
    }

    fn app(store: Arc<MemoryStore>) -> Router {
        router(AppState {
            dispatcher: Dispatcher::new(store, Arc::new(CountingRunner), "test-worker"),
            quota: Arc::new(QuotaManager::new(QuotaConfig::default())),
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_dispatch(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/dispatch")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_runs_claimed_jobs() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..3 {
            store
                .enqueue(EnqueueRequest::new(JobType::RefreshHotVideos, json!({})))
                .await
                .unwrap();
        }

        let (status, body) = send(app(store), post_dispatch(r#"{"maxJobs": 2}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["jobsProcessed"], 2);
        assert_eq!(body["results"][0]["jobType"], "REFRESH_HOT_VIDEOS");
        assert_eq!(body["results"][0]["itemsProcessed"], 1);
        assert!(body["executionTimeMs"].is_u64());
    }

    #[tokio::test]
    async fn test_dispatch_accepts_empty_body() {
        let (status, body) = send(app(Arc::new(MemoryStore::new())), post_dispatch("")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobsProcessed"], 0);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_input() {
        let store = Arc::new(MemoryStore::new());

        let (status, body) = send(app(store.clone()), post_dispatch("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = send(app(store), post_dispatch(r#"{"jobTypes": ["NOPE"]}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("NOPE"));
    }

    #[tokio::test]
    async fn test_claim_failure_is_server_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(FailPoint::Claim).await;

        let (status, body) = send(app(store), post_dispatch("{}")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("claim"));
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/dispatch")
            .header(header::ORIGIN, "https://dashboard.example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = app(Arc::new(MemoryStore::new()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn test_health_reports_quota() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(app(Arc::new(MemoryStore::new())), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["workerId"], "test-worker");
        assert_eq!(body["quota"]["available"], 10_000);
    }
}
