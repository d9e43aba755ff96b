//! RPC store integration tests.
//!
//! An axum server on an ephemeral port stands in for the database REST
//! gateway and records every function call it receives.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use serde_json::{Value, json};
use tubewatch_queue::{
    ContentStore, EnqueueRequest, JobStatus, JobStore, JobType, RpcStore, RpcStoreConfig,
    StoreError, VideoRecord,
};
use uuid::Uuid;

const SERVICE_KEY: &str = "service-key";
const CLAIMED_JOB: &str = "0190a6f4-6c1e-7a3b-9c2d-1e2f3a4b5c6d";
const MISSING_JOB: &str = "0190a6f4-6c1e-7a3b-9c2d-000000000000";

#[derive(Debug, Clone)]
struct Call {
    function: String,
    apikey: Option<String>,
    authorization: Option<String>,
    args: Value,
}

#[derive(Clone, Default)]
struct Gateway {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Gateway {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

async fn rpc(
    State(gateway): State<Gateway>,
    Path(function): Path<String>,
    headers: HeaderMap,
    Json(args): Json<Value>,
) -> Response {
    gateway.calls.lock().unwrap().push(Call {
        function: function.clone(),
        apikey: header(&headers, "apikey"),
        authorization: header(&headers, "authorization"),
        args: args.clone(),
    });

    match function.as_str() {
        "claim_jobs" => Json(json!([{
            "job_id": CLAIMED_JOB,
            "job_type": "RSS_POLL_CHANNEL",
            "payload": {"channelId": "UC1"},
            "priority": 8,
            "attempt_count": 1
        }]))
        .into_response(),
        "fail_job" if args["p_job_id"] == MISSING_JOB => Json(Value::Null).into_response(),
        "fail_job" => Json(json!({"status": "dead_letter"})).into_response(),
        // Functions returning void answer with an empty body.
        "complete_job" => StatusCode::OK.into_response(),
        "upsert_videos" => StatusCode::NO_CONTENT.into_response(),
        "enqueue_job" => (
            StatusCode::CONFLICT,
            Json(json!({"code": "23505", "message": "duplicate key value"})),
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn store() -> (RpcStore, Gateway) {
    let gateway = Gateway::default();
    let router = Router::new()
        .route("/rest/v1/rpc/{function}", post(rpc))
        .with_state(gateway.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let store = RpcStore::new(RpcStoreConfig {
        url: format!("http://{addr}/"),
        service_key: SERVICE_KEY.to_string(),
        lease: Duration::from_secs(120),
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    (store, gateway)
}

#[tokio::test]
async fn test_claim_sends_named_arguments_and_credentials() {
    let (store, gateway) = store().await;

    let jobs = store
        .claim("worker-1", Some(&[JobType::RssPollChannel]), 5)
        .await
        .unwrap();

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, CLAIMED_JOB.parse::<Uuid>().unwrap());
    assert_eq!(jobs[0].job_type, "RSS_POLL_CHANNEL");
    assert_eq!(jobs[0].payload["channelId"], "UC1");
    assert_eq!(jobs[0].attempt_count, 1);

    let calls = gateway.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.function, "claim_jobs");
    assert_eq!(call.apikey.as_deref(), Some(SERVICE_KEY));
    assert_eq!(
        call.authorization.as_deref(),
        Some(format!("Bearer {SERVICE_KEY}").as_str())
    );
    assert_eq!(
        call.args,
        json!({
            "p_worker_id": "worker-1",
            "p_job_types": ["RSS_POLL_CHANNEL"],
            "p_limit": 5,
            "p_lease_seconds": 120
        })
    );
}

#[tokio::test]
async fn test_acknowledge_failure_reads_status_row() {
    let (store, gateway) = store().await;
    let job_id: Uuid = CLAIMED_JOB.parse().unwrap();

    let status = store.acknowledge_failure(job_id, "boom").await.unwrap();
    assert_eq!(status, JobStatus::DeadLetter);

    let missing = store
        .acknowledge_failure(MISSING_JOB.parse().unwrap(), "boom")
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));

    let call = &gateway.calls()[0];
    assert_eq!(call.function, "fail_job");
    assert_eq!(call.args, json!({"p_job_id": CLAIMED_JOB, "p_error": "boom"}));
}

#[tokio::test]
async fn test_empty_reply_decodes_as_null() {
    let (store, gateway) = store().await;
    let now = Utc::now();
    let video = VideoRecord {
        id: "v1".to_string(),
        channel_id: "UC1".to_string(),
        title: Some("First".to_string()),
        description: None,
        published_at: Some(now),
        thumbnail_url: None,
        duration_seconds: Some(120),
        tags: None,
        category_id: None,
        live_broadcast_content: None,
        synced_at: now,
    };

    // No count in the reply falls back to the number of rows sent.
    assert_eq!(store.upsert_videos(&[video]).await.unwrap(), 1);
    assert!(!store.acknowledge_complete(Uuid::new_v4()).await.unwrap());

    let calls = gateway.calls();
    assert_eq!(calls[0].function, "upsert_videos");
    let rows = calls[0].args["p_videos"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "v1");
    assert_eq!(calls[1].function, "complete_job");
}

#[tokio::test]
async fn test_empty_upsert_skips_the_call() {
    let (store, gateway) = store().await;

    assert_eq!(store.upsert_videos(&[]).await.unwrap(), 0);
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_error_status_maps_to_rpc_error() {
    let (store, _gateway) = store().await;

    let err = store
        .enqueue(EnqueueRequest::new(JobType::RefreshHotVideos, json!({})))
        .await
        .unwrap_err();

    match err {
        StoreError::Rpc {
            function,
            status,
            message,
        } => {
            assert_eq!(function, "enqueue_job");
            assert_eq!(status, 409);
            assert_eq!(message, "duplicate key value");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_gateway_is_unavailable() {
    let store = RpcStore::new(RpcStoreConfig {
        url: "http://127.0.0.1:1".to_string(),
        service_key: SERVICE_KEY.to_string(),
        lease: Duration::from_secs(60),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let err = store.list_channel_ids().await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
}
