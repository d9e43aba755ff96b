//! Store reached through database RPC functions.
//!
//! Every operation is a `POST {url}/rest/v1/rpc/{function}` with a JSON
//! object of named arguments. Locking, dedup and attempt accounting live in
//! the database functions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    ChannelRecord, ChannelStatsSnapshot, ContentStore, JobStore, StoreError, StoreResult,
    VideoRecord, VideoStatsSnapshot,
};
use crate::feed::FeedState;
use crate::jobs::{ClaimedJob, EnqueueRequest, JobStatus, JobType};

/// Connection settings for [`RpcStore`].
#[derive(Debug, Clone)]
pub struct RpcStoreConfig {
    /// Base URL of the database REST gateway.
    pub url: String,
    /// Key sent as `apikey` and as the bearer token.
    pub service_key: String,
    /// Lease requested on claim.
    pub lease: Duration,
    /// Per-call timeout.
    pub timeout: Duration,
}

/// Store backed by remote RPC functions.
#[derive(Clone)]
pub struct RpcStore {
    http: Client,
    base_url: String,
    lease_secs: u64,
}

impl std::fmt::Debug for RpcStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RpcStore {
    pub fn new(config: RpcStoreConfig) -> StoreResult<Self> {
        let key = HeaderValue::from_str(&config.service_key)
            .map_err(|e| StoreError::Invalid(format!("Invalid service key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_key))
            .map_err(|e| StoreError::Invalid(format!("Invalid service key: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Invalid(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            lease_secs: config.lease.as_secs().max(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, function: &str, args: Value) -> StoreResult<T> {
        let url = format!("{}/rest/v1/rpc/{function}", self.base_url);
        debug!(function, "Calling store function");

        let response = self
            .http
            .post(&url)
            .json(&args)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{function}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{function}: {e}")))?;

        if !status.is_success() {
            error!(function, status = status.as_u16(), "Store function failed");
            return Err(StoreError::Rpc {
                function: function.to_string(),
                status: status.as_u16(),
                message: rpc_message(&text),
            });
        }

        let body = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(body).map_err(|e| StoreError::Decode(format!("{function}: {e}")))
    }
}

/// Pull `message` out of an error body when there is one.
fn rpc_message(text: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(text)
        .map(|b| b.message)
        .unwrap_or_else(|_| text.to_string())
}

/// `fail_job` may return the status as a bare string or as a row.
#[derive(Deserialize)]
#[serde(untagged)]
enum StatusReply {
    Bare(JobStatus),
    Row { status: JobStatus },
}

#[async_trait]
impl JobStore for RpcStore {
    async fn enqueue(&self, request: EnqueueRequest) -> StoreResult<Uuid> {
        self.call(
            "enqueue_job",
            json!({
                "p_job_type": request.job_type,
                "p_payload": request.payload,
                "p_priority": request.priority,
                "p_dedup_key": request.dedup_key,
                "p_scheduled_at": request.scheduled_at,
                "p_max_attempts": request.max_attempts,
            }),
        )
        .await
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
        limit: u32,
    ) -> StoreResult<Vec<ClaimedJob>> {
        let jobs: Option<Vec<ClaimedJob>> = self
            .call(
                "claim_jobs",
                json!({
                    "p_worker_id": worker_id,
                    "p_job_types": job_types,
                    "p_limit": limit,
                    "p_lease_seconds": self.lease_secs,
                }),
            )
            .await?;
        Ok(jobs.unwrap_or_default())
    }

    async fn acknowledge_complete(&self, job_id: Uuid) -> StoreResult<bool> {
        let done: Option<bool> = self
            .call("complete_job", json!({ "p_job_id": job_id }))
            .await?;
        Ok(done.unwrap_or(false))
    }

    async fn acknowledge_failure(&self, job_id: Uuid, message: &str) -> StoreResult<JobStatus> {
        let reply: Option<StatusReply> = self
            .call(
                "fail_job",
                json!({ "p_job_id": job_id, "p_error": message }),
            )
            .await?;
        match reply {
            Some(StatusReply::Bare(status) | StatusReply::Row { status }) => Ok(status),
            None => Err(StoreError::NotFound(format!("job {job_id}"))),
        }
    }
}

#[async_trait]
impl ContentStore for RpcStore {
    async fn upsert_channels(&self, channels: &[ChannelRecord]) -> StoreResult<u64> {
        if channels.is_empty() {
            return Ok(0);
        }
        let written: Option<u64> = self
            .call("upsert_channels", json!({ "p_channels": channels }))
            .await?;
        Ok(written.unwrap_or(channels.len() as u64))
    }

    async fn upsert_videos(&self, videos: &[VideoRecord]) -> StoreResult<u64> {
        if videos.is_empty() {
            return Ok(0);
        }
        let written: Option<u64> = self
            .call("upsert_videos", json!({ "p_videos": videos }))
            .await?;
        Ok(written.unwrap_or(videos.len() as u64))
    }

    async fn capture_channel_stats(&self, snapshots: &[ChannelStatsSnapshot]) -> StoreResult<u64> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let written: Option<u64> = self
            .call("capture_channel_stats", json!({ "p_snapshots": snapshots }))
            .await?;
        Ok(written.unwrap_or(snapshots.len() as u64))
    }

    async fn capture_video_stats(&self, snapshots: &[VideoStatsSnapshot]) -> StoreResult<u64> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let written: Option<u64> = self
            .call("capture_video_stats", json!({ "p_snapshots": snapshots }))
            .await?;
        Ok(written.unwrap_or(snapshots.len() as u64))
    }

    async fn list_videos_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<String>> {
        let ids: Option<Vec<String>> = self
            .call(
                "list_videos_published_between",
                json!({ "p_from": from, "p_to": to, "p_limit": limit }),
            )
            .await?;
        Ok(ids.unwrap_or_default())
    }

    async fn list_channel_ids(&self) -> StoreResult<Vec<String>> {
        let ids: Option<Vec<String>> = self.call("list_channel_ids", json!({})).await?;
        Ok(ids.unwrap_or_default())
    }

    async fn get_feed_state(&self, channel_id: &str) -> StoreResult<Option<FeedState>> {
        self.call("get_feed_state", json!({ "p_channel_id": channel_id }))
            .await
    }

    async fn save_feed_state(&self, state: &FeedState) -> StoreResult<()> {
        let _: Value = self
            .call("save_feed_state", json!({ "p_state": state }))
            .await?;
        Ok(())
    }

    async fn list_feed_states(&self) -> StoreResult<Vec<FeedState>> {
        let states: Option<Vec<FeedState>> = self.call("list_feed_states", json!({})).await?;
        Ok(states.unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_message_prefers_message_field() {
        assert_eq!(
            rpc_message(r#"{"code":"P0001","message":"job locked"}"#),
            "job locked"
        );
        assert_eq!(rpc_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_status_reply_shapes() {
        let bare: StatusReply = serde_json::from_str(r#""dead_letter""#).unwrap();
        assert!(matches!(bare, StatusReply::Bare(JobStatus::DeadLetter)));

        let row: StatusReply = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert!(matches!(
            row,
            StatusReply::Row {
                status: JobStatus::Pending
            }
        ));
    }

    #[test]
    fn test_rejects_unprintable_key() {
        let result = RpcStore::new(RpcStoreConfig {
            url: "http://localhost".to_string(),
            service_key: "bad\nkey".to_string(),
            lease: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }
}
