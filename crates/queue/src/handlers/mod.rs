//! Job handlers.
//!
//! Each handler parses its payload, takes quota, calls the upstream API and
//! writes through the content store. Errors never cross the handler boundary:
//! [`HandlerRegistry`] turns every result into a [`HandlerOutcome`].

mod backfill;
mod channel_stats;
mod rss_poll;
mod video_stats;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};
use tubewatch_youtube::{
    ApiClient, ApiError, ApiResult, Channel, ListResponse, PlaylistItem, QuotaManager, Video,
};
use validator::Validate;

use crate::jobs::JobType;
use crate::store::{ContentStore, JobStore, StoreError};

const CHANNEL_PARTS: &[&str] = &["snippet", "statistics", "contentDetails"];
const VIDEO_PARTS: &[&str] = &["snippet", "statistics", "contentDetails"];

/// Errors raised inside a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Quota exhausted")]
    QuotaExhausted,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Uniform result reported back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerOutcome {
    pub success: bool,
    /// Primary entities written.
    pub items_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandlerOutcome {
    #[must_use]
    pub const fn success(items_processed: u64) -> Self {
        Self {
            success: true,
            items_processed,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            items_processed: 0,
            error: Some(error.into()),
        }
    }
}

/// Runs one job. The dispatcher only talks to this trait.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job_type: JobType, payload: &Value) -> HandlerOutcome;
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub api: ApiClient,
    pub quota: Arc<QuotaManager>,
    pub content: Arc<dyn ContentStore>,
    pub jobs: Arc<dyn JobStore>,
    /// Base URL for channel feeds registered by backfills and first polls.
    pub feed_base_url: String,
}

impl HandlerContext {
    /// Take `units` of quota, then run `call`.
    ///
    /// An upstream quota error drains the local bucket so later handlers stop
    /// calling until the next refill.
    async fn metered<T, F>(&self, units: u64, call: F) -> Result<T, HandlerError>
    where
        F: Future<Output = ApiResult<T>>,
    {
        if !self.quota.try_consume(units).await {
            warn!(units, "Local quota exhausted, skipping upstream call");
            return Err(HandlerError::QuotaExhausted);
        }

        match call.await {
            Err(ApiError::QuotaExceeded(message)) => {
                warn!(%message, "Upstream reported quota exceeded");
                self.quota.exhaust().await;
                Err(ApiError::QuotaExceeded(message).into())
            }
            other => other.map_err(Into::into),
        }
    }

    fn batches(&self, ids: usize) -> u64 {
        ids.div_ceil(self.api.batch_size()) as u64
    }

    async fn fetch_channels(&self, ids: &[String]) -> Result<Vec<Channel>, HandlerError> {
        self.metered(
            self.batches(ids.len()),
            self.api.list_channels(ids, CHANNEL_PARTS),
        )
        .await
    }

    async fn fetch_videos(&self, ids: &[String]) -> Result<Vec<Video>, HandlerError> {
        self.metered(
            self.batches(ids.len()),
            self.api.list_videos(ids, VIDEO_PARTS),
        )
        .await
    }

    async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListResponse<PlaylistItem>, HandlerError> {
        self.metered(1, self.api.list_playlist_items(playlist_id, page_token))
            .await
    }
}

/// Parse and validate a job payload. A null payload reads as `{}`.
fn parse_payload<T>(payload: &Value) -> Result<T, HandlerError>
where
    T: DeserializeOwned + Validate,
{
    let value = if payload.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        payload.clone()
    };

    let parsed: T =
        serde_json::from_value(value).map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
    parsed
        .validate()
        .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
    Ok(parsed)
}

/// Trim, drop empties and duplicates, keep first-seen order.
fn unique_ids(ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(ToString::to_string)
        .collect()
}

/// Routes jobs to their handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    ctx: HandlerContext,
}

impl HandlerRegistry {
    #[must_use]
    pub const fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub const fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn handle(&self, job_type: JobType, payload: &Value) -> Result<u64, HandlerError> {
        let ctx = &self.ctx;
        match job_type {
            JobType::BackfillChannel => backfill::run(ctx, parse_payload(payload)?).await,
            JobType::RefreshChannelStats => channel_stats::run(ctx, parse_payload(payload)?).await,
            JobType::RefreshHotVideos => video_stats::run_hot(ctx, parse_payload(payload)?).await,
            JobType::RefreshMediumVideos => {
                video_stats::run_medium(ctx, parse_payload(payload)?).await
            }
            JobType::RefreshVideoStats => {
                video_stats::run_specific(ctx, parse_payload(payload)?).await
            }
            JobType::RssPollChannel => rss_poll::run(ctx, parse_payload(payload)?).await,
        }
    }
}

#[async_trait]
impl JobRunner for HandlerRegistry {
    async fn run(&self, job_type: JobType, payload: &Value) -> HandlerOutcome {
        match self.handle(job_type, payload).await {
            Ok(items) => {
                info!(job_type = %job_type, items, "Handler finished");
                HandlerOutcome::success(items)
            }
            Err(e) => {
                warn!(job_type = %job_type, error = %e, "Handler failed");
                HandlerOutcome::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::jobs::{RefreshHotVideosPayload, RssPollChannelPayload};
    use serde_json::json;

    #[test]
    fn test_null_payload_uses_defaults() {
        let payload: RefreshHotVideosPayload = parse_payload(&Value::Null).unwrap();
        assert_eq!(payload.max_age_hours(), 48);
    }

    #[test]
    fn test_invalid_payload_is_reported() {
        let err = parse_payload::<RssPollChannelPayload>(&json!({"channelId": ""})).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
        assert!(err.to_string().starts_with("Invalid payload"));

        let err = parse_payload::<RssPollChannelPayload>(&json!({"channelId": 5})).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
    }

    #[test]
    fn test_unique_ids() {
        let ids = vec![
            "a".to_string(),
            " b ".to_string(),
            String::new(),
            "a".to_string(),
        ];
        assert_eq!(unique_ids(&ids), vec!["a", "b"]);
    }

    #[test]
    fn test_outcome_serialization() {
        let value = serde_json::to_value(HandlerOutcome::success(3)).unwrap();
        assert_eq!(value, json!({"success": true, "itemsProcessed": 3}));

        let value = serde_json::to_value(HandlerOutcome::failure("boom")).unwrap();
        assert_eq!(value["error"], "boom");
    }
}
