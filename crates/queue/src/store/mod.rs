//! Job and content store contracts.
//!
//! The job store owns the queue: dedup, leases, attempt accounting and
//! dead-lettering all happen behind [`JobStore`]. The content store owns the
//! ingested channels, videos, stat snapshots and feed states. Both are
//! implemented over RPC ([`RpcStore`]) and in process ([`MemoryStore`]).

#![allow(missing_docs)]

mod memory;
mod rpc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tubewatch_youtube::{Channel, FeedEntry, Video};
use uuid::Uuid;

use crate::feed::FeedState;
use crate::jobs::{ClaimedJob, EnqueueRequest, JobStatus, JobType};

pub use memory::{FailPoint, JobRecord, MemoryStore};
pub use rpc::{RpcStore, RpcStoreConfig};

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call {function} failed with status {status}: {message}")]
    Rpc {
        function: String,
        status: u16,
        message: String,
    },

    #[error("Failed to decode store response: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid store request: {0}")]
    Invalid(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Queue operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a job. Returns the id of the active job holding the same dedup key
    /// instead, if there is one.
    async fn enqueue(&self, request: EnqueueRequest) -> StoreResult<Uuid>;

    /// Lease up to `limit` runnable jobs for `worker_id`, highest priority
    /// first. Concurrent claims never return the same job.
    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
        limit: u32,
    ) -> StoreResult<Vec<ClaimedJob>>;

    /// Mark a running job completed. Returns false if it was not running.
    async fn acknowledge_complete(&self, job_id: Uuid) -> StoreResult<bool>;

    /// Record a failed run and return the job's new status.
    async fn acknowledge_failure(&self, job_id: Uuid, message: &str) -> StoreResult<JobStatus>;
}

/// Persistence for ingested content.
///
/// Upserts are idempotent; `None` fields leave the stored value untouched.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upsert_channels(&self, channels: &[ChannelRecord]) -> StoreResult<u64>;

    async fn upsert_videos(&self, videos: &[VideoRecord]) -> StoreResult<u64>;

    async fn capture_channel_stats(&self, snapshots: &[ChannelStatsSnapshot]) -> StoreResult<u64>;

    async fn capture_video_stats(&self, snapshots: &[VideoStatsSnapshot]) -> StoreResult<u64>;

    /// Ids of videos published in `[from, to]`, newest first.
    async fn list_videos_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<String>>;

    async fn list_channel_ids(&self) -> StoreResult<Vec<String>>;

    async fn get_feed_state(&self, channel_id: &str) -> StoreResult<Option<FeedState>>;

    async fn save_feed_state(&self, state: &FeedState) -> StoreResult<()>;

    async fn list_feed_states(&self) -> StoreResult<Vec<FeedState>>;
}

/// Channel row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub custom_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub country: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub uploads_playlist_id: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl ChannelRecord {
    #[must_use]
    pub fn from_api(channel: &Channel, now: DateTime<Utc>) -> Self {
        let snippet = channel.snippet.as_ref();
        Self {
            id: channel.id.clone(),
            title: snippet.map(|s| s.title.clone()),
            description: snippet.map(|s| s.description.clone()),
            custom_url: snippet.and_then(|s| s.custom_url.clone()),
            thumbnail_url: snippet
                .and_then(|s| s.thumbnails.as_ref())
                .and_then(|t| t.best_url())
                .map(ToString::to_string),
            country: snippet.and_then(|s| s.country.clone()),
            published_at: snippet.and_then(|s| s.published_at),
            uploads_playlist_id: channel.uploads_playlist_id().map(ToString::to_string),
            synced_at: now,
        }
    }
}

/// Video row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub channel_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<u64>,
    pub tags: Option<Vec<String>>,
    pub category_id: Option<String>,
    pub live_broadcast_content: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Build a row from an API resource. `None` when the snippet, which
    /// carries the owning channel, was not requested.
    #[must_use]
    pub fn from_api(video: &Video, now: DateTime<Utc>) -> Option<Self> {
        let snippet = video.snippet.as_ref()?;
        Some(Self {
            id: video.id.clone(),
            channel_id: snippet.channel_id.clone(),
            title: Some(snippet.title.clone()),
            description: Some(snippet.description.clone()),
            published_at: Some(snippet.published_at),
            thumbnail_url: snippet
                .thumbnails
                .as_ref()
                .and_then(|t| t.best_url())
                .map(ToString::to_string),
            duration_seconds: video
                .content_details
                .as_ref()
                .and_then(|d| d.duration_seconds()),
            tags: Some(snippet.tags.clone()),
            category_id: snippet.category_id.clone(),
            live_broadcast_content: snippet.live_broadcast_content.clone(),
            synced_at: now,
        })
    }

    /// Minimal row for an item discovered through a channel feed.
    #[must_use]
    pub fn from_feed_entry(channel_id: &str, entry: &FeedEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: entry.video_id.clone(),
            channel_id: channel_id.to_string(),
            title: Some(entry.title.clone()).filter(|t| !t.is_empty()),
            description: None,
            published_at: Some(entry.published_at),
            thumbnail_url: entry.thumbnail_url.clone(),
            duration_seconds: None,
            tags: None,
            category_id: None,
            live_broadcast_content: None,
            synced_at: now,
        }
    }
}

/// Point-in-time channel counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatsSnapshot {
    pub channel_id: String,
    pub view_count: Option<u64>,
    pub subscriber_count: Option<u64>,
    pub video_count: Option<u64>,
    pub captured_at: DateTime<Utc>,
}

impl ChannelStatsSnapshot {
    #[must_use]
    pub fn from_api(channel: &Channel, now: DateTime<Utc>) -> Option<Self> {
        let stats = channel.statistics.as_ref()?;
        Some(Self {
            channel_id: channel.id.clone(),
            view_count: stats.view_count,
            subscriber_count: (!stats.hidden_subscriber_count)
                .then_some(stats.subscriber_count)
                .flatten(),
            video_count: stats.video_count,
            captured_at: now,
        })
    }
}

/// Point-in-time video counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStatsSnapshot {
    pub video_id: String,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub captured_at: DateTime<Utc>,
}

impl VideoStatsSnapshot {
    #[must_use]
    pub fn from_api(video: &Video, now: DateTime<Utc>) -> Option<Self> {
        let stats = video.statistics.as_ref()?;
        Some(Self {
            video_id: video.id.clone(),
            view_count: stats.view_count,
            like_count: stats.like_count,
            comment_count: stats.comment_count,
            captured_at: now,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_record_from_api() {
        let channel: Channel = serde_json::from_value(json!({
            "id": "UC1",
            "snippet": {
                "title": "Chan",
                "customUrl": "@chan",
                "thumbnails": {"default": {"url": "https://i.example/c.jpg"}}
            },
            "statistics": {"viewCount": "10", "subscriberCount": "5", "hiddenSubscriberCount": true},
            "contentDetails": {"relatedPlaylists": {"uploads": "UU1"}}
        }))
        .unwrap();
        let now = Utc::now();

        let record = ChannelRecord::from_api(&channel, now);
        assert_eq!(record.title.as_deref(), Some("Chan"));
        assert_eq!(record.uploads_playlist_id.as_deref(), Some("UU1"));
        assert_eq!(record.thumbnail_url.as_deref(), Some("https://i.example/c.jpg"));

        let stats = ChannelStatsSnapshot::from_api(&channel, now).unwrap();
        assert_eq!(stats.view_count, Some(10));
        assert_eq!(stats.subscriber_count, None);
    }

    #[test]
    fn test_video_record_requires_snippet() {
        let bare: Video =
            serde_json::from_value(json!({"id": "v1", "statistics": {"viewCount": "3"}})).unwrap();
        let now = Utc::now();

        assert!(VideoRecord::from_api(&bare, now).is_none());
        assert_eq!(
            VideoStatsSnapshot::from_api(&bare, now).unwrap().view_count,
            Some(3)
        );
    }

    #[test]
    fn test_video_record_from_feed_entry() {
        let entry = FeedEntry {
            video_id: "v1".to_string(),
            title: String::new(),
            published_at: Utc::now(),
            thumbnail_url: None,
        };
        let record = VideoRecord::from_feed_entry("UC1", &entry, Utc::now());
        assert_eq!(record.channel_id, "UC1");
        assert!(record.title.is_none());
        assert_eq!(record.published_at, Some(entry.published_at));
    }
}
