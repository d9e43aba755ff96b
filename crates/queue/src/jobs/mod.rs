//! Job definitions.

#![allow(missing_docs)]

mod payloads;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use payloads::{
    BackfillChannelPayload, RefreshChannelStatsPayload, RefreshHotVideosPayload,
    RefreshMediumVideosPayload, RefreshVideoStatsPayload, RssPollChannelPayload,
};

/// Default attempts before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Kind of work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Import a channel and its uploads.
    BackfillChannel,
    /// Refresh statistics for a list of channels.
    RefreshChannelStats,
    /// Refresh statistics for recently published videos.
    RefreshHotVideos,
    /// Refresh statistics for videos a few days to weeks old.
    RefreshMediumVideos,
    /// Refresh statistics for specific videos.
    RefreshVideoStats,
    /// Poll a channel feed for new uploads.
    RssPollChannel,
}

impl JobType {
    /// Every job type.
    pub const ALL: [Self; 6] = [
        Self::BackfillChannel,
        Self::RefreshChannelStats,
        Self::RefreshHotVideos,
        Self::RefreshMediumVideos,
        Self::RefreshVideoStats,
        Self::RssPollChannel,
    ];

    /// Wire name of the job type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BackfillChannel => "BACKFILL_CHANNEL",
            Self::RefreshChannelStats => "REFRESH_CHANNEL_STATS",
            Self::RefreshHotVideos => "REFRESH_HOT_VIDEOS",
            Self::RefreshMediumVideos => "REFRESH_MEDIUM_VIDEOS",
            Self::RefreshVideoStats => "REFRESH_VIDEO_STATS",
            Self::RssPollChannel => "RSS_POLL_CHANNEL",
        }
    }

    /// Priority used when the enqueuer does not pick one. Higher runs first.
    #[must_use]
    pub const fn default_priority(self) -> i32 {
        match self {
            Self::RssPollChannel => 8,
            Self::RefreshHotVideos => 7,
            Self::RefreshVideoStats => 6,
            Self::RefreshChannelStats => 4,
            Self::RefreshMediumVideos => 3,
            Self::BackfillChannel => 2,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for job type names the worker does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown job type: {0}")]
pub struct UnknownJobType(pub String);

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownJobType(s.to_string()))
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    DeadLetter,
}

impl JobStatus {
    /// Whether the job can still run. Dedup keys only apply to active jobs.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Whether the job reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Request to add a job to the store.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueRequest {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub dedup_key: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
}

impl EnqueueRequest {
    /// Create a request with the job type's default priority.
    #[must_use]
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            job_type,
            payload,
            priority: job_type.default_priority(),
            dedup_key: None,
            scheduled_at: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Skip the enqueue while an active job holds the same key.
    #[must_use]
    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Defer the job until `at`.
    #[must_use]
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Override the default priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Override the default attempt limit.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Job handed to a worker by `claim`.
///
/// The type stays a string so jobs written by newer producers still reach the
/// dispatcher, which fails them instead of dropping them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub job_id: Uuid,
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub attempt_count: u32,
}
