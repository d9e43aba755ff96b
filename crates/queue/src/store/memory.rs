//! In-process store.
//!
//! Keeps every table in one `tokio::sync::Mutex`, which makes claims atomic
//! for all callers in the process. Used for local runs and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ChannelRecord, ChannelStatsSnapshot, ContentStore, JobStore, StoreError, StoreResult,
    VideoRecord, VideoStatsSnapshot,
};
use crate::feed::FeedState;
use crate::jobs::{ClaimedJob, EnqueueRequest, JobStatus, JobType};
use crate::retry::JobRetryConfig;

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Enqueue,
    Claim,
    UpsertChannels,
    UpsertVideos,
    CaptureChannelStats,
    CaptureVideoStats,
    ListVideos,
    SaveFeedState,
}

/// A stored job with its bookkeeping.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub dedup_key: Option<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobRecord {
    fn claimed(&self) -> ClaimedJob {
        ClaimedJob {
            job_id: self.id,
            job_type: self.job_type.as_str().to_string(),
            payload: self.payload.clone(),
            priority: self.priority,
            attempt_count: self.attempt_count,
        }
    }

    fn release(&mut self) {
        self.locked_by = None;
        self.locked_until = None;
    }
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, JobRecord>,
    channels: BTreeMap<String, ChannelRecord>,
    videos: BTreeMap<String, VideoRecord>,
    channel_stats: Vec<ChannelStatsSnapshot>,
    video_stats: Vec<VideoStatsSnapshot>,
    feeds: BTreeMap<String, FeedState>,
    fail_points: HashSet<FailPoint>,
}

impl Tables {
    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.fail_points.contains(&point) {
            return Err(StoreError::Unavailable(format!("{point:?} disabled")));
        }
        Ok(())
    }
}

/// Store backed by process memory.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    lease: chrono::Duration,
    retry: JobRetryConfig,
}

impl MemoryStore {
    /// Empty store with a 5 minute lease and the default requeue backoff.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            lease: chrono::Duration::minutes(5),
            retry: JobRetryConfig::default(),
        }
    }

    /// Override how long a claim holds a job.
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        self
    }

    /// Override the requeue backoff.
    #[must_use]
    pub fn with_retry(mut self, retry: JobRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Make `point` fail until [`clear_failures`](Self::clear_failures).
    pub async fn fail_on(&self, point: FailPoint) {
        self.tables.lock().await.fail_points.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.tables.lock().await.fail_points.clear();
    }

    pub async fn job(&self, job_id: Uuid) -> Option<JobRecord> {
        self.tables.lock().await.jobs.get(&job_id).cloned()
    }

    /// All jobs, oldest first.
    pub async fn jobs(&self) -> Vec<JobRecord> {
        let tables = self.tables.lock().await;
        let mut jobs: Vec<JobRecord> = tables.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn channel(&self, channel_id: &str) -> Option<ChannelRecord> {
        self.tables.lock().await.channels.get(channel_id).cloned()
    }

    pub async fn video(&self, video_id: &str) -> Option<VideoRecord> {
        self.tables.lock().await.videos.get(video_id).cloned()
    }

    pub async fn video_count(&self) -> usize {
        self.tables.lock().await.videos.len()
    }

    pub async fn channel_stats(&self) -> Vec<ChannelStatsSnapshot> {
        self.tables.lock().await.channel_stats.clone()
    }

    pub async fn video_stats(&self) -> Vec<VideoStatsSnapshot> {
        self.tables.lock().await.video_stats.clone()
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, request: EnqueueRequest) -> StoreResult<Uuid> {
        let mut tables = self.tables.lock().await;
        tables.check(FailPoint::Enqueue)?;

        if request.max_attempts == 0 {
            return Err(StoreError::Invalid("max_attempts must be positive".to_string()));
        }

        if let Some(key) = &request.dedup_key {
            if let Some(existing) = tables
                .jobs
                .values()
                .find(|j| j.status.is_active() && j.dedup_key.as_ref() == Some(key))
            {
                debug!(dedup_key = %key, job_id = %existing.id, "Active job already holds dedup key");
                return Ok(existing.id);
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        tables.jobs.insert(
            id,
            JobRecord {
                id,
                job_type: request.job_type,
                payload: request.payload,
                priority: request.priority,
                dedup_key: request.dedup_key,
                attempt_count: 0,
                max_attempts: request.max_attempts,
                status: JobStatus::Pending,
                locked_by: None,
                locked_until: None,
                scheduled_at: request.scheduled_at.unwrap_or(now),
                created_at: now,
                completed_at: None,
                failed_at: None,
                last_error: None,
            },
        );

        debug!(job_id = %id, job_type = %request.job_type, "Job enqueued");
        Ok(id)
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[JobType]>,
        limit: u32,
    ) -> StoreResult<Vec<ClaimedJob>> {
        let mut tables = self.tables.lock().await;
        tables.check(FailPoint::Claim)?;
        let now = Utc::now();

        for job in tables.jobs.values_mut() {
            if job.status == JobStatus::Running && job.locked_until.is_none_or(|until| until <= now)
            {
                warn!(job_id = %job.id, locked_by = ?job.locked_by, "Lease expired, returning job to queue");
                job.status = JobStatus::Pending;
                job.release();
            }
        }

        let mut candidates: Vec<&JobRecord> = tables
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .filter(|j| job_types.is_none_or(|types| types.contains(&j.job_type)))
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.created_at.cmp(&b.created_at))
        });
        let ids: Vec<Uuid> = candidates
            .into_iter()
            .take(limit as usize)
            .map(|j| j.id)
            .collect();

        let locked_until = self.lease_until(now);
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = tables.jobs.get_mut(&id) {
                job.status = JobStatus::Running;
                job.locked_by = Some(worker_id.to_string());
                job.locked_until = Some(locked_until);
                claimed.push(job.claimed());
            }
        }

        Ok(claimed)
    }

    async fn acknowledge_complete(&self, job_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let Some(job) = tables.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }

        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.release();
        Ok(true)
    }

    async fn acknowledge_failure(&self, job_id: Uuid, message: &str) -> StoreResult<JobStatus> {
        let mut tables = self.tables.lock().await;
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status.is_terminal() {
            return Ok(job.status);
        }

        let now = Utc::now();
        job.attempt_count = job.attempt_count.saturating_add(1);
        job.last_error = Some(message.to_string());
        job.release();

        if JobRetryConfig::should_retry(job.attempt_count, job.max_attempts) {
            job.status = JobStatus::Pending;
            job.scheduled_at = self.retry.next_run_at(now, job.attempt_count);
        } else {
            job.status = JobStatus::DeadLetter;
            job.failed_at = Some(now);
            warn!(job_id = %job_id, attempts = job.attempt_count, error = %message, "Job moved to dead letter");
        }

        Ok(job.status)
    }
}

fn keep<T>(stored: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *stored = incoming;
    }
}

fn merge_channel(stored: &mut ChannelRecord, incoming: ChannelRecord) {
    keep(&mut stored.title, incoming.title);
    keep(&mut stored.description, incoming.description);
    keep(&mut stored.custom_url, incoming.custom_url);
    keep(&mut stored.thumbnail_url, incoming.thumbnail_url);
    keep(&mut stored.country, incoming.country);
    keep(&mut stored.published_at, incoming.published_at);
    keep(&mut stored.uploads_playlist_id, incoming.uploads_playlist_id);
    stored.synced_at = incoming.synced_at;
}

fn merge_video(stored: &mut VideoRecord, incoming: VideoRecord) {
    stored.channel_id = incoming.channel_id;
    keep(&mut stored.title, incoming.title);
    keep(&mut stored.description, incoming.description);
    keep(&mut stored.published_at, incoming.published_at);
    keep(&mut stored.thumbnail_url, incoming.thumbnail_url);
    keep(&mut stored.duration_seconds, incoming.duration_seconds);
    keep(&mut stored.tags, incoming.tags);
    keep(&mut stored.category_id, incoming.category_id);
    keep(&mut stored.live_broadcast_content, incoming.live_broadcast_content);
    stored.synced_at = incoming.synced_at;
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn upsert_channels(&self, channels: &[ChannelRecord]) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check(FailPoint::UpsertChannels)?;

        for channel in channels {
            match tables.channels.get_mut(&channel.id) {
                Some(stored) => merge_channel(stored, channel.clone()),
                None => {
                    tables.channels.insert(channel.id.clone(), channel.clone());
                }
            }
        }
        Ok(channels.len() as u64)
    }

    async fn upsert_videos(&self, videos: &[VideoRecord]) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check(FailPoint::UpsertVideos)?;

        for video in videos {
            match tables.videos.get_mut(&video.id) {
                Some(stored) => merge_video(stored, video.clone()),
                None => {
                    tables.videos.insert(video.id.clone(), video.clone());
                }
            }
        }
        Ok(videos.len() as u64)
    }

    async fn capture_channel_stats(&self, snapshots: &[ChannelStatsSnapshot]) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check(FailPoint::CaptureChannelStats)?;
        tables.channel_stats.extend_from_slice(snapshots);
        Ok(snapshots.len() as u64)
    }

    async fn capture_video_stats(&self, snapshots: &[VideoStatsSnapshot]) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        tables.check(FailPoint::CaptureVideoStats)?;
        tables.video_stats.extend_from_slice(snapshots);
        Ok(snapshots.len() as u64)
    }

    async fn list_videos_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
    ) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock().await;
        tables.check(FailPoint::ListVideos)?;

        let mut matching: Vec<(DateTime<Utc>, &str)> = tables
            .videos
            .values()
            .filter_map(|v| v.published_at.map(|p| (p, v.id.as_str())))
            .filter(|(published_at, _)| (from..=to).contains(published_at))
            .collect();
        matching.sort_by(|a, b| b.cmp(a));

        Ok(matching
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id.to_string())
            .collect())
    }

    async fn list_channel_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.lock().await.channels.keys().cloned().collect())
    }

    async fn get_feed_state(&self, channel_id: &str) -> StoreResult<Option<FeedState>> {
        Ok(self.tables.lock().await.feeds.get(channel_id).cloned())
    }

    async fn save_feed_state(&self, state: &FeedState) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.check(FailPoint::SaveFeedState)?;
        tables.feeds.insert(state.channel_id.clone(), state.clone());
        Ok(())
    }

    async fn list_feed_states(&self) -> StoreResult<Vec<FeedState>> {
        Ok(self.tables.lock().await.feeds.values().cloned().collect())
    }
}
