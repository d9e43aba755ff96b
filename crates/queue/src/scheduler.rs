//! Periodic enqueueing of refresh and feed-poll jobs.
//!
//! Every tick goes through dedup keys, so overlapping schedulers (or a tick
//! that fires while the previous job is still queued) do not pile up work.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use uuid::Uuid;

use crate::jobs::{EnqueueRequest, JobType};
use crate::store::{ContentStore, JobStore, StoreResult};

/// Channels per `REFRESH_CHANNEL_STATS` job.
pub const CHANNEL_STATS_CHUNK: usize = 50;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for hot video refresh (default: 1 hour).
    pub hot_videos_interval: Duration,
    /// Interval for medium-age video refresh (default: 6 hours).
    pub medium_videos_interval: Duration,
    /// Interval for channel statistics refresh (default: 1 day).
    pub channel_stats_interval: Duration,
    /// Interval for checking which feeds are due (default: 1 minute).
    pub feed_check_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hot_videos_interval: Duration::from_secs(3600),
            medium_videos_interval: Duration::from_secs(6 * 3600),
            channel_stats_interval: Duration::from_secs(86400),
            feed_check_interval: Duration::from_secs(60),
        }
    }
}

/// Enqueues recurring work into the job store.
pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    content: Arc<dyn ContentStore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        content: Arc<dyn ContentStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            content,
            config,
        }
    }

    pub async fn enqueue_hot_refresh(&self) -> StoreResult<Uuid> {
        self.jobs
            .enqueue(
                EnqueueRequest::new(JobType::RefreshHotVideos, json!({}))
                    .dedup_key("refresh_hot_videos"),
            )
            .await
    }

    pub async fn enqueue_medium_refresh(&self) -> StoreResult<Uuid> {
        self.jobs
            .enqueue(
                EnqueueRequest::new(JobType::RefreshMediumVideos, json!({}))
                    .dedup_key("refresh_medium_videos"),
            )
            .await
    }

    /// One job per chunk of tracked channels. Returns the number of jobs requested.
    pub async fn enqueue_channel_stats(&self) -> StoreResult<usize> {
        let channel_ids = self.content.list_channel_ids().await?;
        let mut requested = 0;

        for chunk in channel_ids.chunks(CHANNEL_STATS_CHUNK) {
            let request =
                EnqueueRequest::new(JobType::RefreshChannelStats, json!({ "channelIds": chunk }))
                    .dedup_key(format!("channel_stats:{}", chunk[0]));
            self.jobs.enqueue(request).await?;
            requested += 1;
        }

        Ok(requested)
    }

    /// One poll job per feed due at `now`. Returns the number of jobs requested.
    pub async fn enqueue_due_feed_polls(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let feeds = self.content.list_feed_states().await?;
        let mut requested = 0;

        for feed in feeds.iter().filter(|f| f.should_poll(now)) {
            let request = EnqueueRequest::new(
                JobType::RssPollChannel,
                json!({ "channelId": feed.channel_id }),
            )
            .dedup_key(format!("rss_poll:{}", feed.channel_id));
            self.jobs.enqueue(request).await?;
            requested += 1;
        }

        Ok(requested)
    }

    /// Spawn one interval task per schedule.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let hot = self.clone();
        let medium = self.clone();
        let channels = self.clone();
        let feeds = self.clone();

        vec![
            // Spawn hot video refresh task
            tokio::spawn(async move {
                let mut interval = ticker(hot.config.hot_videos_interval);
                loop {
                    interval.tick().await;
                    if let Err(e) = hot.enqueue_hot_refresh().await {
                        tracing::error!(error = %e, "Failed to schedule hot video refresh");
                    }
                }
            }),
            // Spawn medium-age video refresh task
            tokio::spawn(async move {
                let mut interval = ticker(medium.config.medium_videos_interval);
                loop {
                    interval.tick().await;
                    if let Err(e) = medium.enqueue_medium_refresh().await {
                        tracing::error!(error = %e, "Failed to schedule medium video refresh");
                    }
                }
            }),
            // Spawn channel stats task
            tokio::spawn(async move {
                let mut interval = ticker(channels.config.channel_stats_interval);
                loop {
                    interval.tick().await;
                    match channels.enqueue_channel_stats().await {
                        Ok(count) => {
                            if count > 0 {
                                tracing::info!(count, "Scheduled channel stats refresh");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to schedule channel stats refresh");
                        }
                    }
                }
            }),
            // Spawn feed poll task
            tokio::spawn(async move {
                let mut interval = ticker(feeds.config.feed_check_interval);
                loop {
                    interval.tick().await;
                    match feeds.enqueue_due_feed_polls(Utc::now()).await {
                        Ok(count) => {
                            if count > 0 {
                                tracing::debug!(count, "Scheduled feed polls");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to schedule feed polls");
                        }
                    }
                }
            }),
        ]
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::feed::{FeedState, FeedStatus};
    use crate::store::{ChannelRecord, MemoryStore};

    fn scheduler(store: &Arc<MemoryStore>) -> Scheduler {
        Scheduler::new(store.clone(), store.clone(), SchedulerConfig::default())
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.hot_videos_interval, Duration::from_secs(3600));
        assert_eq!(config.feed_check_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_refresh_ticks_are_deduplicated() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(&store);

        let first = scheduler.enqueue_hot_refresh().await.unwrap();
        let second = scheduler.enqueue_hot_refresh().await.unwrap();
        assert_eq!(first, second);

        scheduler.enqueue_medium_refresh().await.unwrap();
        assert_eq!(store.jobs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_stats_are_chunked() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let channels: Vec<ChannelRecord> = (0..120)
            .map(|i| ChannelRecord {
                id: format!("UC{i:03}"),
                title: None,
                description: None,
                custom_url: None,
                thumbnail_url: None,
                country: None,
                published_at: None,
                uploads_playlist_id: None,
                synced_at: now,
            })
            .collect();
        store.upsert_channels(&channels).await.unwrap();

        assert_eq!(scheduler(&store).enqueue_channel_stats().await.unwrap(), 3);

        let sizes: Vec<usize> = store
            .jobs()
            .await
            .iter()
            .map(|j| j.payload["channelIds"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes.iter().sum::<usize>(), 120);
        assert!(sizes.iter().all(|&n| n <= CHANNEL_STATS_CHUNK));
    }

    #[tokio::test]
    async fn test_only_due_feeds_are_polled() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let due = FeedState::new("UC_due", "https://feeds.example.com/due");
        let mut paused = FeedState::new("UC_paused", "https://feeds.example.com/paused");
        paused.status = FeedStatus::Paused;
        let mut recent = FeedState::new("UC_recent", "https://feeds.example.com/recent");
        recent.last_polled_at = Some(now);
        for state in [&due, &paused, &recent] {
            store.save_feed_state(state).await.unwrap();
        }

        let scheduler = scheduler(&store);
        assert_eq!(scheduler.enqueue_due_feed_polls(now).await.unwrap(), 1);
        assert_eq!(scheduler.enqueue_due_feed_polls(now).await.unwrap(), 1);

        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_type, JobType::RssPollChannel);
        assert_eq!(jobs[0].payload["channelId"], "UC_due");
        assert_eq!(jobs[0].dedup_key.as_deref(), Some("rss_poll:UC_due"));
    }
}
