//! Video statistics refresh: hot window, medium-age window, explicit ids.

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::{HandlerContext, HandlerError, unique_ids};
use crate::jobs::{RefreshHotVideosPayload, RefreshMediumVideosPayload, RefreshVideoStatsPayload};
use crate::store::{VideoRecord, VideoStatsSnapshot};

pub(super) async fn run_hot(
    ctx: &HandlerContext,
    payload: RefreshHotVideosPayload,
) -> Result<u64, HandlerError> {
    let now = Utc::now();
    let from = now - Duration::hours(i64::from(payload.max_age_hours()));

    let ids = ctx
        .content
        .list_videos_published_between(from, now, payload.limit())
        .await?;
    info!(candidates = ids.len(), max_age_hours = payload.max_age_hours(), "Refreshing hot videos");

    refresh_videos(ctx, &ids).await
}

pub(super) async fn run_medium(
    ctx: &HandlerContext,
    payload: RefreshMediumVideosPayload,
) -> Result<u64, HandlerError> {
    let now = Utc::now();
    let from = now - Duration::days(i64::from(payload.max_age_days()));
    let to = now - Duration::days(i64::from(payload.min_age_days()));

    let ids = ctx
        .content
        .list_videos_published_between(from, to, payload.limit())
        .await?;
    info!(
        candidates = ids.len(),
        min_age_days = payload.min_age_days(),
        max_age_days = payload.max_age_days(),
        "Refreshing medium-age videos"
    );

    refresh_videos(ctx, &ids).await
}

pub(super) async fn run_specific(
    ctx: &HandlerContext,
    payload: RefreshVideoStatsPayload,
) -> Result<u64, HandlerError> {
    let ids = unique_ids(&payload.video_ids);
    if ids.is_empty() {
        return Err(HandlerError::InvalidPayload(
            "videoIds contains no usable ids".to_string(),
        ));
    }
    refresh_videos(ctx, &ids).await
}

/// Fetch, upsert and snapshot `ids`. Returns the number of videos written.
///
/// Ids the API no longer returns (deleted or private videos) are skipped.
pub(super) async fn refresh_videos(
    ctx: &HandlerContext,
    ids: &[String],
) -> Result<u64, HandlerError> {
    if ids.is_empty() {
        debug!("No videos to refresh");
        return Ok(0);
    }

    let videos = ctx.fetch_videos(ids).await?;
    let now = Utc::now();

    let records: Vec<VideoRecord> = videos
        .iter()
        .filter_map(|v| VideoRecord::from_api(v, now))
        .collect();
    let written = ctx.content.upsert_videos(&records).await?;

    let snapshots: Vec<VideoStatsSnapshot> = videos
        .iter()
        .filter_map(|v| VideoStatsSnapshot::from_api(v, now))
        .collect();
    if let Err(e) = ctx.content.capture_video_stats(&snapshots).await {
        warn!(error = %e, count = snapshots.len(), "Failed to capture video stats");
    }

    if videos.len() < ids.len() {
        debug!(
            requested = ids.len(),
            returned = videos.len(),
            "Some videos were not returned upstream"
        );
    }
    Ok(written)
}
