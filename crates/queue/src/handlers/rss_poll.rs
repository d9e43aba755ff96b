//! Feed poll: conditional fetch, new-item detection, follow-up stat jobs.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use tubewatch_youtube::{CacheValidators, Conditional};

use super::{HandlerContext, HandlerError};
use crate::feed::FeedState;
use crate::jobs::{EnqueueRequest, JobType, RssPollChannelPayload};
use crate::store::VideoRecord;

pub(super) async fn run(
    ctx: &HandlerContext,
    payload: RssPollChannelPayload,
) -> Result<u64, HandlerError> {
    let channel_id = payload.channel_id.trim();
    let now = Utc::now();

    let mut state = match ctx.content.get_feed_state(channel_id).await? {
        Some(state) => state,
        None => {
            let url = FeedState::feed_url_for(&ctx.feed_base_url, channel_id);
            debug!(channel_id, %url, "Registering feed on first poll");
            FeedState::new(channel_id, url)
        }
    };

    if !state.should_poll(now) {
        debug!(channel_id, status = ?state.status, "Feed not due, skipping");
        return Ok(0);
    }

    let response = match ctx.api.fetch_feed(&state.feed_url, state.validators()).await {
        Ok(response) => response,
        Err(e) => {
            state.update_after_failed_poll(e.to_string(), now);
            if let Err(save) = ctx.content.save_feed_state(&state).await {
                error!(channel_id, error = %save, "Failed to record feed failure");
            }
            warn!(
                channel_id,
                consecutive_errors = state.consecutive_errors,
                error = %e,
                "Feed poll failed"
            );
            return Err(e.into());
        }
    };

    match response {
        Conditional::NotModified { validators } => {
            unchanged(ctx, &mut state, &validators, now).await
        }
        Conditional::Modified { validators, .. } if !state.has_changes(&validators) => {
            unchanged(ctx, &mut state, &validators, now).await
        }
        Conditional::Modified { body, validators } => {
            let new_items = state.filter_new_items(&body.items);
            let records: Vec<VideoRecord> = new_items
                .iter()
                .map(|item| VideoRecord::from_feed_entry(channel_id, item, now))
                .collect();
            let written = ctx.content.upsert_videos(&records).await?;

            for record in &records {
                enqueue_stats(ctx, &record.id).await;
            }

            let had_new_items = !records.is_empty();
            state.update_after_successful_poll(&validators, body.latest_published_at(), now);
            state.adjust_poll_interval(had_new_items);
            ctx.content.save_feed_state(&state).await?;

            info!(
                channel_id,
                new_items = records.len(),
                poll_interval_minutes = state.poll_interval_minutes,
                "Feed polled"
            );
            Ok(written)
        }
    }
}

async fn unchanged(
    ctx: &HandlerContext,
    state: &mut FeedState,
    validators: &CacheValidators,
    now: DateTime<Utc>,
) -> Result<u64, HandlerError> {
    state.update_after_successful_poll(validators, None, now);
    state.adjust_poll_interval(false);
    ctx.content.save_feed_state(state).await?;

    debug!(
        channel_id = %state.channel_id,
        poll_interval_minutes = state.poll_interval_minutes,
        "Feed unchanged"
    );
    Ok(0)
}

async fn enqueue_stats(ctx: &HandlerContext, video_id: &str) {
    let request = EnqueueRequest::new(JobType::RefreshVideoStats, json!({ "videoIds": [video_id] }))
        .dedup_key(format!("video_stats:{video_id}"));

    if let Err(e) = ctx.jobs.enqueue(request).await {
        warn!(video_id, error = %e, "Failed to enqueue stats refresh");
    }
}
