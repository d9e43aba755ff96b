//! Channel statistics refresh.

use chrono::Utc;
use tracing::{info, warn};

use super::{HandlerContext, HandlerError, unique_ids};
use crate::jobs::RefreshChannelStatsPayload;
use crate::store::{ChannelRecord, ChannelStatsSnapshot};
use tubewatch_youtube::Channel;

pub(super) async fn run(
    ctx: &HandlerContext,
    payload: RefreshChannelStatsPayload,
) -> Result<u64, HandlerError> {
    let ids = unique_ids(&payload.channel_ids);
    if ids.is_empty() {
        return Err(HandlerError::InvalidPayload(
            "channelIds contains no usable ids".to_string(),
        ));
    }

    info!(channels = ids.len(), "Refreshing channel stats");
    let channels = ctx.fetch_channels(&ids).await?;
    store_channels(ctx, &channels).await
}

/// Upsert channels, then snapshot their counters. Returns channels written.
pub(super) async fn store_channels(
    ctx: &HandlerContext,
    channels: &[Channel],
) -> Result<u64, HandlerError> {
    let now = Utc::now();

    let records: Vec<ChannelRecord> = channels
        .iter()
        .map(|c| ChannelRecord::from_api(c, now))
        .collect();
    let written = ctx.content.upsert_channels(&records).await?;

    let snapshots: Vec<ChannelStatsSnapshot> = channels
        .iter()
        .filter_map(|c| ChannelStatsSnapshot::from_api(c, now))
        .collect();
    if let Err(e) = ctx.content.capture_channel_stats(&snapshots).await {
        warn!(error = %e, count = snapshots.len(), "Failed to capture channel stats");
    }

    Ok(written)
}
