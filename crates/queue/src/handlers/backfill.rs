//! Channel backfill: channel details, then every upload up to a limit.

use tracing::{debug, info, warn};

use super::channel_stats::store_channels;
use super::video_stats::refresh_videos;
use super::{HandlerContext, HandlerError};
use crate::feed::FeedState;
use crate::jobs::BackfillChannelPayload;

pub(super) async fn run(
    ctx: &HandlerContext,
    payload: BackfillChannelPayload,
) -> Result<u64, HandlerError> {
    let channel_id = payload.channel_id.trim();
    let max_videos = payload.max_videos() as usize;
    info!(channel_id, max_videos, "Backfilling channel");

    let channels = ctx.fetch_channels(&[channel_id.to_string()]).await?;
    let Some(channel) = channels.into_iter().find(|c| c.id == channel_id) else {
        return Err(HandlerError::NotFound(format!("Channel {channel_id}")));
    };

    let mut written = store_channels(ctx, std::slice::from_ref(&channel)).await?;
    register_feed(ctx, channel_id).await;

    let Some(playlist_id) = channel.uploads_playlist_id() else {
        warn!(channel_id, "Channel has no uploads playlist");
        return Ok(written);
    };

    let mut video_ids: Vec<String> = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = ctx
            .fetch_playlist_page(playlist_id, page_token.as_deref())
            .await?;
        video_ids.extend(
            page.items
                .iter()
                .filter_map(|item| item.video_id())
                .map(ToString::to_string),
        );
        debug!(channel_id, collected = video_ids.len(), "Fetched uploads page");

        match page.next_page_token {
            Some(token) if video_ids.len() < max_videos => page_token = Some(token),
            _ => break,
        }
    }
    video_ids.truncate(max_videos);

    written += refresh_videos(ctx, &video_ids).await?;
    info!(channel_id, videos = video_ids.len(), "Channel backfill complete");
    Ok(written)
}

/// Make sure the channel's feed gets polled from now on.
async fn register_feed(ctx: &HandlerContext, channel_id: &str) {
    match ctx.content.get_feed_state(channel_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            let url = FeedState::feed_url_for(&ctx.feed_base_url, channel_id);
            if let Err(e) = ctx
                .content
                .save_feed_state(&FeedState::new(channel_id, url))
                .await
            {
                warn!(channel_id, error = %e, "Failed to register feed");
            }
        }
        Err(e) => warn!(channel_id, error = %e, "Failed to look up feed"),
    }
}
