//! Polling state machine for channel feeds.
//!
//! Everything here is pure: callers pass the current time in and persist the
//! mutated state themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tubewatch_youtube::{CacheValidators, FeedEntry};
use url::Url;

/// Shortest poll interval in minutes.
pub const MIN_POLL_INTERVAL_MINUTES: u32 = 5;
/// Longest poll interval in minutes.
pub const MAX_POLL_INTERVAL_MINUTES: u32 = 60;
/// Interval assigned to newly registered feeds.
pub const DEFAULT_POLL_INTERVAL_MINUTES: u32 = 10;
/// Consecutive failures after which a feed is paused.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Whether a feed is being polled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    #[default]
    Active,
    /// Too many consecutive failures; no further polls.
    Paused,
    /// The last poll failed. Still polled until paused.
    Error,
}

/// Persistent polling state of one channel feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedState {
    pub channel_id: String,
    pub feed_url: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Publish time of the newest item seen so far.
    #[serde(default)]
    pub last_item_published_at: Option<DateTime<Utc>>,
    pub poll_interval_minutes: u32,
    #[serde(default)]
    pub consecutive_errors: u32,
    #[serde(default)]
    pub status: FeedStatus,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl FeedState {
    /// State of a newly registered feed.
    pub fn new(channel_id: impl Into<String>, feed_url: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            feed_url: feed_url.into(),
            etag: None,
            last_modified: None,
            last_polled_at: None,
            last_item_published_at: None,
            poll_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
            consecutive_errors: 0,
            status: FeedStatus::Active,
            last_error: None,
        }
    }

    /// Feed URL of a channel under `feed_base_url`.
    #[must_use]
    pub fn feed_url_for(feed_base_url: &str, channel_id: &str) -> String {
        match Url::parse(feed_base_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("channel_id", channel_id);
                url.to_string()
            }
            Err(_) => format!("{feed_base_url}?channel_id={channel_id}"),
        }
    }

    /// Whether the feed is due for a poll at `now`.
    #[must_use]
    pub fn should_poll(&self, now: DateTime<Utc>) -> bool {
        if self.status == FeedStatus::Paused {
            return false;
        }
        let Some(last_polled_at) = self.last_polled_at else {
            return true;
        };
        let interval = chrono::Duration::minutes(i64::from(self.poll_interval_minutes));
        now.signed_duration_since(last_polled_at) >= interval
    }

    /// Whether returned validators indicate a changed feed.
    ///
    /// Unchanged means a non-empty ETag or Last-Modified equal to the stored one.
    #[must_use]
    pub fn has_changes(&self, validators: &CacheValidators) -> bool {
        let same = |returned: &Option<String>, stored: &Option<String>| {
            matches!(
                (returned.as_deref(), stored.as_deref()),
                (Some(a), Some(b)) if !a.is_empty() && a == b
            )
        };
        !(same(&validators.etag, &self.etag)
            || same(&validators.last_modified, &self.last_modified))
    }

    /// Stored validators, for the next conditional request.
    #[must_use]
    pub fn validators(&self) -> CacheValidators {
        CacheValidators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }

    pub fn update_after_successful_poll(
        &mut self,
        validators: &CacheValidators,
        latest_item: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let mut stored = self.validators();
        validators.merge_into(&mut stored);
        self.etag = stored.etag;
        self.last_modified = stored.last_modified;

        if let Some(latest) = latest_item {
            if self.last_item_published_at.is_none_or(|seen| latest > seen) {
                self.last_item_published_at = Some(latest);
            }
        }

        self.consecutive_errors = 0;
        self.status = FeedStatus::Active;
        self.last_error = None;
        self.last_polled_at = Some(now);
    }

    pub fn update_after_failed_poll(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.status = if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            FeedStatus::Paused
        } else {
            FeedStatus::Error
        };
        self.last_error = Some(error.into());
        self.last_polled_at = Some(now);
    }

    /// Items published strictly after the high-water mark.
    #[must_use]
    pub fn filter_new_items<'a>(&self, items: &'a [FeedEntry]) -> Vec<&'a FeedEntry> {
        items
            .iter()
            .filter(|item| {
                self.last_item_published_at
                    .is_none_or(|seen| item.published_at > seen)
            })
            .collect()
    }

    /// Poll busy feeds more often and quiet ones less.
    pub fn adjust_poll_interval(&mut self, had_new_items: bool) {
        let current = self
            .poll_interval_minutes
            .clamp(MIN_POLL_INTERVAL_MINUTES, MAX_POLL_INTERVAL_MINUTES);

        self.poll_interval_minutes = if had_new_items {
            (current * 4 / 5).max(MIN_POLL_INTERVAL_MINUTES)
        } else {
            (current * 6 / 5).min(MAX_POLL_INTERVAL_MINUTES)
        };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn entry(id: &str, published_at: DateTime<Utc>) -> FeedEntry {
        FeedEntry {
            video_id: id.to_string(),
            title: id.to_uppercase(),
            published_at,
            thumbnail_url: None,
        }
    }

    fn validators(etag: Option<&str>, last_modified: Option<&str>) -> CacheValidators {
        CacheValidators {
            etag: etag.map(ToString::to_string),
            last_modified: last_modified.map(ToString::to_string),
        }
    }

    #[test]
    fn test_new_feed_is_active_and_due() {
        let state = FeedState::new("UC1", "https://feeds.example.com/UC1");
        assert_eq!(state.status, FeedStatus::Active);
        assert_eq!(state.poll_interval_minutes, 10);
        assert!(state.should_poll(at(0)));
    }

    #[test]
    fn test_should_poll_respects_interval() {
        let mut state = FeedState::new("UC1", "u");
        state.last_polled_at = Some(at(0));

        assert!(!state.should_poll(at(9)));
        assert!(state.should_poll(at(10)));
        assert!(state.should_poll(at(30)));
    }

    #[test]
    fn test_should_poll_status() {
        let cases = [
            (FeedStatus::Active, true),
            (FeedStatus::Error, true),
            (FeedStatus::Paused, false),
        ];
        for (status, expected) in cases {
            let mut state = FeedState::new("UC1", "u");
            state.status = status;
            assert_eq!(state.should_poll(at(0)), expected, "{status:?}");
        }
    }

    #[test]
    fn test_has_changes() {
        let mut state = FeedState::new("UC1", "u");
        state.etag = Some("\"v1\"".to_string());
        state.last_modified = Some("Wed, 01 May 2024 00:00:00 GMT".to_string());

        let cases = [
            (validators(Some("\"v1\""), None), false),
            (validators(Some("\"v2\""), None), true),
            (validators(None, Some("Wed, 01 May 2024 00:00:00 GMT")), false),
            (validators(None, Some("Thu, 02 May 2024 00:00:00 GMT")), true),
            (validators(None, None), true),
            (validators(Some(""), None), true),
        ];
        for (returned, expected) in cases {
            assert_eq!(state.has_changes(&returned), expected, "{returned:?}");
        }

        let fresh = FeedState::new("UC1", "u");
        assert!(fresh.has_changes(&validators(Some("\"v1\""), None)));
    }

    #[test]
    fn test_successful_poll_resets_errors_and_merges() {
        let mut state = FeedState::new("UC1", "u");
        state.etag = Some("\"v1\"".to_string());
        state.last_modified = Some("old".to_string());
        state.consecutive_errors = 3;
        state.status = FeedStatus::Error;
        state.last_error = Some("timeout".to_string());
        state.last_item_published_at = Some(at(30));

        state.update_after_successful_poll(&validators(Some("\"v2\""), None), Some(at(20)), at(40));

        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.status, FeedStatus::Active);
        assert!(state.last_error.is_none());
        assert_eq!(state.etag.as_deref(), Some("\"v2\""));
        assert_eq!(state.last_modified.as_deref(), Some("old"));
        // Never moves backwards.
        assert_eq!(state.last_item_published_at, Some(at(30)));
        assert_eq!(state.last_polled_at, Some(at(40)));

        state.update_after_successful_poll(&CacheValidators::default(), Some(at(35)), at(50));
        assert_eq!(state.last_item_published_at, Some(at(35)));
    }

    #[test]
    fn test_failed_polls_pause_at_threshold() {
        let mut state = FeedState::new("UC1", "u");

        for n in 1..=4 {
            state.update_after_failed_poll("HTTP 500", at(n));
            assert_eq!(state.consecutive_errors, n);
            assert_eq!(state.status, FeedStatus::Error);
            assert!(state.should_poll(at(59)));
        }

        state.update_after_failed_poll("HTTP 500", at(5));
        assert_eq!(state.status, FeedStatus::Paused);
        assert_eq!(state.last_error.as_deref(), Some("HTTP 500"));
        assert_eq!(state.last_polled_at, Some(at(5)));
        assert!(!state.should_poll(at(59)));
    }

    #[test]
    fn test_filter_new_items() {
        let items = vec![entry("a", at(10)), entry("b", at(20)), entry("c", at(30))];

        let fresh = FeedState::new("UC1", "u");
        assert_eq!(fresh.filter_new_items(&items).len(), 3);

        let mut state = FeedState::new("UC1", "u");
        state.last_item_published_at = Some(at(20));
        let ids: Vec<&str> = state
            .filter_new_items(&items)
            .into_iter()
            .map(|i| i.video_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn test_adjust_poll_interval_steps() {
        let cases = [
            (10, true, 8),
            (10, false, 12),
            (5, true, 5),
            (6, true, 5),
            (60, false, 60),
            (55, false, 60),
            (3, false, 6),
            (90, true, 48),
        ];
        for (start, had_new_items, expected) in cases {
            let mut state = FeedState::new("UC1", "u");
            state.poll_interval_minutes = start;
            state.adjust_poll_interval(had_new_items);
            assert_eq!(state.poll_interval_minutes, expected, "{start} {had_new_items}");
        }
    }

    #[test]
    fn test_adjust_poll_interval_converges() {
        let mut state = FeedState::new("UC1", "u");
        for _ in 0..30 {
            state.adjust_poll_interval(false);
        }
        assert_eq!(state.poll_interval_minutes, 60);
        state.adjust_poll_interval(false);
        assert_eq!(state.poll_interval_minutes, 60);

        for _ in 0..30 {
            state.adjust_poll_interval(true);
        }
        assert_eq!(state.poll_interval_minutes, 5);
        state.adjust_poll_interval(true);
        assert_eq!(state.poll_interval_minutes, 5);
    }

    #[test]
    fn test_feed_url_for() {
        assert_eq!(
            FeedState::feed_url_for("https://feeds.example.com/videos.json", "UC1"),
            "https://feeds.example.com/videos.json?channel_id=UC1"
        );
    }

    #[test]
    fn test_state_serializes_with_lowercase_status() {
        let state = FeedState::new("UC1", "u");
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["status"], "active");
        assert_eq!(value["poll_interval_minutes"], 10);
    }
}
