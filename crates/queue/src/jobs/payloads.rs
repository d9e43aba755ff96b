//! Payloads carried by each job type.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Payload of `BACKFILL_CHANNEL`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackfillChannelPayload {
    #[validate(length(min = 1, max = 64), custom(function = "not_blank"))]
    pub channel_id: String,
    /// Upper bound on uploads imported, newest first.
    #[serde(default)]
    #[validate(range(min = 1, max = 20_000))]
    pub max_videos: Option<u32>,
}

impl BackfillChannelPayload {
    pub const DEFAULT_MAX_VIDEOS: u32 = 500;

    #[must_use]
    pub fn max_videos(&self) -> u32 {
        self.max_videos.unwrap_or(Self::DEFAULT_MAX_VIDEOS)
    }
}

/// Payload of `REFRESH_CHANNEL_STATS`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshChannelStatsPayload {
    #[validate(length(min = 1, max = 5_000))]
    pub channel_ids: Vec<String>,
}

/// Payload of `REFRESH_HOT_VIDEOS`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshHotVideosPayload {
    #[serde(default)]
    #[validate(range(min = 1, max = 168))]
    pub max_age_hours: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 1, max = 5_000))]
    pub limit: Option<u32>,
}

impl RefreshHotVideosPayload {
    pub const DEFAULT_MAX_AGE_HOURS: u32 = 48;
    pub const DEFAULT_LIMIT: u32 = 500;

    #[must_use]
    pub fn max_age_hours(&self) -> u32 {
        self.max_age_hours.unwrap_or(Self::DEFAULT_MAX_AGE_HOURS)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

/// Payload of `REFRESH_MEDIUM_VIDEOS`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_age_window"))]
pub struct RefreshMediumVideosPayload {
    #[serde(default)]
    #[validate(range(max = 365))]
    pub min_age_days: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 1, max = 365))]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    #[validate(range(min = 1, max = 10_000))]
    pub limit: Option<u32>,
}

impl RefreshMediumVideosPayload {
    pub const DEFAULT_MIN_AGE_DAYS: u32 = 2;
    pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;
    pub const DEFAULT_LIMIT: u32 = 1_000;

    #[must_use]
    pub fn min_age_days(&self) -> u32 {
        self.min_age_days.unwrap_or(Self::DEFAULT_MIN_AGE_DAYS)
    }

    #[must_use]
    pub fn max_age_days(&self) -> u32 {
        self.max_age_days.unwrap_or(Self::DEFAULT_MAX_AGE_DAYS)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn validate_age_window(payload: &RefreshMediumVideosPayload) -> Result<(), ValidationError> {
    if payload.min_age_days() >= payload.max_age_days() {
        return Err(ValidationError::new("min_age_days must be below max_age_days"));
    }
    Ok(())
}

/// Payload of `REFRESH_VIDEO_STATS`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshVideoStatsPayload {
    #[validate(length(min = 1, max = 5_000))]
    pub video_ids: Vec<String>,
}

/// Payload of `RSS_POLL_CHANNEL`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RssPollChannelPayload {
    #[validate(length(min = 1, max = 64), custom(function = "not_blank"))]
    pub channel_id: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backfill_defaults() {
        let payload: BackfillChannelPayload =
            serde_json::from_value(json!({"channelId": "UC1"})).unwrap();
        assert!(payload.validate().is_ok());
        assert_eq!(payload.max_videos(), 500);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let err = serde_json::from_value::<RssPollChannelPayload>(json!({})).unwrap_err();
        assert!(err.to_string().contains("channelId"));
    }

    #[test]
    fn test_empty_fields_fail_validation() {
        let poll: RssPollChannelPayload =
            serde_json::from_value(json!({"channelId": ""})).unwrap();
        assert!(poll.validate().is_err());

        let stats: RefreshVideoStatsPayload =
            serde_json::from_value(json!({"videoIds": []})).unwrap();
        assert!(stats.validate().is_err());
    }

    #[test]
    fn test_blank_channel_id_fails_validation() {
        let poll: RssPollChannelPayload =
            serde_json::from_value(json!({"channelId": "   "})).unwrap();
        assert!(poll.validate().is_err());

        let backfill: BackfillChannelPayload =
            serde_json::from_value(json!({"channelId": "\t\n"})).unwrap();
        assert!(backfill.validate().is_err());

        let padded: RssPollChannelPayload =
            serde_json::from_value(json!({"channelId": " UC1 "})).unwrap();
        assert!(padded.validate().is_ok());
    }

    #[test]
    fn test_medium_window_must_be_ordered() {
        let ok = RefreshMediumVideosPayload::default();
        assert!(ok.validate().is_ok());

        let inverted = RefreshMediumVideosPayload {
            min_age_days: Some(30),
            max_age_days: Some(7),
            limit: None,
        };
        assert!(inverted.validate().is_err());
    }
}
