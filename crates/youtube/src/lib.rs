//! Client for the upstream content API.
//!
//! This crate wraps every outbound call tubewatch makes:
//!
//! - **Client**: Authenticated requests, conditional GETs and id batching
//! - **Errors**: Classification into retryable and fatal failures
//! - **Retry**: Exponential backoff with jitter
//! - **Quota**: Token bucket enforcing the daily request budget
//! - **Models**: Channel, video, playlist item and feed resources

pub mod client;
pub mod error;
pub mod models;
pub mod quota;
pub mod retry;

pub use client::{ApiClient, ApiClientConfig, CacheValidators, Conditional, RequestOptions};
pub use error::{ApiError, ApiResult};
pub use models::{
    Channel, FeedDocument, FeedEntry, ListResponse, PlaylistItem, Thumbnails, Video,
};
pub use quota::{QuotaConfig, QuotaManager, QuotaStatus};
pub use retry::RetryPolicy;
