//! HTTP client for the upstream content API.
//!
//! Every call goes through the same path: build the URL (appending the API key
//! for Data API paths), send with the per-call timeout and headers, classify
//! the response, and retry transient failures with backoff.

use std::time::Duration;

use reqwest::header::{
    ETAG, HeaderMap, HeaderName, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use url::Url;

use crate::error::{ApiError, ApiResult};
use crate::models::{Channel, FeedDocument, ListResponse, PlaylistItem, Video};
use crate::retry::RetryPolicy;

/// Largest page the Data API returns for list endpoints.
pub const MAX_PAGE_SIZE: usize = 50;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL that Data API paths are appended to.
    pub base_url: String,
    /// Key appended as the `key` query parameter.
    pub api_key: String,
    /// Default per-request timeout.
    pub timeout: Duration,
    /// Maximum ids per batched lookup.
    pub batch_size: usize,
    /// Backoff policy for retryable failures.
    pub retry: RetryPolicy,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            batch_size: MAX_PAGE_SIZE,
            retry: RetryPolicy::default(),
            user_agent: format!("tubewatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP cache validators sent with, or returned by, a conditional request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    /// `ETag` header value.
    pub etag: Option<String>,
    /// `Last-Modified` header value.
    pub last_modified: Option<String>,
}

impl CacheValidators {
    /// Read validators from response headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };
        Self {
            etag: read(ETAG),
            last_modified: read(LAST_MODIFIED),
        }
    }

    /// Whether neither validator is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// Copy the validators present in `self` over `stored`, keeping the rest.
    pub fn merge_into(&self, stored: &mut Self) {
        if let Some(etag) = &self.etag {
            stored.etag = Some(etag.clone());
        }
        if let Some(last_modified) = &self.last_modified {
            stored.last_modified = Some(last_modified.clone());
        }
    }
}

/// Outcome of a conditional request.
#[derive(Debug, Clone)]
pub enum Conditional<T> {
    /// The server answered `304`; carries the validators that were sent.
    NotModified { validators: CacheValidators },
    /// Fresh body plus the validators returned with it.
    Modified {
        body: T,
        validators: CacheValidators,
    },
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    query: Vec<(String, String)>,
    timeout: Option<Duration>,
    headers: HeaderMap,
    validators: CacheValidators,
}

impl RequestOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Override the client's default timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add or replace a header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Send `If-None-Match` / `If-Modified-Since` from these validators.
    #[must_use]
    pub fn validators(mut self, validators: CacheValidators) -> Self {
        self.validators = validators;
        self
    }
}

enum RawResponse {
    NotModified,
    Body {
        text: String,
        validators: CacheValidators,
    },
}

enum Target<'a> {
    Api(&'a str),
    External(&'a str),
}

/// Client for the upstream content API.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ApiClientConfig,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url)
            .field("batch_size", &self.config.batch_size)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a new client.
    pub fn new(config: ApiClientConfig) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Maximum ids sent per batched request.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Backoff policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// GET a Data API path and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> ApiResult<T> {
        match self
            .execute(Method::GET, Target::Api(path), None, options)
            .await?
        {
            RawResponse::Body { text, .. } => decode(path, &text),
            RawResponse::NotModified => Err(ApiError::Http {
                status: 304,
                reason: None,
                message: "Not modified on an unconditional request".to_string(),
            }),
        }
    }

    /// POST a JSON body to a Data API path and decode the JSON response.
    pub async fn post<B, T>(&self, path: &str, body: &B, options: &RequestOptions) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {e}")))?;

        match self
            .execute(Method::POST, Target::Api(path), Some(bytes), options)
            .await?
        {
            RawResponse::Body { text, .. } => decode(path, &text),
            RawResponse::NotModified => Err(ApiError::Http {
                status: 304,
                reason: None,
                message: "Not modified on a POST".to_string(),
            }),
        }
    }

    /// Conditional GET of a Data API path.
    pub async fn get_conditional<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> ApiResult<Conditional<T>> {
        self.conditional(Target::Api(path), options).await
    }

    /// GET a list endpoint once per batch of ids and concatenate the items.
    ///
    /// Batches are requested sequentially and the items keep upstream order.
    pub async fn get_batched<T: DeserializeOwned>(
        &self,
        path: &str,
        ids: &[String],
        options: &RequestOptions,
    ) -> ApiResult<Vec<T>> {
        let mut items = Vec::with_capacity(ids.len());

        for (index, chunk) in ids.chunks(self.batch_size()).enumerate() {
            debug!(path, batch = index, size = chunk.len(), "Fetching batch");
            let batch_options = options.clone().query("id", chunk.join(","));
            let page: ListResponse<T> = self.get(path, &batch_options).await?;
            items.extend(page.items);
        }

        Ok(items)
    }

    /// Look up channels by id.
    pub async fn list_channels(&self, ids: &[String], parts: &[&str]) -> ApiResult<Vec<Channel>> {
        let options = RequestOptions::new().query("part", parts.join(","));
        self.get_batched("/channels", ids, &options).await
    }

    /// Look up videos by id.
    pub async fn list_videos(&self, ids: &[String], parts: &[&str]) -> ApiResult<Vec<Video>> {
        let options = RequestOptions::new().query("part", parts.join(","));
        self.get_batched("/videos", ids, &options).await
    }

    /// Fetch one page of a playlist.
    pub async fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> ApiResult<ListResponse<PlaylistItem>> {
        let mut options = RequestOptions::new()
            .query("part", "contentDetails")
            .query("playlistId", playlist_id)
            .query("maxResults", MAX_PAGE_SIZE.to_string());
        if let Some(token) = page_token {
            options = options.query("pageToken", token);
        }
        self.get("/playlistItems", &options).await
    }

    /// Conditional GET of a channel feed. No API key is attached.
    pub async fn fetch_feed(
        &self,
        feed_url: &str,
        validators: CacheValidators,
    ) -> ApiResult<Conditional<FeedDocument>> {
        let options = RequestOptions::new().validators(validators);
        self.conditional(Target::External(feed_url), &options).await
    }

    async fn conditional<T: DeserializeOwned>(
        &self,
        target: Target<'_>,
        options: &RequestOptions,
    ) -> ApiResult<Conditional<T>> {
        let label = target.label().to_string();
        match self.execute(Method::GET, target, None, options).await? {
            RawResponse::NotModified => {
                debug!(endpoint = %label, "Upstream not modified");
                Ok(Conditional::NotModified {
                    validators: options.validators.clone(),
                })
            }
            RawResponse::Body { text, validators } => Ok(Conditional::Modified {
                body: decode(&label, &text)?,
                validators,
            }),
        }
    }

    async fn execute(
        &self,
        method: Method,
        target: Target<'_>,
        body: Option<Vec<u8>>,
        options: &RequestOptions,
    ) -> ApiResult<RawResponse> {
        let url = self.build_url(&target, options)?;
        let label = target.label();

        let result = self
            .config
            .retry
            .run(label, |attempt| {
                self.send_once(method.clone(), url.clone(), body.clone(), options, attempt)
            })
            .await;

        if let Err(e) = &result {
            error!(endpoint = %label, status = ?e.status(), error = %e, "Upstream request failed");
        }
        result
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        options: &RequestOptions,
        attempt: u32,
    ) -> ApiResult<RawResponse> {
        debug!(method = %method, path = url.path(), attempt, "Sending upstream request");

        let mut request = self
            .http
            .request(method, url)
            .timeout(options.timeout.unwrap_or(self.config.timeout))
            .headers(options.headers.clone());

        if let Some(etag) = &options.validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &options.validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }
        if let Some(bytes) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(RawResponse::NotModified);
        }

        let validators = CacheValidators::from_headers(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        if status.is_success() {
            Ok(RawResponse::Body { text, validators })
        } else {
            Err(ApiError::from_response(status.as_u16(), &text))
        }
    }

    fn build_url(&self, target: &Target<'_>, options: &RequestOptions) -> ApiResult<Url> {
        let (raw, with_key) = match target {
            Target::Api(path) => (
                format!(
                    "{}/{}",
                    self.config.base_url.trim_end_matches('/'),
                    path.trim_start_matches('/')
                ),
                true,
            ),
            Target::External(url) => ((*url).to_string(), false),
        };

        let mut url =
            Url::parse(&raw).map_err(|e| ApiError::InvalidRequest(format!("{raw}: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &options.query {
                pairs.append_pair(key, value);
            }
            if with_key {
                pairs.append_pair("key", &self.config.api_key);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}

impl Target<'_> {
    const fn label(&self) -> &str {
        match self {
            Self::Api(path) | Self::External(path) => *path,
        }
    }
}

fn decode<T: DeserializeOwned>(label: &str, text: &str) -> ApiResult<T> {
    serde_json::from_str(text).map_err(|e| ApiError::Decode(format!("{label}: {e}")))
}
