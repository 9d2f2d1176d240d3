#![forbid(unsafe_code)]

//! YouTube Data API v3 surface used by the crawler: wire types for the three
//! endpoints we call, the [`VideoApi`] seam the pipeline is written against,
//! and a blocking `ureq` implementation driven from tokio's blocking pool.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::credentials::Credential;
use crate::plan::DurationClass;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// Upstream hard limit for `maxResults` and for ids per `videos.list` call.
pub const MAX_PAGE_SIZE: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}, reason {reason}): {message}")]
    Status {
        status: u16,
        reason: String,
        message: String,
    },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("request abandoned by cancellation")]
    Cancelled,
}

impl ApiError {
    /// Faults worth retrying after a pause. Quota rejections are not: the
    /// daily budget does not come back within a backoff window.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::QuotaExceeded(_) | ApiError::Decode(_) | ApiError::Cancelled => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchListResponse {
    #[serde(default)]
    pub items: Vec<SearchResult>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub id: SearchResultId,
    #[serde(default)]
    pub snippet: Option<SearchSnippet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultId {
    pub kind: Option<String>,
    /// Absent for channel and playlist hits.
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub channel_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoListResponse {
    #[serde(default)]
    pub items: Vec<VideoItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub id: String,
    #[serde(default)]
    pub snippet: VideoSnippet,
    #[serde(default)]
    pub statistics: VideoStatistics,
    #[serde(default)]
    pub content_details: ContentDetails,
    #[serde(default)]
    pub topic_details: TopicDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_title: String,
}

/// Counts arrive as decimal strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    pub view_count: Option<String>,
    pub like_count: Option<String>,
    pub comment_count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentDetails {
    pub duration: Option<String>,
    pub definition: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDetails {
    #[serde(default)]
    pub topic_categories: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelListResponse {
    #[serde(default)]
    pub items: Vec<ChannelItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelItem {
    pub id: String,
    #[serde(default)]
    pub statistics: ChannelStatistics,
    #[serde(default)]
    pub snippet: ChannelSnippet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    pub subscriber_count: Option<String>,
    pub video_count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    #[serde(default)]
    pub title: String,
    pub published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Parameters of one `search.list` page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub duration: DurationClass,
    pub page_size: usize,
    pub page_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Seam
// ---------------------------------------------------------------------------

/// The three upstream collaborators. Implementations must be shareable across
/// worker tasks.
pub trait VideoApi: Send + Sync + 'static {
    /// `search.list?type=video&part=snippet`.
    fn search_page(
        &self,
        credential: &Credential,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<SearchListResponse, ApiError>> + Send;

    /// `videos.list?part=snippet,statistics,contentDetails,topicDetails` for
    /// at most [`MAX_PAGE_SIZE`] ids.
    fn video_details(
        &self,
        credential: &Credential,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<VideoItem>, ApiError>> + Send;

    /// `channels.list?part=statistics,snippet` for at most [`MAX_PAGE_SIZE`]
    /// ids.
    fn channel_details(
        &self,
        credential: &Credential,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<ChannelItem>, ApiError>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct YoutubeClient {
    agent: ureq::Agent,
    base_url: String,
}

impl YoutubeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("tubecrawl/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Runs one GET on the blocking pool. `ureq` has no async API, and the
    /// orchestrator must stay free to abandon the request on cancellation.
    async fn get_json<T>(
        &self,
        endpoint: &'static str,
        credential: &Credential,
        params: Vec<(&'static str, String)>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let agent = self.agent.clone();
        let url = format!("{}/{endpoint}", self.base_url);
        let key = credential.secret().to_string();
        debug!(endpoint, credential = %credential, "upstream request");

        tokio::task::spawn_blocking(move || {
            let mut request = agent.get(&url).query("key", &key);
            for (name, value) in &params {
                request = request.query(name, value);
            }
            match request.call() {
                Ok(response) => response
                    .into_json::<T>()
                    .map_err(|err| ApiError::Decode(err.to_string())),
                Err(ureq::Error::Status(status, response)) => {
                    let body = response.into_string().unwrap_or_default();
                    Err(classify_status(status, &body))
                }
                Err(ureq::Error::Transport(transport)) => {
                    Err(ApiError::Network(transport.to_string()))
                }
            }
        })
        .await
        .map_err(|err| ApiError::Network(format!("request task failed: {err}")))?
    }
}

impl VideoApi for YoutubeClient {
    async fn search_page(
        &self,
        credential: &Credential,
        request: &SearchRequest,
    ) -> Result<SearchListResponse, ApiError> {
        let mut params = vec![
            ("q", request.query.clone()),
            ("type", "video".to_string()),
            ("part", "snippet".to_string()),
            ("maxResults", request.page_size.min(MAX_PAGE_SIZE).to_string()),
            ("videoDuration", request.duration.as_str().to_string()),
        ];
        if let Some(token) = &request.page_token {
            params.push(("pageToken", token.clone()));
        }
        self.get_json("search", credential, params).await
    }

    async fn video_details(
        &self,
        credential: &Credential,
        ids: &[String],
    ) -> Result<Vec<VideoItem>, ApiError> {
        let params = vec![
            (
                "part",
                "snippet,statistics,contentDetails,topicDetails".to_string(),
            ),
            ("id", ids.join(",")),
            ("maxResults", MAX_PAGE_SIZE.to_string()),
        ];
        let response: VideoListResponse = self.get_json("videos", credential, params).await?;
        Ok(response.items)
    }

    async fn channel_details(
        &self,
        credential: &Credential,
        ids: &[String],
    ) -> Result<Vec<ChannelItem>, ApiError> {
        let params = vec![
            ("part", "statistics,snippet".to_string()),
            ("id", ids.join(",")),
            ("maxResults", MAX_PAGE_SIZE.to_string()),
        ];
        let response: ChannelListResponse = self.get_json("channels", credential, params).await?;
        Ok(response.items)
    }
}

/// Maps an HTTP error status plus the Google error envelope onto [`ApiError`].
fn classify_status(status: u16, body: &str) -> ApiError {
    let (reason, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .errors
                .first()
                .map(|detail| detail.reason.clone())
                .unwrap_or_default();
            (reason, envelope.error.message)
        }
        Err(_) => (String::new(), body.trim().to_string()),
    };
    match reason.as_str() {
        "quotaExceeded" | "dailyLimitExceeded" if status == 403 => {
            ApiError::QuotaExceeded(message)
        }
        _ => ApiError::Status {
            status,
            reason,
            message,
        },
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for transient faults. `max_retries == 0`
/// performs exactly one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt)) + jitter
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient upstream fault, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Request guard
// ---------------------------------------------------------------------------

/// Everything one upstream call needs besides its parameters: the key and its
/// concurrency gate, the retry policy, and the run's cancellation token.
#[derive(Clone, Copy)]
pub struct Requester<'a> {
    pub credential: &'a Credential,
    pub retry: RetryPolicy,
    pub cancel: &'a CancellationToken,
}

impl<'a> Requester<'a> {
    pub fn new(
        credential: &'a Credential,
        retry: RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            credential,
            retry,
            cancel,
        }
    }

    /// Runs `op` under the credential gate with retries. Cancellation wins
    /// over an in-flight request, which is dropped rather than awaited.
    pub async fn send<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let credential = self.credential;
        let attempts = self.retry.run(what, || {
            let call = op();
            async move {
                let _permit = credential.throttle().await?;
                call.await
            }
        });
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
            result = attempts => result,
        }
    }
}
