#![forbid(unsafe_code)]

//! In-memory `VideoApi` used by the pipeline tests. Pages, videos and channels
//! are scripted up front and every call is recorded for later assertions.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{
    ApiError, ChannelItem, ChannelSnippet, ChannelStatistics, ContentDetails, SearchListResponse,
    SearchRequest, SearchResult, SearchResultId, SearchSnippet, TopicDetails, VideoApi, VideoItem,
    VideoSnippet, VideoStatistics,
};
use crate::credentials::{Credential, CredentialPool};
use crate::plan::DurationClass;

pub fn test_pool() -> CredentialPool {
    CredentialPool::from_keys(
        (0..10).map(|i| format!("AIzaSyTestKey{i:04}abcdefgh")),
        5,
        2,
    )
    .unwrap()
}

pub fn test_credential() -> Credential {
    let pool = test_pool();
    pool.pick(&pool.groups()[0])
}

/// One scripted search page: either ids or a fault.
pub type ScriptedPage = Result<Vec<&'static str>, ApiError>;

#[derive(Default)]
pub struct ScriptedApi {
    pages: HashMap<(String, DurationClass), Vec<ScriptedPage>>,
    videos: HashMap<String, VideoItem>,
    channels: HashMap<String, ChannelItem>,
    detail_fault: Option<ApiError>,
    /// First failing `channel_details` call (1-based) and its error.
    channel_fault: Option<(usize, ApiError)>,
    /// Cancels the token and never answers when this query's page is requested.
    cancel_during: Option<(String, usize, CancellationToken)>,
    pub search_calls: Mutex<Vec<SearchRequest>>,
    pub detail_calls: Mutex<Vec<Vec<String>>>,
    pub channel_calls: Mutex<Vec<Vec<String>>>,
    pub keys_used: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(
        mut self,
        query: &str,
        duration: DurationClass,
        pages: Vec<ScriptedPage>,
    ) -> Self {
        self.pages.insert((query.to_string(), duration), pages);
        self
    }

    pub fn with_video(mut self, id: &str, channel_id: &str, duration: &str, views: u64) -> Self {
        self.videos
            .insert(id.to_string(), video_item(id, channel_id, duration, views));
        self
    }

    pub fn with_channel(mut self, id: &str, subscribers: u64, videos: u64, created: &str) -> Self {
        self.channels.insert(
            id.to_string(),
            ChannelItem {
                id: id.to_string(),
                statistics: ChannelStatistics {
                    subscriber_count: Some(subscribers.to_string()),
                    video_count: Some(videos.to_string()),
                },
                snippet: ChannelSnippet {
                    title: format!("{id} title"),
                    published_at: Some(created.to_string()),
                },
            },
        );
        self
    }

    pub fn failing_details(mut self, error: ApiError) -> Self {
        self.detail_fault = Some(error);
        self
    }

    pub fn failing_channels(self, error: ApiError) -> Self {
        self.failing_channels_from(1, error)
    }

    /// Channel lookups succeed until call number `nth`, then fail.
    pub fn failing_channels_from(mut self, nth: usize, error: ApiError) -> Self {
        self.channel_fault = Some((nth, error));
        self
    }

    /// Requesting page `page` of `query` cancels `token` and leaves the
    /// request hanging, like a call in flight when an interrupt arrives.
    pub fn cancelling_during(mut self, query: &str, page: usize, token: CancellationToken) -> Self {
        self.cancel_during = Some((query.to_string(), page, token));
        self
    }

    pub fn detail_ids(&self) -> Vec<String> {
        self.detail_calls.lock().iter().flatten().cloned().collect()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channel_calls.lock().iter().flatten().cloned().collect()
    }
}

pub fn video_item(id: &str, channel_id: &str, duration: &str, views: u64) -> VideoItem {
    VideoItem {
        id: id.to_string(),
        snippet: VideoSnippet {
            title: format!("{id} title"),
            category_id: "26".to_string(),
            published_at: "2024-05-01T12:00:00Z".to_string(),
            channel_id: channel_id.to_string(),
            channel_title: format!("{channel_id} snippet title"),
        },
        statistics: VideoStatistics {
            view_count: Some(views.to_string()),
            like_count: Some("10".to_string()),
            comment_count: Some("2".to_string()),
        },
        content_details: ContentDetails {
            duration: Some(duration.to_string()),
            definition: Some("hd".to_string()),
            caption: Some("false".to_string()),
        },
        topic_details: TopicDetails {
            topic_categories: vec!["https://en.wikipedia.org/wiki/Food_and_drink".to_string()],
        },
    }
}

fn page_index(token: Option<&str>) -> usize {
    token
        .and_then(|token| token.strip_prefix("page-"))
        .and_then(|index| index.parse().ok())
        .unwrap_or(0)
}

impl VideoApi for ScriptedApi {
    async fn search_page(
        &self,
        credential: &Credential,
        request: &SearchRequest,
    ) -> Result<SearchListResponse, ApiError> {
        self.search_calls.lock().push(request.clone());
        self.keys_used.lock().push(credential.secret().to_string());
        if let Some((query, page, token)) = &self.cancel_during {
            if *query == request.query && *page == page_index(request.page_token.as_deref()) {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        let key = (request.query.clone(), request.duration);
        let Some(pages) = self.pages.get(&key) else {
            return Ok(SearchListResponse::default());
        };
        let index = page_index(request.page_token.as_deref());
        let Some(page) = pages.get(index) else {
            return Ok(SearchListResponse::default());
        };
        let ids = page.clone()?;
        let next_page_token = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));
        Ok(SearchListResponse {
            items: ids
                .into_iter()
                .map(|id| SearchResult {
                    id: SearchResultId {
                        kind: Some("youtube#video".to_string()),
                        video_id: Some(id.to_string()),
                    },
                    snippet: Some(SearchSnippet {
                        title: format!("{id} title"),
                        channel_id: String::new(),
                    }),
                })
                .collect(),
            next_page_token,
        })
    }

    async fn video_details(
        &self,
        _credential: &Credential,
        ids: &[String],
    ) -> Result<Vec<VideoItem>, ApiError> {
        self.detail_calls.lock().push(ids.to_vec());
        if let Some(err) = &self.detail_fault {
            return Err(err.clone());
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.videos.get(id).cloned())
            .collect())
    }

    async fn channel_details(
        &self,
        _credential: &Credential,
        ids: &[String],
    ) -> Result<Vec<ChannelItem>, ApiError> {
        let call = {
            let mut calls = self.channel_calls.lock();
            calls.push(ids.to_vec());
            calls.len()
        };
        if let Some((nth, err)) = &self.channel_fault {
            if call >= *nth {
                return Err(err.clone());
            }
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.channels.get(id).cloned())
            .collect())
    }
}
