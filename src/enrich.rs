#![forbid(unsafe_code)]

//! Turns candidate ids into full [`VideoRecord`]s.
//!
//! Ids go to `videos.list` in chunks of 50. Items failing the retention
//! thresholds are dropped right there, before any channel lookup is paid for.
//! Survivors get their owning channel resolved through `channels.list`, either
//! one call per video (`ChannelLookup::PerVideo`) or one call per chunk with
//! channel ids deduplicated (`ChannelLookup::Batched`, the default).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::{ApiError, ChannelItem, MAX_PAGE_SIZE, Requester, VideoApi, VideoItem};
use crate::duration::parse_duration;
use crate::metadata::{ChannelStats, VideoRecord};
use crate::retention::RetentionPolicy;

pub const UNKNOWN_TOPIC: &str = "Unknown";
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLookup {
    PerVideo,
    #[default]
    Batched,
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichOptions {
    pub retention: RetentionPolicy,
    pub channel_lookup: ChannelLookup,
    /// Reference time for channel age.
    pub clock: fn() -> DateTime<Utc>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            channel_lookup: ChannelLookup::default(),
            clock: Utc::now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichOutcome {
    pub records: Vec<VideoRecord>,
    /// Items dropped by the retention thresholds.
    pub rejected: usize,
    /// Requested ids the upstream did not return (deleted, private).
    pub missing: usize,
    pub fault: Option<ApiError>,
}

/// Video-level fields of a record, before the channel is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVideo {
    pub video_id: String,
    pub title: String,
    pub topic: String,
    pub category_id: String,
    pub published_at: String,
    pub duration_seconds: u64,
    pub video_definition: String,
    pub captions_flag: bool,
    pub channel_id: String,
    pub channel_title: String,
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

impl PendingVideo {
    pub fn from_item(item: VideoItem) -> Self {
        let VideoItem {
            id,
            snippet,
            statistics,
            content_details,
            topic_details,
        } = item;
        Self {
            video_id: id,
            title: snippet.title,
            topic: topic_label(&topic_details.topic_categories),
            category_id: snippet.category_id,
            published_at: snippet.published_at,
            duration_seconds: parse_duration(content_details.duration.as_deref().unwrap_or("")),
            video_definition: content_details.definition.unwrap_or_default(),
            captions_flag: content_details
                .caption
                .is_some_and(|flag| flag.trim().eq_ignore_ascii_case("true")),
            channel_id: snippet.channel_id,
            channel_title: snippet.channel_title,
            views: parse_count(statistics.view_count.as_deref()),
            likes: parse_count(statistics.like_count.as_deref()),
            comments: parse_count(statistics.comment_count.as_deref()),
        }
    }

    pub fn into_record(self, channel: &ChannelStats) -> VideoRecord {
        let channel_title = if self.channel_title.is_empty() {
            channel.title.clone()
        } else {
            self.channel_title
        };
        VideoRecord {
            video_id: self.video_id,
            title: self.title,
            topic: self.topic,
            category_id: self.category_id,
            published_at: self.published_at,
            duration_seconds: self.duration_seconds,
            video_definition: self.video_definition,
            captions_flag: self.captions_flag,
            channel_id: self.channel_id,
            channel_title,
            subscriber_count: channel.subscriber_count,
            total_videos: channel.total_videos,
            channel_age_days: channel.age_days,
            views: self.views,
            likes: self.likes,
            comments: self.comments,
        }
    }
}

/// First topic category URL, last path segment, underscores as spaces.
pub fn topic_label(categories: &[String]) -> String {
    categories
        .first()
        .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
        .map(|segment| segment.replace('_', " "))
        .filter(|label| !label.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_TOPIC.to_string())
}

/// Decimal-string counter; missing or unparsable becomes 0.
pub fn parse_count(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse().ok()).unwrap_or(0)
}

/// Whole days between the channel's creation and `now`, both in UTC, rounded
/// down. A creation time after `now` (clock skew) gives a negative age.
/// Unknown creation time yields 0.
pub fn channel_age_days(published_at: Option<&str>, now: DateTime<Utc>) -> i64 {
    published_at
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
        .map(|created| {
            (now - created.with_timezone(&Utc))
                .num_seconds()
                .div_euclid(SECONDS_PER_DAY)
        })
        .unwrap_or(0)
}

pub fn channel_stats(item: &ChannelItem, now: DateTime<Utc>) -> ChannelStats {
    ChannelStats {
        title: item.snippet.title.clone(),
        subscriber_count: parse_count(item.statistics.subscriber_count.as_deref()),
        total_videos: parse_count(item.statistics.video_count.as_deref()),
        age_days: channel_age_days(item.snippet.published_at.as_deref(), now),
    }
}

/// Resolves `ids` into retained records. Stops at the first fault and
/// returns every record completed before it.
pub async fn enrich<A: VideoApi>(
    api: &A,
    ids: &[String],
    requester: &Requester<'_>,
    options: &EnrichOptions,
) -> EnrichOutcome {
    let mut outcome = EnrichOutcome::default();
    for chunk in ids.chunks(MAX_PAGE_SIZE) {
        let (mut chunk_outcome, fault) = enrich_chunk(api, chunk, requester, options).await;
        outcome.rejected += chunk_outcome.rejected;
        outcome.missing += chunk_outcome.missing;
        outcome.records.append(&mut chunk_outcome.records);
        if let Some(err) = fault {
            if err != ApiError::Cancelled {
                warn!(
                    error = %err,
                    resolved = outcome.records.len(),
                    "detail enrichment failed; keeping resolved records"
                );
            }
            outcome.fault = Some(err);
            break;
        }
    }
    outcome
}

/// One detail chunk. On a fault the outcome still carries the records whose
/// channel was resolved before it.
async fn enrich_chunk<A: VideoApi>(
    api: &A,
    chunk: &[String],
    requester: &Requester<'_>,
    options: &EnrichOptions,
) -> (EnrichOutcome, Option<ApiError>) {
    let mut outcome = EnrichOutcome::default();
    let items = match requester
        .send("videos", || api.video_details(requester.credential, chunk))
        .await
    {
        Ok(items) => items,
        Err(err) => return (outcome, Some(err)),
    };

    let mut by_id: HashMap<String, VideoItem> =
        items.into_iter().map(|item| (item.id.clone(), item)).collect();
    let mut survivors = Vec::new();
    // Keep the search order rather than the response order.
    for id in chunk {
        let Some(item) = by_id.remove(id) else {
            outcome.missing += 1;
            continue;
        };
        let pending = PendingVideo::from_item(item);
        if options
            .retention
            .admits(pending.duration_seconds, pending.views)
        {
            survivors.push(pending);
        } else {
            debug!(
                video_id = %pending.video_id,
                duration = pending.duration_seconds,
                views = pending.views,
                "dropped by retention thresholds"
            );
            outcome.rejected += 1;
        }
    }
    if survivors.is_empty() {
        return (outcome, None);
    }

    let now = (options.clock)();
    match options.channel_lookup {
        ChannelLookup::Batched => {
            let mut channel_ids: Vec<String> = Vec::new();
            for video in &survivors {
                if !video.channel_id.is_empty() && !channel_ids.contains(&video.channel_id) {
                    channel_ids.push(video.channel_id.clone());
                }
            }
            let channels = match lookup_channels(api, &channel_ids, requester, now).await {
                Ok(channels) => channels,
                Err(err) => return (outcome, Some(err)),
            };
            for video in survivors {
                let stats = stats_for(&channels, &video);
                outcome.records.push(video.into_record(&stats));
            }
        }
        ChannelLookup::PerVideo => {
            for video in survivors {
                let channels = if video.channel_id.is_empty() {
                    HashMap::new()
                } else {
                    let single = [video.channel_id.clone()];
                    match lookup_channels(api, &single, requester, now).await {
                        Ok(channels) => channels,
                        Err(err) => return (outcome, Some(err)),
                    }
                };
                let stats = stats_for(&channels, &video);
                outcome.records.push(video.into_record(&stats));
            }
        }
    }
    (outcome, None)
}

fn stats_for(channels: &HashMap<String, ChannelStats>, video: &PendingVideo) -> ChannelStats {
    match channels.get(&video.channel_id) {
        Some(stats) => stats.clone(),
        None => {
            debug!(
                video_id = %video.video_id,
                channel_id = %video.channel_id,
                "channel not returned upstream; using empty statistics"
            );
            ChannelStats::default()
        }
    }
}

async fn lookup_channels<A: VideoApi>(
    api: &A,
    channel_ids: &[String],
    requester: &Requester<'_>,
    now: DateTime<Utc>,
) -> Result<HashMap<String, ChannelStats>, ApiError> {
    if channel_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let items = requester
        .send("channels", || api.channel_details(requester.credential, channel_ids))
        .await?;
    Ok(items
        .iter()
        .map(|item| (item.id.clone(), channel_stats(item, now)))
        .collect())
}
