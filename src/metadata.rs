#![forbid(unsafe_code)]

//! Output record model. Field order here is the column order of every CSV
//! batch, so do not reorder fields without updating [`VideoRecord::COLUMNS`].

use serde::{Deserialize, Serialize};

/// One retained video with its owning channel's statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
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
    pub subscriber_count: u64,
    pub total_videos: u64,
    pub channel_age_days: i64,

    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

impl VideoRecord {
    pub const COLUMNS: [&'static str; 16] = [
        "video_id",
        "title",
        "topic",
        "category_id",
        "published_at",
        "duration_seconds",
        "video_definition",
        "captions_flag",
        "channel_id",
        "channel_title",
        "subscriber_count",
        "total_videos",
        "channel_age_days",
        "views",
        "likes",
        "comments",
    ];
}

/// Channel statistics resolved during enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub title: String,
    pub subscriber_count: u64,
    pub total_videos: u64,
    pub age_days: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_match_serialized_field_order() {
        let record = VideoRecord {
            video_id: "abc".into(),
            title: "t".into(),
            topic: "Food".into(),
            category_id: "26".into(),
            published_at: "2024-01-01T00:00:00Z".into(),
            duration_seconds: 300,
            video_definition: "hd".into(),
            captions_flag: false,
            channel_id: "UC1".into(),
            channel_title: "Chef".into(),
            subscriber_count: 10,
            total_videos: 2,
            channel_age_days: 30,
            views: 5000,
            likes: 5,
            comments: 1,
        };
        let value = serde_json::to_value(&record).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        let mut expected = VideoRecord::COLUMNS.to_vec();
        // serde_json maps are sorted unless preserve_order is enabled.
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }
}
