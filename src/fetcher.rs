#![forbid(unsafe_code)]

//! Walks `search.list` pages for one search unit and collects ids that no
//! earlier unit has emitted.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiError, MAX_PAGE_SIZE, Requester, SearchRequest, VideoApi};
use crate::dedup::SeenSet;
use crate::plan::SearchUnit;

pub const DEFAULT_TARGET_PER_QUERY: usize = 3000;
pub const DEFAULT_DELAY_MIN_MS: u64 = 150;
pub const DEFAULT_DELAY_MAX_MS: u64 = 450;

/// Inclusive bounds for the pause between two pages of the same unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(DEFAULT_DELAY_MIN_MS),
            max: Duration::from_millis(DEFAULT_DELAY_MAX_MS),
        }
    }
}

impl DelayRange {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis =
            rand::rng().random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub target_count: usize,
    pub page_size: usize,
    pub delay: DelayRange,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            target_count: DEFAULT_TARGET_PER_QUERY,
            page_size: MAX_PAGE_SIZE,
            delay: DelayRange::default(),
        }
    }
}

/// A search hit waiting for detail enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub candidates: Vec<Candidate>,
    pub pages: usize,
    /// Set when a request failed; `candidates` holds what came before it.
    pub fault: Option<ApiError>,
}

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    TargetReached,
    NoMorePages,
    NothingNew,
}

pub async fn fetch_candidates<A: VideoApi>(
    api: &A,
    seen: &SeenSet,
    unit: &SearchUnit,
    requester: &Requester<'_>,
    options: &FetchOptions,
    cancel: &CancellationToken,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    if options.target_count == 0 {
        return outcome;
    }
    let mut local: HashSet<String> = HashSet::new();
    let mut page_token: Option<String> = None;

    let stop = loop {
        let request = SearchRequest {
            query: unit.query.clone(),
            duration: unit.duration,
            page_size: options.page_size.clamp(1, MAX_PAGE_SIZE),
            page_token: page_token.take(),
        };
        let page = match requester
            .send("search", || api.search_page(requester.credential, &request))
            .await
        {
            Ok(page) => page,
            Err(err) => {
                if err != ApiError::Cancelled {
                    warn!(
                        query = %unit.query,
                        duration = %unit.duration,
                        page = outcome.pages + 1,
                        error = %err,
                        "search request failed; keeping {} candidate(s)",
                        outcome.candidates.len()
                    );
                }
                outcome.fault = Some(err);
                return outcome;
            }
        };
        outcome.pages += 1;

        let ids: Vec<&str> = page
            .items
            .iter()
            .filter_map(|item| item.id.video_id.as_deref())
            .filter(|id| !local.contains(*id))
            .collect();
        let fresh: HashSet<&str> = seen.unseen(ids.iter().copied()).into_iter().collect();

        let mut added = 0;
        for item in &page.items {
            let Some(id) = item.id.video_id.as_deref() else {
                continue;
            };
            if !fresh.contains(id) || !local.insert(id.to_string()) {
                continue;
            }
            let snippet = item.snippet.as_ref();
            outcome.candidates.push(Candidate {
                video_id: id.to_string(),
                title: snippet.map(|s| s.title.clone()).unwrap_or_default(),
                channel_id: snippet.map(|s| s.channel_id.clone()).unwrap_or_default(),
            });
            added += 1;
            if outcome.candidates.len() >= options.target_count {
                break;
            }
        }
        debug!(
            query = %unit.query,
            duration = %unit.duration,
            page = outcome.pages,
            added,
            total = outcome.candidates.len(),
            "search page processed"
        );

        if added == 0 {
            break Stop::NothingNew;
        }
        if outcome.candidates.len() >= options.target_count {
            break Stop::TargetReached;
        }
        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break Stop::NoMorePages,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.fault = Some(ApiError::Cancelled);
                return outcome;
            }
            _ = tokio::time::sleep(options.delay.sample()) => {}
        }
    };

    debug!(
        query = %unit.query,
        duration = %unit.duration,
        pages = outcome.pages,
        candidates = outcome.candidates.len(),
        stop = ?stop,
        "pagination finished"
    );
    outcome
}
