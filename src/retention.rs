#![forbid(unsafe_code)]

//! Admission gate for output records: drops Shorts-length clips and
//! low-traffic uploads.
//!
//! Rejected items are never registered in the seen-set, so a later unit may
//! run into them again and re-evaluate them.

use crate::metadata::VideoRecord;

pub const DEFAULT_MIN_DURATION_SECS: u64 = 60;
pub const DEFAULT_MIN_VIEWS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub min_duration_secs: u64,
    pub min_views: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
            min_views: DEFAULT_MIN_VIEWS,
        }
    }
}

impl RetentionPolicy {
    pub fn keep(&self, record: &VideoRecord) -> bool {
        self.admits(record.duration_seconds, record.views)
    }

    /// Threshold check on raw values, used before a full record exists. A
    /// duration of `0` (unparsable token) fails any positive threshold.
    pub fn admits(&self, duration_secs: u64, views: u64) -> bool {
        duration_secs >= self.min_duration_secs && views >= self.min_views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::parse_duration;

    #[test]
    fn thresholds_are_inclusive() {
        let policy = RetentionPolicy::default();
        assert!(policy.admits(60, 1000));
        assert!(!policy.admits(59, 1_000_000));
        assert!(!policy.admits(3600, 999));
    }

    #[test]
    fn unparsable_duration_is_rejected() {
        let policy = RetentionPolicy::default();
        assert!(!policy.admits(parse_duration("bogus"), 50_000));
    }

    #[test]
    fn custom_thresholds_apply() {
        let policy = RetentionPolicy {
            min_duration_secs: 0,
            min_views: 0,
        };
        assert!(policy.admits(0, 0));
    }
}
