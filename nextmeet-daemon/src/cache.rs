//! In-memory meeting cache.

use chrono::NaiveDateTime;
use nextmeet_core::Meeting;

/// The most recent successfully fetched meeting list.
///
/// Written only by the poll path; RPC handlers clone a snapshot so reads
/// never observe a half-swapped list. On fetch failure the previous
/// contents are retained, never cleared (stale-but-available).
#[derive(Debug, Default)]
pub struct MeetingCache {
    meetings: Vec<Meeting>,
    fetched_at: Option<NaiveDateTime>,
}

impl MeetingCache {
    /// True until the first successful fetch; triggers warm-on-demand.
    pub fn is_cold(&self) -> bool {
        self.fetched_at.is_none()
    }

    pub fn fetched_at(&self) -> Option<NaiveDateTime> {
        self.fetched_at
    }

    /// Replace the whole list with the result of a successful poll cycle.
    pub fn replace(&mut self, meetings: Vec<Meeting>, now: NaiveDateTime) {
        self.meetings = meetings;
        self.fetched_at = Some(now);
    }

    pub fn snapshot(&self) -> Vec<Meeting> {
        self.meetings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_cold_until_first_replace() {
        let mut cache = MeetingCache::default();
        assert!(cache.is_cold());
        assert!(cache.snapshot().is_empty());

        let now = NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        cache.replace(vec![], now);
        assert!(!cache.is_cold());
        assert_eq!(cache.fetched_at(), Some(now));
    }
}
