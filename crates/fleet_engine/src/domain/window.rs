use chrono::{DateTime, Utc};
use common::domain::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};

/// Closed time window `[start, end]` over device timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> DomainResult<Self> {
        if start > end {
            return Err(DomainError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    /// Midnight (UTC) of the window's first day.
    ///
    /// Meter scans start here so the first in-window register sample can be
    /// differenced against its same-day predecessor.
    pub fn register_lookback_start(&self) -> DateTime<Utc> {
        self.start
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_inverted_window_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            TimeWindow::new(start, end),
            Err(DomainError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_window_is_closed_and_lookback_hits_midnight() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::new(start, end).unwrap();
        assert!(window.contains(start));
        assert!(window.contains(end));
        assert!(!window.contains(end + chrono::Duration::seconds(1)));
        assert_eq!(
            window.register_lookback_start(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }
}
