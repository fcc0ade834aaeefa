//! Date-window normalization and tolerant date parsing
//!
//! Source records carry dates in whatever shape their publisher emits:
//! RFC-3339 timestamps, RFC-2822 (RSS pubDate), bare `YYYY-MM-DD`, or the
//! gazette's compact `YYYYMMDD`. Everything is normalized to `NaiveDate`
//! for `pub_date` and RFC-3339 for stored timestamps.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// An inclusive `[start, end]` search range, resolved before any fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SearchWindow {
    /// Resolve caller input into an inclusive window.
    ///
    /// Precedence: explicit dates win over `days_back`; with neither, the
    /// source default lookback applies. A partial date range is completed
    /// from today (missing end) or from `days_back`/default (missing start).
    pub fn resolve(
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        days_back: Option<i64>,
        default_days_back: i64,
    ) -> Self {
        let today = Utc::now().date_naive();
        let end = end_date.unwrap_or(today);
        let start = match start_date {
            Some(start) => start,
            None => {
                let back = days_back.filter(|d| *d >= 1).unwrap_or(default_days_back);
                end - Duration::days(back)
            },
        };

        if start > end {
            // Inverted input collapses to a single day rather than failing
            Self { start: end, end }
        } else {
            Self { start, end }
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Iterate every day in the window, oldest first.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let mut current = self.start;
        let end = self.end;
        std::iter::from_fn(move || {
            if current > end {
                return None;
            }
            let day = current;
            current += Duration::days(1);
            Some(day)
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Parse a date string in any of the shapes the sources emit.
/// Returns `None` when nothing matches; callers decide the fallback.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        return Some(date);
    }
    // NewsAPI occasionally drops the timezone suffix
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }

    None
}

/// `YYYY-MM-DD` for persisted pub_date columns.
pub fn format_pub_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn resolve_explicit_range() {
        let w = SearchWindow::resolve(Some(d("2024-03-01")), Some(d("2024-03-10")), None, 7);
        assert_eq!(w.start, d("2024-03-01"));
        assert_eq!(w.end, d("2024-03-10"));
        assert_eq!(w.days(), 10);
    }

    #[test]
    fn resolve_days_back() {
        let w = SearchWindow::resolve(None, None, Some(3), 7);
        assert_eq!(w.days(), 4);
        assert_eq!(w.end, Utc::now().date_naive());
    }

    #[test]
    fn resolve_defaults_when_absent() {
        let w = SearchWindow::resolve(None, None, None, 7);
        assert_eq!(w.days(), 8);
    }

    #[test]
    fn inverted_range_collapses() {
        let w = SearchWindow::resolve(Some(d("2024-03-10")), Some(d("2024-03-01")), None, 7);
        assert_eq!(w.start, w.end);
    }

    #[test]
    fn iter_days_covers_window_inclusive() {
        let w = SearchWindow::resolve(Some(d("2024-02-27")), Some(d("2024-03-02")), None, 7);
        let days: Vec<_> = w.iter_days().collect();
        assert_eq!(days.len(), 5);
        assert_eq!(days[0], d("2024-02-27"));
        assert_eq!(days[4], d("2024-03-02"));
    }

    #[test]
    fn parses_heterogeneous_formats() {
        assert_eq!(parse_flexible_date("2024-05-01"), Some(d("2024-05-01")));
        assert_eq!(parse_flexible_date("20240501"), Some(d("2024-05-01")));
        assert_eq!(parse_flexible_date("2024-05-01T10:30:00Z"), Some(d("2024-05-01")));
        assert_eq!(
            parse_flexible_date("Wed, 01 May 2024 10:30:00 +0200"),
            Some(d("2024-05-01"))
        );
        assert_eq!(parse_flexible_date("mañana"), None);
        assert_eq!(parse_flexible_date(""), None);
    }
}
