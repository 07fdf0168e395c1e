//! Statistic shapes shared by the aggregator, the live window and dashboards.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::limits::{
    clamp_opt, clamp_str, MAX_DASHBOARD_DAYS, MAX_METRIC_NAME_LEN, MAX_SEARCH_TERM_LEN,
    MAX_SEARCH_TYPE_LEN,
};

/// Kind of catalog entity a rollup is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Venue,
    Content,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Venue => "venue",
            Self::Content => "content",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "venue" => Ok(Self::Venue),
            "content" => Ok(Self::Content),
            other => Err(Error::validation(format!("unknown entity kind: {other}"))),
        }
    }
}

/// A venue or content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn venue(id: i64) -> Self {
        Self {
            kind: EntityKind::Venue,
            id,
        }
    }

    pub fn content(id: i64) -> Self {
        Self {
            kind: EntityKind::Content,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Per-entity statistic for one day.
///
/// Summing across days adds the per-day unique visitor counts; a visitor
/// active on two days counts twice in a multi-day total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStat {
    pub views: i64,
    pub unique_visitors: i64,
    pub content_views: i64,
    pub shares: i64,
    pub favorites: i64,
}

impl DailyStat {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for DailyStat {
    fn add_assign(&mut self, other: Self) {
        self.views += other.views;
        self.unique_visitors += other.unique_visitors;
        self.content_views += other.content_views;
        self.shares += other.shares;
        self.favorites += other.favorites;
    }
}

/// A stored daily rollup row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRollup {
    pub kind: EntityKind,
    pub entity_id: i64,
    /// Owning venue for content rollups.
    pub venue_id: Option<i64>,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub stats: DailyStat,
}

/// Entity ranked by event count, as used by trending and top lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCount {
    pub entity_id: i64,
    pub count: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Search term with its frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    pub search_term: String,
    pub frequency: i64,
}

/// Per-date activity totals across all entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub unique_visitors: i64,
    pub events: i64,
}

/// A recorded search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub search_term: String,
    pub search_type: Option<String>,
    pub results_count: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl SearchRecord {
    /// Normalizes a raw search. Blank terms yield `None`.
    pub fn new(
        term: &str,
        search_type: Option<&str>,
        results_count: Option<i64>,
        at: DateTime<Utc>,
    ) -> Option<Self> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return None;
        }
        Some(Self {
            search_term: clamp_str(&term, MAX_SEARCH_TERM_LEN),
            search_type: clamp_opt(search_type, MAX_SEARCH_TYPE_LEN),
            results_count: results_count.map(|c| c.max(0)),
            timestamp: at,
        })
    }
}

/// Latency or error sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub metric_name: String,
    pub value: f64,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub fn new(metric_name: &str, value: f64, at: DateTime<Utc>) -> Self {
        Self {
            metric_name: clamp_str(metric_name, MAX_METRIC_NAME_LEN),
            value,
            metadata: None,
            timestamp: at,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Summary of one metric over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_name: String,
    pub count: i64,
    pub avg: f64,
    pub max: f64,
}

/// Inclusive range of UTC dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl StatWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::invalid_date_range(format!(
                "start_date {start} is after end_date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` most recent dates ending at `today`.
    pub fn trailing(days: u32, today: NaiveDate) -> Result<Self> {
        if days == 0 || days > MAX_DASHBOARD_DAYS {
            return Err(Error::invalid_parameter(format!(
                "days must be between 1 and {MAX_DASHBOARD_DAYS}"
            )));
        }
        let start = today
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .unwrap_or(NaiveDate::MIN);
        Self::new(start, today)
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Portion of the window strictly before `today`, served from rollups.
    pub fn before(&self, today: NaiveDate) -> Option<Self> {
        let last_closed = today.pred_opt()?;
        let end = self.end.min(last_closed);
        (self.start <= end).then_some(Self {
            start: self.start,
            end,
        })
    }

    /// Start of the first day and end (exclusive) of the last day.
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (day_bounds(self.start).0, day_bounds(self.end).1)
    }
}

/// `[00:00, next day 00:00)` of a UTC date.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let next = date.succ_opt().unwrap_or(NaiveDate::MAX);
    (start, next.and_time(NaiveTime::MIN).and_utc())
}

/// Converts a timestamp to stored milliseconds.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Converts stored milliseconds back to a timestamp.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_trailing_window_is_inclusive() {
        let w = StatWindow::trailing(30, date("2024-03-31")).unwrap();
        assert_eq!(w.start, date("2024-03-02"));
        assert_eq!(w.end, date("2024-03-31"));
        assert_eq!(w.num_days(), 30);
        assert_eq!(w.dates().count(), 30);

        let one = StatWindow::trailing(1, date("2024-03-31")).unwrap();
        assert_eq!(one.start, one.end);
    }

    #[test]
    fn test_trailing_window_bounds() {
        assert!(StatWindow::trailing(0, date("2024-03-31")).is_err());
        let err = StatWindow::trailing(366, date("2024-03-31")).unwrap_err();
        assert_eq!(err.error_code(), Some("VALID_003"));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = StatWindow::new(date("2024-03-05"), date("2024-03-01")).unwrap_err();
        assert_eq!(err.error_code(), Some("VALID_002"));
    }

    #[test]
    fn test_before_today_split() {
        let today = date("2024-03-10");
        let w = StatWindow::trailing(3, today).unwrap();
        let past = w.before(today).unwrap();
        assert_eq!(past.start, date("2024-03-08"));
        assert_eq!(past.end, date("2024-03-09"));

        assert!(StatWindow::single(today).before(today).is_none());
    }

    #[test]
    fn test_day_bounds() {
        let (start, end) = day_bounds(date("2024-02-29"));
        assert_eq!(start.to_rfc3339(), "2024-02-29T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_search_normalization() {
        let now = Utc::now();
        let rec = SearchRecord::new("  RoofTop ", Some("venue"), Some(-3), now).unwrap();
        assert_eq!(rec.search_term, "rooftop");
        assert_eq!(rec.results_count, Some(0));
        assert!(SearchRecord::new("   ", None, None, now).is_none());
    }

    #[test]
    fn test_daily_stat_sum() {
        let mut total = DailyStat::default();
        assert!(total.is_empty());
        total += DailyStat {
            views: 3,
            unique_visitors: 2,
            content_views: 1,
            shares: 0,
            favorites: 1,
        };
        total += DailyStat {
            views: 1,
            unique_visitors: 1,
            ..Default::default()
        };
        assert_eq!(total.views, 4);
        assert_eq!(total.unique_visitors, 3);
    }

    #[test]
    fn test_millis_round_trip() {
        let now = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(now), 1_700_000_000_123);
    }
}
