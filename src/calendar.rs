//! Trading-calendar lookups.
//!
//! Incremental tasks sync "the latest valid trading date". The calendar that
//! answers that question is an external collaborator behind the
//! [`TradingCalendar`] trait; [`latest_trading_date`] wraps it in a fallback
//! chain so a broken calendar never fails a task.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use tracing::{debug, warn};

use crate::error::CalendarError;

/// How far back the fallback scan looks when the calendar misbehaves.
const FALLBACK_SCAN_DAYS: i64 = 7;

/// How far back `WeekdayCalendar` searches for a previous trading day.
const MAX_LOOKBACK_DAYS: i64 = 366;

#[async_trait]
pub trait TradingCalendar: Send + Sync {
    async fn is_trading_day(&self, date: NaiveDate) -> Result<bool, CalendarError>;

    /// The closest trading day strictly before `date`, if any.
    async fn prev_trading_day(&self, date: NaiveDate) -> Result<Option<NaiveDate>, CalendarError>;
}

/// Resolves the date an incremental sync should target.
///
/// In order: `today` if it is a trading day; else the calendar's previous
/// trading day; if either lookup fails, the first of the previous
/// `FALLBACK_SCAN_DAYS` days the calendar accepts; and finally yesterday.
pub async fn latest_trading_date(calendar: &dyn TradingCalendar, today: NaiveDate) -> NaiveDate {
    match calendar.is_trading_day(today).await {
        Ok(true) => return today,
        Ok(false) => match calendar.prev_trading_day(today).await {
            Ok(Some(prev)) => return prev,
            Ok(None) => warn!(date = %today, "Calendar has no previous trading day"),
            Err(e) => warn!(date = %today, error = %e, "Previous trading day lookup failed"),
        },
        Err(e) => warn!(date = %today, error = %e, "Trading day lookup failed"),
    }

    for days_back in 1..=FALLBACK_SCAN_DAYS {
        let candidate = today - Duration::days(days_back);
        match calendar.is_trading_day(candidate).await {
            Ok(true) => {
                debug!(date = %candidate, "Resolved trading date by backward scan");
                return candidate;
            }
            Ok(false) => {}
            Err(e) => debug!(date = %candidate, error = %e, "Scan lookup failed"),
        }
    }

    let yesterday = today - Duration::days(1);
    warn!(date = %yesterday, "Falling back to yesterday as trading date");
    yesterday
}

/// Monday to Friday, minus a set of exchange holidays.
#[derive(Debug, Clone, Default)]
pub struct WeekdayCalendar {
    holidays: HashSet<NaiveDate>,
}

impl WeekdayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, holidays: I) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Loads holidays from a file of `YYYY-MM-DD` lines.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    pub fn from_file(path: &Path) -> Result<Self, CalendarError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_holidays(&contents)
    }

    fn parse_holidays(contents: &str) -> Result<Self, CalendarError> {
        let mut holidays = HashSet::new();
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let date = NaiveDate::parse_from_str(line, "%Y-%m-%d")
                .map_err(|_| CalendarError::InvalidHoliday(line.to_string()))?;
            holidays.insert(date);
        }
        Ok(Self { holidays })
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }

    fn is_open(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}

#[async_trait]
impl TradingCalendar for WeekdayCalendar {
    async fn is_trading_day(&self, date: NaiveDate) -> Result<bool, CalendarError> {
        Ok(self.is_open(date))
    }

    async fn prev_trading_day(&self, date: NaiveDate) -> Result<Option<NaiveDate>, CalendarError> {
        Ok((1..=MAX_LOOKBACK_DAYS)
            .map(|days| date - Duration::days(days))
            .find(|d| self.is_open(*d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    /// Calendar whose lookups always fail.
    struct BrokenCalendar;

    #[async_trait]
    impl TradingCalendar for BrokenCalendar {
        async fn is_trading_day(&self, _date: NaiveDate) -> Result<bool, CalendarError> {
            Err(CalendarError::LookupFailed("service down".into()))
        }

        async fn prev_trading_day(
            &self,
            _date: NaiveDate,
        ) -> Result<Option<NaiveDate>, CalendarError> {
            Err(CalendarError::LookupFailed("service down".into()))
        }
    }

    /// Answers `is_trading_day` but cannot find previous days.
    struct NoHistoryCalendar;

    #[async_trait]
    impl TradingCalendar for NoHistoryCalendar {
        async fn is_trading_day(&self, date: NaiveDate) -> Result<bool, CalendarError> {
            WeekdayCalendar::new().is_trading_day(date).await
        }

        async fn prev_trading_day(
            &self,
            _date: NaiveDate,
        ) -> Result<Option<NaiveDate>, CalendarError> {
            Err(CalendarError::LookupFailed("history unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_trading_day_is_today() {
        // 2026-01-07 is a Wednesday
        let cal = WeekdayCalendar::new();
        assert_eq!(latest_trading_date(&cal, date(2026, 1, 7)).await, date(2026, 1, 7));
    }

    #[tokio::test]
    async fn test_weekend_resolves_to_friday() {
        let cal = WeekdayCalendar::new();
        assert_eq!(latest_trading_date(&cal, date(2026, 1, 11)).await, date(2026, 1, 9));
    }

    #[tokio::test]
    async fn test_holiday_is_skipped() {
        let cal = WeekdayCalendar::new().with_holidays([date(2026, 1, 1), date(2026, 1, 2)]);
        assert_eq!(
            latest_trading_date(&cal, date(2026, 1, 2)).await,
            date(2025, 12, 31)
        );
    }

    #[tokio::test]
    async fn test_prev_lookup_failure_scans_back() {
        // Sunday, previous-day lookup broken: scan finds Friday
        assert_eq!(
            latest_trading_date(&NoHistoryCalendar, date(2026, 1, 11)).await,
            date(2026, 1, 9)
        );
    }

    #[tokio::test]
    async fn test_broken_calendar_falls_back_to_yesterday() {
        assert_eq!(
            latest_trading_date(&BrokenCalendar, date(2026, 1, 7)).await,
            date(2026, 1, 6)
        );
    }

    #[test]
    fn test_parse_holidays() {
        let cal = WeekdayCalendar::parse_holidays("# 2026\n2026-01-01\n\n2026-02-17\n")
            .expect("should parse");
        assert_eq!(cal.holiday_count(), 2);

        let err = WeekdayCalendar::parse_holidays("2026/01/01").unwrap_err();
        assert!(matches!(err, CalendarError::InvalidHoliday(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "2026-01-01").expect("write");
        writeln!(file, "2026-05-01").expect("write");

        let cal = WeekdayCalendar::from_file(file.path()).expect("load");
        assert_eq!(cal.holiday_count(), 2);
        assert!(!cal.is_open(date(2026, 5, 1)));

        assert!(matches!(
            WeekdayCalendar::from_file(Path::new("/nonexistent/holidays.txt")),
            Err(CalendarError::Io(_))
        ));
    }
}
