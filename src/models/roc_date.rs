//! 民国纪年日期（门牌网站使用 `114-09-01` 这种格式）

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RequestError;

/// 民国元年 = 公元 1912 年
const ROC_OFFSET: i32 = 1911;
/// 民国年最多三位数；四位数多半是误填的公元年
const MAX_ROC_YEAR_DIGITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RocDate(NaiveDate);

impl RocDate {
    pub fn new(roc_year: i32, month: u32, day: u32) -> Option<Self> {
        if roc_year < 1 {
            return None;
        }
        NaiveDate::from_ymd_opt(roc_year + ROC_OFFSET, month, day).map(Self)
    }

    pub fn from_gregorian(date: NaiveDate) -> Option<Self> {
        (date.year() > ROC_OFFSET).then_some(Self(date))
    }

    pub fn to_gregorian(self) -> NaiveDate {
        self.0
    }

    pub fn roc_year(self) -> i32 {
        self.0.year() - ROC_OFFSET
    }

    pub fn parse(s: &str) -> Result<Self, RequestError> {
        let invalid = || RequestError::InvalidDate(s.to_string());
        let mut parts = s.trim().split('-');
        let (Some(y), Some(m), Some(d), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if y.len() > MAX_ROC_YEAR_DIGITS {
            return Err(invalid());
        }
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        let day: u32 = d.parse().map_err(|_| invalid())?;
        Self::new(year, month, day).ok_or_else(invalid)
    }
}

impl fmt::Display for RocDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}-{:02}-{:02}",
            self.roc_year(),
            self.0.month(),
            self.0.day()
        )
    }
}

impl FromStr for RocDate {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RocDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RocDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// 闭区间日期范围，保证 start <= end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: RocDate,
    pub end: RocDate,
}

impl DateRange {
    pub fn new(start: RocDate, end: RocDate) -> Result<Self, RequestError> {
        if start > end {
            return Err(RequestError::ReversedRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// 截至 `today`（含）的最近 `days` 天
    pub fn trailing_days(today: NaiveDate, days: u32) -> Option<Self> {
        let span = i64::from(days.max(1)) - 1;
        let start = RocDate::from_gregorian(today - Duration::days(span))?;
        let end = RocDate::from_gregorian(today)?;
        Some(Self { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let date = RocDate::parse("114-09-01").unwrap();
        assert_eq!(date.to_gregorian(), NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(date.to_string(), "114-09-01");

        // 两位数年份补零
        let early: RocDate = "99-1-5".parse().unwrap();
        assert_eq!(early.to_string(), "099-01-05");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "114/09/01", "114-13-01", "114-02-30", "0-01-01", "114-09", "a-b-c", "114-09-01-1"] {
            assert!(RocDate::parse(bad).is_err(), "{bad} 应该被拒绝");
        }
    }

    #[test]
    fn test_parse_rejects_gregorian_year() {
        assert_eq!(
            RocDate::parse("2025-09-01"),
            Err(RequestError::InvalidDate("2025-09-01".to_string()))
        );
        assert!(RocDate::parse("0114-09-01").is_err());
        assert!(RocDate::parse("999-12-31").is_ok());
    }

    #[test]
    fn test_range_rejects_reversed() {
        let start = RocDate::parse("114-11-30").unwrap();
        let end = RocDate::parse("114-09-01").unwrap();
        assert!(matches!(
            DateRange::new(start, end),
            Err(RequestError::ReversedRange { .. })
        ));
        assert!(DateRange::new(end, start).is_ok());
        assert!(DateRange::new(start, start).is_ok());
    }

    #[test]
    fn test_trailing_days() {
        let today = NaiveDate::from_ymd_opt(2025, 10, 7).unwrap();
        let range = DateRange::trailing_days(today, 7).unwrap();
        assert_eq!(range.start.to_string(), "114-10-01");
        assert_eq!(range.end.to_string(), "114-10-07");
    }

    #[test]
    fn test_serde_uses_roc_string() {
        let date = RocDate::parse("114-09-01").unwrap();
        assert_eq!(serde_json::to_string(&date).unwrap(), "\"114-09-01\"");
        let back: RocDate = serde_json::from_str("\"114-09-01\"").unwrap();
        assert_eq!(back, date);
    }
}
