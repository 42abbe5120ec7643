use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A calendar month. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Months elapsed since year 0, January. Used for arithmetic only.
    fn ordinal(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: ordinal.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn plus_months(&self, months: i64) -> Self {
        Self::from_ordinal(self.ordinal() + months)
    }

    pub fn minus_months(&self, months: u32) -> Self {
        self.plus_months(-(months as i64))
    }

    pub fn next(&self) -> Self {
        self.plus_months(1)
    }

    pub fn prev(&self) -> Self {
        self.plus_months(-1)
    }

    /// Signed number of months from `earlier` to `self`.
    pub fn months_since(&self, earlier: YearMonth) -> i64 {
        self.ordinal() - earlier.ordinal()
    }

    /// The `count` months following `self`, in order.
    pub fn following(&self, count: u32) -> impl Iterator<Item = YearMonth> {
        let start = *self;
        (1..=count as i64).map(move |i| start.plus_months(i))
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid year-month '{0}', expected YYYY-MM")]
pub struct ParseYearMonthError(String);

impl FromStr for YearMonth {
    type Err = ParseYearMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseYearMonthError(s.to_owned());
        let (year, month) = s.trim().split_once('-').ok_or_else(err)?;
        let year = year.parse::<i32>().map_err(|_| err())?;
        let month = month.parse::<u32>().map_err(|_| err())?;
        YearMonth::new(year, month).ok_or_else(err)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = ParseYearMonthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

/// The earliest valid transaction date of the corpus.
///
/// Fixed once during ingestion and passed to everything that computes
/// relative months. Persisted with a trained model so inference uses the same
/// origin as training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusAnchor {
    min_date: NaiveDate,
}

impl CorpusAnchor {
    pub fn new(min_date: NaiveDate) -> Self {
        Self { min_date }
    }

    pub fn min_date(&self) -> NaiveDate {
        self.min_date
    }

    /// Widen the anchor to cover an earlier date.
    pub fn extend(self, date: NaiveDate) -> Self {
        Self {
            min_date: self.min_date.min(date),
        }
    }

    pub fn months_since_start(&self, month: YearMonth) -> i64 {
        month.months_since(YearMonth::from_date(self.min_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_arithmetic_wraps_years() {
        let m = YearMonth::new(2020, 1).unwrap();
        assert_eq!(m.prev(), YearMonth::new(2019, 12).unwrap());
        assert_eq!(m.plus_months(18), YearMonth::new(2021, 7).unwrap());
        assert_eq!(m.minus_months(13), YearMonth::new(2018, 12).unwrap());
        assert_eq!(m.plus_months(18).months_since(m), 18);
    }

    #[test]
    fn following_yields_consecutive_months() {
        let m = YearMonth::new(2023, 11).unwrap();
        let months: Vec<_> = m.following(3).map(|x| x.to_string()).collect();
        assert_eq!(months, vec!["2023-12", "2024-01", "2024-02"]);
    }

    #[test]
    fn parses_and_displays() {
        let m: YearMonth = "2021-03".parse().unwrap();
        assert_eq!(m.to_string(), "2021-03");
        assert!("2021-13".parse::<YearMonth>().is_err());
        assert!("garbage".parse::<YearMonth>().is_err());
    }

    #[test]
    fn anchor_counts_months_from_min_date() {
        let anchor = CorpusAnchor::new(NaiveDate::from_ymd_opt(1995, 1, 17).unwrap());
        assert_eq!(anchor.months_since_start(YearMonth::new(1995, 1).unwrap()), 0);
        assert_eq!(anchor.months_since_start(YearMonth::new(1996, 3).unwrap()), 14);

        let widened = anchor.extend(NaiveDate::from_ymd_opt(1994, 12, 1).unwrap());
        assert_eq!(widened.months_since_start(YearMonth::new(1995, 1).unwrap()), 1);
    }
}
