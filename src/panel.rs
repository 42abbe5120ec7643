//! Per-level monthly series and the per-request history used by projection.

use std::collections::BTreeMap;

use crate::{aggregate::LevelAggregate, error::StepError, geography::Postcode, month::YearMonth};

/// Monthly aggregates of one geography, keyed by month.
pub type LevelSeries = BTreeMap<YearMonth, LevelAggregate>;

static EMPTY_SERIES: LevelSeries = BTreeMap::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Postcode,
    Sector,
    District,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Postcode, Level::Sector, Level::District];

    /// Short name used in feature columns.
    pub fn suffix(self) -> &'static str {
        match self {
            Level::Postcode => "pc",
            Level::Sector => "sec",
            Level::District => "dist",
        }
    }
}

/// Borrowed view of the postcode, sector and district series for one
/// postcode. Feature derivation only ever reads through this.
#[derive(Debug, Clone, Copy)]
pub struct SeriesView<'a> {
    postcode: &'a LevelSeries,
    sector: &'a LevelSeries,
    district: &'a LevelSeries,
}

impl<'a> SeriesView<'a> {
    pub fn new(
        postcode: Option<&'a LevelSeries>,
        sector: Option<&'a LevelSeries>,
        district: Option<&'a LevelSeries>,
    ) -> Self {
        Self {
            postcode: postcode.unwrap_or(&EMPTY_SERIES),
            sector: sector.unwrap_or(&EMPTY_SERIES),
            district: district.unwrap_or(&EMPTY_SERIES),
        }
    }

    pub fn series(&self, level: Level) -> &'a LevelSeries {
        match level {
            Level::Postcode => self.postcode,
            Level::Sector => self.sector,
            Level::District => self.district,
        }
    }

    pub fn at(&self, level: Level, month: YearMonth) -> Option<&'a LevelAggregate> {
        self.series(level).get(&month)
    }

    /// Observations of `level` in the `window` months ending at `before - 1`.
    pub fn trailing(
        &self,
        level: Level,
        before: YearMonth,
        window: u32,
    ) -> impl Iterator<Item = &'a LevelAggregate> {
        self.series(level)
            .range(before.minus_months(window)..before)
            .map(|(_, agg)| agg)
    }
}

/// One simulated month, one aggregate per level.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticObservation {
    pub postcode: LevelAggregate,
    pub sector: LevelAggregate,
    pub district: LevelAggregate,
}

/// An owned, growing copy of the history around one postcode. Real months
/// come first; each projection step appends exactly one synthetic month.
#[derive(Debug, Clone)]
pub struct HistoryPanel {
    postcode: Postcode,
    postcode_series: LevelSeries,
    sector_series: LevelSeries,
    district_series: LevelSeries,
    frontier: YearMonth,
    has_real_history: bool,
}

impl HistoryPanel {
    /// `fallback_frontier` is used when the postcode has no real history of
    /// its own.
    pub fn new(
        postcode: Postcode,
        postcode_series: LevelSeries,
        sector_series: LevelSeries,
        district_series: LevelSeries,
        fallback_frontier: YearMonth,
    ) -> Self {
        let last_real = postcode_series.keys().next_back().copied();
        Self {
            postcode,
            frontier: last_real.unwrap_or(fallback_frontier),
            has_real_history: last_real.is_some(),
            postcode_series,
            sector_series,
            district_series,
        }
    }

    pub fn postcode(&self) -> &Postcode {
        &self.postcode
    }

    /// Latest month in the history, real or synthetic.
    pub fn frontier(&self) -> YearMonth {
        self.frontier
    }

    pub fn has_real_history(&self) -> bool {
        self.has_real_history
    }

    pub fn view(&self) -> SeriesView<'_> {
        SeriesView {
            postcode: &self.postcode_series,
            sector: &self.sector_series,
            district: &self.district_series,
        }
    }

    pub fn len(&self) -> usize {
        self.postcode_series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postcode_series.is_empty()
    }

    /// Append the month after the frontier. Real sector and district
    /// observations already present for that month are kept.
    pub fn append(&mut self, month: YearMonth, obs: SyntheticObservation) -> Result<(), StepError> {
        if self.postcode_series.contains_key(&month) {
            return Err(StepError::DuplicateMonth(month));
        }
        if month != self.frontier.next() {
            return Err(StepError::OutOfOrder {
                frontier: self.frontier,
                month,
            });
        }
        self.postcode_series.insert(month, obs.postcode);
        self.sector_series.entry(month).or_insert(obs.sector);
        self.district_series.entry(month).or_insert(obs.district);
        self.frontier = month;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::TypeCounts;

    fn agg(price: f64) -> LevelAggregate {
        LevelAggregate {
            median_price: price,
            transaction_count: 1,
            type_counts: TypeCounts::default(),
        }
    }

    fn ym(y: i32, m: u32) -> YearMonth {
        YearMonth::new(y, m).unwrap()
    }

    fn obs(price: f64) -> SyntheticObservation {
        SyntheticObservation {
            postcode: agg(price),
            sector: agg(price),
            district: agg(price),
        }
    }

    #[test]
    fn trailing_window_excludes_current_month() {
        let series: LevelSeries = [(ym(2020, 1), agg(1.0)), (ym(2020, 2), agg(2.0)), (ym(2020, 3), agg(3.0))]
            .into_iter()
            .collect();
        let view = SeriesView::new(Some(&series), None, None);
        let prices: Vec<f64> = view
            .trailing(Level::Postcode, ym(2020, 3), 2)
            .map(|a| a.median_price)
            .collect();
        assert_eq!(prices, vec![1.0, 2.0]);
        assert_eq!(view.trailing(Level::Sector, ym(2020, 3), 12).count(), 0);
    }

    #[test]
    fn append_advances_frontier_by_one_month() {
        let pc = Postcode::parse("AB1 2CD").unwrap();
        let real: LevelSeries = [(ym(2020, 1), agg(100.0))].into_iter().collect();
        let mut history = HistoryPanel::new(pc, real, LevelSeries::new(), LevelSeries::new(), ym(2021, 6));
        assert!(history.has_real_history());
        assert_eq!(history.frontier(), ym(2020, 1));

        history.append(ym(2020, 2), obs(110.0)).unwrap();
        assert_eq!(history.frontier(), ym(2020, 2));
        assert_eq!(
            history.append(ym(2020, 4), obs(1.0)),
            Err(StepError::OutOfOrder {
                frontier: ym(2020, 2),
                month: ym(2020, 4)
            })
        );
        assert_eq!(history.append(ym(2020, 2), obs(1.0)), Err(StepError::DuplicateMonth(ym(2020, 2))));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn empty_history_starts_at_fallback_frontier() {
        let pc = Postcode::parse("ZZ9 9ZZ").unwrap();
        let sector: LevelSeries = [(ym(2021, 7), agg(5.0))].into_iter().collect();
        let mut history = HistoryPanel::new(pc, LevelSeries::new(), sector, LevelSeries::new(), ym(2021, 6));
        assert!(!history.has_real_history());
        assert_eq!(history.frontier(), ym(2021, 6));

        history.append(ym(2021, 7), obs(9.0)).unwrap();
        // The real sector observation for 2021-07 wins over the synthetic one.
        assert_eq!(history.view().at(Level::Sector, ym(2021, 7)).unwrap().median_price, 5.0);
        assert_eq!(history.view().at(Level::Postcode, ym(2021, 7)).unwrap().median_price, 9.0);
    }
}
