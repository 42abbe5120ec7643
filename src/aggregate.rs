//! Monthly aggregation of transactions into a postcode panel with sector and
//! district roll-ups.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::{
    error::SchemaError,
    geography::Postcode,
    ingest::{PropertyType, TransactionRecord},
    month::{CorpusAnchor, YearMonth},
    panel::{HistoryPanel, LevelSeries, SeriesView},
};

/// Median of `values`; the mean of the two middle values for even lengths.
/// Non-finite values are ignored. Reorders the slice.
pub fn median(values: &mut [f64]) -> Option<f64> {
    values.sort_by(f64::total_cmp);
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(finite[n / 2]),
        _ => Some((finite[n / 2 - 1] + finite[n / 2]) / 2.0),
    }
}

/// Per-property-type transaction counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts([u32; 5]);

impl TypeCounts {
    pub fn single(property_type: PropertyType, count: u32) -> Self {
        let mut counts = Self::default();
        counts.0[property_type.index()] = count;
        counts
    }

    pub fn add(&mut self, property_type: PropertyType) {
        self.0[property_type.index()] += 1;
    }

    pub fn get(&self, property_type: PropertyType) -> u32 {
        self.0[property_type.index()]
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    /// The most frequent type. Ties go to the earlier type in
    /// [`PropertyType::ALL`].
    pub fn dominant(&self) -> Option<PropertyType> {
        PropertyType::ALL
            .into_iter()
            .filter(|t| self.get(*t) > 0)
            .fold(None, |best: Option<PropertyType>, t| match best {
                Some(b) if self.get(b) >= self.get(t) => Some(b),
                _ => Some(t),
            })
    }
}

/// Price and activity of one geography in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAggregate {
    pub median_price: f64,
    pub transaction_count: u32,
    pub type_counts: TypeCounts,
}

#[derive(Default)]
struct Bucket {
    prices: Vec<f64>,
    types: TypeCounts,
}

impl Bucket {
    fn push(&mut self, record: &TransactionRecord) {
        self.prices.push(record.price);
        self.types.add(record.property_type);
    }

    fn finish(mut self) -> Option<LevelAggregate> {
        let median_price = median(&mut self.prices)?;
        Some(LevelAggregate {
            median_price,
            transaction_count: self.prices.len() as u32,
            type_counts: self.types,
        })
    }
}

/// One (postcode, month) row of the panel. Sector and district aggregates
/// are joined by key and month, and absent when that level had no sale.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyAggregate {
    pub postcode: Postcode,
    pub month: YearMonth,
    pub postcode_level: LevelAggregate,
    pub sector_level: Option<LevelAggregate>,
    pub district_level: Option<LevelAggregate>,
}

fn finish_level(buckets: BTreeMap<(String, YearMonth), Bucket>) -> HashMap<String, LevelSeries> {
    let mut series: HashMap<String, LevelSeries> = HashMap::new();
    for ((key, month), bucket) in buckets {
        if let Some(agg) = bucket.finish() {
            series.entry(key).or_default().insert(month, agg);
        }
    }
    series
}

/// The historical panel: postcode-month rows plus the monthly series of
/// every postcode, sector and district.
#[derive(Debug, Clone)]
pub struct Panel {
    rows: Vec<MonthlyAggregate>,
    postcodes: HashMap<String, LevelSeries>,
    sectors: HashMap<String, LevelSeries>,
    districts: HashMap<String, LevelSeries>,
    anchor: CorpusAnchor,
    latest_month: YearMonth,
}

impl Panel {
    /// Group transactions by postcode, sector and district per month.
    pub fn build(records: &[TransactionRecord], anchor: CorpusAnchor) -> Result<Panel, SchemaError> {
        let mut by_postcode: BTreeMap<(String, YearMonth), Bucket> = BTreeMap::new();
        let mut by_sector: BTreeMap<(String, YearMonth), Bucket> = BTreeMap::new();
        let mut by_district: BTreeMap<(String, YearMonth), Bucket> = BTreeMap::new();
        // First postcode spelling seen for each key.
        let mut first_seen: HashMap<String, Postcode> = HashMap::new();

        for record in records {
            let month = YearMonth::from_date(record.date);
            let pc = &record.postcode;
            first_seen.entry(pc.key().to_owned()).or_insert_with(|| pc.clone());
            by_postcode.entry((pc.key().to_owned(), month)).or_default().push(record);
            by_sector.entry((pc.sector().to_owned(), month)).or_default().push(record);
            by_district.entry((pc.district().to_owned(), month)).or_default().push(record);
        }

        let postcodes = finish_level(by_postcode);
        let sectors = finish_level(by_sector);
        let districts = finish_level(by_district);

        let mut rows = Vec::new();
        for (key, series) in &postcodes {
            let Some(postcode) = first_seen.get(key) else {
                continue;
            };
            for (month, agg) in series {
                rows.push(MonthlyAggregate {
                    postcode: postcode.clone(),
                    month: *month,
                    postcode_level: agg.clone(),
                    sector_level: sectors.get(postcode.sector()).and_then(|s| s.get(month)).cloned(),
                    district_level: districts.get(postcode.district()).and_then(|s| s.get(month)).cloned(),
                });
            }
        }
        rows.sort_by(|a, b| {
            (a.postcode.district(), a.postcode.sector(), a.postcode.key(), a.month).cmp(&(
                b.postcode.district(),
                b.postcode.sector(),
                b.postcode.key(),
                b.month,
            ))
        });

        let latest_month = rows.iter().map(|r| r.month).max().ok_or(SchemaError::EmptyPanel)?;

        info!(
            "Aggregated panel: {} postcode-months, {} postcodes, {} sectors, {} districts",
            rows.len(),
            postcodes.len(),
            sectors.len(),
            districts.len()
        );

        Ok(Panel {
            rows,
            postcodes,
            sectors,
            districts,
            anchor,
            latest_month,
        })
    }

    pub fn rows(&self) -> &[MonthlyAggregate] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn anchor(&self) -> CorpusAnchor {
        self.anchor
    }

    pub fn latest_month(&self) -> YearMonth {
        self.latest_month
    }

    pub fn postcode_series(&self, key: &str) -> Option<&LevelSeries> {
        self.postcodes.get(key)
    }

    pub fn sector_series(&self, sector: &str) -> Option<&LevelSeries> {
        self.sectors.get(sector)
    }

    pub fn district_series(&self, district: &str) -> Option<&LevelSeries> {
        self.districts.get(district)
    }

    /// Read-only view of the three series a postcode belongs to.
    pub fn view(&self, postcode: &Postcode) -> SeriesView<'_> {
        SeriesView::new(
            self.postcode_series(postcode.key()),
            self.sector_series(postcode.sector()),
            self.district_series(postcode.district()),
        )
    }

    /// An owned copy of the history relevant to `postcode`, for one
    /// projection run.
    pub fn history_for(&self, postcode: &Postcode) -> HistoryPanel {
        HistoryPanel::new(
            postcode.clone(),
            self.postcode_series(postcode.key()).cloned().unwrap_or_default(),
            self.sector_series(postcode.sector()).cloned().unwrap_or_default(),
            self.district_series(postcode.district()).cloned().unwrap_or_default(),
            self.latest_month,
        )
    }
}
