//! Feature engineering.
//!
//! [`derive_features`] is the only place features are computed. Batch
//! engineering calls it once per panel row; the projection loop calls it once
//! per simulated month against its own growing history. Both therefore see the
//! same columns, the same defaults and the same lookback rules.
//!
//! Lookbacks are calendar-month lookups in the per-level series: a lag of `n`
//! reads month `t - n`, and a rolling window of `w` covers `t - w ..= t - 1`.
//! Nothing at month `t` or later feeds a lag, anchor or rolling feature.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::{
    aggregate::{LevelAggregate, Panel},
    certificates::{CertificateAggregate, CertificateTable},
    geography::Postcode,
    ingest::PropertyType,
    month::{CorpusAnchor, YearMonth},
    panel::{Level, SeriesView},
};

pub const RAW_TARGET: &str = "median_price_postcode";
pub const LOG_TARGET: &str = "log_median_price_postcode";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub lags: Vec<u32>,
    pub windows: Vec<u32>,
    /// Value of a log-price lag when the postcode has no sale that month.
    pub log_price_lag_default: f64,
    /// Value of a price ratio when either side is missing or the
    /// denominator is zero.
    pub neutral_ratio: f64,
    /// A training row needs a district observation exactly this many months
    /// earlier.
    pub history_floor_months: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 3, 6, 12, 18],
            windows: vec![3, 6, 12],
            log_price_lag_default: 0.0,
            neutral_ratio: 1.0,
            history_floor_months: 18,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Text,
}

/// What a column is for. Feature selection works on roles, not names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Identifier,
    Calendar,
    RawTarget,
    Target,
    LevelPrice,
    CurrentCount,
    TypeSum,
    Anchor,
    CurrentRatio,
    Lag,
    Rolling,
    Mix,
    Certificate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
    Text(String),
}

impl FeatureValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            FeatureValue::Category(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            FeatureValue::Number(_) => ColumnKind::Numeric,
            FeatureValue::Category(_) => ColumnKind::Categorical,
            FeatureValue::Text(_) => ColumnKind::Text,
        }
    }
}

/// The series a lag feature reads, and how it falls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LagSource {
    LogPrice,
    RatioPcSec,
    RatioSecDist,
    Count(Level),
}

impl LagSource {
    const ALL: [LagSource; 6] = [
        LagSource::LogPrice,
        LagSource::RatioPcSec,
        LagSource::RatioSecDist,
        LagSource::Count(Level::Postcode),
        LagSource::Count(Level::Sector),
        LagSource::Count(Level::District),
    ];

    fn name(self, lag: u32) -> String {
        match self {
            LagSource::LogPrice => format!("log_price_pc_lag_{}m", lag),
            LagSource::RatioPcSec => format!("ratio_pc_sec_lag_{}m", lag),
            LagSource::RatioSecDist => format!("ratio_sec_dist_lag_{}m", lag),
            LagSource::Count(level) => format!("count_{}_lag_{}m", level.suffix(), lag),
        }
    }
}

fn type_sum_name(t: PropertyType, level: Level) -> String {
    format!("prop_type_{}_{}_sum", t.slug(), level.suffix())
}

fn rolling_name(level: Level, window: u32) -> String {
    format!("tx_count_{}_roll_{}m", level.suffix(), window)
}

fn mix_name(t: PropertyType, level: Level, window: u32) -> String {
    format!("prop_type_{}_{}_perc_{}m", t.slug(), level.suffix(), window)
}

/// Ordered column list produced by [`derive_features`] under one config.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl FeatureLayout {
    pub fn new(config: &FeatureConfig) -> Self {
        let mut columns = Vec::new();
        let mut push = |name: String, kind: ColumnKind, role: Role| {
            columns.push(Column { name, kind, role });
        };
        use ColumnKind::*;

        for name in ["postcode", "postcode_sector", "postcode_district"] {
            push(name.to_owned(), Text, Role::Identifier);
        }
        for name in ["year", "month", "months_since_start"] {
            push(name.to_owned(), Numeric, Role::Calendar);
        }
        push(RAW_TARGET.to_owned(), Numeric, Role::RawTarget);
        push(LOG_TARGET.to_owned(), Numeric, Role::Target);
        push("median_price_sector".to_owned(), Numeric, Role::LevelPrice);
        push("median_price_district".to_owned(), Numeric, Role::LevelPrice);
        for name in ["transaction_count_postcode", "transaction_count_sector", "transaction_count_district"] {
            push(name.to_owned(), Numeric, Role::CurrentCount);
        }
        for level in Level::ALL {
            for t in PropertyType::ALL {
                push(type_sum_name(t, level), Numeric, Role::TypeSum);
            }
        }
        push("median_price_sector_anchor_lag_1m".to_owned(), Numeric, Role::Anchor);
        push("median_price_district_anchor_lag_1m".to_owned(), Numeric, Role::Anchor);
        push("price_ratio_pc_sec".to_owned(), Numeric, Role::CurrentRatio);
        push("price_ratio_sec_dist".to_owned(), Numeric, Role::CurrentRatio);
        for source in LagSource::ALL {
            for &lag in &config.lags {
                push(source.name(lag), Numeric, Role::Lag);
            }
        }
        for level in Level::ALL {
            for &window in &config.windows {
                push(rolling_name(level, window), Numeric, Role::Rolling);
            }
            for &window in &config.windows {
                for t in PropertyType::ALL {
                    push(mix_name(t, level, window), Numeric, Role::Mix);
                }
            }
        }
        let fallback = CertificateAggregate::fallback(0.0, 0.0);
        for (name, _) in fallback.numeric() {
            push(name.to_owned(), Numeric, Role::Certificate);
        }
        for (name, _) in fallback.categorical() {
            push(name.to_owned(), Categorical, Role::Certificate);
        }

        Self::from_columns(columns)
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        let index = columns.iter().enumerate().map(|(i, c)| (c.name.clone(), i)).collect();
        Self { columns, index }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Per-postcode inputs that do not change month to month.
#[derive(Debug, Clone, Copy)]
pub struct FeatureStatics<'a> {
    pub postcode: &'a Postcode,
    pub certificate: &'a CertificateAggregate,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureContext<'a> {
    pub config: &'a FeatureConfig,
    pub anchor: CorpusAnchor,
}

/// One derived row, aligned with the [`FeatureLayout`] of the same config.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub month: YearMonth,
    pub values: Vec<FeatureValue>,
    /// The postcode had a sale in this month.
    pub has_target: bool,
    /// The district had a sale exactly `history_floor_months` earlier.
    pub history_floor_met: bool,
}

impl FeatureRow {
    pub fn get(&self, layout: &FeatureLayout, name: &str) -> Option<&FeatureValue> {
        layout.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn number(&self, layout: &FeatureLayout, name: &str) -> Option<f64> {
        self.get(layout, name).and_then(FeatureValue::as_number)
    }
}

fn ratio(num: Option<f64>, den: Option<f64>, neutral: f64) -> f64 {
    match (num, den) {
        (Some(n), Some(d)) if d != 0.0 => {
            let r = n / d;
            if r.is_finite() {
                r
            } else {
                neutral
            }
        }
        _ => neutral,
    }
}

struct RowWriter {
    values: Vec<FeatureValue>,
}

impl RowWriter {
    /// Non-finite numbers are swept to zero.
    fn num(&mut self, v: f64) {
        self.values.push(FeatureValue::Number(if v.is_finite() { v } else { 0.0 }));
    }

    fn raw(&mut self, v: f64) {
        self.values.push(FeatureValue::Number(v));
    }

    fn opt(&mut self, v: Option<f64>) {
        self.num(v.unwrap_or(f64::NAN));
    }
}

/// Derive the feature row of `statics.postcode` at month `as_of` from
/// whatever history `view` exposes.
///
/// Current-month columns (targets, current counts, current ratios) read the
/// observation at `as_of` if there is one; everything else looks strictly
/// backwards. The returned values follow `FeatureLayout::new(ctx.config)`.
pub fn derive_features(
    view: SeriesView<'_>,
    as_of: YearMonth,
    statics: FeatureStatics<'_>,
    ctx: FeatureContext<'_>,
) -> FeatureRow {
    let cfg = ctx.config;
    let neutral = cfg.neutral_ratio;
    let mut w = RowWriter {
        values: Vec::with_capacity(96),
    };

    let cur_pc = view.at(Level::Postcode, as_of);
    let cur_sec = view.at(Level::Sector, as_of);
    let cur_dist = view.at(Level::District, as_of);
    let price = |a: Option<&LevelAggregate>| a.map(|a| a.median_price);
    let count = |a: Option<&LevelAggregate>| a.map(|a| a.transaction_count as f64);

    w.values.push(FeatureValue::Text(statics.postcode.key().to_owned()));
    w.values.push(FeatureValue::Text(statics.postcode.sector().to_owned()));
    w.values.push(FeatureValue::Text(statics.postcode.district().to_owned()));

    w.num(as_of.year() as f64);
    w.num(as_of.month() as f64);
    w.num(ctx.anchor.months_since_start(as_of) as f64);

    let raw_target = price(cur_pc).unwrap_or(f64::NAN);
    let log_target = raw_target.ln_1p();
    w.raw(raw_target);
    w.num(log_target);
    w.opt(price(cur_sec));
    w.opt(price(cur_dist));
    w.opt(count(cur_pc));
    w.opt(count(cur_sec));
    w.opt(count(cur_dist));
    for level in Level::ALL {
        let counts = view.at(level, as_of).map(|a| a.type_counts).unwrap_or_default();
        for t in PropertyType::ALL {
            w.num(counts.get(t) as f64);
        }
    }

    let prev = as_of.prev();
    let sec_prev = price(view.at(Level::Sector, prev));
    let dist_prev = price(view.at(Level::District, prev));
    w.opt(sec_prev.or(dist_prev));
    w.opt(dist_prev);

    w.num(ratio(price(cur_pc), price(cur_sec), neutral));
    w.num(ratio(price(cur_sec), price(cur_dist), neutral));

    for source in LagSource::ALL {
        for &lag in &cfg.lags {
            let m = as_of.minus_months(lag);
            let pc = view.at(Level::Postcode, m);
            let sec = view.at(Level::Sector, m);
            let dist = view.at(Level::District, m);
            let value = match source {
                LagSource::LogPrice => price(pc).map_or(cfg.log_price_lag_default, f64::ln_1p),
                LagSource::RatioPcSec => match pc {
                    Some(p) => ratio(Some(p.median_price), price(sec), neutral),
                    None => neutral,
                },
                LagSource::RatioSecDist => match sec {
                    Some(s) => ratio(Some(s.median_price), price(dist), neutral),
                    None => neutral,
                },
                LagSource::Count(Level::Postcode) => count(pc).or(count(sec)).or(count(dist)).unwrap_or(0.0),
                LagSource::Count(Level::Sector) => count(sec).or(count(dist)).unwrap_or(0.0),
                LagSource::Count(Level::District) => count(dist).unwrap_or(0.0),
            };
            w.num(value);
        }
    }

    for level in Level::ALL {
        for &window in &cfg.windows {
            let total: u32 = view.trailing(level, as_of, window).map(|a| a.transaction_count).sum();
            w.num(total as f64);
        }
        for &window in &cfg.windows {
            let mut total = 0u32;
            let mut by_type = [0u32; 5];
            for agg in view.trailing(level, as_of, window) {
                total += agg.transaction_count;
                for t in PropertyType::ALL {
                    by_type[t.index()] += agg.type_counts.get(t);
                }
            }
            for t in PropertyType::ALL {
                let share = if total > 0 {
                    by_type[t.index()] as f64 / total as f64
                } else {
                    0.0
                };
                w.num(share);
            }
        }
    }

    for (_, v) in statics.certificate.numeric() {
        w.num(v);
    }
    for (_, v) in statics.certificate.categorical() {
        w.values.push(FeatureValue::Category(v.to_owned()));
    }

    let floor_month = as_of.minus_months(cfg.history_floor_months);
    FeatureRow {
        month: as_of,
        values: w.values,
        has_target: log_target.is_finite(),
        history_floor_met: view.at(Level::District, floor_month).is_some(),
    }
}

/// Model-ready rows of the historical panel.
#[derive(Debug, Clone)]
pub struct EngineeredPanel {
    pub config: FeatureConfig,
    pub layout: FeatureLayout,
    pub rows: Vec<FeatureRow>,
    pub anchor: CorpusAnchor,
    pub dropped_no_target: usize,
    pub dropped_history_floor: usize,
}

impl EngineeredPanel {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of the log-price target, in row order.
    pub fn targets(&self) -> Vec<f64> {
        let idx = self.layout.index_of(LOG_TARGET);
        self.rows
            .iter()
            .map(|r| {
                idx.and_then(|i| r.values.get(i))
                    .and_then(FeatureValue::as_number)
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }
}

/// Derive features for every panel row and drop the rows that cannot be
/// trained on.
pub fn engineer_panel(panel: &Panel, certs: &CertificateTable, config: &FeatureConfig) -> EngineeredPanel {
    let layout = FeatureLayout::new(config);
    let ctx = FeatureContext {
        config,
        anchor: panel.anchor(),
    };

    let derived: Vec<FeatureRow> = panel
        .rows()
        .par_iter()
        .map(|row| {
            let statics = FeatureStatics {
                postcode: &row.postcode,
                certificate: certs.lookup(row.postcode.key()),
            };
            derive_features(panel.view(&row.postcode), row.month, statics, ctx)
        })
        .collect();

    let total = derived.len();
    let mut dropped_no_target = 0;
    let mut dropped_history_floor = 0;
    let rows: Vec<FeatureRow> = derived
        .into_iter()
        .filter(|r| {
            if !r.has_target {
                dropped_no_target += 1;
                false
            } else if !r.history_floor_met {
                dropped_history_floor += 1;
                false
            } else {
                true
            }
        })
        .collect();

    debug!("Feature layout has {} columns", layout.len());
    info!(
        "Engineered {} of {} rows ({} without target, {} below the {}-month history floor)",
        rows.len(),
        total,
        dropped_no_target,
        dropped_history_floor,
        config.history_floor_months
    );

    EngineeredPanel {
        config: config.clone(),
        layout,
        rows,
        anchor: panel.anchor(),
        dropped_no_target,
        dropped_history_floor,
    }
}
