//! Forward projection of one postcode's monthly price.
//!
//! Each simulated month derives features from the history, predicts, and
//! appends the prediction back onto the history as a synthetic observation,
//! so later months see earlier predictions through their lags and windows.
//! How a prediction becomes an observation is a [`SimulationPolicy`].

use serde::Serialize;
use std::ops::ControlFlow;
use tracing::{debug, info, warn};

use crate::{
    aggregate::{LevelAggregate, Panel, TypeCounts},
    certificates::CertificateTable,
    error::{ProjectionError, StepError},
    features::{derive_features, FeatureContext, FeatureLayout, FeatureStatics},
    geography::Postcode,
    ingest::PropertyType,
    month::{CorpusAnchor, YearMonth},
    panel::{HistoryPanel, Level, SyntheticObservation},
    train::{decode_price, ModelArtifact},
};

/// Turns one month's predicted price into the observation appended to the
/// history.
pub trait SimulationPolicy {
    fn observe(
        &self,
        month: YearMonth,
        predicted_price: f64,
        history: &HistoryPanel,
    ) -> Result<SyntheticObservation, StepError>;
}

/// The postcode records the predicted price as `synthetic_count` sales of its
/// dominant property type. Sector and district keep any real observation for
/// the month, otherwise repeat their latest known month unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatCarry {
    pub synthetic_count: u32,
}

impl Default for FlatCarry {
    fn default() -> Self {
        Self { synthetic_count: 1 }
    }
}

impl SimulationPolicy for FlatCarry {
    fn observe(
        &self,
        month: YearMonth,
        predicted_price: f64,
        history: &HistoryPanel,
    ) -> Result<SyntheticObservation, StepError> {
        if !predicted_price.is_finite() {
            return Err(StepError::NonFinite(month));
        }
        let view = history.view();
        let dominant = view
            .series(Level::Postcode)
            .values()
            .rev()
            .find_map(|a| a.type_counts.dominant())
            .unwrap_or(PropertyType::Other);
        let synthetic = LevelAggregate {
            median_price: predicted_price,
            transaction_count: self.synthetic_count,
            type_counts: TypeCounts::single(dominant, self.synthetic_count),
        };
        let carried = |level: Level| {
            view.series(level)
                .range(..=month)
                .next_back()
                .map(|(_, agg)| agg.clone())
                .unwrap_or_else(|| synthetic.clone())
        };

        Ok(SyntheticObservation {
            sector: carried(Level::Sector),
            district: carried(Level::District),
            postcode: synthetic,
        })
    }
}

/// What a projection's history rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HistoryBasis {
    /// The postcode has sales of its own.
    Postcode,
    /// No sales for the postcode; sector, district and global fallbacks only.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedMonth {
    pub month: YearMonth,
    pub predicted_price: f64,
    pub basis: HistoryBasis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub postcode: Postcode,
    pub months: Vec<ProjectedMonth>,
    /// Set when a step failed; `months` then holds the months before it.
    pub aborted: Option<StepError>,
}

impl Projection {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

struct StepContext<'a> {
    layout: FeatureLayout,
    anchor: CorpusAnchor,
    statics: FeatureStatics<'a>,
    basis: HistoryBasis,
}

/// Projects postcodes forward with a trained artifact over the historical
/// panel. The panel is never mutated; each run works on its own copy.
pub struct Projector<'a, P = FlatCarry> {
    artifact: &'a ModelArtifact,
    panel: &'a Panel,
    certs: &'a CertificateTable,
    policy: P,
}

impl<'a> Projector<'a, FlatCarry> {
    pub fn new(artifact: &'a ModelArtifact, panel: &'a Panel, certs: &'a CertificateTable) -> Self {
        Self::with_policy(artifact, panel, certs, FlatCarry::default())
    }
}

impl<'a, P: SimulationPolicy> Projector<'a, P> {
    pub fn with_policy(artifact: &'a ModelArtifact, panel: &'a Panel, certs: &'a CertificateTable, policy: P) -> Self {
        Self {
            artifact,
            panel,
            certs,
            policy,
        }
    }

    /// Project, logging and discarding validation failures.
    pub fn project(&self, postcode: &str, years_ahead: u32) -> Option<Projection> {
        match self.try_project(postcode, years_ahead) {
            Ok(projection) => Some(projection),
            Err(e) => {
                warn!("Projection for '{}' not started: {}", postcode, e);
                None
            }
        }
    }

    /// Project `years_ahead * 12` months past the postcode's latest month.
    pub fn try_project(&self, postcode: &str, years_ahead: u32) -> Result<Projection, ProjectionError> {
        let horizon = match years_ahead.checked_mul(12) {
            Some(months) if months > 0 => months,
            _ => return Err(ProjectionError::InvalidHorizon(years_ahead)),
        };
        let parsed = Postcode::parse(postcode).ok_or_else(|| ProjectionError::InvalidPostcode(postcode.to_owned()))?;
        if self.artifact.validate().is_err() || !self.artifact.model.is_trained() {
            return Err(ProjectionError::MissingModel);
        }
        let anchor = self.artifact.anchor.ok_or(ProjectionError::MissingAnchor)?;
        if self.panel.is_empty() {
            return Err(ProjectionError::EmptyHistory);
        }

        let mut history = self.panel.history_for(&parsed);
        let basis = if history.has_real_history() {
            HistoryBasis::Postcode
        } else {
            warn!(
                "No history for {}, projecting from {} with sector/district fallbacks",
                parsed.display(),
                history.frontier()
            );
            HistoryBasis::None
        };

        let start = history.frontier();
        info!(
            "Projecting {} for {} months after {} (basis {:?})",
            parsed.display(),
            horizon,
            start,
            basis
        );

        let step_ctx = StepContext {
            layout: FeatureLayout::new(&self.artifact.feature_config),
            anchor,
            statics: FeatureStatics {
                postcode: &parsed,
                certificate: self.certs.lookup(parsed.key()),
            },
            basis,
        };

        let outcome = start
            .following(horizon)
            .try_fold(Vec::new(), |mut done, month| {
                match self.step(&mut history, month, &step_ctx, done.is_empty()) {
                    Ok(projected) => {
                        done.push(projected);
                        ControlFlow::Continue(done)
                    }
                    Err(e) => ControlFlow::Break((done, e)),
                }
            });

        let (months, aborted) = match outcome {
            ControlFlow::Continue(done) => (done, None),
            ControlFlow::Break((done, e)) => {
                warn!(
                    "Projection for {} stopped after {} months: {}",
                    parsed.display(),
                    done.len(),
                    e
                );
                (done, Some(e))
            }
        };
        info!("Projected {} months for {}", months.len(), parsed.display());

        Ok(Projection {
            postcode: parsed.clone(),
            months,
            aborted,
        })
    }

    fn step(
        &self,
        history: &mut HistoryPanel,
        month: YearMonth,
        ctx: &StepContext<'_>,
        first: bool,
    ) -> Result<ProjectedMonth, StepError> {
        let row = derive_features(
            history.view(),
            month,
            ctx.statics,
            FeatureContext {
                config: &self.artifact.feature_config,
                anchor: ctx.anchor,
            },
        );
        let aligned = self.artifact.align(|name| row.get(&ctx.layout, name));
        if first && !aligned.gaps.is_empty() {
            warn!("Pipeline gap, features defaulted: {}", aligned.gaps.join(", "));
        }

        let encoded = self
            .artifact
            .predict_encoded(&aligned.values)
            .map_err(|e| StepError::Model {
                month,
                reason: e.to_string(),
            })?;
        if !encoded.is_finite() {
            return Err(StepError::NonFinite(month));
        }
        let predicted_price = decode_price(encoded);
        debug!("{}: predicted {:.0}", month, predicted_price);

        let obs = self.policy.observe(month, predicted_price, history)?;
        history.append(month, obs)?;

        Ok(ProjectedMonth {
            month,
            predicted_price,
            basis: ctx.basis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        features::{engineer_panel, FeatureConfig, FeatureRow},
        gbm::GbmParams,
        ingest::TransactionRecord,
        train::train,
    };
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use std::cell::{Cell, RefCell};

    fn tx(price: f64, y: i32, m: u32, postcode: &str) -> TransactionRecord {
        TransactionRecord {
            price,
            date: NaiveDate::from_ymd_opt(y, m, 10).unwrap(),
            postcode: Postcode::parse(postcode).unwrap(),
            property_type: PropertyType::Terraced,
        }
    }

    fn fixture() -> (Panel, ModelArtifact) {
        let mut records = Vec::new();
        for i in 0..30 {
            let (y, m) = (2018 + i / 12, (i % 12) as u32 + 1);
            records.push(tx(200_000.0 + 1_000.0 * i as f64, y, m, "AB1 2CD"));
            records.push(tx(300_000.0 + 1_500.0 * i as f64, y, m, "AB1 3EF"));
        }
        let anchor = CorpusAnchor::new(records[0].date);
        let panel = Panel::build(&records, anchor).unwrap();
        let certs = CertificateTable::empty();
        let engineered = engineer_panel(&panel, &certs, &FeatureConfig::default());
        let params = GbmParams {
            n_estimators: 20,
            ..GbmParams::quick()
        };
        let artifact = train(&engineered, &params).unwrap();
        (panel, artifact)
    }

    #[test]
    fn projects_full_horizon_of_consecutive_months() {
        let (panel, artifact) = fixture();
        let certs = CertificateTable::empty();
        let projection = Projector::new(&artifact, &panel, &certs).try_project("ab1 2cd", 2).unwrap();

        assert!(projection.is_complete());
        assert_eq!(projection.months.len(), 24);
        let mut expected = YearMonth::new(2020, 6).unwrap();
        for m in &projection.months {
            expected = expected.next();
            assert_eq!(m.month, expected);
            assert!(m.predicted_price >= 0.0);
            assert_eq!(m.basis, HistoryBasis::Postcode);
        }
    }

    #[test]
    fn single_month_history_projects_twelve_rows() {
        let (_, artifact) = fixture();
        let records = vec![tx(200_000.0, 2020, 1, "AB1 2CD")];
        let panel = Panel::build(&records, CorpusAnchor::new(records[0].date)).unwrap();
        let certs = CertificateTable::empty();
        let projection = Projector::new(&artifact, &panel, &certs).project("AB1 2CD", 1).unwrap();

        assert_eq!(projection.months.len(), 12);
        assert!(projection.months.iter().all(|m| m.predicted_price >= 0.0));
    }

    #[test]
    fn unknown_postcode_degrades_to_no_basis() {
        let (panel, artifact) = fixture();
        let certs = CertificateTable::empty();
        let projection = Projector::new(&artifact, &panel, &certs).try_project("ZZ9 9ZZ", 1).unwrap();

        assert_eq!(projection.months.len(), 12);
        assert_eq!(projection.months[0].month, panel.latest_month().next());
        assert!(projection.months.iter().all(|m| m.basis == HistoryBasis::None));
    }

    #[test]
    fn validation_failures_return_nothing() {
        let (panel, mut artifact) = fixture();
        let certs = CertificateTable::empty();
        let projector = Projector::new(&artifact, &panel, &certs);
        assert_eq!(projector.try_project("AB1 2CD", 0).unwrap_err(), ProjectionError::InvalidHorizon(0));
        assert_eq!(
            projector.try_project("!!", 1).unwrap_err(),
            ProjectionError::InvalidPostcode("!!".into())
        );
        assert!(projector.project("", 1).is_none());
        assert_eq!(
            projector.try_project("AB1 2CD", 400_000_000).unwrap_err(),
            ProjectionError::InvalidHorizon(400_000_000)
        );
        assert!(projector.project("AB1 2CD", u32::MAX).is_none());

        artifact.anchor = None;
        let projector = Projector::new(&artifact, &panel, &certs);
        assert_eq!(projector.try_project("AB1 2CD", 1).unwrap_err(), ProjectionError::MissingAnchor);

        artifact.features.clear();
        let projector = Projector::new(&artifact, &panel, &certs);
        assert_eq!(projector.try_project("AB1 2CD", 1).unwrap_err(), ProjectionError::MissingModel);
    }

    struct FailOnCall {
        calls: Cell<u32>,
        fail_at: u32,
    }

    impl SimulationPolicy for FailOnCall {
        fn observe(
            &self,
            month: YearMonth,
            predicted_price: f64,
            history: &HistoryPanel,
        ) -> Result<SyntheticObservation, StepError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n == self.fail_at {
                return Err(StepError::NonFinite(month));
            }
            FlatCarry::default().observe(month, predicted_price, history)
        }
    }

    #[test]
    fn step_failure_keeps_partial_results() {
        let (panel, artifact) = fixture();
        let certs = CertificateTable::empty();
        let policy = FailOnCall {
            calls: Cell::new(0),
            fail_at: 4,
        };
        let projection = Projector::with_policy(&artifact, &panel, &certs, policy)
            .try_project("AB1 2CD", 1)
            .unwrap();

        assert_eq!(projection.months.len(), 3);
        assert!(matches!(projection.aborted, Some(StepError::NonFinite(_))));
        assert_eq!(projection.clone(), projection);
    }

    /// Records the row each step predicted from, then defers to `FlatCarry`.
    struct RecordRows<'a> {
        inner: FlatCarry,
        postcode: Postcode,
        certs: &'a CertificateTable,
        config: &'a FeatureConfig,
        anchor: CorpusAnchor,
        rows: RefCell<Vec<FeatureRow>>,
    }

    impl SimulationPolicy for RecordRows<'_> {
        fn observe(
            &self,
            month: YearMonth,
            predicted_price: f64,
            history: &HistoryPanel,
        ) -> Result<SyntheticObservation, StepError> {
            let statics = FeatureStatics {
                postcode: &self.postcode,
                certificate: self.certs.lookup(self.postcode.key()),
            };
            let ctx = FeatureContext {
                config: self.config,
                anchor: self.anchor,
            };
            self.rows
                .borrow_mut()
                .push(derive_features(history.view(), month, statics, ctx));
            self.inner.observe(month, predicted_price, history)
        }
    }

    #[test]
    fn predictions_feed_later_months() {
        let (panel, artifact) = fixture();
        let certs = CertificateTable::empty();
        let policy = RecordRows {
            inner: FlatCarry { synthetic_count: 3 },
            postcode: Postcode::parse("AB1 2CD").unwrap(),
            certs: &certs,
            config: &artifact.feature_config,
            anchor: artifact.anchor.unwrap(),
            rows: RefCell::new(Vec::new()),
        };
        let projector = Projector::with_policy(&artifact, &panel, &certs, policy);
        let projection = projector.try_project("AB1 2CD", 1).unwrap();
        let rows = projector.policy.rows.borrow();
        let layout = FeatureLayout::new(&artifact.feature_config);
        assert_eq!(rows.len(), 12);

        // First step: lags read the last real month, one sale per month.
        let first = &rows[0];
        assert_relative_eq!(first.number(&layout, "log_price_pc_lag_1m").unwrap(), 229_000f64.ln_1p());
        assert_eq!(first.number(&layout, "count_pc_lag_1m"), Some(1.0));
        assert_eq!(first.number(&layout, "tx_count_pc_roll_3m"), Some(3.0));

        // Second step: month one is now the synthetic observation.
        let predicted = projection.months[0].predicted_price;
        let second = &rows[1];
        assert_relative_eq!(
            second.number(&layout, "log_price_pc_lag_1m").unwrap(),
            predicted.ln_1p(),
            max_relative = 1e-12
        );
        assert_eq!(second.number(&layout, "count_pc_lag_1m"), Some(3.0));
        assert_eq!(second.number(&layout, "tx_count_pc_roll_3m"), Some(5.0));
        let sector_median = panel.sector_series("AB1 2").unwrap().values().next_back().unwrap().median_price;
        assert_eq!(sector_median, 229_000.0);
        assert_relative_eq!(
            second.number(&layout, "ratio_pc_sec_lag_1m").unwrap(),
            predicted / sector_median,
            max_relative = 1e-12
        );

        // Third step: the window holds one real and two synthetic months.
        assert_eq!(rows[2].number(&layout, "tx_count_pc_roll_3m"), Some(7.0));
        assert_relative_eq!(
            rows[2].number(&layout, "log_price_pc_lag_1m").unwrap(),
            projection.months[1].predicted_price.ln_1p(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn flat_carry_prefers_real_then_latest_observation() {
        let (panel, _) = fixture();
        let pc = Postcode::parse("AB1 9ZZ").unwrap();
        let history = panel.history_for(&pc);
        let month = panel.latest_month().next();

        let obs = FlatCarry::default().observe(month, 123_456.0, &history).unwrap();
        assert_eq!(obs.postcode.median_price, 123_456.0);
        assert_eq!(obs.postcode.transaction_count, 1);
        // Sector AB1 9 has no history, so it takes the synthetic value.
        assert!(panel.sector_series("AB1 9").is_none());
        assert_eq!(obs.sector.median_price, 123_456.0);
        // District AB1 repeats its latest real month.
        let latest = panel.district_series("AB1").unwrap().values().next_back().unwrap();
        assert_eq!(&obs.district, latest);
    }
}
