//! Lightweight single-property estimator.
//!
//! Works from borough-level statistics instead of monthly history: the
//! postcode is mapped to a borough, a handful of per-request features are
//! built for each year ahead, and later years are blended towards a
//! compounded-growth trend from the year-0 estimate. Every outcome, including
//! a missing lookup file or malformed input, is reported as an
//! [`EstimateResponse`].

use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
};
use tracing::{debug, warn};

use crate::{
    config::EstimatorConfig,
    error::EstimateError,
    features::FeatureValue,
    geography::{clean_key, outward_from_clean},
    train::{decode_price, ModelArtifact},
};

/// Reserved key for boroughs with no entry of their own.
pub const DEFAULT_BOROUGH: &str = "_DEFAULT_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoroughStats {
    pub mean: f64,
    #[serde(default)]
    pub std: f64,
}

/// Precomputed postcode → borough map plus per-borough price statistics and
/// growth rates.
#[derive(Debug, Clone, Default)]
pub struct BoroughTables {
    postcode_boroughs: BTreeMap<String, String>,
    stats: HashMap<String, BoroughStats>,
    growth: HashMap<String, f64>,
    fallback_stats: BoroughStats,
    fallback_growth: f64,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EstimateError> {
    let file = File::open(path).map_err(|_| EstimateError::MissingFile(path.to_owned()))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| EstimateError::Data(format!("{}: {}", path.display(), e)))
}

impl BoroughTables {
    pub fn new(
        postcode_boroughs: impl IntoIterator<Item = (String, String)>,
        stats: HashMap<String, BoroughStats>,
        growth: HashMap<String, f64>,
        config: &EstimatorConfig,
    ) -> Self {
        Self {
            postcode_boroughs: postcode_boroughs
                .into_iter()
                .map(|(pc, borough)| (clean_key(&pc), borough))
                .collect(),
            fallback_stats: stats.get(DEFAULT_BOROUGH).copied().unwrap_or(BoroughStats {
                mean: config.default_mean_price,
                std: config.default_std_price,
            }),
            fallback_growth: growth.get(DEFAULT_BOROUGH).copied().unwrap_or(config.default_growth),
            stats,
            growth,
        }
    }

    pub fn from_config(config: &EstimatorConfig) -> Result<Self, EstimateError> {
        let map: HashMap<String, String> = read_json(&config.postcode_boroughs)?;
        let stats: HashMap<String, BoroughStats> = read_json(&config.borough_stats)?;
        let growth: HashMap<String, f64> = read_json(&config.borough_growth)?;
        Ok(Self::new(map, stats, growth, config))
    }

    /// Most common borough among mapped postcodes starting with `prefix`.
    /// Ties go to the alphabetically first borough.
    fn majority_for_prefix(&self, prefix: &str) -> Option<&str> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, borough) in self
            .postcode_boroughs
            .range(prefix.to_owned()..)
            .take_while(|(pc, _)| pc.starts_with(prefix))
        {
            *counts.entry(borough.as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .fold(None, |best: Option<(&str, usize)>, (b, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((b, n)),
            })
            .map(|(b, _)| b)
    }

    /// Exact postcode, then outward code, then a 3- or 2-character prefix.
    pub fn find_borough(&self, postcode: &str) -> Option<&str> {
        let key = clean_key(postcode);
        if key.is_empty() {
            return None;
        }
        if let Some(borough) = self.postcode_boroughs.get(&key) {
            return Some(borough.as_str());
        }
        if let Some(found) = outward_from_clean(&key).and_then(|outward| self.majority_for_prefix(outward)) {
            return Some(found);
        }
        if key.len() >= 2 {
            let prefix = key.get(..key.len().min(3))?;
            return self.majority_for_prefix(prefix);
        }
        None
    }

    pub fn stats_for(&self, borough: &str) -> BoroughStats {
        self.stats.get(borough).copied().unwrap_or(self.fallback_stats)
    }

    pub fn growth_for(&self, borough: &str) -> f64 {
        self.growth.get(borough).copied().unwrap_or(self.fallback_growth)
    }
}

/// Anything that turns named features into a price.
pub trait PriceModel {
    fn predict_price(&self, features: &HashMap<String, FeatureValue>) -> Result<f64, EstimateError>;
}

impl PriceModel for ModelArtifact {
    fn predict_price(&self, features: &HashMap<String, FeatureValue>) -> Result<f64, EstimateError> {
        let aligned = self.align(|name| features.get(name));
        if !aligned.gaps.is_empty() {
            warn!("Model needs features the estimator does not build: {}", aligned.gaps.join(", "));
            return Err(EstimateError::Prediction(format!(
                "model expects {} feature(s) the estimator does not build, e.g. {}",
                aligned.gaps.len(),
                aligned.gaps.iter().take(5).join(", ")
            )));
        }
        debug!("Estimator features aligned: {}", self.features.len());
        self.predict_encoded(&aligned.values)
            .map(decode_price)
            .map_err(|e| EstimateError::Prediction(e.to_string()))
    }
}

/// A parsed request: the known fields plus any extra attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRequest {
    pub postcode: String,
    pub property_age: Option<Value>,
    pub numberrooms: Option<Value>,
    pub tfarea: Option<Value>,
    pub num_years: Option<Value>,
    pub extra: Map<String, Value>,
}

impl PropertyRequest {
    pub fn from_json(input: &str) -> Result<Self, EstimateError> {
        let value: Value = serde_json::from_str(input).map_err(|e| EstimateError::InvalidJson(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(EstimateError::InvalidJson("expected a JSON object".to_owned()));
        };
        let postcode = match fields.remove("postcode") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => return Err(EstimateError::MissingField("postcode")),
            Some(other) => other.to_string(),
        };
        let property_age = fields.remove("property_age");
        let numberrooms = fields.remove("numberrooms");
        let tfarea = fields.remove("tfarea");
        let num_years = fields.remove("num_years");
        Ok(Self {
            postcode,
            property_age,
            numberrooms,
            tfarea,
            num_years,
            extra: fields,
        })
    }
}

/// Number or numeric string; anything else is missing.
fn coerce_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

pub fn construction_age_band(construction_year: f64) -> &'static str {
    if construction_year < 1900.0 {
        "pre1900"
    } else if construction_year <= 1950.0 {
        "1900-1950"
    } else if construction_year <= 2000.0 {
        "1951-2000"
    } else {
        "2001+"
    }
}

fn safe_divide(num: Option<f64>, den: Option<f64>) -> f64 {
    match (num, den) {
        (Some(n), Some(d)) if n != 0.0 && d != 0.0 => n / d,
        _ => f64::NAN,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearPrediction {
    pub year: i32,
    pub predicted_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EstimateResponse {
    Success {
        predictions: Vec<YearPrediction>,
    },
    Failure {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        received_data: Option<String>,
    },
}

impl EstimateResponse {
    pub fn failure(error: &EstimateError, input: Option<&str>) -> Self {
        let received_data = match error {
            EstimateError::InvalidJson(_) => input.map(str::to_owned),
            _ => None,
        };
        EstimateResponse::Failure {
            error: error.to_string(),
            received_data,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EstimateResponse::Success { .. })
    }
}

pub struct Estimator<M> {
    model: M,
    tables: BoroughTables,
    config: EstimatorConfig,
}

impl Estimator<ModelArtifact> {
    /// Load the model and lookup tables named in `config`.
    pub fn from_config(config: &EstimatorConfig) -> Result<Self, EstimateError> {
        if !config.model_path.exists() {
            return Err(EstimateError::MissingFile(config.model_path.clone()));
        }
        let model = ModelArtifact::load(&config.model_path).map_err(|e| EstimateError::Prediction(e.to_string()))?;
        let tables = BoroughTables::from_config(config)?;
        Ok(Self::new(model, tables, config.clone()))
    }
}

impl<M: PriceModel> Estimator<M> {
    pub fn new(model: M, tables: BoroughTables, config: EstimatorConfig) -> Self {
        Self { model, tables, config }
    }

    fn horizon(&self, request: &PropertyRequest) -> Result<u32, EstimateError> {
        let Some(raw) = request.num_years.as_ref() else {
            return Ok(self.config.min_years);
        };
        let years = coerce_number(Some(raw))
            .map(f64::trunc)
            .ok_or_else(|| EstimateError::Data(format!("num_years must be an integer, got {}", raw)))?;
        if years < self.config.min_years as f64 || years > self.config.max_years as f64 {
            Ok(1)
        } else {
            Ok(years as u32)
        }
    }

    fn year_features(
        &self,
        request: &PropertyRequest,
        borough: &str,
        year: i32,
        month: u32,
        offset: i32,
    ) -> HashMap<String, FeatureValue> {
        let property_age = coerce_number(request.property_age.as_ref()).unwrap_or(0.0);
        let rooms = coerce_number(request.numberrooms.as_ref()).unwrap_or(1.0);
        let area = coerce_number(request.tfarea.as_ref());

        let stats = self.tables.stats_for(borough);
        let growth = self.tables.growth_for(borough);
        let adjusted_mean = stats.mean * (1.0 + growth).powi(offset.max(0));
        let room_size = safe_divide(area, Some(rooms));

        let mut features: HashMap<String, FeatureValue> = HashMap::new();
        for (name, value) in &request.extra {
            let feature = match value {
                Value::String(s) => FeatureValue::Category(s.clone()),
                Value::Number(n) => FeatureValue::Number(n.as_f64().unwrap_or(f64::NAN)),
                Value::Bool(b) => FeatureValue::Category(b.to_string()),
                _ => continue,
            };
            features.insert(name.clone(), feature);
        }

        let numbers = [
            ("sale_year", year as f64),
            ("sale_month", month as f64),
            ("sale_quarter", ((month - 1) / 3 + 1) as f64),
            ("property_age", property_age),
            ("numberrooms", rooms),
            ("tfarea", area.unwrap_or(f64::NAN)),
            ("room_size", if room_size.is_finite() { room_size } else { f64::NAN }),
            ("borough_mean_price", adjusted_mean),
            ("price_to_borough_mean", 1.0),
        ];
        for (name, v) in numbers {
            features.insert(name.to_owned(), FeatureValue::Number(v));
        }
        features.insert(
            "construction_age_band".to_owned(),
            FeatureValue::Category(construction_age_band(year as f64 - property_age).to_owned()),
        );
        features.insert("borough".to_owned(), FeatureValue::Category(borough.to_owned()));
        features
    }

    /// Yearly estimates for `request`, starting in the year of `today`.
    pub fn estimate(&self, request: &PropertyRequest, today: NaiveDate) -> Result<Vec<YearPrediction>, EstimateError> {
        let years = self.horizon(request)?;
        let borough = match self.tables.find_borough(&request.postcode) {
            Some(b) => b.to_owned(),
            None => {
                warn!("No borough for '{}', using {}", request.postcode, DEFAULT_BOROUGH);
                DEFAULT_BOROUGH.to_owned()
            }
        };
        let growth = self.tables.growth_for(&borough);
        let weight = self.config.trend_weight;

        let mut predictions = Vec::with_capacity(years as usize);
        let mut base: Option<f64> = None;
        for offset in 0..years as i32 {
            let year = today.year() + offset;
            let features = self.year_features(request, &borough, year, today.month(), offset);
            let raw = self.model.predict_price(&features)?;

            let price = match base {
                None => {
                    base = Some(raw);
                    raw
                }
                Some(year0) => {
                    let trend = year0 * (1.0 + growth).powi(offset);
                    (1.0 - weight) * raw + weight * trend
                }
            };
            if !price.is_finite() {
                return Err(EstimateError::Data(format!(
                    "Prediction resulted in NaN or infinite value for year {}.",
                    year
                )));
            }
            predictions.push(YearPrediction {
                year,
                predicted_price: price,
            });
        }
        Ok(predictions)
    }

    /// Parse, estimate and wrap the outcome. Never fails.
    pub fn estimate_json(&self, input: &str, today: NaiveDate) -> EstimateResponse {
        match PropertyRequest::from_json(input).and_then(|request| self.estimate(&request, today)) {
            Ok(predictions) => EstimateResponse::Success { predictions },
            Err(e) => EstimateResponse::failure(&e, Some(input)),
        }
    }
}

/// Load everything from `config` and answer one request.
pub fn estimate_with_config(config: &EstimatorConfig, input: &str, today: NaiveDate) -> EstimateResponse {
    match Estimator::from_config(config) {
        Ok(estimator) => estimator.estimate_json(input, today),
        Err(e) => EstimateResponse::failure(&e, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::Panel,
        certificates::CertificateTable,
        features::{engineer_panel, FeatureConfig},
        gbm::{FeatureType, GbmParams, GbmRegressor},
        geography::Postcode,
        ingest::{PropertyType, TransactionRecord},
        month::CorpusAnchor,
        train::{encode_price, train, FeatureSpec, ARTIFACT_VERSION},
    };
    use approx::assert_relative_eq;

    /// Predicts the growth-adjusted borough mean plus 1000 per room.
    struct MeanModel;

    impl PriceModel for MeanModel {
        fn predict_price(&self, features: &HashMap<String, FeatureValue>) -> Result<f64, EstimateError> {
            let mean = features
                .get("borough_mean_price")
                .and_then(FeatureValue::as_number)
                .ok_or(EstimateError::MissingField("borough_mean_price"))?;
            let rooms = features.get("numberrooms").and_then(FeatureValue::as_number).unwrap_or(0.0);
            Ok(mean + 1000.0 * rooms)
        }
    }

    struct NanModel;

    impl PriceModel for NanModel {
        fn predict_price(&self, _: &HashMap<String, FeatureValue>) -> Result<f64, EstimateError> {
            Ok(f64::NAN)
        }
    }

    fn tables(config: &EstimatorConfig) -> BoroughTables {
        let map = [
            ("SW1A 0AA", "Westminster"),
            ("SW1A 1AA", "Westminster"),
            ("SW1A 2AA", "Camden"),
            ("SW1P 3BT", "Westminster"),
            ("E1 6AN", "Tower Hamlets"),
        ]
        .map(|(a, b)| (a.to_owned(), b.to_owned()));
        let stats = HashMap::from([
            ("Westminster".to_owned(), BoroughStats { mean: 1_000_000.0, std: 1.0 }),
            ("Tower Hamlets".to_owned(), BoroughStats { mean: 500_000.0, std: 1.0 }),
        ]);
        let growth = HashMap::from([("Westminster".to_owned(), 0.05)]);
        BoroughTables::new(map, stats, growth, config)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn borough_lookup_cascade() {
        let config = EstimatorConfig::default();
        let t = tables(&config);
        assert_eq!(t.find_borough("e1 6an"), Some("Tower Hamlets"));
        assert_eq!(t.find_borough("SW1A 9ZZ"), Some("Westminster"));
        assert_eq!(t.find_borough("SW1X 9ZZ"), Some("Westminster"));
        assert_eq!(t.find_borough("QQ1 1QQ"), None);
        assert_eq!(t.find_borough(""), None);
    }

    #[test]
    fn empty_tables_know_no_boroughs() {
        let empty = BoroughTables::default();
        assert_eq!(empty.find_borough("E1 6AN"), None);
        assert_eq!(empty.stats_for(DEFAULT_BOROUGH), BoroughStats::default());
    }

    #[test]
    fn default_bucket_uses_configured_fallbacks() {
        let config = EstimatorConfig::default();
        let t = tables(&config);
        let stats = t.stats_for(DEFAULT_BOROUGH);
        assert_eq!(stats.mean, 800_000.0);
        assert_eq!(stats.std, 0.0);
        assert_eq!(t.growth_for(DEFAULT_BOROUGH), 0.02);
        assert_eq!(t.growth_for("Tower Hamlets"), 0.02);
    }

    #[test]
    fn unknown_borough_estimates_from_default_bucket() {
        let config = EstimatorConfig::default();
        let estimator = Estimator::new(MeanModel, tables(&config), config);
        let response = estimator.estimate_json(r#"{"postcode": "QQ1 1QQ", "numberrooms": 0}"#, today());
        assert_eq!(
            response,
            EstimateResponse::Success {
                predictions: vec![YearPrediction {
                    year: 2024,
                    predicted_price: 800_000.0
                }]
            }
        );
    }

    #[test]
    fn later_years_blend_towards_trend() {
        let config = EstimatorConfig::default();
        let estimator = Estimator::new(MeanModel, tables(&config), config);
        let request = PropertyRequest::from_json(r#"{"postcode": "SW1A 0AA", "numberrooms": "3", "num_years": 3}"#).unwrap();
        let out = estimator.estimate(&request, today()).unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].year, 2024);
        let year0 = 1_000_000.0 + 3000.0;
        assert_relative_eq!(out[0].predicted_price, year0);
        for (k, p) in out.iter().enumerate().skip(1) {
            let raw = 1_000_000.0 * 1.05f64.powi(k as i32) + 3000.0;
            let trend = year0 * 1.05f64.powi(k as i32);
            assert_relative_eq!(p.predicted_price, 0.7 * raw + 0.3 * trend, max_relative = 1e-12);
        }
    }

    #[test]
    fn out_of_range_years_become_one() {
        let config = EstimatorConfig::default();
        let estimator = Estimator::new(MeanModel, tables(&config), config);
        for input in [r#"{"postcode":"E1 6AN","num_years":9}"#, r#"{"postcode":"E1 6AN","num_years":0}"#] {
            let request = PropertyRequest::from_json(input).unwrap();
            assert_eq!(estimator.estimate(&request, today()).unwrap().len(), 1);
        }
    }

    #[test]
    fn failures_are_structured() {
        let config = EstimatorConfig::default();
        let estimator = Estimator::new(MeanModel, tables(&config), config.clone());

        let bad = estimator.estimate_json("{not json", today());
        match bad {
            EstimateResponse::Failure { error, received_data } => {
                assert!(error.starts_with("Invalid JSON input"));
                assert_eq!(received_data.as_deref(), Some("{not json"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let missing = estimator.estimate_json(r#"{"tfarea": 50}"#, today());
        assert_eq!(
            serde_json::to_value(&missing).unwrap(),
            serde_json::json!({"error": "Missing expected input field: postcode"})
        );

        let nan = Estimator::new(NanModel, tables(&config), config.clone()).estimate_json(r#"{"postcode":"E1 6AN"}"#, today());
        assert!(!nan.is_success());
    }

    #[test]
    fn missing_lookup_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = EstimatorConfig {
            model_path: dir.path().join("absent.json"),
            ..EstimatorConfig::default()
        };
        let response = estimate_with_config(&config, r#"{"postcode":"E1 6AN"}"#, today());
        match response {
            EstimateResponse::Failure { error, .. } => assert!(error.starts_with("Missing file:")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn request_features_follow_inputs() {
        let config = EstimatorConfig::default();
        let estimator = Estimator::new(MeanModel, tables(&config), config);
        let request = PropertyRequest::from_json(
            r#"{"postcode":"E1 6AN","property_age":"130","numberrooms":4,"tfarea":100,"tenure":"F","floor":2}"#,
        )
        .unwrap();
        let f = estimator.year_features(&request, "Tower Hamlets", 2024, 11, 0);

        assert_eq!(f["construction_age_band"], FeatureValue::Category("pre1900".into()));
        assert_eq!(f["room_size"], FeatureValue::Number(25.0));
        assert_eq!(f["sale_quarter"], FeatureValue::Number(4.0));
        assert_eq!(f["tenure"], FeatureValue::Category("F".into()));
        assert_eq!(f["floor"], FeatureValue::Number(2.0));
        assert_eq!(f["borough_mean_price"], FeatureValue::Number(500_000.0));
        assert!(!f.contains_key("postcode"));
    }

    fn fitted_artifact(features: Vec<FeatureSpec>, x: Vec<Vec<f64>>, y: Vec<f64>) -> ModelArtifact {
        let types: Vec<FeatureType> = features.iter().map(FeatureSpec::feature_type).collect();
        let mut model = GbmRegressor::new(GbmParams {
            n_estimators: 100,
            learning_rate: 0.3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..GbmParams::default()
        });
        model.fit(&x, &y, &types).unwrap();
        ModelArtifact {
            version: ARTIFACT_VERSION,
            model,
            features,
            feature_config: FeatureConfig::default(),
            anchor: None,
        }
    }

    #[test]
    fn artifact_on_estimator_features_tracks_borough() {
        let x: Vec<Vec<f64>> = (1..=60).map(|i| vec![100_000.0 * i as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| encode_price(r[0])).collect();
        let artifact = fitted_artifact(vec![FeatureSpec::numeric("borough_mean_price")], x, y);
        let config = EstimatorConfig::default();
        let estimator = Estimator::new(artifact, tables(&config), config);

        let price = |postcode: &str| {
            let request = PropertyRequest::from_json(&format!(r#"{{"postcode":"{}"}}"#, postcode)).unwrap();
            estimator.estimate(&request, today()).unwrap()[0].predicted_price
        };
        assert_relative_eq!(price("SW1A 0AA"), 1_000_000.0, max_relative = 0.05);
        assert_relative_eq!(price("E1 6AN"), 500_000.0, max_relative = 0.05);
    }

    #[test]
    fn panel_artifact_is_rejected_loudly() {
        let records: Vec<TransactionRecord> = (0..30)
            .map(|i| TransactionRecord {
                price: 150_000.0 + 500.0 * i as f64,
                date: NaiveDate::from_ymd_opt(2015 + i / 12, (i % 12) as u32 + 1, 3).unwrap(),
                postcode: Postcode::parse("E1 6AN").unwrap(),
                property_type: PropertyType::Flat,
            })
            .collect();
        let panel = Panel::build(&records, CorpusAnchor::new(records[0].date)).unwrap();
        let engineered = engineer_panel(&panel, &CertificateTable::empty(), &FeatureConfig::default());
        let params = GbmParams {
            n_estimators: 5,
            ..GbmParams::quick()
        };
        let artifact = train(&engineered, &params).unwrap();

        let config = EstimatorConfig::default();
        let estimator = Estimator::new(artifact, tables(&config), config);
        for input in [r#"{"postcode":"E1 6AN"}"#, r#"{"postcode":"SW1A 0AA","numberrooms":9}"#] {
            match estimator.estimate_json(input, today()) {
                EstimateResponse::Failure { error, received_data } => {
                    assert!(error.starts_with("Prediction failed: model expects"), "{}", error);
                    assert!(received_data.is_none());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn age_bands() {
        assert_eq!(construction_age_band(1899.0), "pre1900");
        assert_eq!(construction_age_band(1900.0), "1900-1950");
        assert_eq!(construction_age_band(1950.5), "1951-2000");
        assert_eq!(construction_age_band(2000.0), "1951-2000");
        assert_eq!(construction_age_band(2024.0), "2001+");
    }
}
