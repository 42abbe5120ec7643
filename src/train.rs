//! Feature selection, model fitting and the persisted model artifact.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use tracing::{debug, info, warn};

use crate::{
    certificates::UNKNOWN,
    error::{ArtifactError, ModelError, SchemaError, TrainError},
    features::{ColumnKind, EngineeredPanel, FeatureConfig, FeatureLayout, FeatureRow, FeatureValue, Role, LOG_TARGET},
    gbm::{FeatureType, GbmParams, GbmRegressor, ModelMetrics},
    month::CorpusAnchor,
};

pub const ARTIFACT_VERSION: u32 = 1;

/// Categorical columns with more levels than this are left out.
pub const MAX_CATEGORY_LEVELS: usize = 256;

pub fn encode_price(price: f64) -> f64 {
    price.ln_1p()
}

/// Inverse of [`encode_price`], floored at zero.
pub fn decode_price(log_price: f64) -> f64 {
    log_price.exp_m1().max(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical { levels: Vec<String> },
}

/// One model input: its name and how values are encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Numeric,
        }
    }

    pub fn categorical(name: impl Into<String>, levels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Categorical { levels },
        }
    }

    pub fn feature_type(&self) -> FeatureType {
        match self.kind {
            FeatureKind::Numeric => FeatureType::Numeric,
            FeatureKind::Categorical { .. } => FeatureType::Categorical,
        }
    }

    fn category_code(levels: &[String], value: &str) -> f64 {
        levels
            .binary_search_by(|l| l.as_str().cmp(value))
            .or_else(|_| levels.binary_search_by(|l| l.as_str().cmp(UNKNOWN)))
            .map_or(f64::NAN, |i| i as f64)
    }

    /// Encode a value for the model. Unseen categories fall back to
    /// `Unknown`, and to missing if that is unseen too.
    pub fn encode(&self, value: &FeatureValue) -> f64 {
        match (&self.kind, value) {
            (FeatureKind::Numeric, FeatureValue::Number(v)) => *v,
            (FeatureKind::Categorical { levels }, FeatureValue::Category(s)) => Self::category_code(levels, s),
            (FeatureKind::Categorical { levels }, FeatureValue::Number(v)) => {
                Self::category_code(levels, &v.to_string())
            }
            _ => f64::NAN,
        }
    }

    /// Encoded value used when nothing produced this feature.
    fn gap_default(&self, neutral_ratio: f64) -> f64 {
        match &self.kind {
            FeatureKind::Categorical { levels } => Self::category_code(levels, UNKNOWN),
            FeatureKind::Numeric if self.name.contains("ratio") => neutral_ratio,
            FeatureKind::Numeric => 0.0,
        }
    }
}

/// A feature vector in model order, plus the names nothing produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Aligned {
    pub values: Vec<f64>,
    pub gaps: Vec<String>,
}

fn align_with<'v, F>(features: &[FeatureSpec], neutral_ratio: f64, mut lookup: F) -> Aligned
where
    F: FnMut(&str) -> Option<&'v FeatureValue>,
{
    let mut gaps = Vec::new();
    let values = features
        .iter()
        .map(|spec| match lookup(&spec.name) {
            Some(value) => spec.encode(value),
            None => {
                gaps.push(spec.name.clone());
                spec.gap_default(neutral_ratio)
            }
        })
        .collect();
    Aligned { values, gaps }
}

fn excluded(role: Role) -> bool {
    matches!(
        role,
        Role::Identifier
            | Role::RawTarget
            | Role::Target
            | Role::LevelPrice
            | Role::CurrentCount
            | Role::TypeSum
            | Role::Anchor
            | Role::CurrentRatio
    )
}

/// Choose the model inputs from an engineered layout, sorted by name.
///
/// Identifiers, targets, same-month observations, anchors, current ratios and
/// type sums never become inputs. Same-month transaction counts
/// (`transaction_count_*`) are left out as well: a projected month has no
/// observed count, so training on them would leak the target month. A text
/// column outside those roles means feature engineering is broken and fails
/// the run.
pub fn select_features(layout: &FeatureLayout, rows: &[FeatureRow]) -> Result<Vec<FeatureSpec>, SchemaError> {
    let mut features = Vec::new();
    for (idx, column) in layout.columns().iter().enumerate() {
        if excluded(column.role) {
            continue;
        }
        match column.kind {
            ColumnKind::Numeric => features.push(FeatureSpec::numeric(&column.name)),
            ColumnKind::Categorical => {
                let mut levels: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|r| r.values.get(idx).and_then(FeatureValue::as_category))
                    .map(str::to_owned)
                    .collect();
                levels.insert(UNKNOWN.to_owned());
                if levels.len() > MAX_CATEGORY_LEVELS {
                    warn!(
                        "Excluding '{}': {} categories exceeds {}",
                        column.name,
                        levels.len(),
                        MAX_CATEGORY_LEVELS
                    );
                    continue;
                }
                features.push(FeatureSpec::categorical(&column.name, levels.into_iter().collect()));
            }
            ColumnKind::Text => return Err(SchemaError::UnsupportedColumn(column.name.clone())),
        }
    }

    features.sort_by(|a, b| a.name.cmp(&b.name));
    if features.is_empty() {
        return Err(SchemaError::NoFeatures);
    }
    if features.len() < 5 {
        warn!("Very few features ({}) remaining", features.len());
    }
    Ok(features)
}

/// A fitted model together with everything needed to feed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub model: GbmRegressor,
    pub features: Vec<FeatureSpec>,
    pub feature_config: FeatureConfig,
    pub anchor: Option<CorpusAnchor>,
}

impl ModelArtifact {
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.version != ARTIFACT_VERSION {
            return Err(ArtifactError::Version(self.version));
        }
        if self.features.is_empty() {
            return Err(ArtifactError::EmptyFeatureList);
        }
        if self.features.len() != self.model.n_features() {
            return Err(ArtifactError::Misaligned {
                features: self.features.len(),
                model: self.model.n_features(),
            });
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let io_err = |source: std::io::Error| ArtifactError::Io {
            path: path.to_owned(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush().map_err(io_err)?;
        info!("Model artifact saved to {}", path.display());
        Ok(())
    }

    /// Load and validate a persisted artifact.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let file = File::open(path).map_err(|source| ArtifactError::Io {
            path: path.to_owned(),
            source,
        })?;
        let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))?;
        artifact.validate()?;
        info!(
            "Loaded model artifact from {} ({} features, {} trees)",
            path.display(),
            artifact.features.len(),
            artifact.model.n_trees()
        );
        Ok(artifact)
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    /// Build the model's input vector from named values.
    pub fn align<'v, F>(&self, lookup: F) -> Aligned
    where
        F: FnMut(&str) -> Option<&'v FeatureValue>,
    {
        align_with(&self.features, self.feature_config.neutral_ratio, lookup)
    }

    /// Predict the encoded (log) price of one aligned vector.
    pub fn predict_encoded(&self, values: &[f64]) -> Result<f64, ModelError> {
        self.model.predict_row(values)
    }
}

fn log_importances(features: &[FeatureSpec], importances: &[f64]) {
    info!("Top 20 feature importances:");
    features
        .iter()
        .zip(importances)
        .sorted_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.name.cmp(&b.0.name)))
        .take(20)
        .for_each(|(f, imp)| info!("  {:<45} {:.5}", f.name, imp));
}

/// Fit a model on the engineered panel.
pub fn train(engineered: &EngineeredPanel, params: &GbmParams) -> Result<ModelArtifact, TrainError> {
    if engineered.is_empty() {
        return Err(SchemaError::EmptyPanel.into());
    }
    let y = engineered.targets();
    if y.iter().any(|v| !v.is_finite()) {
        return Err(SchemaError::BadTarget(LOG_TARGET.to_owned()).into());
    }

    let features = select_features(&engineered.layout, &engineered.rows)?;
    info!("Final number of features for training: {}", features.len());
    debug!("Features: {}", features.iter().map(|f| f.name.as_str()).join(", "));

    let neutral = engineered.config.neutral_ratio;
    let x: Vec<Vec<f64>> = engineered
        .rows
        .iter()
        .map(|row| align_with(&features, neutral, |name| row.get(&engineered.layout, name)).values)
        .collect();
    let types: Vec<FeatureType> = features.iter().map(FeatureSpec::feature_type).collect();

    info!(
        "Training on {} samples and {} features (n_estimators={}, max_depth={})",
        x.len(),
        features.len(),
        params.n_estimators,
        params.max_depth
    );
    let mut model = GbmRegressor::new(params.clone());
    model.fit(&x, &y, &types)?;
    info!("Model training complete");

    let preds = model.predict(&x)?;
    let metrics = ModelMetrics::regression(&y, &preds);
    info!(
        "Training metrics: RMSE={:.5} MAE={:.5} R2={:.4}",
        metrics.rmse.unwrap_or(f64::NAN),
        metrics.mae.unwrap_or(f64::NAN),
        metrics.r2.unwrap_or(f64::NAN)
    );
    log_importances(&features, model.feature_importances());

    Ok(ModelArtifact {
        version: ARTIFACT_VERSION,
        model,
        features,
        feature_config: engineered.config.clone(),
        anchor: Some(engineered.anchor),
    })
}
