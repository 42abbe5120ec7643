//! Configuration handling.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{features::FeatureConfig, gbm::GbmParams};

/// Main configuration structure. Every section may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub features: FeatureConfig,
    pub projection: ProjectionConfig,
    pub estimator: EstimatorConfig,
}

impl Config {
    /// Load configuration from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Input file locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the price-paid CSV files
    pub price_dir: PathBuf,
    /// Only files whose name starts with this are read
    pub price_file_prefix: String,
    /// Energy certificate CSV; optional
    pub certificates: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            price_dir: PathBuf::from("data"),
            price_file_prefix: "pp-".to_string(),
            certificates: PathBuf::from("data/certificates.csv"),
        }
    }
}

/// Training and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub artifact_path: PathBuf,
    /// Retrain even when an artifact exists
    pub force_retrain: bool,
    /// Train on a seeded sample of the engineered rows
    pub quick_test_data: bool,
    /// Use the small, fast boosting profile
    pub quick_test_params: bool,
    /// Fraction of rows kept by `quick_test_data`
    pub quick_test_fraction: f64,
    /// Lower bound on rows kept by `quick_test_data`
    pub quick_test_min_rows: usize,
    pub params: GbmParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("models/price_model.json"),
            force_retrain: false,
            quick_test_data: false,
            quick_test_params: false,
            quick_test_fraction: 0.05,
            quick_test_min_rows: 5000,
            params: GbmParams::default(),
        }
    }
}

impl ModelConfig {
    pub fn is_quick(&self) -> bool {
        self.quick_test_data || self.quick_test_params
    }

    pub fn effective_params(&self) -> GbmParams {
        if self.quick_test_params {
            GbmParams {
                seed: self.params.seed,
                ..GbmParams::quick()
            }
        } else {
            self.params.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Sales recorded per simulated month at postcode level
    pub synthetic_count: u32,
    pub default_years: u32,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            synthetic_count: 1,
            default_years: 5,
        }
    }
}

/// Lightweight estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub model_path: PathBuf,
    pub postcode_boroughs: PathBuf,
    pub borough_stats: PathBuf,
    pub borough_growth: PathBuf,
    /// Weight of the compounded year-0 trend in later years
    pub trend_weight: f64,
    pub min_years: u32,
    pub max_years: u32,
    /// Used when the lookup tables have no default entry
    pub default_mean_price: f64,
    pub default_std_price: f64,
    pub default_growth: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/estimator_model.json"),
            postcode_boroughs: PathBuf::from("helper_data/postcode_borough.json"),
            borough_stats: PathBuf::from("helper_data/borough_stats.json"),
            borough_growth: PathBuf::from("helper_data/borough_growth.json"),
            trend_weight: 0.3,
            min_years: 1,
            max_years: 5,
            default_mean_price: 800_000.0,
            default_std_price: 0.0,
            default_growth: 0.02,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [data]
            price_dir = "/srv/prices"

            [model]
            quick_test_params = true

            [model.params]
            n_estimators = 10

            [features]
            log_price_lag_default = -1.0

            [estimator]
            trend_weight = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.data.price_dir, PathBuf::from("/srv/prices"));
        assert_eq!(config.data.price_file_prefix, "pp-");
        assert_eq!(config.model.params.n_estimators, 10);
        assert_eq!(config.model.params.max_depth, 7);
        assert_eq!(config.model.effective_params().n_estimators, 50);
        assert_eq!(config.features.log_price_lag_default, -1.0);
        assert_eq!(config.features.lags, vec![1, 3, 6, 12, 18]);
        assert_eq!(config.estimator.trend_weight, 0.5);
        assert_eq!(config.projection.synthetic_count, 1);
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricepath.toml");
        let config = Config::default();
        config.to_file(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }
}
