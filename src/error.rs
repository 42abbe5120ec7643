//! Error types, grouped by the stage that raises them.

use std::path::PathBuf;
use thiserror::Error;

use crate::month::YearMonth;

/// Failures while reading raw transaction or certificate files.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no price-paid files matching '{prefix}*.csv' in {dir}")]
    NoFiles { dir: PathBuf, prefix: String },

    #[error("no valid transactions could be loaded")]
    NoValidRows,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Broken training/inference contracts. These point at a defect in the
/// feature pipeline rather than at bad input.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("no features remain after selection")]
    NoFeatures,

    #[error("column '{0}' is neither numeric nor categorical")]
    UnsupportedColumn(String),

    #[error("target column '{0}' is missing or contains gaps")]
    BadTarget(String),

    #[error("engineered panel is empty")]
    EmptyPanel,
}

/// Boosted-tree fitting and prediction errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("training data is empty")]
    EmptyData,

    #[error("row has {got} values, model expects {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("model has not been trained")]
    NotTrained,

    #[error("target at row {0} is not finite")]
    NonFiniteTarget(usize),
}

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Model artifact persistence and validation errors.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact feature list is empty")]
    EmptyFeatureList,

    #[error("artifact lists {features} features but the model expects {model} inputs")]
    Misaligned { features: usize, model: usize },

    #[error("unsupported artifact version {0}")]
    Version(u32),

    #[error("artifact i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation failures detected before a projection starts.
#[derive(Error, Debug, PartialEq)]
pub enum ProjectionError {
    #[error("cannot derive district and sector from postcode '{0}'")]
    InvalidPostcode(String),

    #[error("horizon must be at least one year, got {0}")]
    InvalidHorizon(u32),

    #[error("model artifact has no features")]
    MissingModel,

    #[error("model artifact carries no corpus anchor")]
    MissingAnchor,

    #[error("historical panel is empty")]
    EmptyHistory,
}

/// A failure inside one step of the projection fold.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("non-finite prediction for {0}")]
    NonFinite(YearMonth),

    #[error("history already holds {0}")]
    DuplicateMonth(YearMonth),

    #[error("history frontier is {frontier}, cannot append {month}")]
    OutOfOrder { frontier: YearMonth, month: YearMonth },

    #[error("model rejected feature vector for {month}: {reason}")]
    Model { month: YearMonth, reason: String },
}

/// Lightweight estimator failures, always surfaced as a structured response.
#[derive(Error, Debug)]
pub enum EstimateError {
    #[error("Missing file: {0}")]
    MissingFile(PathBuf),

    #[error("Invalid JSON input: {0}")]
    InvalidJson(String),

    #[error("Missing expected input field: {0}")]
    MissingField(&'static str),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),
}
