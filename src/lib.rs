//! House-price feature engineering, boosted-tree training and forward
//! projection over UK postcode / sector / district monthly panels.

pub mod aggregate;
pub mod certificates;
pub mod config;
pub mod error;
pub mod estimator;
pub mod features;
pub mod gbm;
pub mod geography;
pub mod ingest;
pub mod month;
pub mod panel;
pub mod pipeline;
pub mod projection;
pub mod train;
