//! Training orchestration: ingest, aggregate, engineer, then load or train.

use anyhow::{Context, Result};
use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::{
    aggregate::Panel,
    certificates::CertificateTable,
    config::Config,
    features::{engineer_panel, EngineeredPanel},
    ingest::{load_certificates, load_price_paid},
    train::{train, ModelArtifact},
};

/// Everything training and projection read from the input files.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub panel: Panel,
    pub certs: CertificateTable,
    pub engineered: EngineeredPanel,
}

pub fn prepare(config: &Config) -> Result<Prepared> {
    let data = &config.data;
    let cleaned = load_price_paid(&data.price_dir, &data.price_file_prefix)
        .with_context(|| format!("loading price-paid files from {}", data.price_dir.display()))?;
    let rejected = cleaned.rejected;
    info!(
        "{} transactions kept, {} rejected (malformed {}, bad price {}, low price {}, bad date {}, bad postcode {})",
        cleaned.records.len(),
        rejected.total(),
        rejected.malformed,
        rejected.bad_price,
        rejected.low_price,
        rejected.bad_date,
        rejected.bad_postcode
    );
    let anchor = cleaned.anchor.context("no transaction dates to anchor the corpus")?;

    let panel = Panel::build(&cleaned.records, anchor).context("building the monthly panel")?;
    info!("Panel has {} postcode-months up to {}", panel.len(), panel.latest_month());

    let certs = load_certificates(&data.certificates)
        .map(|records| CertificateTable::from_records(&records))
        .unwrap_or_default();
    info!("Certificate aggregates for {} postcodes", certs.len());

    let engineered = engineer_panel(&panel, &certs, &config.features);
    Ok(Prepared {
        panel,
        certs,
        engineered,
    })
}

/// Seeded subset of the engineered rows: `fraction` of them, but at least
/// `min_rows` (or all when there are fewer). Row order is preserved.
pub fn sample_for_quick_test(engineered: &EngineeredPanel, fraction: f64, min_rows: usize, seed: u64) -> EngineeredPanel {
    let total = engineered.len();
    let wanted = ((total as f64 * fraction).round() as usize).max(min_rows).min(total);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = sample(&mut rng, total, wanted).into_vec();
    picked.sort_unstable();
    info!("Quick test: sampled {} of {} rows", wanted, total);

    EngineeredPanel {
        config: engineered.config.clone(),
        layout: engineered.layout.clone(),
        rows: picked.into_iter().map(|i| engineered.rows[i].clone()).collect(),
        anchor: engineered.anchor,
        dropped_no_target: engineered.dropped_no_target,
        dropped_history_floor: engineered.dropped_history_floor,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Loaded,
    Trained { persisted: bool },
}

/// Reuse the persisted artifact unless retraining is forced or the run is a
/// quick test. Quick runs always train and never overwrite the artifact.
pub fn load_or_train(config: &Config, engineered: &EngineeredPanel) -> Result<(ModelArtifact, ModelSource)> {
    let model = &config.model;
    let path = &model.artifact_path;

    if !model.force_retrain && !model.is_quick() && path.exists() {
        match ModelArtifact::load(path) {
            Ok(artifact) => {
                info!("Loaded model with {} features from {}", artifact.features.len(), path.display());
                return Ok((artifact, ModelSource::Loaded));
            }
            Err(e) => warn!("Could not load {} ({}), retraining", path.display(), e),
        }
    }

    let params = model.effective_params();
    let artifact = if model.quick_test_data {
        let sampled = sample_for_quick_test(engineered, model.quick_test_fraction, model.quick_test_min_rows, params.seed);
        train(&sampled, &params)
    } else {
        train(engineered, &params)
    }
    .context("training the price model")?;

    if model.is_quick() {
        info!("Quick run, model not saved");
        return Ok((artifact, ModelSource::Trained { persisted: false }));
    }
    artifact
        .save(path)
        .with_context(|| format!("saving model to {}", path.display()))?;
    info!("Model saved to {}", path.display());
    Ok((artifact, ModelSource::Trained { persisted: true }))
}
