//! Histogram-based gradient boosted regression trees.
//!
//! Squared-error loss. Every feature is quantised into at most `max_bins`
//! bins before training; missing values (NaN) get their own bin and each
//! split learns which side they go to. Categorical features are integer codes
//! split one-vs-rest.

use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ModelError;

const MISSING: u16 = u16::MAX;

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmParams {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Maximum depth of each tree
    pub max_depth: usize,
    /// Shrinkage applied to every leaf
    pub learning_rate: f64,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of features sampled per tree
    pub colsample_bytree: f64,
    /// Minimum number of rows on each side of a split
    pub min_child_weight: f64,
    /// L2 regularisation on leaf values
    pub lambda: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_estimators: 1500,
            max_depth: 7,
            learning_rate: 0.02,
            subsample: 0.7,
            colsample_bytree: 0.6,
            min_child_weight: 1.0,
            lambda: 1.0,
            max_bins: 256,
            seed: 42,
        }
    }
}

impl GbmParams {
    /// Small, fast profile for smoke runs.
    pub fn quick() -> Self {
        Self {
            n_estimators: 50,
            max_depth: 5,
            learning_rate: 0.1,
            subsample: 0.8,
            colsample_bytree: 0.8,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    Numeric,
    /// Values are non-negative integer codes.
    Categorical,
}

/// Training and evaluation metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub mse: Option<f64>,
    pub rmse: Option<f64>,
    pub mae: Option<f64>,
    pub r2: Option<f64>,
}

impl ModelMetrics {
    pub fn regression(y_true: &[f64], y_pred: &[f64]) -> Self {
        let n = y_true.len();
        if n == 0 || n != y_pred.len() {
            return Self {
                mse: None,
                rmse: None,
                mae: None,
                r2: None,
            };
        }

        let mse = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum::<f64>() / n as f64;
        let mae = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum::<f64>() / n as f64;

        let mean_true = y_true.iter().sum::<f64>() / n as f64;
        let ss_tot: f64 = y_true.iter().map(|t| (t - mean_true).powi(2)).sum();
        let r2 = if ss_tot != 0.0 { 1.0 - mse * n as f64 / ss_tot } else { 0.0 };

        Self {
            mse: Some(mse),
            rmse: Some(mse.sqrt()),
            mae: Some(mae),
            r2: Some(r2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitRule {
    LessOrEqual(f64),
    /// Codes outside `0..n_codes` were binned as missing during training.
    Equals { code: u32, n_codes: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        rule: SplitRule,
        default_left: bool,
        left: usize,
        right: usize,
    },
}

/// A regression tree stored as a node arena; the root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    rule,
                    default_left,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(f64::NAN);
                    let go_left = match rule {
                        _ if !v.is_finite() => *default_left,
                        SplitRule::LessOrEqual(t) => v <= *t,
                        SplitRule::Equals { code, n_codes } => {
                            if v < 0.0 || v.fract() != 0.0 || v >= *n_codes as f64 {
                                *default_left
                            } else {
                                v == *code as f64
                            }
                        }
                    };
                    idx = if go_left { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }
}

enum Binner {
    Numeric { cuts: Vec<f64> },
    Categorical { n_codes: usize },
}

impl Binner {
    fn fit(column: &[f64], ty: FeatureType, max_bins: usize) -> Self {
        match ty {
            FeatureType::Numeric => {
                let mut sorted: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
                sorted.sort_by(f64::total_cmp);
                let mut distinct = sorted.clone();
                distinct.dedup();

                let cuts = if distinct.len() <= max_bins {
                    distinct.iter().take(distinct.len().saturating_sub(1)).copied().collect()
                } else {
                    let n = sorted.len();
                    let mut cuts: Vec<f64> = (1..max_bins).map(|i| sorted[(i * n / max_bins).min(n - 1)]).collect();
                    cuts.dedup();
                    cuts
                };
                Binner::Numeric { cuts }
            }
            FeatureType::Categorical => {
                let max_code = column
                    .iter()
                    .filter(|v| v.is_finite() && **v >= 0.0)
                    .fold(-1.0f64, |acc, v| acc.max(*v));
                let n_codes = ((max_code + 1.0) as usize).min(max_bins);
                Binner::Categorical { n_codes }
            }
        }
    }

    fn n_bins(&self) -> usize {
        match self {
            Binner::Numeric { cuts } => cuts.len() + 1,
            Binner::Categorical { n_codes } => *n_codes,
        }
    }

    fn bin(&self, v: f64) -> u16 {
        if !v.is_finite() {
            return MISSING;
        }
        match self {
            Binner::Numeric { cuts } => cuts.partition_point(|c| *c < v) as u16,
            Binner::Categorical { n_codes } => {
                if v >= 0.0 && (v as usize) < *n_codes && v.fract() == 0.0 {
                    v as u16
                } else {
                    MISSING
                }
            }
        }
    }
}

/// Column-major binned copy of the training matrix.
struct BinnedMatrix {
    binners: Vec<Binner>,
    columns: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    fn build(x: &[Vec<f64>], types: &[FeatureType], max_bins: usize) -> Self {
        let (binners, columns) = (0..types.len())
            .into_par_iter()
            .map(|f| {
                let column: Vec<f64> = x.iter().map(|row| row[f]).collect();
                let binner = Binner::fit(&column, types[f], max_bins);
                let bins: Vec<u16> = column.iter().map(|v| binner.bin(*v)).collect();
                (binner, bins)
            })
            .unzip();
        Self { binners, columns }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    grad: f64,
    count: f64,
}

impl Stats {
    fn add(&mut self, g: f64) {
        self.grad += g;
        self.count += 1.0;
    }

    fn minus(self, other: Stats) -> Stats {
        Stats {
            grad: self.grad - other.grad,
            count: self.count - other.count,
        }
    }

    fn plus(self, other: Stats) -> Stats {
        Stats {
            grad: self.grad + other.grad,
            count: self.count + other.count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinRule {
    UpTo(u16),
    Is(u16),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    gain: f64,
    feature: usize,
    rule: BinRule,
    default_left: bool,
}

struct Grower<'a> {
    params: &'a GbmParams,
    binned: &'a BinnedMatrix,
    grads: &'a [f64],
    features: &'a [usize],
}

impl Grower<'_> {
    fn score(&self, s: Stats) -> f64 {
        s.grad * s.grad / (s.count + self.params.lambda)
    }

    fn leaf_value(&self, s: Stats) -> f64 {
        -s.grad / (s.count + self.params.lambda) * self.params.learning_rate
    }

    fn best_split_for(&self, feature: usize, rows: &[usize], total: Stats) -> Option<Candidate> {
        let binner = &self.binned.binners[feature];
        let column = &self.binned.columns[feature];
        let n_bins = binner.n_bins();
        if n_bins < 2 {
            return None;
        }

        let mut hist = vec![Stats::default(); n_bins];
        let mut missing = Stats::default();
        for &r in rows {
            let b = column[r];
            if b == MISSING {
                missing.add(self.grads[r]);
            } else {
                hist[b as usize].add(self.grads[r]);
            }
        }

        let parent = self.score(total);
        let mcw = self.params.min_child_weight;
        let mut best: Option<Candidate> = None;
        let mut consider = |left_present: Stats, rule: BinRule| {
            for default_left in [true, false] {
                let left = if default_left { left_present.plus(missing) } else { left_present };
                let right = total.minus(left);
                if left.count < mcw || right.count < mcw || left.count == 0.0 || right.count == 0.0 {
                    continue;
                }
                let gain = 0.5 * (self.score(left) + self.score(right) - parent);
                if gain > best.map_or(0.0, |c| c.gain) {
                    best = Some(Candidate {
                        gain,
                        feature,
                        rule,
                        default_left,
                    });
                }
            }
        };

        match binner {
            Binner::Numeric { .. } => {
                let mut left = Stats::default();
                for (b, stats) in hist.iter().enumerate().take(n_bins - 1) {
                    left = left.plus(*stats);
                    consider(left, BinRule::UpTo(b as u16));
                }
            }
            Binner::Categorical { .. } => {
                for (code, stats) in hist.iter().enumerate() {
                    if stats.count > 0.0 {
                        consider(*stats, BinRule::Is(code as u16));
                    }
                }
            }
        }
        best
    }

    fn grow(&self, rows: Vec<usize>, depth: usize, nodes: &mut Vec<Node>, gains: &mut [f64]) -> usize {
        let id = nodes.len();
        nodes.push(Node::Leaf { value: 0.0 });

        let total = rows.iter().fold(Stats::default(), |mut s, &r| {
            s.add(self.grads[r]);
            s
        });
        let leaf = Node::Leaf {
            value: self.leaf_value(total),
        };
        if depth >= self.params.max_depth || rows.len() < 2 {
            nodes[id] = leaf;
            return id;
        }

        let candidates: Vec<Option<Candidate>> = self
            .features
            .par_iter()
            .map(|&f| self.best_split_for(f, &rows, total))
            .collect();
        // First feature wins ties so the result does not depend on threads.
        let best = candidates
            .into_iter()
            .flatten()
            .fold(None::<Candidate>, |best, c| match best {
                Some(b) if b.gain >= c.gain => Some(b),
                _ => Some(c),
            });
        let Some(split) = best else {
            nodes[id] = leaf;
            return id;
        };

        let column = &self.binned.columns[split.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&r| {
            let b = column[r];
            if b == MISSING {
                split.default_left
            } else {
                match split.rule {
                    BinRule::UpTo(t) => b <= t,
                    BinRule::Is(c) => b == c,
                }
            }
        });
        if left_rows.is_empty() || right_rows.is_empty() {
            nodes[id] = leaf;
            return id;
        }

        gains[split.feature] += split.gain;
        let rule = match (split.rule, &self.binned.binners[split.feature]) {
            (BinRule::UpTo(b), Binner::Numeric { cuts }) => SplitRule::LessOrEqual(cuts[b as usize]),
            (BinRule::UpTo(b), Binner::Categorical { .. }) => SplitRule::LessOrEqual(b as f64),
            (BinRule::Is(c), binner) => SplitRule::Equals {
                code: c as u32,
                n_codes: binner.n_bins() as u32,
            },
        };
        let left = self.grow(left_rows, depth + 1, nodes, gains);
        let right = self.grow(right_rows, depth + 1, nodes, gains);
        nodes[id] = Node::Split {
            feature: split.feature,
            rule,
            default_left: split.default_left,
            left,
            right,
        };
        id
    }
}

/// Gradient boosted regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbmRegressor {
    params: GbmParams,
    feature_types: Vec<FeatureType>,
    base_score: f64,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl GbmRegressor {
    pub fn new(params: GbmParams) -> Self {
        Self {
            params,
            feature_types: Vec::new(),
            base_score: 0.0,
            trees: Vec::new(),
            importances: Vec::new(),
        }
    }

    pub fn params(&self) -> &GbmParams {
        &self.params
    }

    pub fn is_trained(&self) -> bool {
        !self.feature_types.is_empty()
    }

    /// Width of the input rows the model expects.
    pub fn n_features(&self) -> usize {
        self.feature_types.len()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Normalised gain importance per feature.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64], feature_types: &[FeatureType]) -> Result<(), ModelError> {
        let n = x.len();
        let m = feature_types.len();
        if n == 0 || m == 0 {
            return Err(ModelError::EmptyData);
        }
        if y.len() != n {
            return Err(ModelError::ShapeMismatch { expected: n, got: y.len() });
        }
        if let Some(row) = x.iter().find(|row| row.len() != m) {
            return Err(ModelError::ShapeMismatch {
                expected: m,
                got: row.len(),
            });
        }
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteTarget(i));
        }

        let max_bins = self.params.max_bins.clamp(2, MISSING as usize - 1);
        let binned = BinnedMatrix::build(x, feature_types, max_bins);
        debug!("Binned {} features over {} rows", m, n);

        self.feature_types = feature_types.to_vec();
        self.base_score = y.iter().sum::<f64>() / n as f64;
        self.trees = Vec::with_capacity(self.params.n_estimators);
        let mut gains = vec![0.0; m];

        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut preds = vec![self.base_score; n];
        let row_count = ((n as f64 * self.params.subsample).round() as usize).clamp(1, n);
        let col_count = ((m as f64 * self.params.colsample_bytree).round() as usize).clamp(1, m);

        for round in 0..self.params.n_estimators {
            let grads: Vec<f64> = preds.iter().zip(y).map(|(p, t)| p - t).collect();

            let mut rows = sample(&mut rng, n, row_count).into_vec();
            rows.sort_unstable();
            let mut features = sample(&mut rng, m, col_count).into_vec();
            features.sort_unstable();

            let grower = Grower {
                params: &self.params,
                binned: &binned,
                grads: &grads,
                features: &features,
            };
            let mut nodes = Vec::new();
            grower.grow(rows, 0, &mut nodes, &mut gains);
            let tree = Tree { nodes };

            preds
                .par_iter_mut()
                .zip(x.par_iter())
                .for_each(|(p, row)| *p += tree.predict(row));
            self.trees.push(tree);

            if (round + 1) % 100 == 0 {
                let rmse = ModelMetrics::regression(y, &preds).rmse.unwrap_or(f64::NAN);
                info!("[{}] train-rmse: {:.5}", round + 1, rmse);
            }
        }

        let total_gain: f64 = gains.iter().sum();
        self.importances = if total_gain > 0.0 {
            gains.iter().map(|g| g / total_gain).collect()
        } else {
            vec![0.0; m]
        };
        Ok(())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<f64, ModelError> {
        if !self.is_trained() {
            return Err(ModelError::NotTrained);
        }
        if row.len() != self.n_features() {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features(),
                got: row.len(),
            });
        }
        Ok(self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        x.par_iter().map(|row| self.predict_row(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..200).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y = x.iter().map(|r| if r[0] < 100.0 { 1.0 } else { 5.0 }).collect();
        (x, y)
    }

    fn params(n: usize) -> GbmParams {
        GbmParams {
            n_estimators: n,
            learning_rate: 0.3,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..GbmParams::default()
        }
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let mut model = GbmRegressor::new(params(60));
        model
            .fit(&x, &y, &[FeatureType::Numeric, FeatureType::Numeric])
            .unwrap();

        assert_abs_diff_eq!(model.predict_row(&[10.0, 3.0]).unwrap(), 1.0, epsilon = 0.05);
        assert_abs_diff_eq!(model.predict_row(&[150.0, 3.0]).unwrap(), 5.0, epsilon = 0.05);
        let imp = model.feature_importances();
        assert!(imp[0] > imp[1]);
    }

    #[test]
    fn missing_values_follow_learned_direction() {
        let mut x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let mut y: Vec<f64> = vec![0.0; 100];
        for _ in 0..50 {
            x.push(vec![f64::NAN]);
            y.push(10.0);
        }
        let mut model = GbmRegressor::new(params(40));
        model.fit(&x, &y, &[FeatureType::Numeric]).unwrap();
        assert_abs_diff_eq!(model.predict_row(&[f64::NAN]).unwrap(), 10.0, epsilon = 0.1);
        assert_abs_diff_eq!(model.predict_row(&[42.0]).unwrap(), 0.0, epsilon = 0.1);
    }

    #[test]
    fn categorical_codes_split_one_vs_rest() {
        let x: Vec<Vec<f64>> = (0..90).map(|i| vec![(i % 3) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| if r[0] == 2.0 { 7.0 } else { 1.0 }).collect();
        let mut model = GbmRegressor::new(params(40));
        model.fit(&x, &y, &[FeatureType::Categorical]).unwrap();
        assert_abs_diff_eq!(model.predict_row(&[2.0]).unwrap(), 7.0, epsilon = 0.1);
        assert_abs_diff_eq!(model.predict_row(&[0.0]).unwrap(), 1.0, epsilon = 0.1);
    }

    #[test]
    fn unseen_category_codes_take_the_missing_branch() {
        let mut x: Vec<Vec<f64>> = (0..90).map(|i| vec![(i % 3) as f64]).collect();
        let mut y: Vec<f64> = x.iter().map(|r| if r[0] == 2.0 { 7.0 } else { 1.0 }).collect();
        for _ in 0..30 {
            x.push(vec![f64::NAN]);
            y.push(7.0);
        }
        let mut model = GbmRegressor::new(params(40));
        model.fit(&x, &y, &[FeatureType::Categorical]).unwrap();

        let missing = model.predict_row(&[f64::NAN]).unwrap();
        assert_abs_diff_eq!(missing, 7.0, epsilon = 0.1);
        assert_eq!(model.predict_row(&[5.0]).unwrap(), missing);
        assert_eq!(model.predict_row(&[1.5]).unwrap(), missing);
        assert_abs_diff_eq!(model.predict_row(&[0.0]).unwrap(), 1.0, epsilon = 0.1);
    }

    #[test]
    fn seeded_training_is_reproducible() {
        let (x, y) = step_data();
        let p = GbmParams {
            n_estimators: 20,
            ..GbmParams::quick()
        };
        let mut a = GbmRegressor::new(p.clone());
        let mut b = GbmRegressor::new(p);
        let types = [FeatureType::Numeric, FeatureType::Numeric];
        a.fit(&x, &y, &types).unwrap();
        b.fit(&x, &y, &types).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut model = GbmRegressor::new(params(1));
        assert!(matches!(model.predict_row(&[1.0]), Err(ModelError::NotTrained)));
        assert!(matches!(model.fit(&[], &[], &[FeatureType::Numeric]), Err(ModelError::EmptyData)));

        let (x, y) = step_data();
        model.fit(&x, &y, &[FeatureType::Numeric, FeatureType::Numeric]).unwrap();
        assert!(matches!(
            model.predict_row(&[1.0]),
            Err(ModelError::ShapeMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn metrics_on_perfect_fit() {
        let m = ModelMetrics::regression(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert_eq!(m.rmse, Some(0.0));
        assert_eq!(m.r2, Some(1.0));
        assert!(ModelMetrics::regression(&[], &[]).rmse.is_none());
    }
}
