//! Batch regression models refit by the online predictor
//!
//! - [`StandardScaler`]: per-column standardization
//! - [`RandomForestRegressor`]: bagged CART trees, seeded bootstrap
//! - [`RidgeRegressor`]: closed-form ridge regression via nalgebra

use std::fmt;

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::config::{ForestConfig, ModelKind, PredictorConfig};
use super::error::FitError;
use super::features::{FeatureRow, FEATURE_COUNT};

/// Standardizes each column to zero mean, unit variance
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(&mut self, rows: &[FeatureRow]) -> Result<(), FitError> {
        if rows.is_empty() {
            return Err(FitError::EmptyMatrix);
        }
        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }

        let mut scale = vec![0.0; FEATURE_COUNT];
        for row in rows {
            for ((s, v), m) in scale.iter_mut().zip(row.iter()).zip(mean.iter()) {
                *s += (v - m) * (v - m) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = s.sqrt();
            // constant columns pass through centred
            if *s < 1e-12 {
                *s = 1.0;
            }
        }

        self.mean = mean;
        self.scale = scale;
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.mean.is_empty()
    }

    pub fn transform_row(&self, row: &FeatureRow) -> FeatureRow {
        if !self.is_fitted() {
            return *row;
        }
        let mut out = [0.0; FEATURE_COUNT];
        for (i, v) in row.iter().enumerate() {
            out[i] = (v - self.mean[i]) / self.scale[i];
        }
        out
    }

    pub fn transform(&self, rows: &[FeatureRow]) -> Vec<FeatureRow> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

/// Point-forecast regression model
pub trait Regressor: Send + Sync + fmt::Debug {
    fn fit(&mut self, x: &[FeatureRow], y: &[f64]) -> Result<(), FitError>;

    /// `None` until the model has been fit
    fn predict_row(&self, row: &FeatureRow) -> Option<f64>;

    fn name(&self) -> &'static str;
}

/// Builds a fresh, unfitted regressor for every refit
pub type RegressorFactory = fn(&PredictorConfig) -> Box<dyn Regressor>;

/// Fresh, unfitted regressor for the configured model kind
pub fn build_regressor(config: &PredictorConfig) -> Box<dyn Regressor> {
    match config.model {
        ModelKind::RandomForest => Box::new(RandomForestRegressor::new(config.forest.clone())),
        ModelKind::Ridge => Box::new(RidgeRegressor::new(config.ridge_lambda)),
    }
}

fn validate(x: &[FeatureRow], y: &[f64]) -> Result<(), FitError> {
    if x.is_empty() {
        return Err(FitError::EmptyMatrix);
    }
    if x.len() != y.len() {
        return Err(FitError::DimensionMismatch {
            rows: x.len(),
            targets: y.len(),
        });
    }
    if x.iter().flatten().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }
    Ok(())
}

// =============================================================================
// Random forest
// =============================================================================

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree stored as a node arena; node 0 is the root
#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

struct TreeParams {
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
}

impl RegressionTree {
    fn fit(x: &[FeatureRow], y: &[f64], indices: Vec<usize>, params: &TreeParams) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(x, y, indices, 0, params);
        tree
    }

    fn build(
        &mut self,
        x: &[FeatureRow],
        y: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: &TreeParams,
    ) -> usize {
        let id = self.nodes.len();
        let value = indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64;
        self.nodes.push(Node::Leaf(value));

        if depth >= params.max_depth || indices.len() < params.min_samples_split {
            return id;
        }

        let Some((feature, threshold)) = best_split(x, y, &indices, params.min_samples_leaf)
        else {
            return id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[i][feature] <= threshold);

        let left = self.build(x, y, left_idx, depth + 1, params);
        let right = self.build(x, y, right_idx, depth + 1, params);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn predict(&self, row: &FeatureRow) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Variance-reduction split; first best wins on ties
fn best_split(
    x: &[FeatureRow],
    y: &[f64],
    indices: &[usize],
    min_leaf: usize,
) -> Option<(usize, f64)> {
    let n = indices.len();
    let min_leaf = min_leaf.max(1);
    if n < 2 * min_leaf {
        return None;
    }

    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total * total / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = indices.to_vec();

    for feature in 0..FEATURE_COUNT {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..n - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let left_n = k + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let here = x[order[k]][feature];
            let next = x[order[k + 1]][feature];
            if next <= here {
                continue;
            }

            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n as f64)
                + (right_sq - right_sum * right_sum / right_n as f64);

            if best.map_or(true, |(_, _, b)| sse < b - 1e-12) {
                best = Some((feature, (here + next) / 2.0, sse));
            }
        }
    }

    best.filter(|(_, _, sse)| *sse < parent_sse)
        .map(|(feature, threshold, _)| (feature, threshold))
}

/// Bagged regression trees with a seeded bootstrap
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForestRegressor {
    fn fit(&mut self, x: &[FeatureRow], y: &[f64]) -> Result<(), FitError> {
        validate(x, y)?;

        let params = TreeParams {
            max_depth: self.config.max_depth.max(1),
            min_samples_split: self.config.min_samples_split.max(2),
            min_samples_leaf: self.config.min_samples_leaf.max(1),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let n = x.len();

        let trees = (0..self.config.n_trees.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, bootstrap, &params)
            })
            .collect();

        self.trees = trees;
        Ok(())
    }

    fn predict_row(&self, row: &FeatureRow) -> Option<f64> {
        if self.trees.is_empty() {
            return None;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        Some(sum / self.trees.len() as f64)
    }

    fn name(&self) -> &'static str {
        "random_forest"
    }
}

// =============================================================================
// Ridge regression
// =============================================================================

/// Linear model with an unpenalized intercept
#[derive(Debug, Clone)]
pub struct RidgeRegressor {
    lambda: f64,
    /// intercept followed by one weight per feature
    coefficients: Option<DVector<f64>>,
}

impl RidgeRegressor {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda: lambda.max(0.0),
            coefficients: None,
        }
    }

    pub fn coefficients(&self) -> Option<&DVector<f64>> {
        self.coefficients.as_ref()
    }
}

impl Regressor for RidgeRegressor {
    fn fit(&mut self, x: &[FeatureRow], y: &[f64]) -> Result<(), FitError> {
        validate(x, y)?;

        let n = x.len();
        let p = FEATURE_COUNT + 1;
        let design = DMatrix::from_fn(n, p, |r, c| if c == 0 { 1.0 } else { x[r][c - 1] });
        let target = DVector::from_column_slice(y);

        let mut gram = design.transpose() * &design;
        for i in 1..p {
            gram[(i, i)] += self.lambda;
        }
        let rhs = design.transpose() * target;

        let solution = match gram.clone().cholesky() {
            Some(chol) => Some(chol.solve(&rhs)),
            None => gram.lu().solve(&rhs),
        };
        let coefficients = solution.ok_or(FitError::Singular)?;
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(FitError::Singular);
        }

        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict_row(&self, row: &FeatureRow) -> Option<f64> {
        let coef = self.coefficients.as_ref()?;
        let mut value = coef[0];
        for (i, v) in row.iter().enumerate() {
            value += coef[i + 1] * v;
        }
        Some(value)
    }

    fn name(&self) -> &'static str {
        "ridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with(values: &[(usize, f64)]) -> FeatureRow {
        let mut row = [0.0; FEATURE_COUNT];
        for &(i, v) in values {
            row[i] = v;
        }
        row
    }

    fn small_forest(seed: u64) -> RandomForestRegressor {
        RandomForestRegressor::new(ForestConfig {
            n_trees: 20,
            seed,
            ..ForestConfig::default()
        })
    }

    #[test]
    fn test_scaler_standardizes() {
        let rows = vec![row_with(&[(0, 1.0), (1, 5.0)]), row_with(&[(0, 3.0), (1, 5.0)])];
        let mut scaler = StandardScaler::default();
        scaler.fit(&rows).unwrap();

        let scaled = scaler.transform(&rows);
        assert!((scaled[0][0] + 1.0).abs() < 1e-9);
        assert!((scaled[1][0] - 1.0).abs() < 1e-9);
        // constant column is centred, not divided by zero
        assert_eq!(scaled[0][1], 0.0);
    }

    #[test]
    fn test_scaler_rejects_empty() {
        let mut scaler = StandardScaler::default();
        assert_eq!(scaler.fit(&[]), Err(FitError::EmptyMatrix));
        assert!(!scaler.is_fitted());
    }

    #[test]
    fn test_forest_learns_step() {
        let x: Vec<FeatureRow> = (0..40).map(|i| row_with(&[(0, i as f64)])).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 10.0 } else { 100.0 }).collect();

        let mut forest = small_forest(42);
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.tree_count(), 20);

        let low = forest.predict_row(&row_with(&[(0, 2.0)])).unwrap();
        let high = forest.predict_row(&row_with(&[(0, 37.0)])).unwrap();
        assert!(low < 20.0, "low={}", low);
        assert!(high > 90.0, "high={}", high);
    }

    #[test]
    fn test_forest_seed_is_deterministic() {
        let x: Vec<FeatureRow> = (0..30)
            .map(|i| row_with(&[(0, i as f64), (3, (i % 7) as f64)]))
            .collect();
        let y: Vec<f64> = (0..30).map(|i| 20.0 + (i % 5) as f64 * 3.0).collect();
        let probe = row_with(&[(0, 12.5), (3, 4.0)]);

        let mut a = small_forest(7);
        let mut b = small_forest(7);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_row(&probe), b.predict_row(&probe));

        // refitting the same model is idempotent
        let first = a.predict_row(&probe);
        a.fit(&x, &y).unwrap();
        assert_eq!(a.predict_row(&probe), first);
    }

    #[test]
    fn test_forest_unfitted_predicts_nothing() {
        let forest = small_forest(1);
        assert!(forest.predict_row(&[0.0; FEATURE_COUNT]).is_none());
    }

    #[test]
    fn test_ridge_recovers_linear_relation() {
        let x: Vec<FeatureRow> = (0..50)
            .map(|i| row_with(&[(0, i as f64), (1, (i * 3 % 11) as f64)]))
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 5.0 + 2.0 * r[0] - 0.5 * r[1]).collect();

        let mut ridge = RidgeRegressor::new(1e-6);
        ridge.fit(&x, &y).unwrap();

        let probe = row_with(&[(0, 10.0), (1, 4.0)]);
        let predicted = ridge.predict_row(&probe).unwrap();
        assert!((predicted - 23.0).abs() < 1e-3, "predicted={}", predicted);
    }

    #[test]
    fn test_fit_validation() {
        let mut ridge = RidgeRegressor::new(1.0);
        assert_eq!(ridge.fit(&[], &[]), Err(FitError::EmptyMatrix));
        assert_eq!(
            ridge.fit(&[[0.0; FEATURE_COUNT]], &[1.0, 2.0]),
            Err(FitError::DimensionMismatch { rows: 1, targets: 2 })
        );
        assert_eq!(
            ridge.fit(&[[0.0; FEATURE_COUNT]], &[f64::NAN]),
            Err(FitError::NonFinite)
        );
        assert!(ridge.coefficients().is_none());
    }
}
