//! Random forest of CART classification trees.
//!
//! Gini impurity, bootstrap resampling and per-node feature subsampling.
//! Nodes hold class distributions and bootstrap sample counts as cover, so
//! the trees can be attributed with TreeSHAP.

use super::tree::{DecisionTree, TreeNode, sorted_by_feature};
use super::{Classifier, TreeEnsemble};
use crate::data::Matrix;
use crate::error::MlError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    fn resolve(&self, n_features: usize) -> usize {
        let k = match self {
            Self::Sqrt => (n_features as f64).sqrt().floor() as usize,
            Self::Log2 => (n_features as f64).log2().floor() as usize,
            Self::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: ForestParams,
    pub trees: Vec<DecisionTree>,
    n_features: usize,
}

fn gini(counts: [f64; 2]) -> f64 {
    let n = counts[0] + counts[1];
    if n <= 0.0 {
        return 0.0;
    }
    let (p0, p1) = (counts[0] / n, counts[1] / n);
    1.0 - p0 * p0 - p1 * p1
}

struct Builder<'a> {
    params: &'a ForestParams,
    x: &'a Matrix,
    y: &'a [u8],
    max_features: usize,
    rng: StdRng,
    nodes: Vec<TreeNode>,
}

impl Builder<'_> {
    fn counts(&self, indices: &[usize]) -> [f64; 2] {
        let mut c = [0.0; 2];
        for &i in indices {
            c[usize::from(self.y[i])] += 1.0;
        }
        c
    }

    /// Best `(feature, threshold, weighted impurity decrease)`.
    fn best_split(&mut self, indices: &[usize], counts: [f64; 2]) -> Option<(usize, f64, f64)> {
        let n = indices.len() as f64;
        let parent = n * gini(counts);
        let mut features: Vec<usize> = (0..self.x.n_cols()).collect();
        features.shuffle(&mut self.rng);

        let mut best: Option<(usize, f64, f64)> = None;
        for &feature in features.iter().take(self.max_features) {
            let sorted = sorted_by_feature(self.x, indices, feature);
            let mut left = [0.0; 2];
            for (pos, w) in sorted.windows(2).enumerate() {
                let (value, row) = w[0];
                let next = w[1].0;
                left[usize::from(self.y[row])] += 1.0;
                if value == next {
                    continue;
                }
                let n_left = (pos + 1) as f64;
                let n_right = n - n_left;
                if (pos + 1) < self.params.min_samples_leaf
                    || (indices.len() - pos - 1) < self.params.min_samples_leaf
                {
                    continue;
                }
                let right = [counts[0] - left[0], counts[1] - left[1]];
                let decrease = parent - n_left * gini(left) - n_right * gini(right);
                if best.is_none_or(|(_, _, d)| decrease > d) {
                    let mid = value + (next - value) / 2.0;
                    let threshold = if mid > value { mid } else { next };
                    best = Some((feature, threshold, decrease));
                }
            }
        }
        best
    }

    fn build(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let counts = self.counts(&indices);
        let n = indices.len() as f64;
        let idx = self.nodes.len();
        self.nodes
            .push(TreeNode::leaf(vec![counts[0] / n, counts[1] / n], n));

        let pure = counts[0] == 0.0 || counts[1] == 0.0;
        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if pure || depth_reached || indices.len() < self.params.min_samples_split {
            return idx;
        }
        let Some((feature, threshold, decrease)) = self.best_split(&indices, counts) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x.get(i, feature) < threshold);
        let l = self.build(left, depth + 1);
        let r = self.build(right, depth + 1);

        let node = &mut self.nodes[idx];
        node.feature = Some(feature);
        node.threshold = threshold;
        node.left = l;
        node.right = r;
        node.gain = decrease;
        idx
    }
}

impl RandomForest {
    pub fn fit(params: &ForestParams, x: &Matrix, y: &[u8], seed: u64) -> Result<Self, MlError> {
        if params.n_estimators == 0 {
            return Err(MlError::config("n_estimators must be at least 1"));
        }
        let n = x.n_rows();
        let mut rng = StdRng::seed_from_u64(seed);
        let max_features = params.max_features.resolve(x.n_cols());

        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            let indices: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            let mut builder = Builder {
                params,
                x,
                y,
                max_features,
                rng: StdRng::seed_from_u64(rng.gen_range(0..u64::MAX)),
                nodes: Vec::new(),
            };
            builder.build(indices, 0);
            trees.push(DecisionTree {
                nodes: builder.nodes,
            });
        }

        info!(
            trees = trees.len(),
            max_features, "Fitted random forest"
        );
        Ok(Self {
            params: params.clone(),
            trees,
            n_features: x.n_cols(),
        })
    }

    fn positive_proba(&self, row: &[f64]) -> f64 {
        let total: f64 = self
            .trees
            .iter()
            .map(|t| t.predict(row).get(1).copied().unwrap_or(0.0))
            .sum();
        total / self.trees.len() as f64
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: &Matrix) -> Vec<u8> {
        x.rows()
            .map(|r| u8::from(self.positive_proba(r) > 0.5))
            .collect()
    }

    fn supports_probabilities(&self) -> bool {
        true
    }

    fn predict_proba(&self, x: &Matrix) -> Option<Vec<f64>> {
        Some(x.rows().map(|r| self.positive_proba(r)).collect())
    }

    fn tree_ensemble(&self) -> Option<&dyn TreeEnsemble> {
        Some(self)
    }
}

impl TreeEnsemble for RandomForest {
    fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    fn tree_weight(&self) -> f64 {
        1.0 / self.trees.len().max(1) as f64
    }

    fn n_outputs(&self) -> usize {
        2
    }

    fn impurity_importances(&self) -> Vec<f64> {
        let mut importances = vec![0.0; self.n_features];
        for tree in &self.trees {
            let mut per_tree = vec![0.0; self.n_features];
            for node in &tree.nodes {
                if let Some(f) = node.feature {
                    per_tree[f] += node.gain;
                }
            }
            let total: f64 = per_tree.iter().sum();
            if total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(&per_tree) {
                    *acc += v / total;
                }
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::shap::{ensemble_expected_value, ensemble_shap};
    use crate::models::tests::toy;

    fn small() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            max_features: MaxFeatures::All,
            ..Default::default()
        }
    }

    #[test]
    fn test_fits_separable_data() {
        let (x, y) = toy();
        let model = RandomForest::fit(&small(), &x, &y, 3).unwrap();
        let pred = model.predict(&x);
        assert_eq!(pred, y);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let (x, y) = toy();
        let a = RandomForest::fit(&small(), &x, &y, 9).unwrap();
        let b = RandomForest::fit(&small(), &x, &y, 9).unwrap();
        assert_eq!(a.trees, b.trees);
    }

    #[test]
    fn test_covers_are_additive() {
        let (x, y) = toy();
        let model = RandomForest::fit(&small(), &x, &y, 1).unwrap();
        for tree in &model.trees {
            assert_eq!(tree.nodes[0].cover, x.n_rows() as f64);
            for node in tree.nodes.iter().filter(|n| !n.is_leaf()) {
                let sum = tree.nodes[node.left].cover + tree.nodes[node.right].cover;
                assert_eq!(node.cover, sum);
            }
        }
    }

    #[test]
    fn test_shap_recovers_probability() {
        let (x, y) = toy();
        let model = RandomForest::fit(&small(), &x, &y, 5).unwrap();
        let row = x.row(8);
        let phi = ensemble_shap(&model.trees, model.tree_weight(), row, 2);
        let ev = ensemble_expected_value(&model.trees, model.tree_weight());
        let total = ev[1] + phi[0][1] + phi[1][1];
        let proba = model.predict_proba(&Matrix::from_rows(vec![row.to_vec()]).unwrap());
        assert!((total - proba.unwrap()[0]).abs() < 1e-9);
    }

    #[test]
    fn test_importances_normalised() {
        let (x, y) = toy();
        let model = RandomForest::fit(&small(), &x, &y, 2).unwrap();
        let imp = model.impurity_importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
    }
}
