//! Gradient-boosted decision trees for binary classification.
//!
//! Logistic loss, second-order exact greedy splits, shrinkage, L2 leaf
//! regularisation, minimum child hessian and a split-gain floor (`gamma`).
//! Every node stores its shrunk weight so the raw margin can be decomposed
//! along the decision path.

use super::shap::{ensemble_expected_value, ensemble_shap};
use super::tree::{DecisionTree, TreeNode, sorted_by_feature};
use super::{Classifier, ImportanceType, NativeContributions, TreeEnsemble, sigmoid};
use crate::data::Matrix;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub gamma: f64,
    /// Decompose along the decision path (Saabas) instead of exact TreeSHAP.
    pub approx_contribs: bool,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            gamma: 0.0,
            approx_contribs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub params: GbdtParams,
    pub base_margin: f64,
    pub trees: Vec<DecisionTree>,
    n_features: usize,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'a> {
    params: &'a GbdtParams,
    x: &'a Matrix,
    grad: &'a [f64],
    hess: &'a [f64],
    nodes: Vec<TreeNode>,
}

impl Builder<'_> {
    fn weight(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.reg_lambda) * self.params.learning_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.reg_lambda)
    }

    fn best_split(&self, indices: &[usize], g: f64, h: f64) -> Option<Split> {
        let parent = self.score(g, h);
        let mut best: Option<Split> = None;
        for feature in 0..self.x.n_cols() {
            let sorted = sorted_by_feature(self.x, indices, feature);
            let (mut gl, mut hl) = (0.0, 0.0);
            for w in sorted.windows(2) {
                let (value, row) = w[0];
                let next = w[1].0;
                gl += self.grad[row];
                hl += self.hess[row];
                if value == next {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gain =
                    0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent) - self.params.gamma;
                if gain > best.as_ref().map_or(0.0, |b| b.gain) {
                    let mid = value + (next - value) / 2.0;
                    best = Some(Split {
                        feature,
                        threshold: if mid > value { mid } else { next },
                        gain,
                    });
                }
            }
        }
        best
    }

    fn build(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let g: f64 = indices.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = indices.iter().map(|&i| self.hess[i]).sum();
        let idx = self.nodes.len();
        self.nodes.push(TreeNode::leaf(vec![self.weight(g, h)], h));

        if depth >= self.params.max_depth || indices.len() < 2 {
            return idx;
        }
        let Some(split) = self.best_split(&indices, g, h) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x.get(i, split.feature) < split.threshold);
        let l = self.build(left, depth + 1);
        let r = self.build(right, depth + 1);

        let node = &mut self.nodes[idx];
        node.feature = Some(split.feature);
        node.threshold = split.threshold;
        node.left = l;
        node.right = r;
        node.gain = split.gain;
        idx
    }
}

impl GradientBoosting {
    pub fn fit(params: &GbdtParams, x: &Matrix, y: &[u8]) -> Result<Self, MlError> {
        if params.learning_rate <= 0.0 || params.reg_lambda < 0.0 {
            return Err(MlError::config(
                "learning_rate must be positive and reg_lambda non-negative",
            ));
        }
        let n = x.n_rows();
        let positive_rate =
            (y.iter().filter(|&&v| v == 1).count() as f64 / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_margin = (positive_rate / (1.0 - positive_rate)).ln();

        let mut margins = vec![base_margin; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = p - f64::from(y[i]);
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }
            let mut builder = Builder {
                params,
                x,
                grad: &grad,
                hess: &hess,
                nodes: Vec::new(),
            };
            builder.build((0..n).collect(), 0);
            let tree = DecisionTree {
                nodes: builder.nodes,
            };
            for (i, margin) in margins.iter_mut().enumerate() {
                *margin += tree.predict(x.row(i))[0];
            }
            if round % 25 == 0 {
                debug!(round, leaves = tree.n_leaves(), "Boosting round");
            }
            trees.push(tree);
        }

        info!(
            trees = trees.len(),
            base_margin, "Fitted gradient boosting model"
        );
        Ok(Self {
            params: params.clone(),
            base_margin,
            trees,
            n_features: x.n_cols(),
        })
    }

    fn margin(&self, row: &[f64]) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(row)[0]).sum::<f64>()
    }

    fn path_contributions(&self, row: &[f64]) -> (Vec<f64>, f64) {
        let mut phi = vec![0.0; self.n_features];
        let mut bias = self.base_margin;
        for tree in &self.trees {
            let path = tree.decision_path(row);
            bias += tree.nodes[path[0]].values[0];
            for pair in path.windows(2) {
                let (parent, child) = (&tree.nodes[pair[0]], &tree.nodes[pair[1]]);
                if let Some(f) = parent.feature {
                    phi[f] += child.values[0] - parent.values[0];
                }
            }
        }
        (phi, bias)
    }

    fn split_stats(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut count = vec![0.0; self.n_features];
        let mut gain = vec![0.0; self.n_features];
        let mut cover = vec![0.0; self.n_features];
        for node in self.trees.iter().flat_map(|t| &t.nodes) {
            if let Some(f) = node.feature {
                count[f] += 1.0;
                gain[f] += node.gain;
                cover[f] += node.cover;
            }
        }
        (count, gain, cover)
    }
}

impl Classifier for GradientBoosting {
    fn name(&self) -> &'static str {
        "gradient_boosting"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: &Matrix) -> Vec<u8> {
        x.rows().map(|r| u8::from(self.margin(r) > 0.0)).collect()
    }

    fn supports_probabilities(&self) -> bool {
        true
    }

    fn predict_proba(&self, x: &Matrix) -> Option<Vec<f64>> {
        Some(x.rows().map(|r| sigmoid(self.margin(r))).collect())
    }

    fn native_contributions(&self) -> Option<&dyn NativeContributions> {
        Some(self)
    }

    fn tree_ensemble(&self) -> Option<&dyn TreeEnsemble> {
        Some(self)
    }
}

impl NativeContributions for GradientBoosting {
    fn raw_margin(&self, row: &[f64]) -> f64 {
        self.margin(row)
    }

    fn contributions(&self, row: &[f64]) -> (Vec<f64>, f64) {
        if self.params.approx_contribs {
            return self.path_contributions(row);
        }
        let phi = ensemble_shap(&self.trees, 1.0, row, self.n_features)
            .into_iter()
            .map(|p| p.first().copied().unwrap_or(0.0))
            .collect();
        let bias = self.base_margin
            + ensemble_expected_value(&self.trees, 1.0)
                .first()
                .copied()
                .unwrap_or(0.0);
        (phi, bias)
    }

    fn importance(&self, kind: ImportanceType) -> Vec<f64> {
        let (count, gain, cover) = self.split_stats();
        match kind {
            ImportanceType::Weight => count,
            ImportanceType::TotalGain => gain,
            ImportanceType::TotalCover => cover,
            ImportanceType::Gain => per_split(&gain, &count),
            ImportanceType::Cover => per_split(&cover, &count),
        }
    }
}

fn per_split(total: &[f64], count: &[f64]) -> Vec<f64> {
    total
        .iter()
        .zip(count)
        .map(|(t, c)| if *c > 0.0 { t / c } else { 0.0 })
        .collect()
}

impl TreeEnsemble for GradientBoosting {
    fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    fn tree_weight(&self) -> f64 {
        1.0
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn impurity_importances(&self) -> Vec<f64> {
        let (_, gain, _) = self.split_stats();
        let total: f64 = gain.iter().sum();
        if total > 0.0 {
            gain.iter().map(|g| g / total).collect()
        } else {
            gain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::toy;

    fn small() -> GbdtParams {
        GbdtParams {
            n_estimators: 20,
            max_depth: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_learns_threshold() {
        let (x, y) = toy();
        let model = GradientBoosting::fit(&small(), &x, &y).unwrap();
        let pred = model.predict(&x);
        let correct = pred.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert_eq!(correct, y.len());
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_contributions_sum_to_margin() {
        let (x, y) = toy();
        for approx in [false, true] {
            let params = GbdtParams {
                approx_contribs: approx,
                ..small()
            };
            let model = GradientBoosting::fit(&params, &x, &y).unwrap();
            for i in [0, 3, 7, 9] {
                let row = x.row(i);
                let (phi, bias) = model.contributions(row);
                let total = bias + phi.iter().sum::<f64>();
                assert!((total - model.raw_margin(row)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_informative_feature_dominates_importance() {
        let (x, y) = toy();
        let model = GradientBoosting::fit(&small(), &x, &y).unwrap();
        let gain = model.importance(ImportanceType::TotalGain);
        assert!(gain[0] > gain[1]);
        let weight = model.importance(ImportanceType::Weight);
        assert!(weight[0] >= 1.0);
        let norm = model.impurity_importances();
        assert!((norm.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_class_training() {
        let (x, _) = toy();
        let y = vec![0u8; x.n_rows()];
        let model = GradientBoosting::fit(&small(), &x, &y).unwrap();
        assert!(model.predict(&x).iter().all(|&p| p == 0));
    }
}
