//! Binary decision tree storage shared by the tree ensembles.

use serde::{Deserialize, Serialize};

/// One node of a fitted tree.
///
/// Every node carries `values` and `cover`, not just leaves: boosted trees
/// keep the node weight for path decompositions, and TreeSHAP needs the
/// cover of every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Split feature; `None` for leaves.
    pub feature: Option<usize>,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Node output, one entry per model output.
    pub values: Vec<f64>,
    /// Training weight reaching the node (hessian sum or sample count).
    pub cover: f64,
    /// Loss reduction of the split; 0 for leaves.
    pub gain: f64,
}

impl TreeNode {
    pub fn leaf(values: Vec<f64>, cover: f64) -> Self {
        Self {
            feature: None,
            threshold: 0.0,
            left: 0,
            right: 0,
            values,
            cover,
            gain: 0.0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }

    /// Left when `x < threshold`; missing values also go left.
    pub fn goes_left(&self, x: f64) -> bool {
        x.is_nan() || x < self.threshold
    }
}

/// Flat node arena; node 0 is the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn root(&self) -> Option<&TreeNode> {
        self.nodes.first()
    }

    pub fn n_outputs(&self) -> usize {
        self.root().map_or(0, |n| n.values.len())
    }

    /// Indices of the nodes visited by `row`, root first.
    pub fn decision_path(&self, row: &[f64]) -> Vec<usize> {
        let mut path = Vec::new();
        let mut idx = 0;
        while let Some(node) = self.nodes.get(idx) {
            path.push(idx);
            match node.feature {
                Some(f) => {
                    idx = if node.goes_left(row.get(f).copied().unwrap_or(f64::NAN)) {
                        node.left
                    } else {
                        node.right
                    };
                }
                None => break,
            }
        }
        path
    }

    pub fn leaf_index(&self, row: &[f64]) -> usize {
        self.decision_path(row).last().copied().unwrap_or(0)
    }

    pub fn predict(&self, row: &[f64]) -> &[f64] {
        self.nodes
            .get(self.leaf_index(row))
            .map_or(&[][..], |n| n.values.as_slice())
    }

    /// Cover-weighted mean of the leaf outputs: the tree's expected value over
    /// the training distribution.
    pub fn expected_value(&self) -> Vec<f64> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        let mut out = vec![0.0; root.values.len()];
        if root.cover <= 0.0 {
            return out;
        }
        for leaf in self.nodes.iter().filter(|n| n.is_leaf()) {
            for (o, v) in out.iter_mut().zip(&leaf.values) {
                *o += leaf.cover / root.cover * v;
            }
        }
        out
    }

    pub fn depth(&self) -> usize {
        fn walk(tree: &DecisionTree, idx: usize) -> usize {
            match tree.nodes.get(idx) {
                Some(n) if !n.is_leaf() => 1 + walk(tree, n.left).max(walk(tree, n.right)),
                _ => 0,
            }
        }
        walk(self, 0)
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }
}

/// `(value, row)` pairs of `indices` sorted by their value of `feature`.
pub(crate) fn sorted_by_feature(
    x: &crate::data::Matrix,
    indices: &[usize],
    feature: usize,
) -> Vec<(f64, usize)> {
    let mut pairs: Vec<(f64, usize)> = indices.iter().map(|&i| (x.get(i, feature), i)).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    pairs
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// x0 < 0.5 → leaf 1 (value 1.0, cover 3); else x1 < 2 → leaf 3 (2.0, cover 1) / leaf 4 (4.0, cover 2).
    pub(crate) fn stump_pair() -> DecisionTree {
        DecisionTree {
            nodes: vec![
                TreeNode {
                    feature: Some(0),
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                    values: vec![2.0],
                    cover: 6.0,
                    gain: 3.0,
                },
                TreeNode::leaf(vec![1.0], 3.0),
                TreeNode {
                    feature: Some(1),
                    threshold: 2.0,
                    left: 3,
                    right: 4,
                    values: vec![10.0 / 3.0],
                    cover: 3.0,
                    gain: 1.0,
                },
                TreeNode::leaf(vec![2.0], 1.0),
                TreeNode::leaf(vec![4.0], 2.0),
            ],
        }
    }

    #[test]
    fn test_predict_and_path() {
        let tree = stump_pair();
        assert_eq!(tree.predict(&[0.0, 0.0]), &[1.0]);
        assert_eq!(tree.predict(&[1.0, 1.0]), &[2.0]);
        assert_eq!(tree.predict(&[1.0, 3.0]), &[4.0]);
        assert_eq!(tree.decision_path(&[1.0, 3.0]), vec![0, 2, 4]);
        // NaN follows the left branch
        assert_eq!(tree.predict(&[f64::NAN, 3.0]), &[1.0]);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.n_leaves(), 3);
    }

    #[test]
    fn test_expected_value_is_cover_weighted() {
        let ev = stump_pair().expected_value();
        assert!((ev[0] - (3.0 * 1.0 + 1.0 * 2.0 + 2.0 * 4.0) / 6.0).abs() < 1e-12);
    }
}
