//! Exact path-dependent TreeSHAP.
//!
//! Polynomial-time Shapley values for one tree, following the recursive
//! path-weight bookkeeping of Lundberg et al. (2018). Each call returns one
//! attribution vector per model output.

use super::tree::DecisionTree;

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

fn extend_path(
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let mut next_one_portion = path[depth].weight;
    let denom = (depth + 1) as f64;

    for j in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[j].weight;
            path[j].weight = next_one_portion * denom / ((j + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[j].weight * zero_fraction * (depth - j) as f64 / denom;
        } else {
            path[j].weight = path[j].weight * denom / (zero_fraction * (depth - j) as f64);
        }
    }

    for j in index..depth {
        path[j].feature = path[j + 1].feature;
        path[j].zero_fraction = path[j + 1].zero_fraction;
        path[j].one_fraction = path[j + 1].one_fraction;
    }
    path.pop();
}

/// Sum of the path weights after unwinding `index`, without mutating `path`.
fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let mut next_one_portion = path[depth].weight;
    let denom = (depth + 1) as f64;
    let mut total = 0.0;

    for j in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * denom / ((j + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[j].weight - tmp * zero_fraction * (depth - j) as f64 / denom;
        } else if zero_fraction != 0.0 {
            total += path[j].weight / zero_fraction / ((depth - j) as f64 / denom);
        }
    }
    total
}

struct Walk<'a> {
    tree: &'a DecisionTree,
    row: &'a [f64],
    phi: &'a mut [Vec<f64>],
}

impl Walk<'_> {
    fn recurse(
        &mut self,
        node_idx: usize,
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        let tree = self.tree;
        let Some(node) = tree.nodes.get(node_idx) else {
            return;
        };
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        let Some(split) = node.feature else {
            for i in 1..path.len() {
                let w = unwound_path_sum(&path, i);
                let scale = w * (path[i].one_fraction - path[i].zero_fraction);
                if let Some(f) = path[i].feature {
                    for (out, v) in self.phi[f].iter_mut().zip(&node.values) {
                        *out += scale * v;
                    }
                }
            }
            return;
        };

        let x = self.row.get(split).copied().unwrap_or(f64::NAN);
        let (hot, cold) = if node.goes_left(x) {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        let cover = |idx: usize| tree.nodes.get(idx).map_or(0.0, |n| n.cover);
        let (hot_cover, cold_cover) = (cover(hot), cover(cold));

        let mut incoming_zero = 1.0;
        let mut incoming_one = 1.0;
        if let Some(k) = path.iter().skip(1).position(|e| e.feature == Some(split)) {
            let k = k + 1;
            incoming_zero = path[k].zero_fraction;
            incoming_one = path[k].one_fraction;
            unwind_path(&mut path, k);
        }

        let node_cover = if node.cover > 0.0 { node.cover } else { 1.0 };
        self.recurse(
            hot,
            path.clone(),
            incoming_zero * hot_cover / node_cover,
            incoming_one,
            Some(split),
        );
        self.recurse(
            cold,
            path,
            incoming_zero * cold_cover / node_cover,
            0.0,
            Some(split),
        );
    }
}

/// Add the Shapley values of `tree` at `row` into `phi`, indexed
/// `[feature][output]`. `phi` must have one entry per feature.
pub fn tree_shap(tree: &DecisionTree, row: &[f64], phi: &mut [Vec<f64>]) {
    if tree.nodes.is_empty() {
        return;
    }
    let mut walk = Walk { tree, row, phi };
    walk.recurse(0, Vec::new(), 1.0, 1.0, None);
}

/// Shapley values of a sum of trees, `[feature][output]`, each tree scaled by
/// `tree_weight`.
pub fn ensemble_shap(
    trees: &[DecisionTree],
    tree_weight: f64,
    row: &[f64],
    n_features: usize,
) -> Vec<Vec<f64>> {
    let n_outputs = trees.first().map_or(0, |t| t.n_outputs());
    let mut phi = vec![vec![0.0; n_outputs]; n_features];
    for tree in trees {
        tree_shap(tree, row, &mut phi);
    }
    if tree_weight != 1.0 {
        for v in phi.iter_mut().flatten() {
            *v *= tree_weight;
        }
    }
    phi
}

/// Expected output of a weighted sum of trees, per output.
pub fn ensemble_expected_value(trees: &[DecisionTree], tree_weight: f64) -> Vec<f64> {
    let n_outputs = trees.first().map_or(0, |t| t.n_outputs());
    let mut out = vec![0.0; n_outputs];
    for tree in trees {
        for (o, v) in out.iter_mut().zip(tree.expected_value()) {
            *o += v * tree_weight;
        }
    }
    out
}
