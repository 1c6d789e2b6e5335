//! L2-regularised logistic regression fitted by batch gradient descent.

use super::{Classifier, sigmoid};
use crate::data::Matrix;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub max_iter: usize,
    /// Inverse regularisation strength, as in `C`.
    pub c: f64,
    pub tol: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            max_iter: 500,
            c: 1.0,
            tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub params: LogisticParams,
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticRegression {
    pub fn fit(params: &LogisticParams, x: &Matrix, y: &[u8]) -> Result<Self, MlError> {
        if params.c <= 0.0 {
            return Err(MlError::config("c must be positive"));
        }
        let n = x.n_rows() as f64;
        let mut weights = vec![0.0; x.n_cols()];
        let mut intercept = 0.0;
        let penalty = 1.0 / (params.c * n);

        let mut iterations = 0;
        for _ in 0..params.max_iter {
            iterations += 1;
            let mut grad_w = vec![0.0; weights.len()];
            let mut grad_b = 0.0;
            for (row, &target) in x.rows().zip(y) {
                let z = intercept + dot(&weights, row);
                let err = sigmoid(z) - f64::from(target);
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }

            let mut step_norm = 0.0;
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                let step = params.learning_rate * (g / n + penalty * *w);
                *w -= step;
                step_norm += step * step;
            }
            let step_b = params.learning_rate * grad_b / n;
            intercept -= step_b;
            step_norm += step_b * step_b;

            if step_norm.sqrt() < params.tol {
                break;
            }
        }

        info!(iterations, "Fitted logistic regression");
        Ok(Self {
            params: params.clone(),
            weights,
            intercept,
        })
    }

    fn decision(&self, row: &[f64]) -> f64 {
        self.intercept + dot(&self.weights, row)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Classifier for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic_regression"
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn predict(&self, x: &Matrix) -> Vec<u8> {
        x.rows().map(|r| u8::from(self.decision(r) > 0.0)).collect()
    }

    fn supports_probabilities(&self) -> bool {
        true
    }

    fn predict_proba(&self, x: &Matrix) -> Option<Vec<f64>> {
        Some(x.rows().map(|r| sigmoid(self.decision(r))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separates_linear_data() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64 / 10.0 - 1.0]).collect();
        let y: Vec<u8> = rows.iter().map(|r| u8::from(r[0] > 0.0)).collect();
        let x = Matrix::from_rows(rows).unwrap();
        let model = LogisticRegression::fit(&LogisticParams::default(), &x, &y).unwrap();
        assert!(model.weights[0] > 0.0);
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba[0] < 0.5 && proba[19] > 0.5);
        assert!(model.native_contributions().is_none());
        assert!(model.tree_ensemble().is_none());
    }
}
