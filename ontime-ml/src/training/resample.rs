//! SMOTE minority oversampling.
//!
//! Runs strictly between pre-processing and estimator fitting, on the
//! training matrix only. Compiled only with the `resampling` feature;
//! without it every call reports the stage as unavailable.

use crate::data::Matrix;
use crate::error::MlError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoteConfig {
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for SmoteConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            seed: 42,
        }
    }
}

/// Counts before and after oversampling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleReport {
    pub minority_class: u8,
    pub minority_before: usize,
    pub majority: usize,
    pub synthetic: usize,
}

#[derive(Debug, Clone)]
pub struct Smote {
    pub config: SmoteConfig,
}

impl Smote {
    pub fn new(config: SmoteConfig) -> Self {
        Self { config }
    }

    pub fn is_available() -> bool {
        cfg!(feature = "resampling")
    }

    #[cfg(not(feature = "resampling"))]
    pub fn resample(&self, _x: &Matrix, _y: &[u8]) -> Result<(Matrix, Vec<u8>, ResampleReport), MlError> {
        Err(MlError::unavailable(
            "SMOTE resampling requested but this build was compiled without the `resampling` feature",
        ))
    }

    /// Interpolate synthetic minority rows until both classes have the same
    /// count. Synthetic rows are appended after the originals.
    #[cfg(feature = "resampling")]
    pub fn resample(
        &self,
        x: &Matrix,
        y: &[u8],
    ) -> Result<(Matrix, Vec<u8>, ResampleReport), MlError> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use tracing::info;

        if x.n_rows() != y.len() {
            return Err(MlError::training(format!(
                "feature matrix has {} rows but target has {}",
                x.n_rows(),
                y.len()
            )));
        }

        let positives = y.iter().filter(|&&v| v == 1).count();
        let negatives = y.len() - positives;
        let (minority_class, minority_count, majority) = if positives <= negatives {
            (1u8, positives, negatives)
        } else {
            (0u8, negatives, positives)
        };
        let mut report = ResampleReport {
            minority_class,
            minority_before: minority_count,
            majority,
            synthetic: 0,
        };
        if minority_count == majority {
            return Ok((x.clone(), y.to_vec(), report));
        }

        let minority: Vec<usize> = (0..y.len()).filter(|&i| y[i] == minority_class).collect();
        let k = self.config.k_neighbors.min(minority.len().saturating_sub(1));
        if k == 0 {
            return Err(MlError::training(format!(
                "SMOTE needs at least 2 minority samples, found {}",
                minority.len()
            )));
        }

        let neighbours: Vec<Vec<usize>> = minority
            .iter()
            .map(|&i| {
                let mut dists: Vec<(f64, usize)> = minority
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| (squared_distance(x.row(i), x.row(j)), j))
                    .collect();
                dists.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                dists.into_iter().take(k).map(|(_, j)| j).collect()
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut out = x.clone();
        let mut labels = y.to_vec();
        let n_synthetic = majority - minority_count;
        let mut sample = vec![0.0; x.n_cols()];
        for _ in 0..n_synthetic {
            let which = rng.gen_range(0..minority.len());
            let base = x.row(minority[which]);
            let neighbour = x.row(neighbours[which][rng.gen_range(0..k)]);
            let gap: f64 = rng.gen_range(0.0..1.0);
            for ((s, b), n) in sample.iter_mut().zip(base).zip(neighbour) {
                *s = b + gap * (n - b);
            }
            out.push_row(&sample)?;
            labels.push(minority_class);
        }
        report.synthetic = n_synthetic;

        info!(
            minority_class,
            before = minority_count,
            synthetic = n_synthetic,
            "SMOTE oversampling complete"
        );
        Ok((out, labels, report))
    }
}

#[cfg(feature = "resampling")]
fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(all(test, feature = "resampling"))]
mod tests {
    use super::*;

    fn imbalanced() -> (Matrix, Vec<u8>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..12 {
            rows.push(vec![i as f64, 0.0]);
            y.push(0);
        }
        for i in 0..4 {
            rows.push(vec![100.0 + i as f64, 10.0]);
            y.push(1);
        }
        (Matrix::from_rows(rows).unwrap(), y)
    }

    #[test]
    fn test_balances_classes() {
        let (x, y) = imbalanced();
        let (xr, yr, report) = Smote::new(SmoteConfig::default()).resample(&x, &y).unwrap();
        assert_eq!(report.minority_class, 1);
        assert_eq!(report.synthetic, 8);
        assert_eq!(xr.n_rows(), 24);
        assert_eq!(yr.iter().filter(|&&v| v == 1).count(), 12);
        // originals untouched and first
        assert_eq!(xr.row(0), x.row(0));
        // synthetic rows lie inside the minority hull
        for i in 16..24 {
            let r = xr.row(i);
            assert!((100.0..=103.0).contains(&r[0]));
            assert_eq!(r[1], 10.0);
        }
    }

    #[test]
    fn test_seeded_output_is_stable() {
        let (x, y) = imbalanced();
        let smote = Smote::new(SmoteConfig {
            k_neighbors: 2,
            seed: 7,
        });
        assert_eq!(
            smote.resample(&x, &y).unwrap().0,
            smote.resample(&x, &y).unwrap().0
        );
    }

    #[test]
    fn test_single_minority_sample_rejected() {
        let x = Matrix::from_rows(vec![vec![0.0], vec![1.0], vec![2.0]]).unwrap();
        assert!(Smote::new(SmoteConfig::default()).resample(&x, &[0, 0, 1]).is_err());
    }

    #[test]
    fn test_balanced_input_passthrough() {
        let x = Matrix::from_rows(vec![vec![0.0], vec![1.0]]).unwrap();
        let (xr, yr, report) = Smote::new(SmoteConfig::default())
            .resample(&x, &[0, 1])
            .unwrap();
        assert_eq!(xr, x);
        assert_eq!(yr, vec![0, 1]);
        assert_eq!(report.synthetic, 0);
    }
}
