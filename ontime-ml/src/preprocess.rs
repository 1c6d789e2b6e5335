//! Column-typed pre-processing from a derived feature frame to a dense matrix.
//!
//! Numeric columns: median imputation, then standardisation.
//! Categorical columns: constant fill, then one-hot encoding where categories
//! seen fewer than `min_frequency` times share a per-column infrequent bucket.
//! The bucket exists only for columns where something collapsed at fit time.
//! Categories never seen at fit time land in that bucket when it exists and
//! encode as all zeros otherwise.

use crate::data::frame::{Frame, as_category, as_f64};
use crate::data::matrix::Matrix;
use crate::error::MlError;
use crate::features::FeatureConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Fill value for missing categorical cells.
pub const MISSING_CATEGORY: &str = "DESCONHECIDO";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumn {
    pub name: String,
    pub median: f64,
    pub mean: f64,
    pub scale: f64,
}

impl NumericColumn {
    fn encode(&self, raw: Option<f64>) -> f64 {
        (raw.unwrap_or(self.median) - self.mean) / self.scale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalColumn {
    pub name: String,
    /// Frequent categories in sorted order; each gets its own output column.
    pub categories: Vec<String>,
    /// Whether at least one fitted category fell below `min_frequency`.
    #[serde(default)]
    pub has_infrequent: bool,
}

impl CategoricalColumn {
    /// Output slot for a raw cell. The slot after the last category is the
    /// infrequent bucket; `None` when the value has no slot at all.
    fn slot(&self, raw: Option<String>) -> Option<usize> {
        let value = raw.unwrap_or_else(|| MISSING_CATEGORY.to_string());
        match self.categories.binary_search(&value) {
            Ok(i) => Some(i),
            Err(_) if self.has_infrequent => Some(self.categories.len()),
            Err(_) => None,
        }
    }

    fn width(&self) -> usize {
        self.categories.len() + usize::from(self.has_infrequent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocessor {
    pub config: FeatureConfig,
    pub min_frequency: usize,
    numeric: Vec<NumericColumn>,
    categorical: Vec<CategoricalColumn>,
    fitted: bool,
}

impl Preprocessor {
    pub fn new(config: FeatureConfig, min_frequency: usize) -> Self {
        Self {
            config,
            min_frequency: min_frequency.max(1),
            numeric: Vec::new(),
            categorical: Vec::new(),
            fitted: false,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn numeric_columns(&self) -> &[NumericColumn] {
        &self.numeric
    }

    pub fn categorical_columns(&self) -> &[CategoricalColumn] {
        &self.categorical
    }

    pub fn fit(&mut self, frame: &Frame) -> Result<(), MlError> {
        let mut numeric = Vec::with_capacity(self.config.numeric.len());
        for name in &self.config.numeric {
            let raw: Vec<Option<f64>> = frame.values(name)?.into_iter().map(as_f64).collect();
            let mut observed: Vec<f64> = raw.iter().flatten().copied().collect();
            let median = if observed.is_empty() {
                warn!(column = %name, "Numeric column has no observed values; imputing 0");
                0.0
            } else {
                median(&mut observed)
            };

            let imputed: Vec<f64> = raw.iter().map(|v| v.unwrap_or(median)).collect();
            let n = imputed.len().max(1) as f64;
            let mean = imputed.iter().sum::<f64>() / n;
            let var = imputed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            let scale = if std > 0.0 && std.is_finite() { std } else { 1.0 };

            numeric.push(NumericColumn {
                name: name.clone(),
                median,
                mean,
                scale,
            });
        }

        let mut categorical = Vec::with_capacity(self.config.categorical.len());
        for name in &self.config.categorical {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for value in frame.values(name)? {
                let key = as_category(value).unwrap_or_else(|| MISSING_CATEGORY.to_string());
                *counts.entry(key).or_insert(0) += 1;
            }
            let total = counts.len();
            let categories: Vec<String> = counts
                .into_iter()
                .filter(|(_, count)| *count >= self.min_frequency)
                .map(|(k, _)| k)
                .collect();
            let collapsed = total - categories.len();
            debug!(
                column = %name,
                frequent = categories.len(),
                collapsed,
                "Fitted one-hot categories"
            );
            categorical.push(CategoricalColumn {
                name: name.clone(),
                categories,
                has_infrequent: collapsed > 0,
            });
        }

        self.numeric = numeric;
        self.categorical = categorical;
        self.fitted = true;
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(|c| c.width()).sum::<usize>()
    }

    /// Output column names: `num__<col>`, `cat__<col>_<value>` and, for
    /// columns with collapsed categories, `cat__<col>_infrequent`.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_features());
        for column in &self.numeric {
            names.push(format!("num__{}", column.name));
        }
        for column in &self.categorical {
            for value in &column.categories {
                names.push(format!("cat__{}_{}", column.name, value));
            }
            if column.has_infrequent {
                names.push(format!("cat__{}_infrequent", column.name));
            }
        }
        names
    }

    pub fn transform(&self, frame: &Frame) -> Result<Matrix, MlError> {
        if !self.fitted {
            return Err(MlError::NotFitted {
                component: "Preprocessor",
            });
        }

        let numeric_idx: Vec<usize> = self
            .numeric
            .iter()
            .map(|c| frame.require_column(&c.name))
            .collect::<Result<_, _>>()?;
        let categorical_idx: Vec<usize> = self
            .categorical
            .iter()
            .map(|c| frame.require_column(&c.name))
            .collect::<Result<_, _>>()?;

        let width = self.n_features();
        let mut matrix = Matrix::with_columns(width);
        let mut row = vec![0.0; width];
        for r in 0..frame.row_count() {
            row.iter_mut().for_each(|v| *v = 0.0);
            for (j, (column, &idx)) in self.numeric.iter().zip(&numeric_idx).enumerate() {
                row[j] = column.encode(as_f64(frame.value(r, idx)));
            }
            let mut offset = self.numeric.len();
            for (column, &idx) in self.categorical.iter().zip(&categorical_idx) {
                if let Some(slot) = column.slot(as_category(frame.value(r, idx))) {
                    row[offset + slot] = 1.0;
                }
                offset += column.width();
            }
            matrix.push_row(&row)?;
        }
        Ok(matrix)
    }

    pub fn fit_transform(&mut self, frame: &Frame) -> Result<Matrix, MlError> {
        self.fit(frame)?;
        self.transform(frame)
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
