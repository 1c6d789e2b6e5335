//! Estimators and the capability interface the explainers dispatch on.
//!
//! Each estimator states truthfully what it can do: probability output,
//! native per-feature contributions, or exposed tree structure. Callers query
//! these capabilities instead of matching on model names.

pub mod forest;
pub mod gbdt;
pub mod logistic;
pub mod shap;
pub mod tree;

pub use forest::{ForestParams, MaxFeatures, RandomForest};
pub use gbdt::{GbdtParams, GradientBoosting};
pub use logistic::{LogisticParams, LogisticRegression};
pub use tree::{DecisionTree, TreeNode};

use crate::data::Matrix;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fitted binary classifier.
pub trait Classifier {
    fn name(&self) -> &'static str;

    fn n_features(&self) -> usize;

    fn predict(&self, x: &Matrix) -> Vec<u8>;

    fn supports_probabilities(&self) -> bool {
        false
    }

    /// Probability of the positive class per row, when supported.
    fn predict_proba(&self, _x: &Matrix) -> Option<Vec<f64>> {
        None
    }

    /// Boosted-tree models that decompose their own raw score.
    fn native_contributions(&self) -> Option<&dyn NativeContributions> {
        None
    }

    /// Tree ensembles that expose their trees for post-hoc attribution.
    fn tree_ensemble(&self) -> Option<&dyn TreeEnsemble> {
        None
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            probabilities: self.supports_probabilities(),
            native_contributions: self.native_contributions().is_some(),
            tree_ensemble: self.tree_ensemble().is_some(),
        }
    }
}

/// Additive decomposition of a boosted model's raw (pre-sigmoid) score.
pub trait NativeContributions {
    fn raw_margin(&self, row: &[f64]) -> f64;

    /// Per-feature contributions and the bias term. `bias + sum` equals
    /// [`raw_margin`](Self::raw_margin).
    fn contributions(&self, row: &[f64]) -> (Vec<f64>, f64);

    /// Per-feature importance scores of the requested flavour.
    fn importance(&self, kind: ImportanceType) -> Vec<f64>;
}

/// Tree structure of an averaged or summed ensemble.
pub trait TreeEnsemble {
    fn trees(&self) -> &[DecisionTree];

    /// Factor applied to every tree's output before summing.
    fn tree_weight(&self) -> f64;

    fn n_outputs(&self) -> usize;

    /// Normalised mean decrease in impurity per feature.
    fn impurity_importances(&self) -> Vec<f64>;
}

/// Capability flags recorded once when a pipeline is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub probabilities: bool,
    pub native_contributions: bool,
    pub tree_ensemble: bool,
}

/// Boosted-model importance flavours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceType {
    #[default]
    Gain,
    Weight,
    Cover,
    TotalGain,
    TotalCover,
}

impl ImportanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gain => "gain",
            Self::Weight => "weight",
            Self::Cover => "cover",
            Self::TotalGain => "total_gain",
            Self::TotalCover => "total_cover",
        }
    }
}

impl fmt::Display for ImportanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportanceType {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gain" => Ok(Self::Gain),
            "weight" => Ok(Self::Weight),
            "cover" => Ok(Self::Cover),
            "total_gain" => Ok(Self::TotalGain),
            "total_cover" => Ok(Self::TotalCover),
            other => Err(MlError::config(format!("unknown importance type '{other}'"))),
        }
    }
}

/// A fitted estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    GradientBoosting(GradientBoosting),
    RandomForest(RandomForest),
    LogisticRegression(LogisticRegression),
}

impl Model {
    pub fn classifier(&self) -> &dyn Classifier {
        match self {
            Self::GradientBoosting(m) => m,
            Self::RandomForest(m) => m,
            Self::LogisticRegression(m) => m,
        }
    }
}

/// Untrained estimator and its hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ModelSpec {
    GradientBoosting(GbdtParams),
    RandomForest(ForestParams),
    LogisticRegression(LogisticParams),
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::GradientBoosting(GbdtParams::default())
    }
}

impl ModelSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GradientBoosting(_) => "gradient_boosting",
            Self::RandomForest(_) => "random_forest",
            Self::LogisticRegression(_) => "logistic_regression",
        }
    }

    pub fn fit(&self, x: &Matrix, y: &[u8], seed: u64) -> Result<Model, MlError> {
        check_training_inputs(x, y)?;
        Ok(match self {
            Self::GradientBoosting(p) => Model::GradientBoosting(GradientBoosting::fit(p, x, y)?),
            Self::RandomForest(p) => Model::RandomForest(RandomForest::fit(p, x, y, seed)?),
            Self::LogisticRegression(p) => {
                Model::LogisticRegression(LogisticRegression::fit(p, x, y)?)
            }
        })
    }
}

/// Algorithm name with default hyper-parameters.
impl FromStr for ModelSpec {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "gradient_boosting" | "gbdt" | "xgboost" => {
                Ok(Self::GradientBoosting(GbdtParams::default()))
            }
            "random_forest" | "rf" => Ok(Self::RandomForest(ForestParams::default())),
            "logistic_regression" | "logistic" => {
                Ok(Self::LogisticRegression(LogisticParams::default()))
            }
            other => Err(MlError::config(format!("unknown algorithm '{other}'"))),
        }
    }
}

fn check_training_inputs(x: &Matrix, y: &[u8]) -> Result<(), MlError> {
    if x.n_rows() == 0 {
        return Err(MlError::training("cannot fit on an empty training set"));
    }
    if x.n_rows() != y.len() {
        return Err(MlError::training(format!(
            "feature matrix has {} rows but target has {}",
            x.n_rows(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|&&v| v > 1) {
        return Err(MlError::training(format!("target label {bad} is not binary")));
    }
    Ok(())
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
