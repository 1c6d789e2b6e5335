//! Per-prediction and model-level explanations.
//!
//! Two attribution mechanisms sit behind one output shape:
//!
//! - boosted models decompose their own raw margin
//!   ([`NativeContributions`](crate::models::NativeContributions));
//! - other tree ensembles are attributed post hoc with TreeSHAP over their
//!   exposed trees ([`TreeEnsemble`](crate::models::TreeEnsemble)).
//!
//! Dispatch follows the capabilities recorded in the [`TrainedPipeline`]
//! when it was built. A model with neither capability yields
//! [`MlError::UnsupportedModel`].

use crate::artifact::TrainedPipeline;
use crate::data::{Frame, Record};
use crate::error::MlError;
use crate::models::shap::{ensemble_expected_value, ensemble_shap};
use crate::models::{ImportanceType, NativeContributions, TreeEnsemble};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalMethod {
    BoosterContribs,
    TreeShap,
}

impl LocalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoosterContribs => "booster_contribs",
            Self::TreeShap => "tree_shap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    fn of(contribution: f64) -> Self {
        if contribution >= 0.0 {
            Self::Increase
        } else {
            Self::Decrease
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
    pub direction: Direction,
    /// Post-pre-processing value of the feature in the explained row.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalExplanation {
    pub method: LocalMethod,
    pub top_features: Vec<FeatureContribution>,
    pub bias: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalImportance {
    pub feature: String,
    pub importance: f64,
    pub method: String,
}

/// Full, untruncated attribution of one transformed row.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub method: LocalMethod,
    pub contributions: Vec<f64>,
    pub bias: f64,
}

pub struct Explainer<'a> {
    pipeline: &'a TrainedPipeline,
}

impl<'a> Explainer<'a> {
    pub fn new(pipeline: &'a TrainedPipeline) -> Self {
        Self { pipeline }
    }

    fn native(&self) -> Result<Option<&'a dyn NativeContributions>, MlError> {
        if !self.pipeline.capabilities().native_contributions {
            return Ok(None);
        }
        self.pipeline
            .classifier()
            .native_contributions()
            .map(Some)
            .ok_or_else(|| MlError::model("recorded native contributions are not exposed"))
    }

    fn ensemble(&self) -> Result<Option<&'a dyn TreeEnsemble>, MlError> {
        if !self.pipeline.capabilities().tree_ensemble {
            return Ok(None);
        }
        self.pipeline
            .classifier()
            .tree_ensemble()
            .map(Some)
            .ok_or_else(|| MlError::model("recorded tree structure is not exposed"))
    }

    fn unsupported(&self) -> MlError {
        MlError::UnsupportedModel(format!(
            "'{}' exposes neither native contributions nor tree structure",
            self.pipeline.classifier().name()
        ))
    }

    /// Attribute a pre-processed row. For multi-output ensembles
    /// `class_index` picks the output; it defaults to the positive class of a
    /// two-output model and to the last output otherwise.
    pub fn attribute_row(
        &self,
        row: &[f64],
        class_index: Option<usize>,
    ) -> Result<Attribution, MlError> {
        if let Some(native) = self.native()? {
            let (contributions, bias) = native.contributions(row);
            return Ok(Attribution {
                method: LocalMethod::BoosterContribs,
                contributions,
                bias,
            });
        }

        let Some(ensemble) = self.ensemble()? else {
            return Err(self.unsupported());
        };
        let n_outputs = ensemble.n_outputs();
        let class = match class_index {
            Some(c) => c,
            None if n_outputs == 2 => 1,
            None => n_outputs.saturating_sub(1),
        };
        if class >= n_outputs {
            return Err(MlError::config(format!(
                "class index {class} out of range for a model with {n_outputs} outputs"
            )));
        }

        let n_features = self.pipeline.classifier().n_features();
        let phi = ensemble_shap(ensemble.trees(), ensemble.tree_weight(), row, n_features);
        let expected = ensemble_expected_value(ensemble.trees(), ensemble.tree_weight());
        Ok(Attribution {
            method: LocalMethod::TreeShap,
            contributions: phi
                .iter()
                .map(|p| p.get(class).copied().unwrap_or(0.0))
                .collect(),
            bias: expected.get(class).copied().unwrap_or(0.0),
        })
    }

    /// Explain one raw record: the `top_k` features by absolute contribution.
    pub fn explain_local(
        &self,
        record: &Record,
        top_k: usize,
        class_index: Option<usize>,
    ) -> Result<LocalExplanation, MlError> {
        // Fail before transforming when no branch applies.
        if !self.pipeline.capabilities().native_contributions
            && !self.pipeline.capabilities().tree_ensemble
        {
            return Err(self.unsupported());
        }

        let x = self.pipeline.transform(&Frame::from_record(record))?;
        if x.n_rows() != 1 {
            return Err(MlError::dataset(format!(
                "expected one transformed row, got {}",
                x.n_rows()
            )));
        }
        let row = x.row(0);
        let attribution = self.attribute_row(row, class_index)?;
        let names = self.pipeline.feature_names();

        let mut order: Vec<usize> = (0..attribution.contributions.len()).collect();
        order.sort_by(|&a, &b| {
            attribution.contributions[b]
                .abs()
                .total_cmp(&attribution.contributions[a].abs())
        });

        let top_features = order
            .into_iter()
            .take(top_k)
            .map(|i| {
                let contribution = attribution.contributions[i];
                FeatureContribution {
                    feature: names.get(i).cloned().unwrap_or_else(|| format!("f{i}")),
                    contribution,
                    direction: Direction::of(contribution),
                    value: row.get(i).copied().unwrap_or(f64::NAN),
                }
            })
            .collect();

        debug!(method = attribution.method.as_str(), top_k, "Local explanation");
        Ok(LocalExplanation {
            method: attribution.method,
            top_features,
            bias: attribution.bias,
        })
    }

    /// Model-level ranking of the `top_n` most important features.
    ///
    /// Boosted models report the requested importance flavour and omit
    /// features never used in a split. Other tree ensembles report
    /// normalised impurity decrease; `kind` does not apply to them.
    pub fn explain_global(
        &self,
        top_n: usize,
        kind: ImportanceType,
    ) -> Result<Vec<GlobalImportance>, MlError> {
        let (scores, method, keep_zero) = if let Some(native) = self.native()? {
            (native.importance(kind), format!("booster_{kind}"), false)
        } else if let Some(ensemble) = self.ensemble()? {
            (
                ensemble.impurity_importances(),
                "impurity_decrease".to_string(),
                true,
            )
        } else {
            return Err(self.unsupported());
        };

        let names = self.pipeline.feature_names();
        let mut rows: Vec<GlobalImportance> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, v)| keep_zero || *v > 0.0)
            .map(|(i, importance)| GlobalImportance {
                feature: names.get(i).cloned().unwrap_or_else(|| format!("f{i}")),
                importance,
                method: method.clone(),
            })
            .collect();
        rows.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        rows.truncate(top_n);
        Ok(rows)
    }
}
