//! Fixed-order composition of the feature stages.

use super::{
    DerivedSignals, FeatureConfig, GroupAverageEncoder, LeakageGuard, TemporalFeatures,
    Transformer,
};
use crate::config::FeatureSettings;
use crate::data::Frame;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Temporal derivation, then derived signals, then group averages, then the
/// leakage guard.
///
/// `fit` fits each stage on the output of the stages before it, so the
/// encoder sees the same frame at fit time that it will see at transform
/// time. `transform` only replays fitted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePipeline {
    pub temporal: TemporalFeatures,
    pub signals: DerivedSignals,
    pub encoder: GroupAverageEncoder,
    pub leakage: LeakageGuard,
    raw_columns: Vec<String>,
    fitted: bool,
}

impl Default for FeaturePipeline {
    fn default() -> Self {
        Self::from_settings(&FeatureSettings::default())
    }
}

impl FeaturePipeline {
    pub fn from_settings(settings: &FeatureSettings) -> Self {
        Self {
            temporal: TemporalFeatures::from_settings(settings),
            signals: DerivedSignals::from_settings(settings),
            encoder: GroupAverageEncoder::from_settings(settings),
            leakage: LeakageGuard::new(settings.leakage_columns.clone()),
            raw_columns: settings.required_raw_columns(),
            fitted: false,
        }
    }

    /// Columns present in every transformed frame given a frame carrying the
    /// required raw fields.
    pub fn produced_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let candidates = self
            .raw_columns
            .iter()
            .map(String::as_str)
            .chain(TemporalFeatures::output_columns())
            .chain(DerivedSignals::output_columns())
            .chain(self.encoder.output_columns());
        for column in candidates {
            if !self.leakage.drops(column) && !out.iter().any(|c| c == column) {
                out.push(column.to_string());
            }
        }
        out
    }

    /// Fail with [`MlError::FeatureMismatch`] when any configured column is
    /// absent from a transformed frame.
    pub fn check_columns(frame: &Frame, config: &FeatureConfig) -> Result<(), MlError> {
        let missing: Vec<String> = config
            .all_columns()
            .into_iter()
            .filter(|c| !frame.has_column(c))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MlError::FeatureMismatch { missing })
        }
    }

    fn fit_stages(&mut self, frame: Frame) -> Result<Frame, MlError> {
        info!(rows = frame.row_count(), "Fitting feature pipeline");
        self.fitted = false;

        let stages: [&mut dyn Transformer; 4] = [
            &mut self.temporal,
            &mut self.signals,
            &mut self.encoder,
            &mut self.leakage,
        ];
        let mut current = frame;
        for stage in stages {
            stage.fit(&current)?;
            current = stage.transform(current)?;
            debug!(
                stage = stage.name(),
                columns = current.column_count(),
                "Stage fitted"
            );
        }

        self.fitted = true;
        Ok(current)
    }
}

impl Transformer for FeaturePipeline {
    fn name(&self) -> &'static str {
        "FeaturePipeline"
    }

    fn fit(&mut self, frame: &Frame) -> Result<(), MlError> {
        self.fit_stages(frame.clone()).map(|_| ())
    }

    fn transform(&self, frame: Frame) -> Result<Frame, MlError> {
        if !self.fitted {
            return Err(MlError::NotFitted {
                component: "FeaturePipeline",
            });
        }
        let frame = self.temporal.transform(frame)?;
        let frame = self.signals.transform(frame)?;
        let frame = self.encoder.transform(frame)?;
        self.leakage.transform(frame)
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn fit_transform(&mut self, frame: Frame) -> Result<Frame, MlError> {
        self.fit_stages(frame)
    }
}
