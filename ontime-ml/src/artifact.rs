//! The trained pipeline artifact: fitted feature stages, pre-processor and
//! estimator bound together, plus persistence with a content fingerprint.

use crate::data::{Frame, Matrix, Record};
use crate::error::MlError;
use crate::features::{FeatureConfig, FeaturePipeline, Transformer};
use crate::models::{Classifier, Model, ModelCapabilities};
use crate::persistence::{atomic_write_json, load_json};
use crate::preprocess::Preprocessor;
use crate::training::reproducibility::RunEnvironment;
use crate::training::resample::ResampleReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

const FORMAT_VERSION: u32 = 1;

/// Provenance recorded when the artifact is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub model_name: String,
    pub seed: u64,
    pub training_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resampling: Option<ResampleReport>,
    pub feature_config: FeatureConfig,
    pub environment: RunEnvironment,
}

/// Single-row prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proba: Option<f64>,
}

/// Immutable after construction; share it read-only across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedPipeline {
    features: FeaturePipeline,
    preprocessor: Preprocessor,
    model: Model,
    capabilities: ModelCapabilities,
    metadata: ArtifactMetadata,
}

#[derive(Serialize)]
struct FittedState<'a> {
    features: &'a FeaturePipeline,
    preprocessor: &'a Preprocessor,
    model: &'a Model,
}

#[derive(Serialize, Deserialize)]
struct ArtifactFile<P> {
    format_version: u32,
    fingerprint: String,
    pipeline: P,
}

impl TrainedPipeline {
    /// Bind fitted components. Capabilities are recorded here, once.
    pub fn new(
        features: FeaturePipeline,
        preprocessor: Preprocessor,
        model: Model,
        metadata: ArtifactMetadata,
    ) -> Result<Self, MlError> {
        if !features.is_fitted() {
            return Err(MlError::NotFitted {
                component: "FeaturePipeline",
            });
        }
        if !preprocessor.is_fitted() {
            return Err(MlError::NotFitted {
                component: "Preprocessor",
            });
        }
        let classifier = model.classifier();
        if classifier.n_features() != preprocessor.n_features() {
            return Err(MlError::model(format!(
                "estimator expects {} features but the pre-processor emits {}",
                classifier.n_features(),
                preprocessor.n_features()
            )));
        }
        let capabilities = classifier.capabilities();
        Ok(Self {
            features,
            preprocessor,
            model,
            capabilities,
            metadata,
        })
    }

    pub fn features(&self) -> &FeaturePipeline {
        &self.features
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.model.classifier()
    }

    pub fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    /// Pre-processed output column names, in matrix order.
    pub fn feature_names(&self) -> Vec<String> {
        self.preprocessor.feature_names()
    }

    /// Raw frame to model input: feature stages, column check, pre-processing.
    pub fn transform(&self, frame: &Frame) -> Result<Matrix, MlError> {
        let derived = self.features.transform(frame.clone())?;
        FeaturePipeline::check_columns(&derived, &self.metadata.feature_config)?;
        self.preprocessor.transform(&derived)
    }

    pub fn predict(&self, frame: &Frame) -> Result<Vec<u8>, MlError> {
        let x = self.transform(frame)?;
        Ok(self.classifier().predict(&x))
    }

    /// Positive-class probabilities, `None` for estimators without them.
    pub fn predict_proba(&self, frame: &Frame) -> Result<Option<Vec<f64>>, MlError> {
        if !self.capabilities.probabilities {
            return Ok(None);
        }
        let x = self.transform(frame)?;
        Ok(self.classifier().predict_proba(&x))
    }

    pub fn predict_record(&self, record: &Record) -> Result<Prediction, MlError> {
        let x = self.transform(&Frame::from_record(record))?;
        let classifier = self.classifier();
        let prediction = classifier
            .predict(&x)
            .first()
            .copied()
            .ok_or_else(|| MlError::model("estimator returned no prediction"))?;
        let proba = if self.capabilities.probabilities {
            classifier
                .predict_proba(&x)
                .and_then(|p| p.first().copied())
        } else {
            None
        };
        Ok(Prediction { prediction, proba })
    }

    /// SHA-256 over the fitted state (feature stages, pre-processor, estimator).
    pub fn fingerprint(&self) -> Result<String, MlError> {
        let state = FittedState {
            features: &self.features,
            preprocessor: &self.preprocessor,
            model: &self.model,
        };
        let bytes = serde_json::to_vec(&state)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        let fingerprint = self.fingerprint()?;
        let file = ArtifactFile {
            format_version: FORMAT_VERSION,
            fingerprint: fingerprint.clone(),
            pipeline: self,
        };
        atomic_write_json(path, &file)?;
        info!(
            path = %path.display(),
            run_id = %self.metadata.run_id,
            fingerprint = %fingerprint,
            "Saved trained pipeline"
        );
        Ok(())
    }

    /// Load and verify the stored fingerprint against the decoded state.
    pub fn load(path: &Path) -> Result<Self, MlError> {
        let file: ArtifactFile<TrainedPipeline> = load_json(path)?.ok_or_else(|| {
            MlError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no artifact at {}", path.display()),
            ))
        })?;
        if file.format_version != FORMAT_VERSION {
            return Err(MlError::model(format!(
                "artifact format version {} is not supported (expected {FORMAT_VERSION})",
                file.format_version
            )));
        }
        let pipeline = file.pipeline;
        let actual = pipeline.fingerprint()?;
        if actual != file.fingerprint {
            return Err(MlError::model(format!(
                "artifact fingerprint mismatch: stored {} but state hashes to {actual}",
                file.fingerprint
            )));
        }
        info!(
            path = %path.display(),
            run_id = %pipeline.metadata.run_id,
            model = %pipeline.metadata.model_name,
            "Loaded trained pipeline"
        );
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelSpec;
    use crate::models::tests::toy;

    fn metadata() -> ArtifactMetadata {
        ArtifactMetadata {
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            model_name: "gradient_boosting".into(),
            seed: 42,
            training_rows: 40,
            resampling: None,
            feature_config: FeatureConfig::default(),
            environment: RunEnvironment::capture(),
        }
    }

    #[test]
    fn test_unfitted_stages_are_refused() {
        let (x, y) = toy();
        let model = ModelSpec::default().fit(&x, &y, 0).unwrap();
        let err = TrainedPipeline::new(
            FeaturePipeline::default(),
            Preprocessor::new(FeatureConfig::default(), 1),
            model,
            metadata(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MlError::NotFitted {
                component: "FeaturePipeline"
            }
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrainedPipeline::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("no artifact"));
    }
}
