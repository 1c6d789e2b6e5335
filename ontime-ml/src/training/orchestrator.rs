//! Training orchestration.
//!
//! Composes the feature pipeline, the typed pre-processor, optional SMOTE
//! oversampling and the estimator into one [`TrainedPipeline`], then
//! evaluates it on the held-out partition. Oversampling only ever sees the
//! pre-processed training matrix.

use super::metrics::EvaluationMetrics;
use super::reproducibility::{RunEnvironment, SeedManager};
use super::resample::{ResampleReport, Smote, SmoteConfig};
use crate::artifact::{ArtifactMetadata, TrainedPipeline};
use crate::config::{FeatureSettings, OntimeConfig};
use crate::data::Frame;
use crate::data::labels::target_vector;
use crate::error::MlError;
use crate::features::{FeatureConfig, FeaturePipeline, Transformer};
use crate::models::ModelSpec;
use crate::preprocess::Preprocessor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub target_column: String,
    pub seed: u64,
    pub use_smote: bool,
    pub smote_k_neighbors: usize,
    pub min_category_frequency: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self::from_config(&OntimeConfig::default())
    }
}

impl TrainingOptions {
    pub fn from_config(config: &OntimeConfig) -> Self {
        Self {
            target_column: config.label.target_column.clone(),
            seed: config.training.seed,
            use_smote: config.training.use_smote,
            smote_k_neighbors: config.training.smote_k_neighbors,
            min_category_frequency: config.training.min_category_frequency,
        }
    }
}

/// Held-out evaluation of one fitted pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub metrics: EvaluationMetrics,
    pub y_true: Vec<u8>,
    pub y_pred: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proba: Option<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub pipeline: TrainedPipeline,
    pub evaluation: Evaluation,
}

pub struct TrainingOrchestrator {
    settings: FeatureSettings,
    feature_config: FeatureConfig,
    model: ModelSpec,
    options: TrainingOptions,
}

impl TrainingOrchestrator {
    pub fn new(
        settings: FeatureSettings,
        feature_config: FeatureConfig,
        model: ModelSpec,
        options: TrainingOptions,
    ) -> Self {
        Self {
            settings,
            feature_config,
            model,
            options,
        }
    }

    pub fn from_config(config: &OntimeConfig) -> Self {
        Self::new(
            config.features.clone(),
            config.feature_columns.clone(),
            config.model_spec(),
            TrainingOptions::from_config(config),
        )
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.options
    }

    /// Fit every stage on `train` and bind the result.
    pub fn fit(&self, train: &Frame) -> Result<TrainedPipeline, MlError> {
        if self.options.use_smote && !Smote::is_available() {
            return Err(MlError::unavailable(
                "SMOTE requested but the `resampling` feature is not compiled in",
            ));
        }

        let mut features = FeaturePipeline::from_settings(&self.settings);
        self.feature_config
            .validate(&features.produced_columns())?;

        let (x_train, y_train) = split_target(train, &self.options.target_column)?;
        info!(
            rows = x_train.row_count(),
            model = self.model.name(),
            smote = self.options.use_smote,
            "Training pipeline"
        );

        let derived = features.fit_transform(x_train)?;
        FeaturePipeline::check_columns(&derived, &self.feature_config)?;

        let mut preprocessor =
            Preprocessor::new(self.feature_config.clone(), self.options.min_category_frequency);
        let mut x = preprocessor.fit_transform(&derived)?;
        let mut y = y_train;

        let mut seeds = SeedManager::new(self.options.seed);
        let mut resampling: Option<ResampleReport> = None;
        if self.options.use_smote {
            let smote = Smote::new(SmoteConfig {
                k_neighbors: self.options.smote_k_neighbors,
                seed: seeds.get_seed("smote"),
            });
            let (xr, yr, report) = smote.resample(&x, &y)?;
            x = xr;
            y = yr;
            resampling = Some(report);
        }

        let model = self.model.fit(&x, &y, seeds.get_seed("estimator"))?;

        let metadata = ArtifactMetadata {
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            model_name: self.model.name().to_string(),
            seed: self.options.seed,
            training_rows: train.row_count(),
            resampling,
            feature_config: self.feature_config.clone(),
            environment: RunEnvironment::capture(),
        };
        let pipeline = TrainedPipeline::new(features, preprocessor, model, metadata)?;
        info!(
            features = pipeline.preprocessor().n_features(),
            run_id = %pipeline.metadata().run_id,
            "Pipeline fitted"
        );
        Ok(pipeline)
    }

    /// Fit on `train`, evaluate on `test`.
    pub fn train(&self, train: &Frame, test: &Frame) -> Result<TrainingOutcome, MlError> {
        let pipeline = self.fit(train)?;
        let evaluation = evaluate(&pipeline, test, &self.options.target_column)?;
        Ok(TrainingOutcome {
            pipeline,
            evaluation,
        })
    }
}

/// Separate the target from the features. A missing target column is a
/// configuration error.
pub fn split_target(frame: &Frame, target_column: &str) -> Result<(Frame, Vec<u8>), MlError> {
    let mut features = frame.clone();
    let values = features.take_column(target_column).map_err(|_| {
        MlError::config(format!(
            "target column '{target_column}' is missing from the training data"
        ))
    })?;
    Ok((features, target_vector(&values)?))
}

/// Classification report, confusion matrix and, when the estimator has
/// probabilities, ROC-AUC on a labelled partition.
pub fn evaluate(
    pipeline: &TrainedPipeline,
    test: &Frame,
    target_column: &str,
) -> Result<Evaluation, MlError> {
    let (x_test, y_true) = split_target(test, target_column)?;
    if x_test.is_empty() {
        warn!("Evaluating on an empty partition");
    }
    let y_pred = pipeline.predict(&x_test)?;
    let proba = pipeline.predict_proba(&x_test)?;
    let metrics = EvaluationMetrics::compute(&y_true, &y_pred, proba.as_deref());

    let summary = metrics.summary();
    info!(
        rows = y_true.len(),
        accuracy = summary.accuracy,
        f1_pos = summary.f1_pos,
        roc_auc = ?summary.roc_auc,
        "Evaluation complete"
    );
    Ok(Evaluation {
        metrics,
        y_true,
        y_pred,
        proba,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use crate::models::{ForestParams, GbdtParams, LogisticParams};
    use serde_json::json;

    fn flights(n: usize) -> Frame {
        let carriers = ["GLO", "AZU", "TAM"];
        let airports = ["SBGR", "SBPA", "SBKP", "SBFL"];
        let records: Vec<Record> = (0..n)
            .map(|i| {
                let hour = (i * 5) % 24;
                let delayed = hour >= 17;
                let delay = if delayed { 30.0 + (i % 7) as f64 } else { (i % 9) as f64 };
                json!({
                    "partida_prevista": format!("2024-0{}-{:02} {:02}:10:00", 1 + i % 6, 1 + i % 28, hour),
                    "empresa_aerea": carriers[i % 3],
                    "aerodromo_origem": airports[i % 4],
                    "aerodromo_destino": airports[(i + 1) % 4],
                    "codigo_tipo_linha": "N",
                    "atraso_partida_min": delay,
                    "atrasado": u8::from(delayed),
                })
                .as_object()
                .cloned()
                .unwrap()
            })
            .collect();
        Frame::from_records(&records)
    }

    fn options() -> TrainingOptions {
        TrainingOptions {
            min_category_frequency: 1,
            ..Default::default()
        }
    }

    fn small_gbdt() -> ModelSpec {
        ModelSpec::GradientBoosting(GbdtParams {
            n_estimators: 15,
            max_depth: 3,
            ..Default::default()
        })
    }

    fn orchestrator(model: ModelSpec, options: TrainingOptions) -> TrainingOrchestrator {
        TrainingOrchestrator::new(
            FeatureSettings::default(),
            FeatureConfig::default(),
            model,
            options,
        )
    }

    #[test]
    fn test_train_and_evaluate() {
        let outcome = orchestrator(small_gbdt(), options())
            .train(&flights(120), &flights(40))
            .unwrap();
        let summary = outcome.evaluation.metrics.summary();
        assert!(summary.accuracy > 0.8, "accuracy {}", summary.accuracy);
        assert!(summary.roc_auc.is_some());
        assert_eq!(outcome.evaluation.y_pred.len(), 40);
        assert_eq!(outcome.pipeline.metadata().model_name, "gradient_boosting");
        assert!(outcome.pipeline.capabilities().native_contributions);
    }

    #[test]
    fn test_missing_target_is_config_error() {
        let mut train = flights(30);
        train.drop_columns(&["atrasado".to_string()]);
        let err = orchestrator(small_gbdt(), options()).fit(&train).unwrap_err();
        assert!(matches!(err, MlError::Config(msg) if msg.contains("atrasado")));
    }

    #[test]
    fn test_feature_config_mismatch_surfaces() {
        let orchestrator = TrainingOrchestrator::new(
            FeatureSettings::default(),
            FeatureConfig::new(vec!["hora_dia".into(), "coluna_fantasma".into()], vec![]),
            small_gbdt(),
            options(),
        );
        let err = orchestrator.fit(&flights(30)).unwrap_err();
        assert!(err.to_string().contains("coluna_fantasma"));
    }

    #[test]
    fn test_missing_delay_column_is_config_error() {
        let mut train = flights(30);
        train.drop_columns(&["atraso_partida_min".to_string()]);
        let err = orchestrator(small_gbdt(), options()).fit(&train).unwrap_err();
        assert!(matches!(err, MlError::Config(_)));
    }

    #[test]
    fn test_logistic_and_forest_train() {
        for spec in [
            ModelSpec::LogisticRegression(LogisticParams::default()),
            ModelSpec::RandomForest(ForestParams {
                n_estimators: 10,
                ..Default::default()
            }),
        ] {
            let outcome = orchestrator(spec, options())
                .train(&flights(90), &flights(30))
                .unwrap();
            assert!(outcome.evaluation.proba.is_some());
        }
    }

    #[cfg(feature = "resampling")]
    #[test]
    fn test_smote_only_touches_training_rows() {
        let opts = TrainingOptions {
            use_smote: true,
            ..options()
        };
        let outcome = orchestrator(small_gbdt(), opts)
            .train(&flights(120), &flights(40))
            .unwrap();
        let report = outcome.pipeline.metadata().resampling.unwrap();
        assert!(report.synthetic > 0);
        assert_eq!(report.minority_before + report.synthetic, report.majority);
        assert_eq!(outcome.evaluation.y_true.len(), 40);
    }

    #[cfg(not(feature = "resampling"))]
    #[test]
    fn test_smote_unavailable_is_explicit() {
        let opts = TrainingOptions {
            use_smote: true,
            ..options()
        };
        let err = orchestrator(small_gbdt(), opts).fit(&flights(30)).unwrap_err();
        assert!(matches!(err, MlError::Unavailable(_)));
    }
}
