//! # ontime-ml: flight departure delay prediction
//!
//! Leakage-aware feature engineering, time-ordered partitioning, training
//! orchestration and explainable tree models for predicting whether a
//! scheduled departure will be delayed beyond a threshold.
//!
//! ## Flow
//!
//! raw [`Record`] -> [`FeaturePipeline`] -> [`Preprocessor`] -> estimator ->
//! prediction, with [`Explainer`] attributing the same fitted artifact.
//!
//! Every stage that learns from data is two-phase: `fit` once on training
//! data, then `transform` any number of times. Transforming before fitting
//! is an error, never a silent no-op.

// Foundation
pub mod config;
pub mod error;
pub mod persistence;

// Data and features
pub mod data;
pub mod features;
pub mod partition;
pub mod preprocess;

// Models and training
pub mod models;
pub mod training;

// Fitted artifact, explanations and serving
pub mod artifact;
pub mod explain;
pub mod serving;

// Re-exports
pub use artifact::{ArtifactMetadata, Prediction, TrainedPipeline};
pub use config::{OntimeConfig, load_config, load_config_file};
pub use data::{Frame, Matrix, Record};
pub use error::{ErrorKind, MlError};
pub use explain::{Explainer, GlobalImportance, LocalExplanation};
pub use features::{FeatureConfig, FeaturePipeline, Transformer};
pub use models::{Classifier, ImportanceType, ModelCapabilities, ModelSpec};
pub use partition::{PartitionTriple, split};
pub use preprocess::Preprocessor;
pub use serving::{PredictRequest, PredictionResponse, PredictionService, ServingError};
pub use training::{EvaluationMetrics, TrainingOptions, TrainingOrchestrator, TrainingOutcome};
