//! Training: orchestration, resampling, evaluation and reproducibility.

pub mod metrics;
pub mod orchestrator;
pub mod reproducibility;
pub mod resample;

pub use metrics::{ClassMetrics, ClassificationReport, EvaluationMetrics, MetricsSummary};
pub use orchestrator::{
    Evaluation, TrainingOptions, TrainingOrchestrator, TrainingOutcome, evaluate, split_target,
};
pub use reproducibility::{RunEnvironment, SeedManager};
pub use resample::{ResampleReport, Smote, SmoteConfig};
