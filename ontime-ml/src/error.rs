//! Error types for the ontime-ml crate.

use thiserror::Error;

/// Top-level error type for pipeline, training and explanation operations.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Feature configuration mismatch: {missing:?} absent after the feature pipeline ran")]
    FeatureMismatch { missing: Vec<String> },

    #[error("{component} is not fitted; call fit before transform")]
    NotFitted { component: &'static str },

    #[error("Partition invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Unsupported model type for explainability: {0}")]
    UnsupportedModel(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Coarse classification of an [`MlError`], used by callers that need to
/// decide between "bad input" and "pipeline not ready" without matching on
/// every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    FitState,
    DataQuality,
    Invariant,
    UnsupportedModel,
    Internal,
}

impl MlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing_column(name: impl Into<String>) -> Self {
        Self::MissingColumn(name.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::MissingColumn(_)
            | Self::FeatureMismatch { .. }
            | Self::Unavailable(_) => ErrorKind::Configuration,
            Self::NotFitted { .. } => ErrorKind::FitState,
            Self::Dataset(_) => ErrorKind::DataQuality,
            Self::InvariantViolation(_) => ErrorKind::Invariant,
            Self::UnsupportedModel(_) => ErrorKind::UnsupportedModel,
            Self::Training(_) | Self::Model(_) | Self::Io(_) | Self::Serde(_) => {
                ErrorKind::Internal
            }
        }
    }
}
