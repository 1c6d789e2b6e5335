//! Serving boundary: request validation, prediction responses, structured
//! errors and the process-wide pipeline handle.
//!
//! The handle is installed once at startup and read-only afterwards; request
//! handlers fetch it with [`handle`].

use crate::artifact::TrainedPipeline;
use crate::config::OntimeConfig;
use crate::data::Record;
use crate::error::{ErrorKind, MlError};
use crate::explain::{Explainer, GlobalImportance, LocalExplanation};
use crate::persistence::load_json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const LABEL_DELAYED: &str = "atrasado";
pub const LABEL_ON_TIME: &str = "no_prazo";

#[derive(Debug, Error)]
pub enum ServingError {
    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model not ready: {0}")]
    NotReady(String),

    #[error(transparent)]
    Pipeline(#[from] MlError),
}

impl ServingError {
    /// HTTP-equivalent status: 4xx for bad input, 5xx when the pipeline
    /// cannot serve.
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingFields { .. } | Self::InvalidInput(_) => 400,
            Self::NotReady(_) => 503,
            Self::Pipeline(err) => match err.kind() {
                ErrorKind::DataQuality => 422,
                ErrorKind::FitState => 503,
                _ if matches!(err, MlError::MissingColumn(_)) => 400,
                _ => 500,
            },
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let status = self.status();
        let errors = match self {
            Self::MissingFields { fields } => fields
                .iter()
                .map(|f| format!("{f}: campo obrigatório ausente"))
                .collect(),
            _ => Vec::new(),
        };
        ErrorResponse {
            timestamp: Utc::now(),
            status,
            error: reason_phrase(status).to_string(),
            message: self.to_string(),
            errors,
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        422 => "Unprocessable Entity",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Structured error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub dados: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topk: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: u8,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proba_atraso: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain_local: Option<LocalExplanation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain_local_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub model_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub global_importance_loaded: bool,
    pub version: String,
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Reject a record lacking any required field (absent, null or blank), or
/// whose origin equals its destination. Runs before any model invocation.
pub fn validate_record(
    record: &Record,
    required: &[String],
    origin_column: &str,
    destination_column: &str,
) -> Result<(), ServingError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|field| is_missing(record.get(field.as_str())))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ServingError::MissingFields { fields: missing });
    }

    let code = |column: &str| {
        record
            .get(column)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_uppercase())
    };
    match (code(origin_column), code(destination_column)) {
        (Some(origin), Some(destination)) if origin == destination => Err(
            ServingError::InvalidInput(format!(
                "origin and destination must differ (both {origin})"
            )),
        ),
        _ => Ok(()),
    }
}

pub struct PredictionService {
    pipeline: TrainedPipeline,
    required: Vec<String>,
    origin_column: String,
    destination_column: String,
    default_top_k: usize,
    class_index: Option<usize>,
    global_importance: Option<Vec<GlobalImportance>>,
}

impl PredictionService {
    pub fn new(pipeline: TrainedPipeline, config: &OntimeConfig) -> Self {
        Self {
            pipeline,
            required: config.features.required_raw_columns(),
            origin_column: config.features.origin_column.clone(),
            destination_column: config.features.destination_column.clone(),
            default_top_k: config.serving.default_top_k,
            class_index: config.explain.class_index,
            global_importance: None,
        }
    }

    pub fn with_global_importance(mut self, table: Vec<GlobalImportance>) -> Self {
        self.global_importance = Some(table);
        self
    }

    /// Load the artifact and optional global importance table named in the
    /// serving configuration.
    pub fn from_config(config: &OntimeConfig) -> Result<Self, ServingError> {
        let path = config
            .serving
            .artifact_path
            .as_deref()
            .ok_or_else(|| ServingError::NotReady("no artifact path configured".into()))?;
        let pipeline = TrainedPipeline::load(path)
            .map_err(|e| ServingError::NotReady(format!("failed to load artifact: {e}")))?;

        let mut service = Self::new(pipeline, config);
        if let Some(table_path) = config.serving.global_importance_path.as_deref() {
            match load_json::<Vec<GlobalImportance>>(table_path) {
                Ok(Some(table)) => service.global_importance = Some(table),
                Ok(None) => warn!(path = %table_path.display(), "Global importance file not found"),
                Err(e) => warn!(path = %table_path.display(), error = %e, "Global importance file unreadable"),
            }
        }
        Ok(service)
    }

    pub fn pipeline(&self) -> &TrainedPipeline {
        &self.pipeline
    }

    pub fn global_importance(&self) -> Option<&[GlobalImportance]> {
        self.global_importance.as_deref()
    }

    /// Validate, predict, then attach a local explanation. An explanation
    /// failure degrades to `explain_local_error`; the prediction stands.
    pub fn predict(&self, request: &PredictRequest) -> Result<PredictionResponse, ServingError> {
        validate_record(
            &request.dados,
            &self.required,
            &self.origin_column,
            &self.destination_column,
        )?;

        let prediction = self.pipeline.predict_record(&request.dados)?;
        let top_k = request.topk.unwrap_or(self.default_top_k);
        let (explain_local, explain_local_error) = match Explainer::new(&self.pipeline)
            .explain_local(&request.dados, top_k, self.class_index)
        {
            Ok(explanation) => (Some(explanation), None),
            Err(e) => {
                debug!(error = %e, "Local explanation unavailable");
                (None, Some(e.to_string()))
            }
        };

        Ok(PredictionResponse {
            prediction: prediction.prediction,
            label: if prediction.prediction == 1 {
                LABEL_DELAYED
            } else {
                LABEL_ON_TIME
            }
            .to_string(),
            proba_atraso: prediction.proba,
            explain_local,
            explain_local_error,
        })
    }

    pub fn health(&self) -> HealthReport {
        let meta = self.pipeline.metadata();
        HealthReport {
            status: "UP".to_string(),
            model_loaded: true,
            model: Some(meta.model_name.clone()),
            run_id: Some(meta.run_id.to_string()),
            global_importance_loaded: self.global_importance.is_some(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

static SERVICE: OnceLock<PredictionService> = OnceLock::new();

/// Install the process-wide service. Only the first call succeeds; later
/// calls hand their service back.
pub fn install(service: PredictionService) -> Result<(), PredictionService> {
    let model = service.pipeline.metadata().model_name.clone();
    SERVICE.set(service)?;
    info!(model = %model, "Prediction service installed");
    Ok(())
}

pub fn handle() -> Result<&'static PredictionService, ServingError> {
    SERVICE
        .get()
        .ok_or_else(|| ServingError::NotReady("prediction service not installed".into()))
}

/// Health of the installed service, or `DOWN` before installation.
pub fn health() -> HealthReport {
    match handle() {
        Ok(service) => service.health(),
        Err(_) => HealthReport {
            status: "DOWN".to_string(),
            model_loaded: false,
            model: None,
            run_id: None,
            global_importance_loaded: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSettings;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn required() -> Vec<String> {
        FeatureSettings::default().required_raw_columns()
    }

    #[test]
    fn test_missing_field_named_exactly() {
        let rec = record(json!({
            "partida_prevista": "2024-03-01 22:30:00",
            "empresa_aerea": "GLO",
            "aerodromo_origem": "SBGR",
            "codigo_tipo_linha": "N"
        }));
        let err = validate_record(&rec, &required(), "aerodromo_origem", "aerodromo_destino")
            .unwrap_err();
        match &err {
            ServingError::MissingFields { fields } => {
                assert_eq!(fields, &vec!["aerodromo_destino".to_string()])
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(err.status(), 400);
        let body = err.to_response();
        assert_eq!(body.error, "Bad Request");
        assert_eq!(body.errors.len(), 1);
    }

    #[test]
    fn test_null_and_blank_count_as_missing() {
        let rec = record(json!({
            "partida_prevista": null,
            "empresa_aerea": "  ",
            "aerodromo_origem": "SBGR",
            "aerodromo_destino": "SBRJ",
            "codigo_tipo_linha": "N"
        }));
        let err = validate_record(&rec, &required(), "aerodromo_origem", "aerodromo_destino")
            .unwrap_err();
        assert!(
            matches!(err, ServingError::MissingFields { fields } if fields == vec!["partida_prevista", "empresa_aerea"])
        );
    }

    #[test]
    fn test_same_route_rejected() {
        let rec = record(json!({
            "partida_prevista": "2024-03-01 10:00:00",
            "empresa_aerea": "GLO",
            "aerodromo_origem": "SBGR",
            "aerodromo_destino": "sbgr",
            "codigo_tipo_linha": "N"
        }));
        let err = validate_record(&rec, &required(), "aerodromo_origem", "aerodromo_destino")
            .unwrap_err();
        assert!(matches!(err, ServingError::InvalidInput(_)));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServingError::NotReady("x".into()).status(), 503);
        assert_eq!(
            ServingError::from(MlError::NotFitted {
                component: "FeaturePipeline"
            })
            .status(),
            503
        );
        assert_eq!(
            ServingError::from(MlError::missing_column("hora_dia")).status(),
            400
        );
        assert_eq!(
            ServingError::from(MlError::model("bad")).to_response().error,
            "Internal Server Error"
        );
    }

    #[test]
    fn test_health_down_before_install() {
        assert_eq!(health().status, "DOWN");
        assert!(!health().model_loaded);
        assert!(matches!(handle(), Err(ServingError::NotReady(_))));
    }

    #[test]
    fn test_request_envelope() {
        let req: PredictRequest = serde_json::from_value(json!({
            "dados": {"empresa_aerea": "GLO"}
        }))
        .unwrap();
        assert_eq!(req.topk, None);
        assert_eq!(req.dados["empresa_aerea"], "GLO");
    }
}
