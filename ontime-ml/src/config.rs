//! Configuration system for FlightOnTime.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/ontime/config.toml` and/or `.ontime/config.toml`
//! in the workspace directory.

use crate::features::FeatureConfig;
use crate::features::columns;
use crate::models::{ImportanceType, ModelSpec};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OntimeConfig {
    /// Raw column names and feature-engineering constants.
    #[serde(default)]
    pub features: FeatureSettings,
    /// Which derived columns the typed pre-processor treats as numeric or categorical.
    #[serde(default)]
    pub feature_columns: FeatureConfig,
    /// Target label construction.
    #[serde(default)]
    pub label: LabelConfig,
    /// Dataset partitioning.
    #[serde(default)]
    pub split: SplitConfig,
    /// Training orchestration.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Estimator and its hyper-parameters. Left unset so a file-level
    /// `[model]` table replaces the default estimator instead of merging into it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSpec>,
    /// Explanation defaults.
    #[serde(default)]
    pub explain: ExplainConfig,
    /// Serving boundary.
    #[serde(default)]
    pub serving: ServingConfig,
}

impl OntimeConfig {
    /// The configured estimator, falling back to gradient boosting.
    pub fn model_spec(&self) -> ModelSpec {
        self.model.clone().unwrap_or_default()
    }
}

/// Raw column names and constants used by the feature pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSettings {
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_delay_column")]
    pub delay_column: String,
    #[serde(default = "default_carrier_column")]
    pub carrier_column: String,
    #[serde(default = "default_origin_column")]
    pub origin_column: String,
    #[serde(default = "default_destination_column")]
    pub destination_column: String,
    #[serde(default = "default_line_type_column")]
    pub line_type_column: String,
    /// Airports flagged by `is_hub`.
    #[serde(default = "default_hub_airports")]
    pub hub_airports: Vec<String>,
    /// Months (1-12) flagged by `alta_temporada`.
    #[serde(default = "default_peak_months")]
    pub peak_months: Vec<u32>,
    /// Upper clip for `atraso_capped`, in minutes.
    #[serde(default = "default_delay_cap")]
    pub delay_cap_minutes: f64,
    /// Columns stripped before records reach the model.
    #[serde(default = "default_leakage_columns")]
    pub leakage_columns: Vec<String>,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            timestamp_column: default_timestamp_column(),
            delay_column: default_delay_column(),
            carrier_column: default_carrier_column(),
            origin_column: default_origin_column(),
            destination_column: default_destination_column(),
            line_type_column: default_line_type_column(),
            hub_airports: default_hub_airports(),
            peak_months: default_peak_months(),
            delay_cap_minutes: default_delay_cap(),
            leakage_columns: default_leakage_columns(),
        }
    }
}

impl FeatureSettings {
    /// Raw fields a serving payload must carry.
    pub fn required_raw_columns(&self) -> Vec<String> {
        vec![
            self.timestamp_column.clone(),
            self.carrier_column.clone(),
            self.origin_column.clone(),
            self.destination_column.clone(),
            self.line_type_column.clone(),
        ]
    }
}

fn default_timestamp_column() -> String {
    columns::SCHEDULED_DEPARTURE.to_string()
}

fn default_delay_column() -> String {
    columns::DELAY_MINUTES.to_string()
}

fn default_carrier_column() -> String {
    columns::CARRIER.to_string()
}

fn default_origin_column() -> String {
    columns::ORIGIN.to_string()
}

fn default_destination_column() -> String {
    columns::DESTINATION.to_string()
}

fn default_line_type_column() -> String {
    columns::LINE_TYPE.to_string()
}

fn default_hub_airports() -> Vec<String> {
    ["SBGR", "SBSP", "SBGL", "SBRJ", "SBCF", "SBKP"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_peak_months() -> Vec<u32> {
    vec![7, 12]
}

fn default_delay_cap() -> f64 {
    120.0
}

fn default_leakage_columns() -> Vec<String> {
    [
        columns::DELAY_MINUTES,
        columns::DELAY_LOG,
        columns::DELAY_CAPPED,
        columns::ACTUAL_DEPARTURE,
        columns::ACTUAL_ARRIVAL,
        columns::FLIGHT_STATUS,
        columns::JUSTIFICATION_CODE,
        columns::TARGET,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Target label construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_target_column")]
    pub target_column: String,
    #[serde(default = "default_actual_departure_column")]
    pub actual_departure_column: String,
    /// A departure delayed by more than this many minutes is positive.
    #[serde(default = "default_threshold_minutes")]
    pub threshold_minutes: f64,
    /// Scheduled departures outside `[min_year, max_year]` are flagged and dropped.
    #[serde(default = "default_min_year")]
    pub min_year: i32,
    #[serde(default = "default_max_year")]
    pub max_year: i32,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            target_column: default_target_column(),
            actual_departure_column: default_actual_departure_column(),
            threshold_minutes: default_threshold_minutes(),
            min_year: default_min_year(),
            max_year: default_max_year(),
        }
    }
}

fn default_target_column() -> String {
    columns::TARGET.to_string()
}

fn default_actual_departure_column() -> String {
    columns::ACTUAL_DEPARTURE.to_string()
}

fn default_threshold_minutes() -> f64 {
    15.0
}

fn default_min_year() -> i32 {
    2021
}

fn default_max_year() -> i32 {
    2025
}

/// How the labelled dataset is partitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SplitStrategy {
    Stratified {
        #[serde(default = "default_test_size")]
        test_size: f64,
    },
    Temporal {
        #[serde(default = "default_train_size")]
        train_size: f64,
        #[serde(default = "default_val_size")]
        val_size: f64,
    },
    Cutoff {
        train_cutoff: String,
        val_cutoff: String,
    },
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self::Temporal {
            train_size: default_train_size(),
            val_size: default_val_size(),
        }
    }
}

fn default_test_size() -> f64 {
    0.2
}

fn default_train_size() -> f64 {
    0.7
}

fn default_val_size() -> f64 {
    0.1
}

/// Dataset partitioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(default, flatten)]
    pub strategy: SplitStrategy,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            strategy: SplitStrategy::default(),
            seed: default_seed(),
        }
    }
}

/// Training orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Global seed; estimator and resampler seeds derive from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Insert SMOTE oversampling between pre-processing and the estimator.
    #[serde(default)]
    pub use_smote: bool,
    #[serde(default = "default_smote_k")]
    pub smote_k_neighbors: usize,
    /// Categories seen fewer times than this collapse into the infrequent bucket.
    #[serde(default = "default_min_category_frequency")]
    pub min_category_frequency: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            use_smote: false,
            smote_k_neighbors: default_smote_k(),
            min_category_frequency: default_min_category_frequency(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_smote_k() -> usize {
    5
}

fn default_min_category_frequency() -> usize {
    500
}

/// Explanation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainConfig {
    /// Features returned per local explanation.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Rows returned by the global importance table.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Importance flavour for boosted models.
    #[serde(default)]
    pub importance_type: ImportanceType,
    /// Output explained for multi-output tree ensembles (defaults to the positive class).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_index: Option<usize>,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            top_n: default_top_n(),
            importance_type: ImportanceType::default(),
            class_index: None,
        }
    }
}

fn default_top_k() -> usize {
    8
}

fn default_top_n() -> usize {
    30
}

/// Serving boundary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Trained artifact loaded once at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    /// Precomputed global importance table served alongside predictions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_importance_path: Option<PathBuf>,
    /// Local explanation size when a request carries no `topk`.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            artifact_path: None,
            global_importance_path: None,
            default_top_k: default_top_k(),
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ONTIME_`)
/// 3. Workspace-local config (`.ontime/config.toml`)
/// 4. User config (`~/.config/ontime/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&OntimeConfig>,
) -> Result<OntimeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(OntimeConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "ontime", "ontime") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".ontime").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (ONTIME_LABEL__THRESHOLD_MINUTES, ONTIME_EXPLAIN__TOP_K, etc.)
    figment = figment.merge(Env::prefixed("ONTIME_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from one explicit TOML file layered over defaults.
pub fn load_config_file(path: &Path) -> Result<OntimeConfig, Box<figment::Error>> {
    Figment::from(Serialized::defaults(OntimeConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ONTIME_").split("__"))
        .extract()
        .map_err(Box::new)
}
