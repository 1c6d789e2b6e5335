//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::{Context, anyhow, bail};
use ontime_ml::data::{LabelReport, build_labels};
use ontime_ml::explain::Explainer;
use ontime_ml::models::ImportanceType;
use ontime_ml::persistence::atomic_write_json;
use ontime_ml::serving::{self, PredictRequest, PredictionService, ServingError};
use ontime_ml::training::{Evaluation, MetricsSummary, evaluate};
use ontime_ml::{
    Frame, MlError, OntimeConfig, Record, TrainedPipeline, TrainingOrchestrator, load_config,
    load_config_file, split,
};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const ARTIFACT_FILE: &str = "pipeline.json";
const METRICS_FILE: &str = "metrics.json";
const IMPORTANCE_FILE: &str = "global_importance.json";

pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Train {
            data,
            out,
            model,
            smote,
        } => {
            let mut config = load_settings(workspace, config_path)?;
            if let Some(name) = model {
                config.model = Some(name.parse()?);
            }
            if smote {
                config.training.use_smote = true;
            }
            handle_train(&config, &data, &out)
        }
        Commands::Predict { artifact, input } => {
            let mut config = load_settings(workspace, config_path)?;
            if artifact.is_some() {
                config.serving.artifact_path = artifact;
            }
            handle_predict(&config, &input)
        }
        Commands::Explain {
            artifact,
            record,
            top_k,
            class_index,
        } => {
            let config = load_settings(workspace, config_path)?;
            let pipeline = TrainedPipeline::load(&artifact)
                .with_context(|| format!("loading artifact {}", artifact.display()))?;
            let record: Record = serde_json::from_str(&read_input(&record)?)
                .context("record is not a JSON object")?;
            let explanation = Explainer::new(&pipeline).explain_local(
                &record,
                top_k.unwrap_or(config.explain.top_k),
                class_index.or(config.explain.class_index),
            )?;
            println!("{}", serde_json::to_string_pretty(&explanation)?);
            Ok(())
        }
        Commands::Importance {
            artifact,
            top_n,
            kind,
        } => {
            let config = load_settings(workspace, config_path)?;
            let kind = kind
                .map(|k| k.parse::<ImportanceType>())
                .transpose()?
                .unwrap_or(config.explain.importance_type);
            let pipeline = TrainedPipeline::load(&artifact)
                .with_context(|| format!("loading artifact {}", artifact.display()))?;
            let table = Explainer::new(&pipeline)
                .explain_global(top_n.unwrap_or(config.explain.top_n), kind)?;
            println!("{}", serde_json::to_string_pretty(&table)?);
            Ok(())
        }
        Commands::Health { artifact } => {
            let mut config = load_settings(workspace, config_path)?;
            if artifact.is_some() {
                config.serving.artifact_path = artifact;
            }
            match PredictionService::from_config(&config) {
                Ok(service) => {
                    if serving::install(service).is_err() {
                        warn!("Prediction service was already installed");
                    }
                }
                Err(e) => warn!(error = %e, "Serving is not ready"),
            }
            println!("{}", serde_json::to_string_pretty(&serving::health())?);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

fn load_settings(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<OntimeConfig> {
    match config_path {
        Some(path) => load_config_file(path),
        None => load_config(Some(workspace), None),
    }
    .map_err(|e| anyhow!("Configuration error: {}", e))
}

/// Everything the training run reports next to the artifact.
#[derive(Debug, Serialize)]
struct TrainingReport {
    run_id: String,
    model: String,
    labels: LabelReport,
    partitions: PartitionSizes,
    test: MetricsSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<MetricsSummary>,
    evaluation: Evaluation,
}

#[derive(Debug, Serialize)]
struct PartitionSizes {
    train: usize,
    validation: usize,
    test: usize,
}

fn handle_train(config: &OntimeConfig, data: &Path, out: &Path) -> anyhow::Result<()> {
    let records = read_records(data)?;
    let target = config.label.target_column.as_str();
    let timestamp = config.features.timestamp_column.as_str();

    let (labelled, labels) = build_labels(
        Frame::from_records(&records),
        timestamp,
        &config.features.delay_column,
        &config.label,
    )?;
    if labelled.is_empty() {
        bail!("no rows survived labelling; check timestamps and the year range");
    }

    let parts = split(&labelled, &config.split, timestamp, target)?;
    let (train, validation, test) = parts.sizes();

    let outcome = TrainingOrchestrator::from_config(config).train(&parts.train, &parts.test)?;
    let validation_summary = if parts.validation.is_empty() {
        None
    } else {
        Some(evaluate(&outcome.pipeline, &parts.validation, target)?.metrics.summary())
    };

    std::fs::create_dir_all(out)
        .with_context(|| format!("creating output directory {}", out.display()))?;
    let artifact_path = out.join(ARTIFACT_FILE);
    outcome.pipeline.save(&artifact_path)?;

    let metadata = outcome.pipeline.metadata();
    let report = TrainingReport {
        run_id: metadata.run_id.to_string(),
        model: metadata.model_name.clone(),
        labels,
        partitions: PartitionSizes {
            train,
            validation,
            test,
        },
        test: outcome.evaluation.metrics.summary(),
        validation: validation_summary,
        evaluation: outcome.evaluation.clone(),
    };
    atomic_write_json(&out.join(METRICS_FILE), &report)?;

    match Explainer::new(&outcome.pipeline)
        .explain_global(config.explain.top_n, config.explain.importance_type)
    {
        Ok(table) => atomic_write_json(&out.join(IMPORTANCE_FILE), &table)?,
        Err(MlError::UnsupportedModel(reason)) => {
            warn!(reason = %reason, "Skipping global importance table")
        }
        Err(e) => return Err(e.into()),
    }

    info!(artifact = %artifact_path.display(), "Training run complete");
    println!("Run {} ({})", report.run_id, report.model);
    println!(
        "  rows: {} kept of {}, {:.1}% delayed",
        report.labels.kept_rows,
        report.labels.total_rows,
        report.labels.positive_rate() * 100.0
    );
    println!("  split: train {train}, validation {validation}, test {test}");
    println!(
        "  test: accuracy {:.3}, f1(delayed) {:.3}, roc_auc {}",
        report.test.accuracy,
        report.test.f1_pos,
        report
            .test
            .roc_auc
            .map(|v| format!("{v:.3}"))
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("  artifact: {}", artifact_path.display());
    Ok(())
}

fn handle_predict(config: &OntimeConfig, input: &Path) -> anyhow::Result<()> {
    let service = PredictionService::from_config(config).map_err(error_body)?;
    if serving::install(service).is_err() {
        warn!("Prediction service was already installed");
    }

    let request: PredictRequest = serde_json::from_str(&read_input(input)?)
        .context("request body must look like {\"dados\": {...}, \"topk\": 8}")?;
    let response = serving::handle()
        .and_then(|service| service.predict(&request))
        .map_err(error_body)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Print the structured error body and turn it into a failed exit.
fn error_body(error: ServingError) -> anyhow::Error {
    let body = error.to_response();
    match serde_json::to_string_pretty(&body) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "Failed to render error body"),
    }
    anyhow!("{} ({})", error, body.status)
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".ontime");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = OntimeConfig {
                model: Some(OntimeConfig::default().model_spec()),
                ..Default::default()
            };
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_settings(workspace, config_path)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn read_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let text = read_input(path)?;
    let records = parse_records(&text)
        .with_context(|| format!("parsing flight records from {}", display(path)))?;
    info!(rows = records.len(), "Read flight records");
    Ok(records)
}

fn display(path: &Path) -> String {
    if path == Path::new("-") {
        "stdin".to_string()
    } else {
        path.display().to_string()
    }
}

/// A JSON array of objects, or one object per line.
fn parse_records(text: &str) -> anyhow::Result<Vec<Record>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<Record>(line).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}
