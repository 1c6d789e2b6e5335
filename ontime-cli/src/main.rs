//! FlightOnTime CLI: train, predict and explain flight delay models.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// FlightOnTime: predict whether a scheduled departure will run late
#[derive(Parser, Debug)]
#[command(name = "ontime", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (reads `.ontime/config.toml` from here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the user and workspace files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Label a historical extract, partition it, train and evaluate
    Train {
        /// Flight records as a JSON array or JSON lines
        #[arg(short, long)]
        data: PathBuf,
        /// Directory receiving the artifact, metrics and importance table
        #[arg(short, long, default_value = "artifacts")]
        out: PathBuf,
        /// Estimator override: gradient_boosting, random_forest or logistic_regression
        #[arg(short, long)]
        model: Option<String>,
        /// Oversample the minority class before fitting
        #[arg(long)]
        smote: bool,
    },
    /// Predict one request (`{"dados": {...}, "topk": 8}`) read from a file or stdin
    Predict {
        /// Trained artifact (defaults to `serving.artifact_path`)
        #[arg(short, long)]
        artifact: Option<PathBuf>,
        /// Request file; `-` reads stdin
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Local explanation of one raw flight record
    Explain {
        #[arg(short, long)]
        artifact: PathBuf,
        /// Record file; `-` reads stdin
        #[arg(default_value = "-")]
        record: PathBuf,
        /// Features to report (defaults to `explain.top_k`)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output explained for multi-output ensembles
        #[arg(long)]
        class_index: Option<usize>,
    },
    /// Global feature importance of a trained artifact
    Importance {
        #[arg(short, long)]
        artifact: PathBuf,
        /// Rows to report (defaults to `explain.top_n`)
        #[arg(short = 'n', long)]
        top_n: Option<usize>,
        /// Boosted-model importance: gain, weight, cover, total_gain or total_cover
        #[arg(long)]
        kind: Option<String>,
    },
    /// Health of a trained artifact as the serving boundary reports it
    Health {
        #[arg(short, long)]
        artifact: Option<PathBuf>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the merged configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "ontime", "ontime")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ontime.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref())
}
