//! Serverless invocation forecasting
//!
//! Trains per-project sequence models on invocation logs and predicts when
//! each function will be invoked next.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{Config, PipelineConfig};
use database::{LogStore, MemoryLogStore, PgLogStore, create_pool, read_records_csv, run_migrations};
use invocation_forecast::commands::{export, predict, train};
use invocation_structs::PredictionRequest;
use ml_model::{ModelConfig, TrainingConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serverless invocation forecaster
#[derive(Parser)]
#[command(name = "forecast")]
#[command(about = "Predicts the next invocation of serverless functions from their logs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a project's model and publish it to the artifact store
    Train {
        /// Project whose model is trained
        #[arg(long = "project-id", alias = "projectId")]
        project_id: String,

        /// Training CSV (defaults to `{ML_PREFIX}/input/data/train/train_data.csv`)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for local artifact copies (defaults to `{ML_PREFIX}/model`)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Number of training epochs
        #[arg(short, long, default_value = "25")]
        epochs: usize,

        /// Batch size for training
        #[arg(short, long, default_value = "19")]
        batch_size: usize,

        /// Learning rate
        #[arg(short, long, default_value = "0.001")]
        learning_rate: f64,

        /// Number of invocations in one model input window
        #[arg(long, default_value = "10")]
        sequence_length: usize,

        /// Do not archive previously published bundles
        #[arg(long)]
        keep_previous: bool,
    },

    /// Predict the next invocation gaps of a function
    Predict {
        /// Project of the function
        #[arg(long = "project-id", alias = "projectId")]
        project_id: String,

        /// Function to predict
        #[arg(long = "function-name", alias = "functionName")]
        function_name: String,

        /// Read invocation records from this CSV instead of the database
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Export a project's invocation log as training CSV
    Export {
        /// Project to export
        #[arg(long = "project-id", alias = "projectId")]
        project_id: String,

        /// Output CSV path
        #[arg(short, long, default_value = "train_data.csv")]
        output: PathBuf,
    },

    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;

    match cli.command {
        Commands::Train {
            project_id,
            input,
            output_dir,
            epochs,
            batch_size,
            learning_rate,
            sequence_length,
            keep_previous,
        } => {
            let mut job = train::TrainJobConfig::new(project_id, &config);
            if let Some(input) = input {
                job.input = input;
            }
            if let Some(output_dir) = output_dir {
                job.output_dir = output_dir;
            }
            job.pipeline = PipelineConfig {
                sequence_length,
                ..PipelineConfig::default()
            };
            job.training = TrainingConfig::new(ModelConfig::new())
                .with_epochs(epochs)
                .with_batch_size(batch_size)
                .with_learning_rate(learning_rate);
            job.keep_previous = keep_previous;

            let manifest = train::run(&config, &job).await?;
            info!(version = manifest.version, "Model published");
        }
        Commands::Predict {
            project_id,
            function_name,
            records,
        } => {
            let request = PredictionRequest {
                project_id: project_id.as_str().into(),
                function_name,
            };

            if let Some(path) = records {
                let store = MemoryLogStore::new();
                store.append(&project_id, &read_records_csv(&path)?).await?;
                report_prediction(&config, store, &request).await?;
            } else {
                let pool = create_pool(config.require_database_url()?).await?;
                report_prediction(&config, PgLogStore::new(pool), &request).await?;
            }
        }
        Commands::Export { project_id, output } => {
            let pool = create_pool(config.require_database_url()?).await?;
            let count = export::run(&PgLogStore::new(pool), &project_id, &output).await?;
            info!(records = count, output = %output.display(), "Export complete");
        }
        Commands::Migrate => {
            let pool = create_pool(config.require_database_url()?).await?;
            run_migrations(&pool).await?;
            info!("Migrations completed successfully");
        }
    }

    Ok(())
}

async fn report_prediction<S: LogStore>(
    config: &Config,
    logs: S,
    request: &PredictionRequest,
) -> Result<()> {
    let (response, next) = predict::run(config, logs, request).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    info!(
        function_name = %next.function_name,
        next_invocation_ms = next.time_ms,
        "Estimated next invocation"
    );
    Ok(())
}
