use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default root of the local artifact store.
const DEFAULT_ARTIFACT_BASE_PATH: &str = "./artifacts";

/// Default root of the training-job directory convention.
const DEFAULT_ML_PREFIX: &str = "/opt/ml";

/// Settings shared by the training and inference pipelines.
///
/// The same value is persisted next to every trained model, and inference
/// reads it back from there so the two sides always agree on window shape and
/// filtering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of consecutive invocations in one model input window.
    pub sequence_length: usize,
    /// Invocations closer than this to their predecessor are dropped as retries.
    pub min_invocation_gap_secs: f64,
    /// Maximum number of records fetched from the log store per prediction.
    pub history_limit: usize,
    /// Extra rows kept beyond `sequence_length` when preparing inference input.
    pub inference_row_margin: usize,
    /// Batch size used for batched prediction.
    pub prediction_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sequence_length: 10,
            min_invocation_gap_secs: 60.0,
            history_limit: 100,
            inference_row_margin: 50,
            prediction_batch_size: 19,
        }
    }
}

impl PipelineConfig {
    /// Number of most recent rows of a function kept for inference.
    #[must_use]
    pub const fn inference_rows(&self) -> usize {
        self.sequence_length + self.inference_row_margin
    }

    /// Smallest group size that produces at least one window.
    #[must_use]
    pub const fn min_rows_for_window(&self) -> usize {
        self.sequence_length + 1
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` connection string of the invocation log store, if configured.
    pub database_url: Option<String>,

    /// Root directory of the local object store holding model bundles.
    pub artifact_base_path: PathBuf,

    /// Root of the training-job directory layout.
    pub ml_prefix: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `DATABASE_URL`: `PostgreSQL` connection string for the invocation log store
    /// - `ARTIFACT_BASE_PATH`: Base directory of the artifact store (default: `./artifacts`)
    /// - `ML_PREFIX`: Training job root (default: `/opt/ml`)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not valid unicode.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = optional_var("DATABASE_URL")?;
        let artifact_base_path = optional_var("ARTIFACT_BASE_PATH")?
            .map_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_BASE_PATH), PathBuf::from);
        let ml_prefix = optional_var("ML_PREFIX")?
            .map_or_else(|| PathBuf::from(DEFAULT_ML_PREFIX), PathBuf::from);

        Ok(Self {
            database_url,
            artifact_base_path,
            ml_prefix,
        })
    }

    /// Returns the database URL or an error naming the missing variable.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` was not set.
    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL environment variable not set")
    }

    /// Path of the CSV file a training job reads by default.
    #[must_use]
    pub fn training_data_path(&self) -> PathBuf {
        self.ml_prefix
            .join("input")
            .join("data")
            .join("train")
            .join("train_data.csv")
    }

    /// Directory a training job writes its artifact files to by default.
    #[must_use]
    pub fn model_output_dir(&self) -> PathBuf {
        self.ml_prefix.join("model")
    }
}

fn optional_var(name: &str) -> anyhow::Result<Option<String>> {
    match std::env::var(name) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("{name} is not valid unicode")),
    }
}

/// Opens a local object store rooted at `base_path`, creating the directory if needed.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or opened.
pub fn open_object_store(base_path: &Path) -> anyhow::Result<Arc<dyn ObjectStore>> {
    std::fs::create_dir_all(base_path).with_context(|| {
        format!(
            "Failed to create object store directory {}",
            base_path.display()
        )
    })?;

    debug!(base_path = %base_path.display(), "Opening local object store");

    let store = LocalFileSystem::new_with_prefix(base_path)
        .context("Failed to create object store")?;

    Ok(Arc::new(store))
}
