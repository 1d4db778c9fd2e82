//! Train command - fits a project's model on exported invocation logs and publishes the bundle.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use bytes::Bytes;
use chrono::Utc;
use config::{Config, PipelineConfig, open_object_store};
use database::{ArtifactStore, BundleFiles, read_records_csv};
use feature_extractor::{Engineered, EngineerMode, Preprocessor, engineer, make_sequences};
use invocation_structs::{
    ENCODING_FILE, InvocationRecord, MANIFEST_FILE, MODEL_FILE, ModelManifest, SCALER_FILE,
};
use ml_model::{
    ModelConfig, TrainingConfig, create_model, evaluate, model_config_to_json, model_to_bytes,
    split_sequences, train,
};
use tracing::{info, warn};

use super::init_device;

/// Training requires Autodiff wrapper for automatic differentiation.
type TrainBackend = Autodiff<NdArray>;

/// Configuration of one training job.
#[derive(Debug, Clone)]
pub struct TrainJobConfig {
    /// Project whose model prefix receives the bundle.
    pub project_id: String,
    /// CSV export of the project's invocation log.
    pub input: PathBuf,
    /// Directory receiving a local copy of the bundle files.
    pub output_dir: PathBuf,
    pub pipeline: PipelineConfig,
    pub training: TrainingConfig,
    /// Leave previously published bundles under the model prefix.
    pub keep_previous: bool,
}

impl TrainJobConfig {
    /// Job with default hyperparameters and the training-job directory layout of `config`.
    #[must_use]
    pub fn new(project_id: impl Into<String>, config: &Config) -> Self {
        Self {
            project_id: project_id.into(),
            input: config.training_data_path(),
            output_dir: config.model_output_dir(),
            pipeline: PipelineConfig::default(),
            training: TrainingConfig::new(ModelConfig::new()),
            keep_previous: false,
        }
    }
}

/// Everything a training run produces.
#[derive(Debug, Clone)]
pub struct TrainedBundle {
    pub preprocessor: Preprocessor,
    /// Named-msgpack record of the trained network.
    pub model: Vec<u8>,
    pub manifest: ModelManifest,
}

impl TrainedBundle {
    /// Serializes the bundle into its four stored files.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_files(&self) -> Result<BundleFiles> {
        Ok(BundleFiles {
            model: Bytes::from(self.model.clone()),
            scaler: Bytes::from(serde_json::to_vec_pretty(&self.preprocessor.scaler)?),
            encoding: Bytes::from(serde_json::to_vec_pretty(&self.preprocessor.encoding)?),
            manifest: Bytes::from(serde_json::to_vec_pretty(&self.manifest)?),
        })
    }
}

/// Runs the train command.
///
/// # Errors
///
/// Returns an error if the data cannot be read, training fails, or the bundle cannot be stored.
pub async fn run(config: &Config, job: &TrainJobConfig) -> Result<ModelManifest> {
    let artifacts = ArtifactStore::new(open_object_store(&config.artifact_base_path)?);
    run_with_config(job, &artifacts).await
}

/// Runs the training pipeline against an explicit artifact store.
///
/// # Errors
///
/// Returns an error if the data cannot be read, training fails, or the bundle cannot be stored.
pub async fn run_with_config(job: &TrainJobConfig, artifacts: &ArtifactStore) -> Result<ModelManifest> {
    info!(
        project_id = %job.project_id,
        input = %job.input.display(),
        epochs = job.training.epochs,
        "Starting training job"
    );

    info!("Step 1: Loading training data...");
    let records = read_records_csv(&job.input)?;
    if records.is_empty() {
        anyhow::bail!("No invocation records in {}", job.input.display());
    }

    info!("Step 2: Training model...");
    let bundle = train_bundle(&job.project_id, &records, &job.pipeline, &job.training)?;
    let files = bundle.to_files()?;

    info!("Step 3: Writing local artifacts...");
    write_local_files(&job.output_dir, &files)?;

    info!("Step 4: Publishing model bundle...");
    if job.keep_previous {
        info!("Keeping previously published bundles");
    } else {
        artifacts.archive_existing(&job.project_id).await?;
    }
    artifacts
        .save_bundle(&job.project_id, bundle.manifest.version, files)
        .await?;

    info!(
        project_id = %job.project_id,
        version = bundle.manifest.version,
        "=== Training job completed successfully ==="
    );
    Ok(bundle.manifest)
}

/// Fits the preprocessor and the network on `records` and evaluates the held-out split.
///
/// # Errors
///
/// Returns an error if the records cannot be engineered, no function has enough
/// history to form a window, or training fails.
pub fn train_bundle(
    project_id: &str,
    records: &[InvocationRecord],
    pipeline: &PipelineConfig,
    training: &TrainingConfig,
) -> Result<TrainedBundle> {
    let device = init_device();

    let Engineered {
        samples,
        preprocessor,
    } = engineer(records, EngineerMode::Fit, pipeline)?;
    let preprocessor = preprocessor.into_owned();

    let sequences = make_sequences(&samples, pipeline.sequence_length);
    if sequences.is_empty() {
        anyhow::bail!(
            "No function has more than {} usable invocations",
            pipeline.sequence_length
        );
    }

    let (train_set, valid_set) =
        split_sequences(&sequences, training.validation_split, training.split_seed);
    info!(
        records = records.len(),
        samples = samples.len(),
        functions = preprocessor.encoding.width(),
        train_windows = train_set.len(),
        valid_windows = valid_set.len(),
        "Prepared training windows"
    );

    let input_features = preprocessor.input_features();
    let mut model = create_model::<TrainBackend>(&device, &training.model, input_features);
    let output = train(&mut model, &train_set, &valid_set, training)?;

    let model = model.valid();
    let metrics = if valid_set.is_empty() {
        warn!("No validation windows, skipping evaluation");
        None
    } else {
        let metrics = evaluate(&model, &valid_set, pipeline.prediction_batch_size, &device)?;
        info!(
            mae = metrics.mae,
            mse = metrics.mse,
            rmse = metrics.rmse,
            r2 = metrics.r2,
            "Evaluation on held-out windows"
        );
        Some(metrics)
    };

    let trained_at = Utc::now();
    let manifest = ModelManifest {
        project_id: project_id.to_string(),
        version: u64::try_from(trained_at.timestamp_millis()).unwrap_or_default(),
        trained_at,
        pipeline: *pipeline,
        model_config: model_config_to_json(&training.model)?,
        input_features,
        training_samples: train_set.len(),
        validation_samples: valid_set.len(),
        epochs_completed: output.epochs_completed,
        metrics,
    };

    Ok(TrainedBundle {
        preprocessor,
        model: model_to_bytes(&model)?,
        manifest,
    })
}

/// Writes the bundle files into `dir`.
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be written.
pub fn write_local_files(dir: &Path, files: &BundleFiles) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    for (name, data) in [
        (MODEL_FILE, &files.model),
        (SCALER_FILE, &files.scaler),
        (ENCODING_FILE, &files.encoding),
        (MANIFEST_FILE, &files.manifest),
    ] {
        let path = dir.join(name);
        std::fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    info!(dir = %dir.display(), "Wrote model artifacts");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use database::write_records_csv;
    use object_store::memory::InMemory;

    use super::*;

    pub(crate) const BASE_MS: i64 = 1_700_000_000_000;

    pub(crate) fn record(function_name: &str, millis: i64, duration: f64) -> InvocationRecord {
        InvocationRecord {
            function_name: function_name.to_string(),
            last_invoked_at: format!("{function_name}#{millis}"),
            init_duration: if millis % 3 == 0 { Some(180.0) } else { None },
            duration,
            max_memory_used: 60.0 + duration / 10.0,
            memory_size: 128.0,
            id: None,
            project_id: Some(String::from("p1")),
            project_id_function_name: None,
            request_id: None,
            stream_name: None,
            function_arn: None,
            billed_duration: None,
            start_up_time: None,
        }
    }

    /// `count` invocations per function, a few minutes apart.
    pub(crate) fn history(functions: &[&str], count: i64) -> Vec<InvocationRecord> {
        functions
            .iter()
            .enumerate()
            .flat_map(|(f, name)| {
                (0..count).map(move |i| {
                    let millis = BASE_MS + i * 300_000 + (i % 5) * 7_000 + f as i64 * 11_000;
                    record(name, millis, 20.0 + (i % 4) as f64)
                })
            })
            .collect()
    }

    pub(crate) fn quick_training() -> TrainingConfig {
        TrainingConfig::new(ModelConfig::new()).with_epochs(2)
    }

    #[test]
    fn test_train_bundle_manifest() {
        let records = history(&["alpha", "beta", "gamma"], 20);
        let pipeline = PipelineConfig::default();

        let bundle = train_bundle("p1", &records, &pipeline, &quick_training()).expect("train");

        // 3 functions x (20 - 10) windows, 24% held out.
        assert_eq!(bundle.manifest.training_samples, 22);
        assert_eq!(bundle.manifest.validation_samples, 8);
        assert_eq!(bundle.manifest.input_features, 7 + 3);
        assert_eq!(bundle.manifest.epochs_completed, 2);
        assert_eq!(bundle.manifest.pipeline, pipeline);
        assert!(bundle.manifest.metrics.is_some());
        assert_eq!(
            bundle.preprocessor.encoding.functions,
            vec!["alpha", "beta", "gamma"]
        );
        assert!(!bundle.model.is_empty());
    }

    #[test]
    fn test_train_bundle_without_windows_fails() {
        let records = history(&["alpha"], 10);
        let result = train_bundle("p1", &records, &PipelineConfig::default(), &quick_training());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_publishes_and_archives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("train_data.csv");
        write_records_csv(&input, &history(&["alpha", "beta"], 16)).expect("csv");

        let artifacts = ArtifactStore::new(Arc::new(InMemory::new()));
        let job = TrainJobConfig {
            project_id: String::from("p1"),
            input,
            output_dir: dir.path().join("model"),
            pipeline: PipelineConfig::default(),
            training: quick_training(),
            keep_previous: false,
        };

        let first = run_with_config(&job, &artifacts).await.expect("first run");
        for name in [MODEL_FILE, SCALER_FILE, ENCODING_FILE, MANIFEST_FILE] {
            assert!(job.output_dir.join(name).exists(), "{name} missing");
        }
        assert_eq!(
            artifacts.versions("p1").await.expect("list"),
            vec![first.version]
        );

        let second = run_with_config(&job, &artifacts).await.expect("second run");
        assert_eq!(
            artifacts.versions("p1").await.expect("list"),
            vec![second.version]
        );
    }

    #[tokio::test]
    async fn test_run_rejects_empty_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("train_data.csv");
        write_records_csv(&input, &[]).expect("csv");

        let artifacts = ArtifactStore::new(Arc::new(InMemory::new()));
        let mut job = TrainJobConfig::new("p1", &Config {
            database_url: None,
            artifact_base_path: dir.path().join("artifacts"),
            ml_prefix: dir.path().to_path_buf(),
        });
        job.input = input;

        assert!(run_with_config(&job, &artifacts).await.is_err());
    }
}
