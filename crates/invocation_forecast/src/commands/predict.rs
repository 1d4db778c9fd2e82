//! Predict command - forecasts the next invocation gaps of one function.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use burn::backend::NdArray;
use burn::backend::ndarray::NdArrayDevice;
use config::{Config, PipelineConfig, open_object_store};
use database::{ArtifactStore, LogStore, StoredBundle};
use feature_extractor::{
    EngineerMode, FunctionEncoding, Preprocessor, StandardScaler, engineer, make_sequences,
};
use invocation_structs::{
    ENCODING_FILE, ForecastError, InvocationRecord, MANIFEST_FILE, MODEL_FILE, ModelManifest,
    NextInvocation, PredictionBody, PredictionRequest, PredictionResponse, SCALER_FILE,
};
use ml_model::{SequenceModel, model_config_from_json, model_from_bytes, predict};
use tracing::{debug, info, warn};

use super::init_device;
use super::schedule::next_invocation;

type Backend = NdArray;

/// Message returned while a project has no published model.
pub const MODEL_IN_TRAINING: &str = "Model is in training";

/// Result of one prediction request.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    /// Predicted seconds until the next invocation, one per window.
    Predictions(Vec<f64>),
    /// Too few usable records to form a window.
    InsufficientData { available: usize, required: usize },
    /// The project has no published bundle.
    ArtifactNotFound { prefix: String },
    /// A record or the stored bundle is malformed.
    SchemaError(String),
}

impl From<ForecastError> for PredictionOutcome {
    fn from(err: ForecastError) -> Self {
        match err {
            ForecastError::ArtifactNotFound { prefix } => Self::ArtifactNotFound { prefix },
            ForecastError::InsufficientHistory {
                available,
                required,
                ..
            } => Self::InsufficientData {
                available,
                required,
            },
            ForecastError::Schema(_) | ForecastError::EncodingMissing => {
                Self::SchemaError(err.to_string())
            }
        }
    }
}

impl PredictionOutcome {
    /// HTTP-style status code of the outcome.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Predictions(_) | Self::InsufficientData { .. } => 200,
            Self::ArtifactNotFound { .. } => 404,
            Self::SchemaError(_) => 422,
        }
    }

    /// Builds the response envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn into_response(self) -> Result<PredictionResponse> {
        let status_code = self.status_code();
        let body = match self {
            Self::Predictions(data) => PredictionBody {
                data,
                message: None,
            },
            Self::InsufficientData { .. } => PredictionBody {
                data: Vec::new(),
                message: None,
            },
            Self::ArtifactNotFound { .. } => PredictionBody {
                data: Vec::new(),
                message: Some(MODEL_IN_TRAINING.to_string()),
            },
            Self::SchemaError(message) => PredictionBody {
                data: Vec::new(),
                message: Some(message),
            },
        };
        Ok(PredictionResponse::new(status_code, &body)?)
    }
}

/// Outcome of a request plus the newest record it was based on.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub outcome: PredictionOutcome,
    /// Invocation time (epoch ms) of the most recent record used, if any.
    pub last_invoked_at_ms: Option<i64>,
}

/// A bundle decoded and ready for inference.
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub version: u64,
    pub manifest: ModelManifest,
    pub preprocessor: Preprocessor,
    pub model: SequenceModel<Backend>,
}

/// Inference driver.
///
/// Keeps the decoded bundle of every project it has served, and reloads it
/// when a newer version is published.
#[derive(Debug)]
pub struct Predictor<S> {
    artifacts: ArtifactStore,
    logs: S,
    device: NdArrayDevice,
    cache: Mutex<HashMap<String, LoadedBundle>>,
}

impl<S: LogStore> Predictor<S> {
    pub fn new(artifacts: ArtifactStore, logs: S) -> Self {
        Self {
            artifacts,
            logs,
            device: init_device(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Answers a request with a response envelope.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failures.
    pub async fn handle(&self, request: &PredictionRequest) -> Result<PredictionResponse> {
        self.forecast(request).await?.outcome.into_response()
    }

    /// Predicts the next gaps of the requested function.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failures. Missing models, bad data and
    /// short histories are reported through [`PredictionOutcome`].
    pub async fn forecast(&self, request: &PredictionRequest) -> Result<Forecast> {
        let project_id = request.project_id.to_string();
        let function_name = request.function_name.as_str();
        info!(project_id = %project_id, function_name, "Predicting next invocation");

        let bundle = match self.bundle(&project_id).await? {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(project_id = %project_id, error = %err, "No usable model bundle");
                return Ok(Forecast {
                    outcome: err.into(),
                    last_invoked_at_ms: None,
                });
            }
        };

        let pipeline = bundle.manifest.pipeline;
        let newest_first = self
            .logs
            .recent_invocations(&project_id, function_name, pipeline.history_limit)
            .await?;

        let last_invoked_at_ms = newest_first
            .iter()
            .filter_map(|record| record.invoked_at_ms().ok())
            .max();

        let outcome = match run_inference(&bundle, newest_first, &pipeline, &self.device)? {
            Ok(predictions) => PredictionOutcome::Predictions(predictions),
            Err(err) => {
                warn!(project_id = %project_id, function_name, error = %err, "Prediction skipped");
                err.into()
            }
        };

        Ok(Forecast {
            outcome,
            last_invoked_at_ms,
        })
    }

    /// Latest bundle of a project, from the cache when its version is current.
    async fn bundle(&self, project_id: &str) -> Result<Result<LoadedBundle, ForecastError>> {
        let Some(version) = self.artifacts.latest_version(project_id).await? else {
            return Ok(Err(ForecastError::ArtifactNotFound {
                prefix: ArtifactStore::model_prefix(project_id).to_string(),
            }));
        };

        if let Some(cached) = self.cached(project_id, version)? {
            debug!(project_id, version, "Using cached model bundle");
            return Ok(Ok(cached));
        }

        let stored = self.artifacts.load_bundle(project_id, version).await?;
        let loaded = match decode_bundle(stored, &self.device) {
            Ok(loaded) => loaded,
            Err(err) => return Ok(Err(err)),
        };

        info!(project_id, version, "Loaded model bundle");
        self.cache
            .lock()
            .map_err(|_| anyhow::anyhow!("Bundle cache lock poisoned"))?
            .insert(project_id.to_string(), loaded.clone());
        Ok(Ok(loaded))
    }

    fn cached(&self, project_id: &str, version: u64) -> Result<Option<LoadedBundle>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| anyhow::anyhow!("Bundle cache lock poisoned"))?;
        Ok(cache
            .get(project_id)
            .filter(|bundle| bundle.version == version)
            .cloned())
    }
}

/// Runs the predict command.
///
/// # Errors
///
/// Returns an error if the artifact store cannot be opened or a storage call fails.
pub async fn run<S: LogStore>(
    config: &Config,
    logs: S,
    request: &PredictionRequest,
) -> Result<(PredictionResponse, NextInvocation)> {
    let artifacts = ArtifactStore::new(open_object_store(&config.artifact_base_path)?);
    let predictor = Predictor::new(artifacts, logs);

    let forecast = predictor.forecast(request).await?;
    let predictions: &[f64] = match &forecast.outcome {
        PredictionOutcome::Predictions(gaps) => gaps.as_slice(),
        _ => &[],
    };
    let next = next_invocation(
        &request.function_name,
        forecast.last_invoked_at_ms,
        predictions,
    );

    Ok((forecast.outcome.into_response()?, next))
}

/// Turns the newest-first records of one function into unscaled gap predictions.
///
/// Only the most recent `sequence_length + inference_row_margin` records are used.
///
/// # Errors
///
/// Returns an error if the model output cannot be read. The inner result
/// carries [`ForecastError::InsufficientHistory`] if no window can be formed,
/// or a schema error if a record cannot be decoded.
pub fn run_inference(
    bundle: &LoadedBundle,
    newest_first: Vec<InvocationRecord>,
    pipeline: &PipelineConfig,
    device: &NdArrayDevice,
) -> Result<Result<Vec<f64>, ForecastError>> {
    let function_name = newest_first
        .first()
        .map(|record| record.function_name.clone())
        .unwrap_or_default();
    let required = pipeline.min_rows_for_window();

    let mut records: Vec<InvocationRecord> = newest_first
        .into_iter()
        .take(pipeline.inference_rows())
        .collect();
    records.reverse();

    if records.len() < required {
        return Ok(Err(ForecastError::InsufficientHistory {
            function_name,
            available: records.len(),
            required,
        }));
    }

    let engineered = match engineer(
        &records,
        EngineerMode::Transform(&bundle.preprocessor),
        pipeline,
    ) {
        Ok(engineered) => engineered,
        Err(err) => return Ok(Err(err)),
    };
    let sequences = make_sequences(&engineered.samples, pipeline.sequence_length);
    if sequences.is_empty() {
        return Ok(Err(ForecastError::InsufficientHistory {
            function_name,
            available: engineered.samples.len(),
            required,
        }));
    }

    let scaled = predict(
        &bundle.model,
        &sequences,
        pipeline.prediction_batch_size,
        device,
    )?;
    debug!(windows = sequences.len(), "Ran batched prediction");

    Ok(Ok(bundle.preprocessor.inverse_target(&scaled)))
}

/// Decodes the stored files of a bundle.
///
/// # Errors
///
/// Returns [`ForecastError::EncodingMissing`] if the bundle has no function
/// encoding, and a schema error for any other missing or malformed file.
pub fn decode_bundle(
    stored: StoredBundle,
    device: &NdArrayDevice,
) -> Result<LoadedBundle, ForecastError> {
    let version = stored.version;
    let missing = |name: &str| ForecastError::schema(format!("bundle {version} has no {name}"));
    let malformed = |name: &str, err: &dyn std::fmt::Display| {
        ForecastError::schema(format!("bundle {version} has a malformed {name}: {err}"))
    };

    let encoding_bytes = stored.encoding.ok_or(ForecastError::EncodingMissing)?;
    let manifest_bytes = stored.manifest.ok_or_else(|| missing(MANIFEST_FILE))?;
    let scaler_bytes = stored.scaler.ok_or_else(|| missing(SCALER_FILE))?;
    let model_bytes = stored.model.ok_or_else(|| missing(MODEL_FILE))?;

    let encoding: FunctionEncoding =
        serde_json::from_slice(&encoding_bytes).map_err(|err| malformed(ENCODING_FILE, &err))?;
    let manifest: ModelManifest =
        serde_json::from_slice(&manifest_bytes).map_err(|err| malformed(MANIFEST_FILE, &err))?;
    let scaler: StandardScaler =
        serde_json::from_slice(&scaler_bytes).map_err(|err| malformed(SCALER_FILE, &err))?;

    let preprocessor = Preprocessor::from_parts(scaler, encoding)?;
    if preprocessor.input_features() != manifest.input_features {
        return Err(ForecastError::schema(format!(
            "bundle {version} expects {} input features but its encoding yields {}",
            manifest.input_features,
            preprocessor.input_features()
        )));
    }

    let model_config = model_config_from_json(manifest.model_config.clone())
        .map_err(|err| malformed(MANIFEST_FILE, &err))?;
    let model = model_from_bytes::<Backend>(
        model_bytes.to_vec(),
        &model_config,
        manifest.input_features,
        device,
    )
    .map_err(|err| malformed(MODEL_FILE, &err))?;

    Ok(LoadedBundle {
        version,
        manifest,
        preprocessor,
        model,
    })
}
