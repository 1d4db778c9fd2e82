use chrono::{DateTime, Utc};
use config::PipelineConfig;
use serde::{Deserialize, Serialize};

/// File name of the serialized network weights inside a bundle.
pub const MODEL_FILE: &str = "model.mpk";
/// File name of the fitted scaler inside a bundle.
pub const SCALER_FILE: &str = "scaler.json";
/// File name of the fitted function encoding inside a bundle.
pub const ENCODING_FILE: &str = "function_encoding.json";
/// File name of the bundle manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Regression quality on the held-out split, in scaled target space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct EvaluationMetrics {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
}

/// Metadata stored next to a trained model bundle.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelManifest {
    pub project_id: String,
    /// Bundle version; the training completion time in epoch milliseconds.
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    /// Pipeline settings the bundle was trained with.
    pub pipeline: PipelineConfig,
    /// Network architecture, as serialized by the model crate.
    pub model_config: serde_json::Value,
    /// Width of one window step (number of input features).
    pub input_features: usize,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub epochs_completed: usize,
    pub metrics: Option<EvaluationMetrics>,
}
