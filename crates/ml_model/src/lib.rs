//! ML model crate for next-invocation gap prediction.
//!
//! This crate uses the Burn deep learning framework to define, train,
//! and run inference with a stacked LSTM that reads a window of engineered
//! invocation rows and predicts the (scaled) gap before the next invocation.

use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Lstm, LstmConfig};
use burn::prelude::*;
use burn::data::dataset::Dataset;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use burn::tensor::TensorData;
use feature_extractor::SequenceSet;

mod dataset;
mod metrics;
mod training;

pub use dataset::*;
pub use metrics::*;
pub use training::*;

/// Configuration for the sequence model.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Hidden units of the first LSTM layer.
    #[config(default = 40)]
    pub lstm_hidden_1: usize,
    /// Hidden units of the second LSTM layer.
    #[config(default = 8)]
    pub lstm_hidden_2: usize,
    /// Dropout rate after each LSTM layer.
    #[config(default = 0.33)]
    pub dropout: f64,
    /// L2 penalty on the input kernels of both LSTM layers, added to the loss.
    #[config(default = 0.01)]
    pub l2_penalty: f64,
}

/// Configuration for training the model.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Model architecture configuration.
    pub model: ModelConfig,
    /// Learning rate for the Adam optimizer.
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
    /// Maximum number of training epochs.
    #[config(default = 25)]
    pub epochs: usize,
    /// Batch size for training and evaluation.
    #[config(default = 19)]
    pub batch_size: usize,
    /// Fraction of windows held out for validation.
    #[config(default = 0.24)]
    pub validation_split: f64,
    /// Epochs without validation improvement before stopping.
    #[config(default = 10)]
    pub early_stopping_patience: usize,
    /// Threshold between the quadratic and linear regions of the Huber loss.
    #[config(default = 1.5)]
    pub huber_delta: f32,
    /// Seed of the train/validation shuffle.
    #[config(default = 42)]
    pub split_seed: u64,
}

/// Two stacked LSTM layers with dropout, followed by a single linear output.
#[derive(Module, Debug)]
pub struct SequenceModel<B: Backend> {
    lstm1: Lstm<B>,
    dropout1: Dropout,
    lstm2: Lstm<B>,
    dropout2: Dropout,
    output: Linear<B>,
}

impl<B: Backend> SequenceModel<B> {
    /// Creates a new model for windows whose steps have `input_features` values.
    pub fn new(device: &B::Device, config: &ModelConfig, input_features: usize) -> Self {
        let lstm1 = LstmConfig::new(input_features, config.lstm_hidden_1, true).init(device);
        let lstm2 = LstmConfig::new(config.lstm_hidden_1, config.lstm_hidden_2, true).init(device);
        let output = LinearConfig::new(config.lstm_hidden_2, 1).init(device);

        Self {
            lstm1,
            dropout1: DropoutConfig::new(config.dropout).init(),
            lstm2,
            dropout2: DropoutConfig::new(config.dropout).init(),
            output,
        }
    }

    /// Forward pass through the network.
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape [`batch_size`, `sequence_length`, `input_features`]
    ///
    /// # Returns
    ///
    /// Tensor of shape [`batch_size`, 1] containing scaled gap predictions.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let (x, _) = self.lstm1.forward(input, None);
        let x = self.dropout1.forward(x);

        // Only the final hidden state of the second layer feeds the output.
        let (_, state) = self.lstm2.forward(x, None);
        let x = self.dropout2.forward(state.hidden);

        self.output.forward(x)
    }

    /// Sum of squared input-to-gate weights of both LSTM layers.
    ///
    /// Recurrent weights, biases and the output layer are not included.
    pub fn input_kernel_penalty(&self) -> Tensor<B, 1> {
        let device = self.output.weight.device();
        [&self.lstm1, &self.lstm2]
            .into_iter()
            .flat_map(|lstm| {
                [
                    &lstm.input_gate,
                    &lstm.forget_gate,
                    &lstm.output_gate,
                    &lstm.cell_gate,
                ]
            })
            .map(|gate| gate.input_transform.weight.val().powi_scalar(2).sum())
            .fold(Tensor::zeros([1], &device), |total, squares| total + squares)
    }
}

/// Creates a new model with the given configuration.
pub fn create_model<B: Backend>(
    device: &B::Device,
    config: &ModelConfig,
    input_features: usize,
) -> SequenceModel<B> {
    SequenceModel::new(device, config, input_features)
}

/// Predicts scaled gaps for every window in `sequences`, `batch_size` windows at a time.
///
/// Returns one value per window, in window order.
///
/// # Errors
///
/// Returns an error if the model output cannot be read back as one `f32` per window.
pub fn predict<B: Backend>(
    model: &SequenceModel<B>,
    sequences: &SequenceSet,
    batch_size: usize,
    device: &B::Device,
) -> anyhow::Result<Vec<f32>> {
    let dataset = SequenceDataset::new(sequences);
    let num_samples = dataset.len();
    if num_samples == 0 {
        return Ok(Vec::new());
    }

    let batcher = SequenceBatcher::<B>::new(
        device.clone(),
        sequences.sequence_length,
        sequences.feature_width,
    );
    let batch_size = batch_size.max(1);
    let mut predictions = Vec::with_capacity(num_samples);

    for batch_start in (0..num_samples).step_by(batch_size) {
        let batch_end = (batch_start + batch_size).min(num_samples);
        let items: Vec<_> = (batch_start..batch_end)
            .filter_map(|i| dataset.get(i))
            .collect();
        let expected = items.len();

        let batch = batcher.batch(items);
        let values = tensor_values(model.forward(batch.inputs).into_data())?;
        if values.len() != expected {
            anyhow::bail!(
                "Model returned {} predictions for a batch of {expected} windows",
                values.len()
            );
        }
        predictions.extend(values);
    }

    Ok(predictions)
}

/// Reads tensor data as `f32` values.
pub(crate) fn tensor_values(data: TensorData) -> anyhow::Result<Vec<f32>> {
    data.to_vec::<f32>()
        .map_err(|err| anyhow::anyhow!("Failed to read tensor data: {err:?}"))
}

/// Serializes the model weights to bytes.
///
/// # Errors
///
/// Returns an error if the record cannot be encoded.
pub fn model_to_bytes<B: Backend>(model: &SequenceModel<B>) -> anyhow::Result<Vec<u8>> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|err| anyhow::anyhow!("Failed to encode model weights: {err:?}"))
}

/// Rebuilds a model from bytes produced by [`model_to_bytes`].
///
/// # Errors
///
/// Returns an error if the bytes are not a record of a model with this shape.
pub fn model_from_bytes<B: Backend>(
    bytes: Vec<u8>,
    config: &ModelConfig,
    input_features: usize,
    device: &B::Device,
) -> anyhow::Result<SequenceModel<B>> {
    let recorder = NamedMpkBytesRecorder::<FullPrecisionSettings>::default();
    let record: SequenceModelRecord<B> = Recorder::<B>::load(&recorder, bytes, device)
        .map_err(|err| anyhow::anyhow!("Failed to decode model weights: {err:?}"))?;

    Ok(SequenceModel::new(device, config, input_features).load_record(record))
}

/// Serializes a model configuration for storage in a bundle manifest.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn model_config_to_json(config: &ModelConfig) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::to_value(config)?)
}

/// Parses a model configuration stored by [`model_config_to_json`].
///
/// # Errors
///
/// Returns an error if the value is not a model configuration.
pub fn model_config_from_json(value: serde_json::Value) -> anyhow::Result<ModelConfig> {
    Ok(serde_json::from_value(value)?)
}
