//! Training logic for the sequence model.

use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::nn::loss::{HuberLoss, HuberLossConfig, Reduction};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use feature_extractor::SequenceSet;
use tracing::{debug, info};

use crate::dataset::{SequenceBatcher, SequenceDataset};
use crate::{SequenceModel, TrainingConfig, tensor_values};

/// Output from training.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    /// Mean training loss of the last completed epoch.
    pub final_train_loss: f32,
    /// Validation loss of the last completed epoch, if there was validation data.
    pub final_valid_loss: Option<f32>,
    /// Lowest validation loss seen; its weights are the ones kept.
    pub best_valid_loss: Option<f32>,
    /// Number of epochs completed.
    pub epochs_completed: usize,
    /// True if training ended on the patience limit.
    pub stopped_early: bool,
}

/// Splits windows into a shuffled training set and a held-out validation set.
///
/// The validation set takes `ceil(ratio * n)` windows but always leaves at
/// least one for training.
#[must_use]
pub fn split_sequences(set: &SequenceSet, ratio: f64, seed: u64) -> (SequenceSet, SequenceSet) {
    let n = set.len();
    let mut indices: Vec<usize> = (0..n).collect();
    shuffle_indices(&mut indices, seed);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let wanted = (ratio.clamp(0.0, 1.0) * n as f64).ceil() as usize;
    let n_valid = wanted.min(n.saturating_sub(1));

    let (valid, train) = indices.split_at(n_valid);
    (set.select(train), set.select(valid))
}

/// Trains the model on `train_set`, validating on `valid_set` after every epoch.
///
/// Minimizes the Huber loss plus the L2 penalty on the LSTM input kernels
/// with Adam. When validation data is present, training stops after
/// `early_stopping_patience` epochs without improvement and the model is
/// left holding the best weights seen.
///
/// # Errors
///
/// Returns an error if there are no training windows or a loss cannot be read.
pub fn train<B: AutodiffBackend>(
    model: &mut SequenceModel<B>,
    train_set: &SequenceSet,
    valid_set: &SequenceSet,
    config: &TrainingConfig,
) -> anyhow::Result<TrainingOutput> {
    if train_set.is_empty() {
        return Err(anyhow::anyhow!("No training sequences provided"));
    }

    let device = model.output.weight.device();
    let batch_size = config.batch_size.max(1);

    let dataset = SequenceDataset::new(train_set);
    let valid_dataset = SequenceDataset::new(valid_set);

    let batcher =
        SequenceBatcher::<B>::new(device.clone(), train_set.sequence_length, train_set.feature_width);
    let valid_batcher = SequenceBatcher::<B::InnerBackend>::new(
        device,
        valid_set.sequence_length,
        valid_set.feature_width,
    );

    let mut optimizer = AdamConfig::new().init();
    let loss_fn = HuberLossConfig::new(config.huber_delta).init();
    let l2_penalty = config.model.l2_penalty;

    let mut final_train_loss = 0.0;
    let mut final_valid_loss: Option<f32> = None;
    let mut best_valid_loss: Option<f32> = None;
    let mut best_model: Option<SequenceModel<B>> = None;
    let mut epochs_without_improvement = 0;
    let mut epochs_completed = 0;
    let mut stopped_early = false;

    for epoch in 0..config.epochs {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        shuffle_indices(&mut indices, config.split_seed.wrapping_add(epoch as u64 + 1));

        let mut epoch_loss = 0.0;
        let mut batch_count: u32 = 0;

        for batch_indices in indices.chunks(batch_size) {
            let items: Vec<_> = batch_indices
                .iter()
                .filter_map(|&i| dataset.get(i))
                .collect();

            if items.is_empty() {
                continue;
            }

            let batch = batcher.batch(items);
            let predictions = model.forward(batch.inputs);
            let loss = loss_fn.forward(predictions, batch.targets, Reduction::Mean)
                + model.input_kernel_penalty().mul_scalar(l2_penalty);

            epoch_loss += f64::from(scalar(loss.clone())?);
            batch_count += 1;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, model);
            *model = optimizer.step(config.learning_rate, model.clone(), grads);
        }

        final_train_loss = mean_loss(epoch_loss, batch_count);
        epochs_completed = epoch + 1;

        if !valid_dataset.is_empty() {
            let valid_loss = validation_loss(
                &model.valid(),
                &valid_dataset,
                &valid_batcher,
                &loss_fn,
                l2_penalty,
                batch_size,
            )?;
            final_valid_loss = Some(valid_loss);

            if best_valid_loss.is_none_or(|best| valid_loss < best) {
                best_valid_loss = Some(valid_loss);
                best_model = Some(model.clone());
                epochs_without_improvement = 0;
            } else {
                epochs_without_improvement += 1;
            }
        }

        debug!(
            epoch = epochs_completed,
            train_loss = final_train_loss,
            valid_loss = ?final_valid_loss,
            "Epoch finished"
        );

        if !valid_dataset.is_empty() && epochs_without_improvement >= config.early_stopping_patience {
            info!(
                patience = config.early_stopping_patience,
                epoch = epochs_completed,
                "Early stopping"
            );
            stopped_early = true;
            break;
        }
    }

    if let Some(best) = best_model {
        *model = best;
    }

    info!(
        epochs = epochs_completed,
        train_loss = final_train_loss,
        valid_loss = ?final_valid_loss,
        best_valid_loss = ?best_valid_loss,
        "Training finished"
    );

    Ok(TrainingOutput {
        final_train_loss,
        final_valid_loss,
        best_valid_loss,
        epochs_completed,
        stopped_early,
    })
}

/// Mean regularized Huber loss over the validation windows, without dropout.
fn validation_loss<B: Backend>(
    model: &SequenceModel<B>,
    dataset: &SequenceDataset,
    batcher: &SequenceBatcher<B>,
    loss_fn: &HuberLoss,
    l2_penalty: f64,
    batch_size: usize,
) -> anyhow::Result<f32> {
    let num_samples = dataset.len();
    let penalty = f64::from(scalar(model.input_kernel_penalty())?) * l2_penalty;

    let mut total_loss = 0.0;
    let mut batch_count: u32 = 0;

    for batch_start in (0..num_samples).step_by(batch_size.max(1)) {
        let batch_end = (batch_start + batch_size).min(num_samples);
        let items: Vec<_> = (batch_start..batch_end)
            .filter_map(|i| dataset.get(i))
            .collect();

        if items.is_empty() {
            continue;
        }

        let batch = batcher.batch(items);
        let predictions = model.forward(batch.inputs);
        let loss = loss_fn.forward(predictions, batch.targets, Reduction::Mean);

        total_loss += f64::from(scalar(loss)?) + penalty;
        batch_count += 1;
    }

    Ok(mean_loss(total_loss, batch_count))
}

#[allow(clippy::cast_possible_truncation)]
fn mean_loss(total: f64, batches: u32) -> f32 {
    if batches == 0 {
        0.0
    } else {
        (total / f64::from(batches)) as f32
    }
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> anyhow::Result<f32> {
    tensor_values(loss.into_data())?
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("Loss tensor is empty"))
}

/// Shuffles indices using a simple LCG-based shuffle.
fn shuffle_indices(indices: &mut [usize], seed: u64) {
    // Fisher-Yates with an LCG
    let mut rng_state = seed.wrapping_add(12345);

    for i in (1..indices.len()).rev() {
        rng_state = rng_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        #[allow(clippy::cast_possible_truncation)]
        let j = ((rng_state >> 33) as usize) % (i + 1);
        indices.swap(i, j);
    }
}
