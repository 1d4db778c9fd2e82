//! Dataset and batching for Burn training.

use burn::prelude::*;
use feature_extractor::{Sequence, SequenceSet};

/// A single window in the sequence dataset.
#[derive(Debug, Clone)]
pub struct SequenceDatasetItem {
    /// Row-major `[sequence_length, feature_width]` inputs.
    pub inputs: Vec<f32>,
    /// Scaled target gap.
    pub target: f32,
}

impl From<&Sequence> for SequenceDatasetItem {
    fn from(sequence: &Sequence) -> Self {
        Self {
            inputs: sequence.inputs.clone(),
            target: sequence.target,
        }
    }
}

/// Dataset of windows for training and evaluation.
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    items: Vec<SequenceDatasetItem>,
}

impl SequenceDataset {
    /// Creates a dataset from a set of windows.
    #[must_use]
    pub fn new(set: &SequenceSet) -> Self {
        let items = set.sequences.iter().map(SequenceDatasetItem::from).collect();
        Self { items }
    }
}

impl burn::data::dataset::Dataset<SequenceDatasetItem> for SequenceDataset {
    fn get(&self, index: usize) -> Option<SequenceDatasetItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A batch of windows.
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    /// Inputs tensor of shape `[batch_size, sequence_length, feature_width]`.
    pub inputs: Tensor<B, 3>,
    /// Targets tensor of shape `[batch_size, 1]`.
    pub targets: Tensor<B, 2>,
}

/// Batcher for creating window batches.
#[derive(Debug, Clone)]
pub struct SequenceBatcher<B: Backend> {
    device: B::Device,
    sequence_length: usize,
    feature_width: usize,
}

impl<B: Backend> SequenceBatcher<B> {
    /// Creates a new batcher for windows of the given shape.
    #[must_use]
    pub const fn new(device: B::Device, sequence_length: usize, feature_width: usize) -> Self {
        Self {
            device,
            sequence_length,
            feature_width,
        }
    }

    /// Creates a batch from a vector of items.
    pub fn batch(&self, items: Vec<SequenceDatasetItem>) -> SequenceBatch<B> {
        let batch_size = items.len();

        let mut inputs_data =
            Vec::with_capacity(batch_size * self.sequence_length * self.feature_width);
        let mut targets_data = Vec::with_capacity(batch_size);

        for item in items {
            inputs_data.extend_from_slice(&item.inputs);
            targets_data.push(item.target);
        }

        let inputs = Tensor::<B, 1>::from_floats(inputs_data.as_slice(), &self.device).reshape([
            batch_size,
            self.sequence_length,
            self.feature_width,
        ]);

        let targets = Tensor::<B, 1>::from_floats(targets_data.as_slice(), &self.device)
            .reshape([batch_size, 1]);

        SequenceBatch { inputs, targets }
    }
}
