//! Fixed-length windows over engineered samples.

use crate::EngineeredSample;

/// One model input window with its regression target.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub function_name: String,
    /// Row-major `[sequence_length, feature_width]` input values.
    pub inputs: Vec<f32>,
    /// Scaled `time_since_last_invocation` of the row right after the window.
    pub target: f32,
}

/// Windows built from one batch of samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequenceSet {
    pub sequence_length: usize,
    pub feature_width: usize,
    pub sequences: Vec<Sequence>,
}

impl SequenceSet {
    /// Number of windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Returns true if there are no windows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Targets in window order.
    #[must_use]
    pub fn targets(&self) -> Vec<f32> {
        self.sequences.iter().map(|s| s.target).collect()
    }

    /// Returns a set holding the windows at `indices`, in that order.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            sequence_length: self.sequence_length,
            feature_width: self.feature_width,
            sequences: indices
                .iter()
                .filter_map(|&i| self.sequences.get(i).cloned())
                .collect(),
        }
    }
}

/// Builds windows of `sequence_length` consecutive samples per function.
///
/// Samples of one function must be contiguous and in time order, as produced
/// by [`crate::engineer`]. A window never spans two functions: each run of
/// equal `function_name` is windowed on its own, so a run of `n` rows yields
/// `n - sequence_length` windows (none if `n <= sequence_length`).
#[must_use]
pub fn make_sequences(samples: &[EngineeredSample], sequence_length: usize) -> SequenceSet {
    let feature_width = samples.first().map_or(0, |s| s.features.len());
    let mut sequences = Vec::new();

    if sequence_length > 0 {
        for group in samples.chunk_by(|a, b| a.function_name == b.function_name) {
            if group.len() <= sequence_length {
                continue;
            }

            for start in 0..group.len() - sequence_length {
                let window = &group[start..start + sequence_length];
                let next = &group[start + sequence_length];

                let Some(target) = next.target else {
                    continue;
                };

                let mut inputs = Vec::with_capacity(sequence_length * feature_width);
                for sample in window {
                    inputs.extend_from_slice(&sample.features);
                }

                sequences.push(Sequence {
                    function_name: next.function_name.clone(),
                    inputs,
                    target,
                });
            }
        }
    }

    SequenceSet {
        sequence_length,
        feature_width,
        sequences,
    }
}
