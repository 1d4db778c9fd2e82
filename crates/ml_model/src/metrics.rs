//! Regression metrics for held-out evaluation.

use burn::prelude::*;
use feature_extractor::SequenceSet;
use invocation_structs::EvaluationMetrics;

use crate::{SequenceModel, predict};

/// Computes MAE, MSE, RMSE and R² of `predictions` against `targets`.
///
/// R² follows the usual convention for a constant target: 1 for a perfect
/// fit, 0 otherwise. Empty input yields all-zero metrics.
#[must_use]
pub fn regression_metrics(predictions: &[f32], targets: &[f32]) -> EvaluationMetrics {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return EvaluationMetrics::default();
    }

    let pairs = || {
        predictions
            .iter()
            .zip(targets)
            .map(|(&p, &t)| (f64::from(p), f64::from(t)))
    };

    let mae = pairs().map(|(p, t)| (p - t).abs()).sum::<f64>() / n as f64;
    let ss_res: f64 = pairs().map(|(p, t)| (p - t).powi(2)).sum();
    let mse = ss_res / n as f64;

    let mean = pairs().map(|(_, t)| t).sum::<f64>() / n as f64;
    let ss_tot: f64 = pairs().map(|(_, t)| (t - mean).powi(2)).sum();

    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    EvaluationMetrics {
        mae,
        mse,
        rmse: mse.sqrt(),
        r2,
    }
}

/// Predicts every window of `set` and scores the predictions against its targets.
///
/// # Errors
///
/// Returns an error if the predictions cannot be read.
pub fn evaluate<B: Backend>(
    model: &SequenceModel<B>,
    set: &SequenceSet,
    batch_size: usize,
    device: &B::Device,
) -> anyhow::Result<EvaluationMetrics> {
    let predictions = predict(model, set, batch_size, device)?;
    Ok(regression_metrics(&predictions, &set.targets()))
}
