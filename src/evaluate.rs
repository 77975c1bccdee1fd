//! Evaluation pass: model predictions vs. ground truth, by part centroid.

use ndarray::{Array3, Array4};
use tracing::{debug, info};

use crate::centroid::{calculate_centroids, l2_normalize_channels, softmax_channels};
use crate::error::{Error, Result};
use crate::loader::{DataLoader, LoadStats};
use crate::metrics::ErrorAccumulator;
use crate::model::Segmenter;
use crate::types::Batch;

/// Normalized label volumes and centroids of one evaluated batch.
#[derive(Debug, Clone)]
pub struct BatchEvaluation {
    pub indices: Vec<usize>,
    /// `(N, C, H, W)` model input images.
    pub images: Array4<f32>,
    /// Ground truth, L2-normalized per pixel across channels.
    pub ground_truth: Array4<f32>,
    /// Model scores after softmax across channels.
    pub predicted: Array4<f32>,
    /// `(N, L, 2)` ground-truth centroids.
    pub ground_truth_centroids: Array3<f32>,
    /// `(N, L, 2)` predicted centroids.
    pub predicted_centroids: Array3<f32>,
}

/// Run the model on one batch and compute both sets of centroids.
pub fn evaluate_batch<M: Segmenter + ?Sized>(model: &M, batch: &Batch) -> Result<BatchEvaluation> {
    let scores = model.predict(batch)?;
    if scores.dim() != batch.label_dims() {
        return Err(Error::Evaluation(format!(
            "model returned {:?} scores for {:?} labels",
            scores.dim(),
            batch.label_dims()
        )));
    }

    let ground_truth = l2_normalize_channels(batch.labels.view());
    let predicted = softmax_channels(scores.view());
    let ground_truth_centroids = calculate_centroids(ground_truth.view());
    let predicted_centroids = calculate_centroids(predicted.view());

    Ok(BatchEvaluation {
        indices: batch.indices.clone(),
        images: batch.images.clone(),
        ground_truth,
        predicted,
        ground_truth_centroids,
        predicted_centroids,
    })
}

/// Evaluate every batch of `loader` and return the filled accumulator.
///
/// `observe` sees each batch's evaluation after it has been accumulated;
/// use it for artifacts or progress reporting.
pub fn evaluate<M, F>(
    loader: &DataLoader<'_>,
    model: &M,
    mut observe: F,
) -> Result<(ErrorAccumulator, LoadStats)>
where
    M: Segmenter + ?Sized,
    F: FnMut(&BatchEvaluation) -> Result<()>,
{
    let num_labels = loader.dataset().num_labels();
    if model.num_labels() != num_labels {
        return Err(Error::Evaluation(format!(
            "model predicts {} labels but the dataset has {}",
            model.num_labels(),
            num_labels
        )));
    }

    let mut accumulator = ErrorAccumulator::new(num_labels);
    let stats = loader.for_each_batch(|batch| {
        let evaluation = evaluate_batch(model, &batch)?;
        accumulator.update(
            evaluation.predicted_centroids.view(),
            evaluation.ground_truth_centroids.view(),
        )?;
        debug!(samples = accumulator.count(), "batch evaluated");
        observe(&evaluation)
    })?;

    info!(
        samples = stats.samples,
        skipped = stats.skipped,
        batches = stats.batches,
        "evaluation pass finished"
    );
    Ok((accumulator, stats))
}
