use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{s, Array3, Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::dataset::{load_label_volume, LABEL_FULL};
use crate::error::{Error, Result};
use crate::loader::{sample_seed, DataLoader};
use crate::transforms::Transform;
use crate::types::{Batch, Sample};

/// A segmentation model.
///
/// Takes a batch of `(N, 3, H, W)` images and returns unnormalized
/// per-pixel class scores `(N, L, H, W)`. The evaluator applies softmax
/// over `L` before computing centroids.
pub trait Segmenter: Sync {
    /// Number of label channels `L` the model predicts.
    fn num_labels(&self) -> usize;

    fn predict(&self, batch: &Batch) -> Result<Array4<f32>>;
}

/// Probability floor used when turning stored masks into log-scores.
const MIN_PROBABILITY: f32 = 1e-6;

/// Precomputed predictions stored as per-part masks.
///
/// Masks follow the dataset's label naming, `root/<name>/<name>_lblNN.png`,
/// for every foreground label of the dataset, in the source image geometry.
/// The dataset's transform is replayed on each predicted volume with the
/// loader's per-sample seed, so predictions receive exactly the shifts,
/// rotations, rescaling and mirroring applied to that sample's ground truth.
/// The residual channel is synthesized as for ground truth (and recomputed
/// after the replay, so pixels moved in from outside count as background).
/// Intensities are returned as log-probabilities so that softmax recovers
/// the stored distribution.
pub struct MaskDirectory {
    root: PathBuf,
    names: Vec<String>,
    foreground: Vec<usize>,
    transform: Option<Arc<dyn Transform>>,
    seed: u64,
}

impl MaskDirectory {
    /// Predictions for the samples served by `loader`, stored under `root`.
    pub fn for_loader<P: AsRef<Path>>(root: P, loader: &DataLoader<'_>) -> Result<Self> {
        let dataset = loader.dataset();
        let names = (0..dataset.len())
            .map(|i| dataset.name(i).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            names,
            foreground: dataset.foreground().to_vec(),
            transform: dataset.transform(),
            seed: loader.seed(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_scores(&self, index: usize) -> Result<Array3<f32>> {
        let name = self.names.get(index).ok_or_else(|| {
            Error::Evaluation(format!("no prediction entry for sample {}", index))
        })?;
        let volume = load_label_volume(&self.root, name, &self.foreground, None)?;
        let volume = match &self.transform {
            Some(transform) => self.replay(transform.as_ref(), volume, index)?,
            None => volume,
        };
        Ok(volume.mapv(|v| (v / LABEL_FULL).max(MIN_PROBABILITY).ln()))
    }

    /// Run the sample's transform on a predicted volume.
    ///
    /// Transforms draw their parameters without looking at pixel values, so
    /// a blank image carrying the prediction consumes the same random draws
    /// as the real sample did.
    fn replay(
        &self,
        transform: &dyn Transform,
        volume: Array3<f32>,
        index: usize,
    ) -> Result<Array3<f32>> {
        let (_, h, w) = volume.dim();
        let carrier = Sample::new(Array3::zeros((h, w, 3)), volume, index)?;
        let mut rng = StdRng::seed_from_u64(sample_seed(self.seed, index));
        let mut labels = transform.apply(carrier, &mut rng)?.labels;
        refill_residual(&mut labels);
        Ok(labels)
    }
}

/// Recompute the last channel as `255 - sum(foreground)`.
fn refill_residual(volume: &mut Array3<f32>) {
    let parts = volume.len_of(Axis(0)).saturating_sub(1);
    let covered = volume.slice(s![..parts, .., ..]).sum_axis(Axis(0));
    volume
        .index_axis_mut(Axis(0), parts)
        .assign(&covered.mapv(|v| (LABEL_FULL - v).max(0.0)));
}

impl std::fmt::Debug for MaskDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskDirectory")
            .field("root", &self.root)
            .field("samples", &self.names.len())
            .field("foreground", &self.foreground)
            .field("seed", &self.seed)
            .finish()
    }
}

impl Segmenter for MaskDirectory {
    fn num_labels(&self) -> usize {
        self.foreground.len() + 1
    }

    fn predict(&self, batch: &Batch) -> Result<Array4<f32>> {
        let (_, _, h, w) = batch.label_dims();
        let volumes = batch
            .indices
            .par_iter()
            .map(|&i| self.load_scores(i))
            .collect::<Result<Vec<_>>>()?;

        for (volume, index) in volumes.iter().zip(&batch.indices) {
            let (_, vh, vw) = volume.dim();
            if (vh, vw) != (h, w) {
                return Err(Error::Evaluation(format!(
                    "predictions for sample {} are {}x{}, batch is {}x{}",
                    index, vh, vw, h, w
                )));
            }
        }

        let views: Vec<_> = volumes.iter().map(|v| v.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }
}
