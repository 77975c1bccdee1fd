//! Batched, parallel sample loading.
//!
//! A producer thread loads and transforms the samples of each batch in
//! parallel (rayon) and hands finished batches to the consumer through a
//! bounded channel, so loading overlaps with evaluation.

use std::sync::mpsc;
use std::thread;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dataset::ImageDataset;
use crate::error::{Error, Result};
use crate::types::{Batch, Sample};

/// What to do when a single sample fails to load or transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Log a warning and leave the sample out.
    #[default]
    Skip,
    /// Stop the run with the sample's error.
    Abort,
}

/// Counts reported at the end of a loading pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub batches: usize,
    pub samples: usize,
    pub skipped: usize,
}

/// Seed of the generator used for sample `index` in a run seeded with `seed`.
pub fn sample_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64)
        .wrapping_add(1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Iterates a dataset in batches.
#[derive(Debug)]
pub struct DataLoader<'a> {
    dataset: &'a ImageDataset,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    on_error: OnError,
    prefetch: usize,
}

impl<'a> DataLoader<'a> {
    pub fn new(dataset: &'a ImageDataset, batch_size: usize, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch size must be positive".into()));
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle: false,
            seed,
            on_error: OnError::Skip,
            prefetch: 2,
        })
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Number of finished batches buffered ahead of the consumer.
    pub fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn dataset(&self) -> &ImageDataset {
        self.dataset
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Dataset indices in visiting order.
    pub fn order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut StdRng::seed_from_u64(self.seed));
        }
        order
    }

    /// Load one sample with its own deterministic generator.
    pub fn load_sample(&self, index: usize) -> Result<Sample> {
        let mut rng = StdRng::seed_from_u64(sample_seed(self.seed, index));
        self.dataset.get(index, &mut rng)
    }

    /// Load the given indices in parallel and stack them.
    ///
    /// Returns `Ok(None)` when every sample was skipped.
    pub fn load_batch(&self, indices: &[usize]) -> Result<(Option<Batch>, usize)> {
        let results: Vec<Result<Sample>> = indices
            .par_iter()
            .map(|&i| self.load_sample(i))
            .collect();

        let mut samples = Vec::with_capacity(results.len());
        let mut skipped = 0;
        for (result, &index) in results.into_iter().zip(indices) {
            match result {
                Ok(sample) => samples.push(sample),
                Err(e) if self.on_error == OnError::Skip && e.is_skippable() => {
                    warn!(index, error = %e, "skipping sample");
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if samples.is_empty() {
            return Ok((None, skipped));
        }
        Ok((Some(Batch::collate(&samples)?), skipped))
    }

    /// Feed every batch to `consume`, loading ahead on a producer thread.
    ///
    /// Stops at the first error from either side.
    pub fn for_each_batch<F>(&self, mut consume: F) -> Result<LoadStats>
    where
        F: FnMut(Batch) -> Result<()>,
    {
        let order = self.order();
        let (tx, rx) = mpsc::sync_channel::<Result<(Option<Batch>, usize)>>(self.prefetch);

        thread::scope(|scope| {
            scope.spawn(move || {
                for chunk in order.chunks(self.batch_size) {
                    let loaded = self.load_batch(chunk);
                    let failed = loaded.is_err();
                    // The consumer hung up; nothing left to do.
                    if tx.send(loaded).is_err() || failed {
                        break;
                    }
                }
            });

            let mut stats = LoadStats::default();
            for message in rx {
                let (batch, skipped) = message?;
                stats.skipped += skipped;
                if let Some(batch) = batch {
                    stats.batches += 1;
                    stats.samples += batch.len();
                    debug!(batch = stats.batches, size = batch.len(), "batch ready");
                    consume(batch)?;
                }
            }
            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{label_path, PartSelection, NUM_SOURCE_LABELS};
    use crate::transforms::{Compose, ToTensor};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::fs;
    use std::path::Path;

    fn write_dataset(root: &Path, names: &[&str]) {
        fs::create_dir_all(root.join("images")).unwrap();
        let list: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, n)| format!("{}, {}", i, n))
            .collect();
        fs::write(root.join("list.txt"), list.join("\n")).unwrap();

        for name in names {
            fs::create_dir_all(root.join("labels").join(name)).unwrap();
            RgbImage::from_pixel(8, 6, Rgb([100, 100, 100]))
                .save(root.join("images").join(format!("{}.jpg", name)))
                .unwrap();
            for label in 0..NUM_SOURCE_LABELS {
                GrayImage::from_pixel(8, 6, Luma([if label == 2 { 255 } else { 0 }]))
                    .save(label_path(&root.join("labels"), name, label))
                    .unwrap();
            }
        }
    }

    fn open(root: &Path) -> ImageDataset {
        ImageDataset::open(root, "list.txt", &PartSelection::Foreground(vec![2, 3]))
            .unwrap()
            .with_transform(Compose::new().then(ToTensor))
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a"]);
        let dataset = open(dir.path());
        assert!(DataLoader::new(&dataset, 0, 0).is_err());
    }

    #[test]
    fn visits_every_sample_once() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a", "b", "c", "d", "e"]);
        let dataset = open(dir.path());
        let loader = DataLoader::new(&dataset, 2, 11).unwrap().shuffle(true);

        let mut seen = Vec::new();
        let stats = loader
            .for_each_batch(|batch| {
                assert_eq!(batch.images.dim().1, 3);
                assert_eq!(batch.label_dims().1, 3);
                seen.extend(batch.indices);
                Ok(())
            })
            .unwrap();

        assert_eq!(stats.batches, 3);
        assert_eq!(stats.samples, 5);
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn shuffle_order_depends_on_seed_only() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a", "b", "c", "d", "e", "f"]);
        let dataset = open(dir.path());
        let a = DataLoader::new(&dataset, 2, 5).unwrap().shuffle(true);
        let b = DataLoader::new(&dataset, 3, 5).unwrap().shuffle(true);
        assert_eq!(a.order(), b.order());
        assert_eq!(
            DataLoader::new(&dataset, 2, 5).unwrap().order(),
            vec![0, 1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn skip_policy_drops_broken_samples() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a", "b", "c"]);
        fs::remove_file(label_path(&dir.path().join("labels"), "b", 3)).unwrap();
        let dataset = open(dir.path());

        let loader = DataLoader::new(&dataset, 2, 0).unwrap();
        let mut seen = Vec::new();
        let stats = loader
            .for_each_batch(|batch| {
                seen.extend(batch.indices);
                Ok(())
            })
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.samples, 2);
        assert_eq!(seen, vec![0, 2]);

        let aborting = DataLoader::new(&dataset, 2, 0)
            .unwrap()
            .on_error(OnError::Abort);
        let err = aborting.for_each_batch(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::DataLoad { .. }));
    }

    #[test]
    fn consumer_error_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), &["a", "b", "c", "d"]);
        let dataset = open(dir.path());
        let loader = DataLoader::new(&dataset, 1, 0).unwrap().prefetch(1);

        let mut calls = 0;
        let err = loader
            .for_each_batch(|_| {
                calls += 1;
                Err(Error::Evaluation("stop".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn per_sample_seeds_differ() {
        assert_ne!(sample_seed(1, 0), sample_seed(1, 1));
        assert_ne!(sample_seed(1, 0), sample_seed(2, 0));
    }
}
