//! # face-parts
//!
//! Data transforms and centroid-based evaluation for face-part
//! segmentation.
//!
//! This crate provides:
//! - **Transforms**: random shift/rotation augmentation, aspect-preserving
//!   rescale onto a fixed canvas, tensor layout conversion and horizontal
//!   mirroring, each applied identically to an image and its label masks
//! - **Loading**: on-disk face datasets with per-part masks, batched and
//!   loaded in parallel ahead of evaluation
//! - **Evaluation**: per-part centroid distance between predicted and
//!   ground-truth masks, accumulated over a dataset and reported per part
//!
//! ## Evaluation Overview
//!
//! 1. Load each sample's image and label volume, then run the transform chain
//! 2. Stack samples into `(N, C, H, W)` / `(N, L, H, W)` batches
//! 3. L2-normalize ground truth and softmax the model scores across channels
//! 4. Compute the intensity-weighted centroid of every channel
//! 5. Accumulate the per-channel Euclidean distance between centroids
//! 6. Average over samples and group channels into named face parts
//!
//! ## Quick Start
//!
//! ```rust
//! use face_parts::{calculate_centroids, ErrorAccumulator, PartLayout, PartSpec};
//! use ndarray::Array4;
//!
//! // One 8x8 sample with a single pixel of mass in channel 0.
//! let mut truth = Array4::<f32>::zeros((1, 2, 8, 8));
//! truth[[0, 0, 2, 3]] = 1.0;
//! truth[[0, 1, 5, 5]] = 1.0;
//! let mut pred = truth.clone();
//! pred[[0, 0, 2, 3]] = 0.0;
//! pred[[0, 0, 2, 4]] = 1.0;
//!
//! let mut acc = ErrorAccumulator::new(2);
//! acc.update(
//!     calculate_centroids(pred.view()).view(),
//!     calculate_centroids(truth.view()).view(),
//! )
//! .unwrap();
//!
//! let layout = PartLayout::new(vec![PartSpec::new("spot", vec![0])]);
//! let report = acc.finalize(&layout).unwrap();
//! assert!((report.part("spot").unwrap().error - 1.0).abs() < 1e-6);
//! ```
//!
//! ## Custom Models
//!
//! Implement the [`Segmenter`] trait to evaluate your own model:
//!
//! ```rust
//! use face_parts::{Batch, Result, Segmenter};
//! use ndarray::Array4;
//!
//! struct Uniform { labels: usize }
//!
//! impl Segmenter for Uniform {
//!     fn num_labels(&self) -> usize { self.labels }
//!     fn predict(&self, batch: &Batch) -> Result<Array4<f32>> {
//!         let (n, l, h, w) = batch.label_dims();
//!         Ok(Array4::zeros((n, l, h, w)))
//!     }
//! }
//! ```

mod centroid;
mod config;
mod dataset;
mod error;
mod evaluate;
mod loader;
mod metrics;
mod model;
mod resample;
pub mod transforms;
mod types;
mod visualize;

pub use centroid::{
    calculate_centroids, centroid_at, l2_normalize_channels, locate_centroids, softmax_channels,
    CentroidSet, CENTROID_EPSILON, LOW_MASS_THRESHOLD,
};
pub use config::EvalConfig;
pub use dataset::{
    label_path, load_label_volume, load_mask, load_rgb, DatasetEntry, ImageDataset,
    PartSelection, NUM_SOURCE_LABELS,
};
pub use error::{Error, ErrorKind, Result};
pub use evaluate::{evaluate, evaluate_batch, BatchEvaluation};
pub use loader::{sample_seed, DataLoader, LoadStats, OnError};
pub use metrics::{ErrorAccumulator, ErrorReport, PartError, PartLayout, PartSpec};
pub use model::{MaskDirectory, Segmenter};
pub use resample::{rotate_plane, resize_plane, sample_bilinear};
pub use transforms::{
    Augment, AugmentParams, Compose, Invert, OutputSize, Rescale, ScaleJitter, ToTensor,
    Transform,
};
pub use types::{Batch, Centroid, Layout, Sample};
pub use visualize::{composite_maps, ArtifactWriter, OverlayFrame};
