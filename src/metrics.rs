//! Centroid error accumulation and per-part error reports.
//!
//! The accumulator is an ordinary value: create one per evaluation pass (or
//! per shard), feed it every batch, and merge shards at the end. Updates are
//! plain sums, so batch order does not affect the result.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named face part made of one or more label channels.
///
/// Composite parts (e.g. a mouth built from upper lip, inner mouth and
/// lower lip) report the mean error of their channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSpec {
    pub name: String,
    pub channels: Vec<usize>,
}

impl PartSpec {
    pub fn new(name: impl Into<String>, channels: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            channels,
        }
    }
}

/// Named parts reported by [`ErrorAccumulator::finalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartLayout {
    pub parts: Vec<PartSpec>,
}

impl PartLayout {
    pub fn new(parts: Vec<PartSpec>) -> Self {
        Self { parts }
    }

    /// Helen face parts with background labels {0, 1, 10} removed.
    ///
    /// Channels: 0-1 eyebrows, 2-3 eyes, 4 nose, 5-7 upper lip, inner
    /// mouth and lower lip, 8 residual.
    pub fn helen() -> Self {
        Self::new(vec![
            PartSpec::new("eyebrow1", vec![0]),
            PartSpec::new("eyebrow2", vec![1]),
            PartSpec::new("eye1", vec![2]),
            PartSpec::new("eye2", vec![3]),
            PartSpec::new("nose", vec![4]),
            PartSpec::new("mouth", vec![5, 6, 7]),
        ])
    }

    /// Check that every part names at least one channel below `num_channels`.
    pub fn validate(&self, num_channels: usize) -> Result<()> {
        for part in &self.parts {
            if part.channels.is_empty() {
                return Err(Error::Config(format!("part '{}' has no channels", part.name)));
            }
            if let Some(c) = part.channels.iter().find(|&&c| c >= num_channels) {
                return Err(Error::Config(format!(
                    "part '{}' uses channel {} but only {} channels exist",
                    part.name, c, num_channels
                )));
            }
        }
        Ok(())
    }
}

impl Default for PartLayout {
    fn default() -> Self {
        Self::helen()
    }
}

/// Running sum of per-channel centroid distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAccumulator {
    sum_error: Vec<f64>,
    count: usize,
}

impl ErrorAccumulator {
    pub fn new(num_channels: usize) -> Self {
        Self {
            sum_error: vec![0.0; num_channels],
            count: 0,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.sum_error.len()
    }

    /// Number of samples accumulated so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum_error(&self) -> &[f64] {
        &self.sum_error
    }

    /// Add one batch of `(N, L, 2)` predicted and ground-truth centroids.
    pub fn update(
        &mut self,
        predicted: ArrayView3<f32>,
        ground_truth: ArrayView3<f32>,
    ) -> Result<()> {
        if predicted.dim() != ground_truth.dim() {
            return Err(Error::Evaluation(format!(
                "centroid shapes differ: predicted {:?}, ground truth {:?}",
                predicted.dim(),
                ground_truth.dim()
            )));
        }
        let (n, l, d) = predicted.dim();
        if l != self.num_channels() || d != 2 {
            return Err(Error::Evaluation(format!(
                "expected (N, {}, 2) centroids, got ({}, {}, {})",
                self.num_channels(),
                n,
                l,
                d
            )));
        }

        for (pred, truth) in predicted.outer_iter().zip(ground_truth.outer_iter()) {
            for (c, sum) in self.sum_error.iter_mut().enumerate() {
                let dy = (pred[[c, 0]] - truth[[c, 0]]) as f64;
                let dx = (pred[[c, 1]] - truth[[c, 1]]) as f64;
                *sum += (dy * dy + dx * dx).sqrt();
            }
        }
        self.count += n;
        Ok(())
    }

    /// Fold another accumulator (e.g. a parallel shard) into this one.
    pub fn merge(&mut self, other: &ErrorAccumulator) -> Result<()> {
        if other.num_channels() != self.num_channels() {
            return Err(Error::Evaluation(format!(
                "cannot merge accumulators with {} and {} channels",
                self.num_channels(),
                other.num_channels()
            )));
        }
        for (a, b) in self.sum_error.iter_mut().zip(&other.sum_error) {
            *a += b;
        }
        self.count += other.count;
        Ok(())
    }

    /// Mean distance per channel.
    pub fn mean_errors(&self) -> Result<Vec<f64>> {
        if self.count == 0 {
            return Err(Error::Evaluation("no samples were evaluated".into()));
        }
        Ok(self
            .sum_error
            .iter()
            .map(|s| s / self.count as f64)
            .collect())
    }

    /// Produce the per-part report.
    pub fn finalize(&self, layout: &PartLayout) -> Result<ErrorReport> {
        layout
            .validate(self.num_channels())
            .map_err(|e| Error::Evaluation(e.to_string()))?;
        let channel_errors = self.mean_errors()?;

        let parts = layout
            .parts
            .iter()
            .map(|part| {
                let total: f64 = part.channels.iter().map(|&c| channel_errors[c]).sum();
                PartError {
                    name: part.name.clone(),
                    channels: part.channels.clone(),
                    error: total / part.channels.len() as f64,
                }
            })
            .collect();

        let overall = channel_errors.iter().sum::<f64>() / channel_errors.len().max(1) as f64;

        Ok(ErrorReport {
            samples: self.count,
            parts,
            channel_errors,
            overall,
        })
    }

    /// Load an accumulator from a binary file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let acc: Self = bincode::deserialize(&bytes)?;
        Ok(acc)
    }

    /// Save the accumulator to a binary file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let bytes = bincode::serialize(self)?;
        writer.write_all(&bytes)?;
        Ok(())
    }
}

/// Mean error of one named part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartError {
    pub name: String,
    pub channels: Vec<usize>,
    /// Mean centroid distance in pixels.
    pub error: f64,
}

/// Final per-part centroid errors of an evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub samples: usize,
    pub parts: Vec<PartError>,
    /// Mean error of every channel, residual channel last.
    pub channel_errors: Vec<f64>,
    /// Mean over all channels.
    pub overall: f64,
}

impl ErrorReport {
    pub fn part(&self, name: &str) -> Option<&PartError> {
        self.parts.iter().find(|p| p.name == name)
    }

    pub fn to_human_readable(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!(
            "Distance error in model input space ({} samples):\n",
            self.samples
        ));
        let width = self.parts.iter().map(|p| p.name.len()).max().unwrap_or(0);
        for part in &self.parts {
            s.push_str(&format!(
                "  {:<width$}  {:.2} pixels\n",
                part.name,
                part.error,
                width = width
            ));
        }
        s.push_str(&format!("Total error: {:.2}\n", self.overall));
        s
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}
