//! Run configuration, loaded from JSON.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! { "root": "data/helen", "output_size": 64, "batch_size": 4, "seed": 7 }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{ImageDataset, PartSelection};
use crate::error::{Error, Result};
use crate::loader::{DataLoader, OnError};
use crate::metrics::PartLayout;
use crate::transforms::{
    Augment, Compose, Invert, OutputSize, Rescale, ScaleJitter, ToTensor, DEFAULT_CANVAS,
};
use crate::visualize::OverlayFrame;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Dataset root directory.
    pub root: PathBuf,
    /// List file, relative to `root`.
    pub list: String,
    /// Source labels left out of the foreground.
    pub background: BTreeSet<usize>,
    /// Explicit foreground labels; takes precedence over `background`.
    pub foreground: Option<Vec<usize>>,
    /// Rescale target. Samples keep their source size when unset.
    pub output_size: Option<OutputSize>,
    pub canvas: usize,
    pub batch_size: usize,
    /// Seed for shuffling and augmentation. Drawn at random when unset.
    pub seed: Option<u64>,
    pub shuffle: bool,
    pub augment: bool,
    pub scale_jitter: Option<ScaleJitter>,
    pub invert: bool,
    pub on_error: OnError,
    /// Batches loaded ahead of evaluation.
    pub prefetch: usize,
    pub parts: PartLayout,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            list: "testing.txt".to_string(),
            background: [0, 1, 10].into_iter().collect(),
            foreground: None,
            output_size: None,
            canvas: DEFAULT_CANVAS,
            batch_size: 10,
            seed: None,
            shuffle: false,
            augment: false,
            scale_jitter: None,
            invert: false,
            on_error: OnError::Skip,
            prefetch: 2,
            parts: PartLayout::default(),
        }
    }
}

impl EvalConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn part_selection(&self) -> PartSelection {
        match &self.foreground {
            Some(fg) => PartSelection::Foreground(fg.clone()),
            None => PartSelection::Background(self.background.clone()),
        }
    }

    /// Label channels per sample, residual included.
    pub fn num_labels(&self) -> Result<usize> {
        Ok(self.part_selection().foreground()?.len() + 1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.prefetch == 0 {
            return Err(Error::Config("prefetch must be positive".into()));
        }
        if self.canvas == 0 {
            return Err(Error::Config("canvas must be positive".into()));
        }
        match self.output_size {
            Some(OutputSize::ShortEdge(0)) => {
                return Err(Error::Config("output_size must be positive".into()))
            }
            Some(OutputSize::Exact(h, w)) if h == 0 || w == 0 => {
                return Err(Error::Config("output_size must be positive".into()))
            }
            _ => {}
        }
        if let Some(jitter) = self.scale_jitter {
            ScaleJitter::new(jitter.min_scale, jitter.max_scale)?;
        }
        self.parts.validate(self.num_labels()?)
    }

    /// The configured rescale step, if any.
    pub fn rescale(&self) -> Option<Rescale> {
        self.output_size
            .map(|size| Rescale::new(size).with_canvas(self.canvas))
    }

    /// Where centroid overlays can be drawn.
    ///
    /// Only a rescale can be undone to reach source coordinates; any
    /// augmentation, jitter or mirroring keeps overlays on the model input.
    pub fn overlay_frame(&self) -> OverlayFrame {
        if self.augment || self.invert || self.scale_jitter.is_some() {
            OverlayFrame::ModelInput
        } else {
            OverlayFrame::Source(self.rescale())
        }
    }

    /// Augmentation, then rescale, then tensor layout, then optional mirror.
    pub fn build_transform(&self) -> Compose {
        let mut chain = Compose::new();
        if self.augment {
            chain = chain.then(Augment::default());
        }
        if let Some(jitter) = self.scale_jitter {
            chain = chain.then(jitter);
        }
        if let Some(rescale) = self.rescale() {
            chain = chain.then(rescale);
        }
        chain = chain.then(ToTensor);
        if self.invert {
            chain = chain.then(Invert);
        }
        chain
    }

    pub fn open_dataset(&self) -> Result<ImageDataset> {
        let dataset = ImageDataset::open(&self.root, &self.list, &self.part_selection())?;
        let transform = self.build_transform();
        info!(
            samples = dataset.len(),
            labels = dataset.num_labels(),
            stages = ?transform.stage_names(),
            "dataset opened"
        );
        Ok(dataset.with_transform(transform))
    }

    pub fn resolved_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }

    pub fn loader<'a>(&self, dataset: &'a ImageDataset, seed: u64) -> Result<DataLoader<'a>> {
        Ok(DataLoader::new(dataset, self.batch_size, seed)?
            .shuffle(self.shuffle)
            .on_error(self.on_error)
            .prefetch(self.prefetch))
    }
}
