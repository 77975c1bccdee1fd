//! Geometric sample transforms.
//!
//! Every transform maps one [`Sample`] to another and applies the same
//! geometry to the image and to every label channel. Randomness comes from
//! the generator handed to [`Transform::apply`], never from global state,
//! so a chain is reproducible for a given seed and safe to run on many
//! samples in parallel.

mod augment;
mod invert;
mod rescale;
mod scale;
mod tensor;

pub use augment::{Augment, AugmentParams};
pub use invert::Invert;
pub use rescale::{OutputSize, Rescale, DEFAULT_CANVAS};
pub use scale::ScaleJitter;
pub use tensor::ToTensor;

use rand::RngCore;

use crate::error::Result;
use crate::types::Sample;

/// A pure sample-to-sample transform.
pub trait Transform: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample>;
}

/// An ordered chain of transforms.
///
/// After every stage the sample is checked for image/label alignment.
#[derive(Default)]
pub struct Compose {
    stages: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage to the chain.
    pub fn then<T: Transform + 'static>(mut self, stage: T) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl Transform for Compose {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        for stage in &self.stages {
            sample = stage.apply(sample, rng)?;
            sample.check_aligned()?;
        }
        Ok(sample)
    }
}

impl std::fmt::Debug for Compose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}
