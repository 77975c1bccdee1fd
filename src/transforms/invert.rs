use ndarray::Axis;
use rand::RngCore;

use super::Transform;
use crate::error::Result;
use crate::types::Sample;

/// Flip a sample left to right.
///
/// The width axis comes from the sample's layout, so raw and
/// tensor-converted samples share one code path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invert;

impl Invert {
    pub fn flip(&self, mut sample: Sample) -> Sample {
        sample.image.invert_axis(sample.layout.width_axis());
        sample.labels.invert_axis(Axis(2));
        sample
    }
}

impl Transform for Invert {
    fn name(&self) -> &'static str {
        "invert"
    }

    fn apply(&self, sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        Ok(self.flip(sample))
    }
}
