use rand::RngCore;

use super::Transform;
use crate::error::{Error, Result};
use crate::types::{Layout, Sample};

/// Convert a channel-last image to contiguous channel-first storage.
///
/// Pure layout change: no resampling and no value change. Labels are
/// already channel-first and are only made contiguous.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToTensor;

impl Transform for ToTensor {
    fn name(&self) -> &'static str {
        "to_tensor"
    }

    fn apply(&self, sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        if sample.layout == Layout::ChannelsFirst {
            return Err(Error::Transform(format!(
                "sample {} is already channel-first",
                sample.index
            )));
        }

        let image = sample
            .image
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned();
        let labels = sample.labels.as_standard_layout().into_owned();

        Ok(Sample {
            image,
            layout: Layout::ChannelsFirst,
            labels,
            index: sample.index,
        })
    }
}
