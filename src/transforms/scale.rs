use ndarray::{s, Array2};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use super::Transform;
use crate::error::{Error, Result};
use crate::resample::{map_planes, resize_plane};
use crate::types::{Layout, Sample};

/// Random zoom that keeps the sample size.
///
/// The sample is resized by a factor drawn from `[min_scale, max_scale)`,
/// then the bottom/right overflow is cropped or the bottom/right gap is
/// zero-padded back to the original `H x W`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleJitter {
    pub min_scale: f32,
    pub max_scale: f32,
}

impl Default for ScaleJitter {
    fn default() -> Self {
        Self {
            min_scale: 0.9,
            max_scale: 1.1,
        }
    }
}

impl ScaleJitter {
    pub fn new(min_scale: f32, max_scale: f32) -> Result<Self> {
        if !(min_scale > 0.0 && min_scale <= max_scale) {
            return Err(Error::Config(format!(
                "invalid scale range [{}, {})",
                min_scale, max_scale
            )));
        }
        Ok(Self {
            min_scale,
            max_scale,
        })
    }

    pub fn apply_scale(&self, sample: Sample, scale: f32) -> Result<Sample> {
        let (h, w) = (sample.height(), sample.width());
        let new_h = (scale * h as f32) as usize;
        let new_w = (scale * w as f32) as usize;
        if new_h == 0 || new_w == 0 {
            return Err(Error::Transform(format!(
                "scale {} collapses a {}x{} sample",
                scale, h, w
            )));
        }

        let layout = sample.layout;
        let image = map_planes(&sample.image, layout.channel_axis(), |p| {
            fit(resize_plane(p, new_h, new_w), h, w)
        })?;
        let labels = map_planes(&sample.labels, Layout::ChannelsFirst.channel_axis(), |p| {
            fit(resize_plane(p, new_h, new_w), h, w)
        })?;

        Ok(Sample {
            image,
            layout,
            labels,
            index: sample.index,
        })
    }
}

/// Crop or zero-pad a plane at the bottom/right to `h x w`.
fn fit(plane: Array2<f32>, h: usize, w: usize) -> Array2<f32> {
    let (ph, pw) = plane.dim();
    let (ch, cw) = (ph.min(h), pw.min(w));
    let mut out = Array2::zeros((h, w));
    out.slice_mut(s![..ch, ..cw])
        .assign(&plane.slice(s![..ch, ..cw]));
    out
}

impl Transform for ScaleJitter {
    fn name(&self) -> &'static str {
        "scale_jitter"
    }

    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        let scale = if self.max_scale > self.min_scale {
            rng.gen_range(self.min_scale..self.max_scale)
        } else {
            self.min_scale
        };
        self.apply_scale(sample, scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_util::coordinate_sample;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn unit_scale_is_identity() {
        let sample = coordinate_sample(10, 12, 2);
        let out = ScaleJitter::default()
            .apply_scale(sample.clone(), 1.0)
            .unwrap();
        assert_eq!(out, sample);
    }

    #[test]
    fn shrinking_pads_bottom_right() {
        let image = Array3::from_elem((10, 10, 3), 1.0f32);
        let labels = Array3::from_elem((2, 10, 10), 1.0f32);
        let sample = Sample::new(image, labels, 0).unwrap();

        let out = ScaleJitter::default().apply_scale(sample, 0.8).unwrap();
        assert_eq!(out.image.dim(), (10, 10, 3));
        assert!((out.image[[7, 7, 0]] - 1.0).abs() < 1e-5);
        assert_eq!(out.image[[8, 0, 0]], 0.0);
        assert_eq!(out.labels[[1, 0, 9]], 0.0);
    }

    #[test]
    fn growing_crops_to_original_size() {
        let mut rng = StdRng::seed_from_u64(9);
        let jitter = ScaleJitter::new(1.2, 1.3).unwrap();
        let out = jitter.apply(coordinate_sample(20, 16, 3), &mut rng).unwrap();
        assert_eq!(out.image.dim(), (20, 16, 3));
        assert_eq!(out.labels.dim(), (3, 20, 16));
    }

    #[test]
    fn invalid_range_is_rejected() {
        assert!(ScaleJitter::new(0.0, 1.0).is_err());
        assert!(ScaleJitter::new(1.2, 1.1).is_err());
    }
}
