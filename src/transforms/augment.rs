use ndarray::Axis;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::Transform;
use crate::error::{Error, Result};
use crate::resample::{map_planes, rotate_plane, shift_axis};
use crate::types::Sample;

const LABEL_CHANNEL_AXIS: Axis = Axis(0);
const LABEL_HEIGHT_AXIS: Axis = Axis(1);
const LABEL_WIDTH_AXIS: Axis = Axis(2);

/// Parameters of one augmentation draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AugmentParams {
    /// Columns to shift right (negative shifts left).
    pub h_shift: i32,
    /// Rows to shift down (negative shifts up).
    pub v_shift: i32,
    /// Counter-clockwise rotation in degrees.
    pub angle: f32,
}

impl AugmentParams {
    pub const IDENTITY: Self = Self {
        h_shift: 0,
        v_shift: 0,
        angle: 0.0,
    };
}

/// Random rotation followed by a zero-filled shift.
///
/// Image and labels receive the identical rotation and shift, so the
/// label of every pixel stays with that pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Augment {
    /// Shifts are drawn from `[-max_shift, max_shift]`.
    pub max_shift: i32,
    /// Angles are drawn from `[-max_angle, max_angle)`.
    pub max_angle: f32,
}

impl Default for Augment {
    fn default() -> Self {
        Self {
            max_shift: 10,
            max_angle: 15.0,
        }
    }
}

impl Augment {
    pub fn new(max_shift: i32, max_angle: f32) -> Result<Self> {
        if max_shift < 0 || !(max_angle >= 0.0 && max_angle.is_finite()) {
            return Err(Error::Config(format!(
                "augment ranges must be finite and non-negative, got shift {} angle {}",
                max_shift, max_angle
            )));
        }
        Ok(Self {
            max_shift,
            max_angle,
        })
    }

    /// Draw shift and rotation parameters.
    pub fn sample_params(&self, rng: &mut dyn RngCore) -> AugmentParams {
        let h_shift = rng.gen_range(-self.max_shift..=self.max_shift);
        let v_shift = rng.gen_range(-self.max_shift..=self.max_shift);
        let angle = rng.gen::<f32>() * 2.0 * self.max_angle - self.max_angle;
        AugmentParams {
            h_shift,
            v_shift,
            angle,
        }
    }

    /// Rotate about the center, then shift vertically and horizontally.
    pub fn apply_params(&self, sample: Sample, params: &AugmentParams) -> Result<Sample> {
        let Sample {
            mut image,
            layout,
            mut labels,
            index,
        } = sample;

        if params.angle != 0.0 {
            image = map_planes(&image, layout.channel_axis(), |p| {
                rotate_plane(p, params.angle)
            })?;
            labels = map_planes(&labels, LABEL_CHANNEL_AXIS, |p| {
                rotate_plane(p, params.angle)
            })?;
        }

        let v = params.v_shift as isize;
        let h = params.h_shift as isize;
        image = shift_axis(&image, layout.height_axis(), v);
        image = shift_axis(&image, layout.width_axis(), h);
        labels = shift_axis(&labels, LABEL_HEIGHT_AXIS, v);
        labels = shift_axis(&labels, LABEL_WIDTH_AXIS, h);

        Ok(Sample {
            image,
            layout,
            labels,
            index,
        })
    }
}

impl Transform for Augment {
    fn name(&self) -> &'static str {
        "augment"
    }

    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Result<Sample> {
        let params = self.sample_params(rng);
        trace!(index = sample.index, ?params, "augmenting sample");
        self.apply_params(sample, &params)
    }
}
