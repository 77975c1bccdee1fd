use ndarray::{s, Array3};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::Transform;
use crate::error::{Error, Result};
use crate::resample::{map_planes, resize_plane};
use crate::types::{Centroid, Layout, Sample};

/// Default canvas side. Fits `ShortEdge(64)` for aspect ratios up to 2.0.
pub const DEFAULT_CANVAS: usize = 128;

/// Target size for [`Rescale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSize {
    /// Match the shorter edge to this length, keeping the aspect ratio.
    ShortEdge(usize),
    /// Resize to exactly `(height, width)`.
    Exact(usize, usize),
}

/// Resize a sample and center it on a fixed square canvas.
///
/// The resized content must fit the canvas; oversized content is rejected
/// with [`Error::CanvasOverflow`] rather than clipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub output_size: OutputSize,
    pub canvas: usize,
}

impl Rescale {
    pub fn new(output_size: OutputSize) -> Self {
        Self {
            output_size,
            canvas: DEFAULT_CANVAS,
        }
    }

    pub fn with_canvas(mut self, canvas: usize) -> Self {
        self.canvas = canvas;
        self
    }

    /// Resized `(height, width)` for a `height x width` input.
    pub fn target_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        if height == 0 || width == 0 {
            return Err(Error::Transform(format!(
                "cannot rescale an empty {}x{} sample",
                height, width
            )));
        }
        let (new_h, new_w) = match self.output_size {
            OutputSize::ShortEdge(n) => {
                if height > width {
                    (n * height / width, n)
                } else {
                    (n, n * width / height)
                }
            }
            OutputSize::Exact(h, w) => (h, w),
        };
        if new_h == 0 || new_w == 0 {
            return Err(Error::Transform(format!(
                "rescale target {}x{} is empty",
                new_h, new_w
            )));
        }
        Ok((new_h, new_w))
    }

    /// Top-left placement of `new_h x new_w` content on the canvas.
    pub fn offsets(&self, new_h: usize, new_w: usize) -> Result<(usize, usize)> {
        if new_h > self.canvas || new_w > self.canvas {
            return Err(Error::CanvasOverflow {
                height: new_h,
                width: new_w,
                canvas: self.canvas,
            });
        }
        Ok(((self.canvas - new_h) / 2, (self.canvas - new_w) / 2))
    }

    /// Map a canvas coordinate back into the `height x width` source image.
    pub fn to_source(&self, point: Centroid, height: usize, width: usize) -> Result<Centroid> {
        let (new_h, new_w) = self.target_size(height, width)?;
        let (offset_y, offset_x) = self.offsets(new_h, new_w)?;
        Ok(Centroid::new(
            (point.y - offset_y as f32) * height as f32 / new_h as f32,
            (point.x - offset_x as f32) * width as f32 / new_w as f32,
        ))
    }

    fn place(&self, content: &Array3<f32>, layout: Layout, offset: (usize, usize)) -> Array3<f32> {
        let (c, h, w) = layout.split_dims(content.dim());
        let (oy, ox) = offset;
        let mut canvas = Array3::zeros(layout.shape(c, self.canvas, self.canvas));
        match layout {
            Layout::ChannelsLast => canvas
                .slice_mut(s![oy..oy + h, ox..ox + w, ..])
                .assign(content),
            Layout::ChannelsFirst => canvas
                .slice_mut(s![.., oy..oy + h, ox..ox + w])
                .assign(content),
        }
        canvas
    }
}

impl Transform for Rescale {
    fn name(&self) -> &'static str {
        "rescale"
    }

    fn apply(&self, sample: Sample, _rng: &mut dyn RngCore) -> Result<Sample> {
        let (new_h, new_w) = self.target_size(sample.height(), sample.width())?;
        let offset = self.offsets(new_h, new_w)?;

        let layout = sample.layout;
        let image = map_planes(&sample.image, layout.channel_axis(), |p| {
            resize_plane(p, new_h, new_w)
        })?;
        let labels = map_planes(&sample.labels, Layout::ChannelsFirst.channel_axis(), |p| {
            resize_plane(p, new_h, new_w)
        })?;

        Ok(Sample {
            image: self.place(&image, layout, offset),
            layout,
            labels: self.place(&labels, Layout::ChannelsFirst, offset),
            index: sample.index,
        })
    }
}
