use ndarray::{Array3, Array4, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 2D point in (row, column) image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub y: f32,
    pub x: f32,
}

impl Centroid {
    pub const fn new(y: f32, x: f32) -> Self {
        Self { y, x }
    }

    pub const fn zero() -> Self {
        Self { y: 0.0, x: 0.0 }
    }

    pub fn distance(&self, other: &Centroid) -> f32 {
        let dy = self.y - other.y;
        let dx = self.x - other.x;
        (dy * dy + dx * dx).sqrt()
    }
}

impl std::ops::Add for Centroid {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            y: self.y + rhs.y,
            x: self.x + rhs.x,
        }
    }
}

impl std::ops::Sub for Centroid {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            y: self.y - rhs.y,
            x: self.x - rhs.x,
        }
    }
}

/// Channel ordering of a sample's image array.
///
/// Images are loaded as `(H, W, C)` and become `(C, H, W)` after
/// [`ToTensor`](crate::ToTensor). Label volumes are always `(L, H, W)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    ChannelsLast,
    ChannelsFirst,
}

impl Layout {
    pub fn channel_axis(self) -> Axis {
        match self {
            Layout::ChannelsLast => Axis(2),
            Layout::ChannelsFirst => Axis(0),
        }
    }

    pub fn height_axis(self) -> Axis {
        match self {
            Layout::ChannelsLast => Axis(0),
            Layout::ChannelsFirst => Axis(1),
        }
    }

    pub fn width_axis(self) -> Axis {
        match self {
            Layout::ChannelsLast => Axis(1),
            Layout::ChannelsFirst => Axis(2),
        }
    }

    /// Split a raw array shape into `(channels, height, width)`.
    pub fn split_dims(self, dims: (usize, usize, usize)) -> (usize, usize, usize) {
        match self {
            Layout::ChannelsLast => (dims.2, dims.0, dims.1),
            Layout::ChannelsFirst => dims,
        }
    }

    /// Shape of an array holding `channels` planes of `height x width`.
    pub fn shape(self, channels: usize, height: usize, width: usize) -> (usize, usize, usize) {
        match self {
            Layout::ChannelsLast => (height, width, channels),
            Layout::ChannelsFirst => (channels, height, width),
        }
    }
}

/// A facial image with its per-part label volume.
///
/// The image and every label channel always cover the same `H x W` grid.
/// The last label channel is the residual "not any selected part" channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: Array3<f32>,
    pub layout: Layout,
    pub labels: Array3<f32>,
    pub index: usize,
}

impl Sample {
    /// Create a sample from a channel-last image and a channel-first label volume.
    pub fn new(image: Array3<f32>, labels: Array3<f32>, index: usize) -> Result<Self> {
        let sample = Self {
            image,
            layout: Layout::ChannelsLast,
            labels,
            index,
        };
        sample.check_aligned()?;
        Ok(sample)
    }

    pub fn image_dims(&self) -> (usize, usize, usize) {
        self.layout.split_dims(self.image.dim())
    }

    pub fn height(&self) -> usize {
        self.image_dims().1
    }

    pub fn width(&self) -> usize {
        self.image_dims().2
    }

    pub fn num_channels(&self) -> usize {
        self.image_dims().0
    }

    pub fn num_labels(&self) -> usize {
        self.labels.dim().0
    }

    /// Verify that image and labels share the same spatial grid.
    pub fn check_aligned(&self) -> Result<()> {
        let (_, h, w) = self.image_dims();
        let (l, lh, lw) = self.labels.dim();
        if l == 0 {
            return Err(Error::Transform(format!(
                "sample {} has an empty label volume",
                self.index
            )));
        }
        if (h, w) != (lh, lw) {
            return Err(Error::Transform(format!(
                "sample {}: image is {}x{} but labels are {}x{}",
                self.index, h, w, lh, lw
            )));
        }
        Ok(())
    }
}

/// A stack of equally shaped, channel-first samples.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(N, C, H, W)`
    pub images: Array4<f32>,
    /// `(N, L, H, W)`
    pub labels: Array4<f32>,
    pub indices: Vec<usize>,
}

impl Batch {
    /// Stack samples along a new leading axis.
    ///
    /// Every sample must be channel-first and share the same image and
    /// label shapes.
    pub fn collate(samples: &[Sample]) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::Transform("cannot collate an empty batch".into()));
        }
        if let Some(s) = samples.iter().find(|s| s.layout != Layout::ChannelsFirst) {
            return Err(Error::Transform(format!(
                "sample {} is still channel-last; apply ToTensor before batching",
                s.index
            )));
        }

        let images: Vec<ArrayView3<f32>> = samples.iter().map(|s| s.image.view()).collect();
        let labels: Vec<ArrayView3<f32>> = samples.iter().map(|s| s.labels.view()).collect();

        Ok(Self {
            images: ndarray::stack(Axis(0), &images)?,
            labels: ndarray::stack(Axis(0), &labels)?,
            indices: samples.iter().map(|s| s.index).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// `(N, L, H, W)` of the label batch.
    pub fn label_dims(&self) -> (usize, usize, usize, usize) {
        self.labels.dim()
    }
}
