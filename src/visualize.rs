//! Image artifacts for inspecting evaluation results.
//!
//! For every evaluated sample two PNG files are written:
//! - `<name>_loc.png`: an image with ground-truth (red) and predicted
//!   (green) part centroids, residual channel excluded;
//! - `<name>_map.png`: ground-truth and predicted foreground masks side by
//!   side, where a pixel is white when its strongest channel is a part.

use std::fs;
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{ArrayView3, Axis};
use tracing::debug;

use crate::centroid::centroid_at;
use crate::dataset::{load_rgb, ImageDataset};
use crate::error::{Error, Result};
use crate::evaluate::BatchEvaluation;
use crate::transforms::Rescale;
use crate::types::Layout;

const GROUND_TRUTH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const PREDICTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CROSS_RADIUS: i32 = 2;

/// Image the centroid overlay is drawn on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayFrame {
    /// The untransformed source image. Centroids are mapped back through
    /// the rescale step, if any; only valid when no other geometric
    /// transform ran.
    Source(Option<Rescale>),
    /// The transformed model input, in the coordinates the centroids
    /// were measured in.
    ModelInput,
}

/// Writes per-sample artifacts into a directory.
pub struct ArtifactWriter<'a> {
    dir: PathBuf,
    dataset: &'a ImageDataset,
    frame: OverlayFrame,
}

impl<'a> ArtifactWriter<'a> {
    pub fn new<P: AsRef<Path>>(
        dir: P,
        dataset: &'a ImageDataset,
        frame: OverlayFrame,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            dataset,
            frame,
        })
    }

    pub fn write(&self, evaluation: &BatchEvaluation) -> Result<()> {
        for (i, &index) in evaluation.indices.iter().enumerate() {
            let name = self.dataset.name(index)?;

            let overlay = self.centroid_overlay(name, evaluation, i)?;
            let loc_path = self.dir.join(format!("{}_loc.png", name));
            overlay.save(&loc_path).map_err(|e| save_error(&loc_path, e))?;

            let maps = composite_maps(
                evaluation.ground_truth.index_axis(Axis(0), i),
                evaluation.predicted.index_axis(Axis(0), i),
            );
            let map_path = self.dir.join(format!("{}_map.png", name));
            maps.save(&map_path).map_err(|e| save_error(&map_path, e))?;

            debug!(name, "wrote artifacts");
        }
        Ok(())
    }

    fn centroid_overlay(
        &self,
        name: &str,
        evaluation: &BatchEvaluation,
        i: usize,
    ) -> Result<RgbImage> {
        let (mut img, rescale) = match self.frame {
            OverlayFrame::Source(rescale) => {
                let source = load_rgb(&self.dataset.image_path(name))?;
                (to_rgb_image(source.view(), Layout::ChannelsLast), rescale)
            }
            OverlayFrame::ModelInput => {
                let input = evaluation.images.index_axis(Axis(0), i);
                (to_rgb_image(input, Layout::ChannelsFirst), None)
            }
        };
        let (w, h) = img.dimensions();

        let parts = evaluation.ground_truth_centroids.dim().1.saturating_sub(1);
        for channel in 0..parts {
            for (centroids, color) in [
                (&evaluation.ground_truth_centroids, GROUND_TRUTH_COLOR),
                (&evaluation.predicted_centroids, PREDICTED_COLOR),
            ] {
                let mut c = centroid_at(centroids, i, channel);
                if let Some(rescale) = &rescale {
                    c = rescale.to_source(c, h as usize, w as usize)?;
                }
                draw_cross(&mut img, c.x.round() as i32, c.y.round() as i32, CROSS_RADIUS, color);
            }
        }
        Ok(img)
    }
}

fn save_error(path: &Path, e: image::ImageError) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("failed to write {}: {}", path.display(), e),
    ))
}

fn to_rgb_image(pixels: ArrayView3<f32>, layout: Layout) -> RgbImage {
    let (_, h, w) = layout.split_dims(pixels.dim());
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let px = |c: usize| {
            let v = match layout {
                Layout::ChannelsLast => pixels[[y, x, c]],
                Layout::ChannelsFirst => pixels[[c, y, x]],
            };
            v.clamp(0.0, 255.0) as u8
        };
        Rgb([px(0), px(1), px(2)])
    })
}

/// Foreground masks of two `(L, H, W)` volumes, side by side.
pub fn composite_maps(ground_truth: ArrayView3<f32>, predicted: ArrayView3<f32>) -> GrayImage {
    let (_, h, w) = ground_truth.dim();
    let gt = foreground_mask(ground_truth);
    let pred = foreground_mask(predicted);

    GrayImage::from_fn(2 * w as u32, h as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let on = if x < w { gt[y][x] } else { pred[y][x - w] };
        Luma([if on { 255 } else { 0 }])
    })
}

/// Pixels whose strongest channel is not the residual (last) channel.
fn foreground_mask(volume: ArrayView3<f32>) -> Vec<Vec<bool>> {
    let (l, h, w) = volume.dim();
    (0..h)
        .map(|y| {
            (0..w)
                .map(|x| {
                    let mut best = 0;
                    for c in 1..l {
                        if volume[[c, y, x]] > volume[[best, y, x]] {
                            best = c;
                        }
                    }
                    best + 1 < l
                })
                .collect()
        })
        .collect()
}

fn draw_cross(img: &mut RgbImage, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
    let (img_w, img_h) = img.dimensions();

    for d in -radius..=radius {
        for (px, py) in [(cx + d, cy + d), (cx + d, cy - d)] {
            if px >= 0 && px < img_w as i32 && py >= 0 && py < img_h as i32 {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}
