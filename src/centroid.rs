//! Intensity-weighted centroids of label volumes.
//!
//! A channel's centroid is its center of mass: every pixel contributes its
//! coordinate weighted by its value. Comparing predicted and ground-truth
//! centroids measures part localization independently of exact mask overlap.

use ndarray::{Array2, Array3, Array4, ArrayView4, Axis, Zip};
use tracing::warn;

use crate::types::Centroid;

/// Added to every value so an empty channel never divides by zero.
///
/// An empty channel therefore reports the center of the grid instead of a
/// meaningful location; see [`LOW_MASS_THRESHOLD`].
pub const CENTROID_EPSILON: f64 = 1e-10;

/// Channels with less total mass than this get a low-confidence warning.
pub const LOW_MASS_THRESHOLD: f64 = 1e-6;

const L2_EPSILON: f32 = 1e-12;

/// Centroids of an `(N, L, H, W)` volume with a per-channel confidence flag.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidSet {
    /// `(N, L, 2)`, `[.., .., 0] = y` and `[.., .., 1] = x`.
    pub positions: Array3<f32>,
    /// `(N, L)`, true where the channel's mass is below [`LOW_MASS_THRESHOLD`].
    pub low_mass: Array2<bool>,
}

impl CentroidSet {
    /// `(sample, channel)` pairs whose centroid is ill-defined.
    pub fn low_mass_channels(&self) -> Vec<(usize, usize)> {
        self.low_mass
            .indexed_iter()
            .filter(|&(_, &low)| low)
            .map(|(pos, _)| pos)
            .collect()
    }
}

/// Compute centroids and flag near-empty channels, logging a warning for each.
pub fn locate_centroids(volume: ArrayView4<f32>) -> CentroidSet {
    let (n, l, _, _) = volume.dim();
    let mut positions = Array3::zeros((n, l, 2));
    let mut low_mass = Array2::from_elem((n, l), false);

    for (ni, sample) in volume.outer_iter().enumerate() {
        for (li, channel) in sample.outer_iter().enumerate() {
            let mut mass = 0.0f64;
            let mut raw_mass = 0.0f64;
            let mut sum_y = 0.0f64;
            let mut sum_x = 0.0f64;

            for ((y, x), &v) in channel.indexed_iter() {
                let v = v as f64;
                raw_mass += v;
                let weighted = v + CENTROID_EPSILON;
                mass += weighted;
                sum_y += weighted * y as f64;
                sum_x += weighted * x as f64;
            }

            if raw_mass < LOW_MASS_THRESHOLD {
                warn!(
                    sample = ni,
                    channel = li,
                    mass = raw_mass,
                    "near-empty channel; centroid is ill-defined"
                );
                low_mass[[ni, li]] = true;
            }

            positions[[ni, li, 0]] = (sum_y / mass) as f32;
            positions[[ni, li, 1]] = (sum_x / mass) as f32;
        }
    }

    CentroidSet {
        positions,
        low_mass,
    }
}

/// Compute `(y, x)` centroids for an `(N, L, H, W)` volume.
///
/// Returns an `(N, L, 2)` array with `[.., .., 0] = y` and `[.., .., 1] = x`.
pub fn calculate_centroids(volume: ArrayView4<f32>) -> Array3<f32> {
    locate_centroids(volume).positions
}

/// Read the centroid of `(sample, channel)` from a [`calculate_centroids`] result.
pub fn centroid_at(centroids: &Array3<f32>, sample: usize, channel: usize) -> Centroid {
    Centroid::new(
        centroids[[sample, channel, 0]],
        centroids[[sample, channel, 1]],
    )
}

/// Softmax over the channel axis of an `(N, L, H, W)` score volume.
pub fn softmax_channels(scores: ArrayView4<f32>) -> Array4<f32> {
    let mut out = scores.to_owned();
    for mut sample in out.outer_iter_mut() {
        for mut lane in sample.lanes_mut(Axis(0)) {
            let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            lane.mapv_inplace(|v| (v - max).exp());
            let sum = lane.sum();
            lane.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// L2-normalize every pixel's channel vector of an `(N, L, H, W)` volume.
pub fn l2_normalize_channels(volume: ArrayView4<f32>) -> Array4<f32> {
    let norms = volume
        .mapv(|v| v * v)
        .sum_axis(Axis(1))
        .mapv(|s| s.sqrt().max(L2_EPSILON));

    let mut out = volume.to_owned();
    for mut channel in out.axis_iter_mut(Axis(1)) {
        Zip::from(&mut channel)
            .and(&norms)
            .for_each(|v, &norm| *v /= norm);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use std::sync::{Arc, Mutex};

    #[test]
    fn single_pixel_centroid() {
        let mut volume = Array4::<f32>::zeros((1, 2, 32, 40));
        volume[[0, 0, 10, 20]] = 1.0;
        let centroids = calculate_centroids(volume.view());

        assert_eq!(centroids.dim(), (1, 2, 2));
        let c = centroid_at(&centroids, 0, 0);
        assert!((c.y - 10.0).abs() < 1e-3);
        assert!((c.x - 20.0).abs() < 1e-3);
    }

    #[test]
    fn empty_channel_falls_back_to_grid_center() {
        let volume = Array4::<f32>::zeros((1, 1, 5, 9));
        let c = centroid_at(&calculate_centroids(volume.view()), 0, 0);
        assert!((c.y - 2.0).abs() < 1e-4);
        assert!((c.x - 4.0).abs() < 1e-4);
    }

    #[test]
    fn near_empty_channels_are_flagged() {
        let mut volume = Array4::<f32>::zeros((2, 2, 4, 4));
        volume[[0, 0, 1, 1]] = 1.0;
        volume[[1, 1, 2, 3]] = 0.5;
        // Below the threshold even though not exactly zero.
        volume[[1, 0, 0, 0]] = 1e-8;

        let set = locate_centroids(volume.view());
        assert_eq!(set.low_mass_channels(), vec![(0, 1), (1, 0)]);
        assert!(!set.low_mass[[0, 0]]);
        assert!(!set.low_mass[[1, 1]]);
        assert_eq!(set.positions, calculate_centroids(volume.view()));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn logged_while(volume: &Array4<f32>) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            calculate_centroids(volume.view());
        });
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn warning_is_logged_only_for_empty_channels() {
        let mut volume = Array4::<f32>::zeros((1, 2, 4, 4));
        volume[[0, 0, 1, 2]] = 1.0;
        let log = logged_while(&volume);
        assert!(log.contains("near-empty channel"));
        assert!(log.contains("channel=1"));
        assert!(!log.contains("channel=0"));

        volume[[0, 1, 3, 3]] = 1.0;
        assert!(logged_while(&volume).is_empty());
    }

    #[test]
    fn weighted_centroid() {
        // Mass 1 at (0, 0) and mass 3 at (4, 8): centroid at (3, 6).
        let mut volume = Array4::<f32>::zeros((2, 1, 5, 9));
        volume[[1, 0, 0, 0]] = 1.0;
        volume[[1, 0, 4, 8]] = 3.0;
        let c = centroid_at(&calculate_centroids(volume.view()), 1, 0);
        assert!((c.y - 3.0).abs() < 1e-4);
        assert!((c.x - 6.0).abs() < 1e-4);
    }

    #[test]
    fn centroids_stay_inside_grid() {
        let volume = Array4::from_shape_fn((2, 3, 7, 11), |(n, l, y, x)| {
            ((n + 1) * (l + 2) * (y + 3) * (x + 1) % 13) as f32
        });
        let centroids = calculate_centroids(volume.view());
        for n in 0..2 {
            for l in 0..3 {
                let c = centroid_at(&centroids, n, l);
                assert!(c.y >= 0.0 && c.y < 7.0);
                assert!(c.x >= 0.0 && c.x < 11.0);
            }
        }
    }

    #[test]
    fn softmax_sums_to_one_per_pixel() {
        let scores = Array4::from_shape_fn((2, 4, 3, 3), |(n, l, y, x)| {
            (n as f32 - l as f32 * 1.5 + y as f32 * 0.3 - x as f32) * 10.0
        });
        let probs = softmax_channels(scores.view());
        for s in probs.sum_axis(Axis(1)).iter() {
            assert!((s - 1.0).abs() < 1e-5);
        }
        assert!(probs.iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn l2_normalization_gives_unit_vectors() {
        let mut volume = Array4::<f32>::zeros((1, 2, 2, 2));
        volume[[0, 0, 0, 0]] = 3.0;
        volume[[0, 1, 0, 0]] = 4.0;
        volume[[0, 1, 1, 1]] = 255.0;

        let normalized = l2_normalize_channels(volume.view());
        assert!((normalized[[0, 0, 0, 0]] - 0.6).abs() < 1e-6);
        assert!((normalized[[0, 1, 0, 0]] - 0.8).abs() < 1e-6);
        assert!((normalized[[0, 1, 1, 1]] - 1.0).abs() < 1e-6);
        // All-zero pixels stay zero.
        assert_eq!(normalized[[0, 0, 0, 1]], 0.0);
        assert_eq!(normalized[[0, 1, 0, 1]], 0.0);
    }
}
