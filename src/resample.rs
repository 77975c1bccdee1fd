//! Per-plane resampling primitives shared by the geometric transforms.
//!
//! Every function works on a single `H x W` plane or shifts a whole
//! volume along one spatial axis, so the same code serves image channels
//! and label channels in either layout.

use ndarray::{Array2, Array3, ArrayView2, Axis, Slice};

use crate::error::Result;

/// Pixel value at `(y, x)`, or 0 outside the plane.
#[inline]
fn pixel_or_zero(plane: &ArrayView2<f32>, y: isize, x: isize) -> f32 {
    let (h, w) = plane.dim();
    if y < 0 || x < 0 || y >= h as isize || x >= w as isize {
        return 0.0;
    }
    plane[[y as usize, x as usize]]
}

/// Pixel value at `(y, x)` with coordinates clamped to the plane.
#[inline]
fn pixel_clamped(plane: &ArrayView2<f32>, y: isize, x: isize) -> f32 {
    let (h, w) = plane.dim();
    let y = y.clamp(0, h as isize - 1) as usize;
    let x = x.clamp(0, w as isize - 1) as usize;
    plane[[y, x]]
}

#[inline]
fn bilinear<F>(fetch: F, y: f32, x: f32) -> f32
where
    F: Fn(isize, isize) -> f32,
{
    let y0 = y.floor() as isize;
    let x0 = x.floor() as isize;
    let fy = y - y0 as f32;
    let fx = x - x0 as f32;

    let p00 = fetch(y0, x0);
    let p01 = fetch(y0, x0 + 1);
    let p10 = fetch(y0 + 1, x0);
    let p11 = fetch(y0 + 1, x0 + 1);

    let top = p00 * (1.0 - fx) + p01 * fx;
    let bottom = p10 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Sample a plane with bilinear interpolation. Outside the plane reads as 0.
pub fn sample_bilinear(plane: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
    bilinear(|yy, xx| pixel_or_zero(plane, yy, xx), y, x)
}

/// Rotate a plane counter-clockwise by `angle` degrees about its center.
///
/// The output has the input's size; source positions that fall outside
/// the plane contribute 0.
pub fn rotate_plane(plane: ArrayView2<f32>, angle: f32) -> Array2<f32> {
    let (h, w) = plane.dim();
    let cy = (h as f32 - 1.0) / 2.0;
    let cx = (w as f32 - 1.0) / 2.0;
    let (sin, cos) = angle.to_radians().sin_cos();

    Array2::from_shape_fn((h, w), |(y, x)| {
        let dy = y as f32 - cy;
        let dx = x as f32 - cx;
        // Inverse map: where in the source does this output pixel come from.
        let src_x = cx + cos * dx - sin * dy;
        let src_y = cy + sin * dx + cos * dy;
        sample_bilinear(&plane, src_y, src_x)
    })
}

/// Resize a plane to `new_h x new_w` with bilinear interpolation.
///
/// Pixel centers are aligned and edges are clamped.
pub fn resize_plane(plane: ArrayView2<f32>, new_h: usize, new_w: usize) -> Array2<f32> {
    let (h, w) = plane.dim();
    if (h, w) == (new_h, new_w) {
        return plane.to_owned();
    }
    let scale_y = h as f32 / new_h as f32;
    let scale_x = w as f32 / new_w as f32;

    Array2::from_shape_fn((new_h, new_w), |(y, x)| {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let src_x = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
        bilinear(|yy, xx| pixel_clamped(&plane, yy, xx), src_y, src_x)
    })
}

/// Apply `f` to every plane along `channel_axis` and restack the results
/// along the same axis.
pub fn map_planes<F>(volume: &Array3<f32>, channel_axis: Axis, f: F) -> Result<Array3<f32>>
where
    F: Fn(ArrayView2<f32>) -> Array2<f32>,
{
    let planes: Vec<Array2<f32>> = volume.axis_iter(channel_axis).map(f).collect();
    let views: Vec<ArrayView2<f32>> = planes.iter().map(|p| p.view()).collect();
    Ok(ndarray::stack(channel_axis, &views)?)
}

/// Shift a volume along `axis` by `shift` positions, filling with zeros.
///
/// A positive shift drops the last `shift` entries and pads the start; a
/// negative shift drops the first `|shift|` entries and pads the end.
/// Nothing wraps around.
pub fn shift_axis(volume: &Array3<f32>, axis: Axis, shift: isize) -> Array3<f32> {
    let len = volume.len_of(axis);
    let magnitude = shift.unsigned_abs();
    if shift == 0 {
        return volume.clone();
    }

    let mut out = Array3::zeros(volume.raw_dim());
    if magnitude >= len {
        return out;
    }

    if shift > 0 {
        out.slice_axis_mut(axis, Slice::from(magnitude..))
            .assign(&volume.slice_axis(axis, Slice::from(..len - magnitude)));
    } else {
        out.slice_axis_mut(axis, Slice::from(..len - magnitude))
            .assign(&volume.slice_axis(axis, Slice::from(magnitude..)));
    }
    out
}
