//! Centred two dimensional Fourier transforms between grids and images.
//!
//! Pixel `(n/2, n/2)` is the origin on both sides. Transforms are
//! unnormalised in both directions, so a forward transform followed by an
//! inverse one multiplies by `nx * ny`.

use log::trace;
use rustfft::{FftDirection, FftPlanner};

use crate::{
    ndarray::{s, ArrayView2, ArrayViewMut2, Axis},
    Complex,
};

/// Transform `data` in place along both axes, with the origin in the middle.
pub fn centred_fft2(mut data: ArrayViewMut2<Complex<f64>>, direction: FftDirection) {
    let (nx, ny) = data.dim();
    trace!("{:?} fft of a {}x{} plane", direction, nx, ny);
    let mut planner = FftPlanner::new();
    for (axis, n) in [(Axis(0), nx), (Axis(1), ny)] {
        if n == 0 {
            return;
        }
        let fft = planner.plan_fft(n, direction);
        let mut buffer = vec![Complex::new(0., 0.); n];
        for mut lane in data.lanes_mut(axis) {
            // ifftshift on the way in, fftshift on the way out
            for (i, value) in buffer.iter_mut().enumerate() {
                *value = lane[(i + n / 2) % n];
            }
            fft.process(&mut buffer);
            for (i, value) in buffer.iter().enumerate() {
                lane[(i + n / 2) % n] = *value;
            }
        }
    }
}

/// Offset of an image of side `n` inside a padded image of side `padded`.
#[inline]
pub fn centre_offset(padded: usize, n: usize) -> usize {
    (padded - n) / 2
}

/// The central `shape` of a padded plane.
pub fn extract_centre<T>(
    padded: ArrayView2<'_, T>,
    shape: (usize, usize),
) -> ArrayView2<'_, T> {
    let (pnx, pny) = padded.dim();
    let (ox, oy) = (centre_offset(pnx, shape.0), centre_offset(pny, shape.1));
    padded.slice_move(s![ox..ox + shape.0, oy..oy + shape.1])
}

/// Write `image` into the middle of `padded`, leaving the rest alone.
pub fn embed_centre(image: ArrayView2<f64>, mut padded: ArrayViewMut2<f64>) {
    let (nx, ny) = image.dim();
    let (pnx, pny) = padded.dim();
    let (ox, oy) = (centre_offset(pnx, nx), centre_offset(pny, ny));
    padded
        .slice_mut(s![ox..ox + nx, oy..oy + ny])
        .assign(&image);
}
