//! The inner loops: adding a sample onto the grid, and reading one off it.
//!
//! None of these allocate. Callers must check [`patch_fits`] first, the
//! kernels panic if the patch leaves the grid.

use crate::{
    ndarray::{s, ArrayView2, ArrayViewMut2, Zip},
    Complex,
};

/// Whether the `(2 * support + 1)²` patch centred on `(iu, iv)` lies inside a
/// grid of `shape`, away from the first row and column.
#[inline]
pub fn patch_fits(iu: i64, iv: i64, support: usize, shape: (usize, usize)) -> bool {
    let support = support as i64;
    iu - support > 0
        && iv - support > 0
        && iu + support < shape.0 as i64
        && iv + support < shape.1 as i64
}

#[inline]
fn patch(iu: i64, iv: i64, support: usize) -> (isize, isize, isize, isize) {
    let support = support as isize;
    let (iu, iv) = (iu as isize, iv as isize);
    (iu - support, iu + support + 1, iv - support, iv + support + 1)
}

/// `grid[iu + du, iv + dv] += vis * conj(cf[du + s, dv + s])`
#[inline]
pub fn grid(
    mut grid: ArrayViewMut2<Complex<f32>>,
    cf: ArrayView2<Complex<f32>>,
    vis: Complex<f32>,
    iu: i64,
    iv: i64,
    support: usize,
) {
    let (u0, u1, v0, v1) = patch(iu, iv, support);
    Zip::from(grid.slice_mut(s![u0..u1, v0..v1]))
        .and(cf)
        .for_each(|g, c| *g += vis * c.conj());
}

/// `grid[iu + du, iv + dv] += vis * cf[du + s, dv + s]`, without conjugating
/// the kernel.
#[inline]
pub fn grid_direct(
    mut grid: ArrayViewMut2<Complex<f32>>,
    cf: ArrayView2<Complex<f32>>,
    vis: Complex<f32>,
    iu: i64,
    iv: i64,
    support: usize,
) {
    let (u0, u1, v0, v1) = patch(iu, iv, support);
    Zip::from(grid.slice_mut(s![u0..u1, v0..v1]))
        .and(cf)
        .for_each(|g, c| *g += vis * c);
}

/// `Σ cf[du + s, dv + s] * grid[iu + du, iv + dv]`
#[inline]
pub fn degrid(
    cf: ArrayView2<Complex<f32>>,
    grid: ArrayView2<Complex<f32>>,
    iu: i64,
    iv: i64,
    support: usize,
) -> Complex<f32> {
    let (u0, u1, v0, v1) = patch(iu, iv, support);
    Zip::from(grid.slice(s![u0..u1, v0..v1]))
        .and(cf)
        .fold(Complex::new(0., 0.), |acc, g, c| acc + c * g)
}
