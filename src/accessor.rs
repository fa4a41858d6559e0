//! Access to a chunk of visibilities and their metadata.
//!
//! The gridder only ever sees data through [`DataAccessor`], so it doesn't
//! care where visibilities come from. [`VisChunk`] is a plain in-memory
//! implementation.

use std::borrow::Cow;

use crate::{
    ndarray::{Array3, ArrayView3, ArrayViewMut3},
    pol::Stokes,
    pos::{rotate_uvw, uvw_rotation_delay},
    Complex, RADec, UVW,
};

/// A read-only view of a chunk of visibilities.
///
/// Cubes are indexed `(row, channel, polarisation)`.
pub trait DataAccessor: Sync {
    /// Number of rows (baseline-times) in the chunk.
    fn n_row(&self) -> usize;

    /// Number of spectral channels.
    fn n_channel(&self) -> usize;

    /// Number of polarisation products.
    fn n_pol(&self) -> usize;

    /// Channel frequencies [Hz].
    fn frequency(&self) -> &[f64];

    /// The direction the stored baselines are measured towards.
    fn phase_centre(&self) -> RADec;

    /// Baselines [metres] towards [`DataAccessor::phase_centre`].
    fn uvw(&self) -> &[UVW];

    /// Baselines [metres] re-expressed towards `tangent`.
    fn rotated_uvw(&self, tangent: RADec) -> Cow<'_, [UVW]> {
        let pc = self.phase_centre();
        if pc.ra == tangent.ra && pc.dec == tangent.dec {
            Cow::Borrowed(self.uvw())
        } else {
            Cow::Owned(
                self.uvw()
                    .iter()
                    .map(|&uvw| rotate_uvw(uvw, pc, tangent))
                    .collect(),
            )
        }
    }

    /// Per-row delay [metres] which shifts `image_centre` onto `tangent`.
    fn uvw_rotation_delay(&self, tangent: RADec, image_centre: RADec) -> Vec<f64> {
        self.rotated_uvw(tangent)
            .iter()
            .map(|&uvw| uvw_rotation_delay(uvw, tangent, image_centre))
            .collect()
    }

    /// The visibility cube.
    fn visibility(&self) -> ArrayView3<'_, Complex<f32>>;

    /// Flags, `true` where a sample must not be used.
    fn flag(&self) -> ArrayView3<'_, bool>;

    /// Noise of each visibility, separately for the real and imaginary parts.
    fn noise(&self) -> ArrayView3<'_, Complex<f32>>;

    /// The polarisation products along the last cube axis.
    fn stokes(&self) -> &[Stokes];

    /// Feed (beam) id of the first antenna of each row.
    fn feed1(&self) -> &[u32];

    /// Pointing direction of the first antenna's feed for each row.
    fn pointing_dir1(&self) -> &[RADec];

    /// Pointing direction of the first antenna's dish for each row.
    fn dish_pointing1(&self) -> &[RADec];

    /// Parallactic angle [radians] of the first antenna's feed for each row.
    fn feed1_pa(&self) -> &[f64];

    /// Parallactic angle [radians] of the second antenna's feed for each row.
    fn feed2_pa(&self) -> &[f64];
}

/// A [`DataAccessor`] whose visibilities can be written, for prediction.
pub trait DataAccessorMut: DataAccessor {
    /// The visibility cube, writable.
    fn visibility_mut(&mut self) -> ArrayViewMut3<'_, Complex<f32>>;
}

/// A chunk of visibilities held in memory.
#[derive(Debug, Clone)]
pub struct VisChunk {
    /// baselines [metres] towards `phase_centre`
    pub uvw: Vec<UVW>,
    /// channel frequencies [Hz]
    pub freqs: Vec<f64>,
    /// polarisation products
    pub stokes: Vec<Stokes>,
    /// direction of the baselines' w axis
    pub phase_centre: RADec,
    /// `(row, channel, pol)`
    pub vis: Array3<Complex<f32>>,
    /// `(row, channel, pol)`
    pub flags: Array3<bool>,
    /// `(row, channel, pol)`
    pub noise: Array3<Complex<f32>>,
    /// feed of the first antenna, per row
    pub feed1: Vec<u32>,
    /// feed pointing of the first antenna, per row
    pub pointing_dir1: Vec<RADec>,
    /// dish pointing of the first antenna, per row
    pub dish_pointing1: Vec<RADec>,
    /// parallactic angle of feed 1, per row
    pub feed1_pa: Vec<f64>,
    /// parallactic angle of feed 2, per row
    pub feed2_pa: Vec<f64>,
}

impl VisChunk {
    /// A chunk of zero, unflagged visibilities with unit noise, all from
    /// feed 0 pointing at `phase_centre`.
    pub fn new(uvw: Vec<UVW>, freqs: Vec<f64>, stokes: Vec<Stokes>, phase_centre: RADec) -> Self {
        let shape = (uvw.len(), freqs.len(), stokes.len());
        let n_row = uvw.len();
        Self {
            vis: Array3::zeros(shape),
            flags: Array3::from_elem(shape, false),
            noise: Array3::from_elem(shape, Complex::new(1., 1.)),
            feed1: vec![0; n_row],
            pointing_dir1: vec![phase_centre; n_row],
            dish_pointing1: vec![phase_centre; n_row],
            feed1_pa: vec![0.; n_row],
            feed2_pa: vec![0.; n_row],
            uvw,
            freqs,
            stokes,
            phase_centre,
        }
    }

    /// Fill every visibility with `value`.
    pub fn with_visibility(mut self, value: Complex<f32>) -> Self {
        self.vis.fill(value);
        self
    }

    /// Fill every noise estimate with `value`.
    pub fn with_noise(mut self, value: Complex<f32>) -> Self {
        self.noise.fill(value);
        self
    }
}

impl DataAccessor for VisChunk {
    fn n_row(&self) -> usize {
        self.uvw.len()
    }

    fn n_channel(&self) -> usize {
        self.freqs.len()
    }

    fn n_pol(&self) -> usize {
        self.stokes.len()
    }

    fn frequency(&self) -> &[f64] {
        &self.freqs
    }

    fn phase_centre(&self) -> RADec {
        self.phase_centre
    }

    fn uvw(&self) -> &[UVW] {
        &self.uvw
    }

    fn visibility(&self) -> ArrayView3<'_, Complex<f32>> {
        self.vis.view()
    }

    fn flag(&self) -> ArrayView3<'_, bool> {
        self.flags.view()
    }

    fn noise(&self) -> ArrayView3<'_, Complex<f32>> {
        self.noise.view()
    }

    fn stokes(&self) -> &[Stokes] {
        &self.stokes
    }

    fn feed1(&self) -> &[u32] {
        &self.feed1
    }

    fn pointing_dir1(&self) -> &[RADec] {
        &self.pointing_dir1
    }

    fn dish_pointing1(&self) -> &[RADec] {
        &self.dish_pointing1
    }

    fn feed1_pa(&self) -> &[f64] {
        &self.feed1_pa
    }

    fn feed2_pa(&self) -> &[f64] {
        &self.feed2_pa
    }
}

impl DataAccessorMut for VisChunk {
    fn visibility_mut(&mut self) -> ArrayViewMut3<'_, Complex<f32>> {
        self.vis.view_mut()
    }
}
