//! Sources of convolution functions.
//!
//! The gridder doesn't synthesise kernels itself, it asks a
//! [`ConvolutionFunctionBuilder`] to fill a [`ConvFuncCache`] at the start of
//! each session, and to undo the kernel's taper on the final image.

use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use super::{CFError, ConvFuncCache};
use crate::{
    constants::DEFAULT_CF_CUTOFF,
    ndarray::{Array2, ArrayViewMut2},
    Complex,
};

/// Everything a builder needs to know about the grid it is building for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CFSetup {
    /// oversampling factor of the gridder
    pub oversample: usize,
    /// size of a uv cell [wavelengths]
    pub uv_cell_size: [f64; 2],
    /// shape of the (padded) grid
    pub grid_shape: [usize; 2],
    /// largest support the builder may use, 0 leaves it to the builder
    pub max_support: usize,
}

/// A strategy which provides convolution functions to the gridder.
///
/// Only [`ConvolutionFunctionBuilder::build`] and
/// [`ConvolutionFunctionBuilder::name`] are mandatory; the defaults describe a
/// single plane, w-independent kernel with no image-plane correction.
pub trait ConvolutionFunctionBuilder: Debug + Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Number of cache planes before oversampling.
    fn num_planes(&self) -> usize {
        1
    }

    /// Cache plane (before oversampling) used for a sample with w-term
    /// `w_lambda` [wavelengths], or `None` if w is out of range.
    fn plane_index(&self, _w_lambda: f64) -> Option<usize> {
        Some(0)
    }

    /// The w-term [wavelengths] represented by a cache plane.
    fn w_term(&self, _plane: usize) -> f64 {
        0.
    }

    /// Number of separate accumulation grids.
    fn num_grids(&self) -> usize {
        1
    }

    /// Grid used for a sample with w-term `w_lambda`, or `None` if w is out
    /// of range.
    fn grid_index(&self, _w_lambda: f64) -> Option<usize> {
        Some(0)
    }

    /// Build the convolution functions for a gridding session.
    ///
    /// # Errors
    ///
    /// Builder specific, see [`CFError`].
    fn build(&self, setup: &CFSetup) -> Result<ConvFuncCache, CFError>;

    /// Build the kernels used to grid the preconditioner function.
    ///
    /// The default is a nearest neighbour kernel per w-plane, see
    /// [`pcf_kernels`].
    ///
    /// # Errors
    ///
    /// Builder specific, see [`CFError`].
    fn build_pcf(&self, setup: &CFSetup) -> Result<ConvFuncCache, CFError> {
        let w_terms: Vec<f64> = (0..self.num_planes()).map(|plane| self.w_term(plane)).collect();
        pcf_kernels(&w_terms, setup, DEFAULT_CF_CUTOFF)
    }

    /// Divide the taper of the kernel out of a (padded) image plane.
    fn correct_convolution(&self, _image: ArrayViewMut2<f64>) {}
}

/// Nearest neighbour kernels for the preconditioner function.
///
/// Each w-plane gets `oversample²` matrices of support 1 with a single
/// non-zero element at the centre. The real part is the gridding weight, the
/// imaginary part is the size in pixels of the main kernel at that w-term,
/// for use by the preconditioner.
///
/// # Errors
///
/// Never in practice, the layout is always consistent.
pub fn pcf_kernels(
    w_terms: &[f64],
    setup: &CFSetup,
    cutoff: f64,
) -> Result<ConvFuncCache, CFError> {
    let oversample = setup.oversample;
    let cell_u = setup.uv_cell_size[0];
    let mut planes = Vec::with_capacity(w_terms.len() * oversample * oversample);
    for &w_term in w_terms {
        let w_theta_pix = w_term.abs() / (cell_u * cell_u);
        let w_kernel_pix = if w_theta_pix < 1. {
            3.
        } else if cutoff < 0.01 {
            6. + 1.14 * w_theta_pix
        } else {
            (49. + w_theta_pix * w_theta_pix).sqrt()
        };
        for _ in 0..oversample * oversample {
            let mut kernel = Array2::zeros((3, 3));
            kernel[[1, 1]] = Complex::new(1., w_kernel_pix as f32);
            planes.push(kernel);
        }
    }
    ConvFuncCache::new(oversample, planes)
}

/// Linear sampling of w-terms onto an odd number of planes.
///
/// Plane `(n_planes - 1) / 2` holds w = 0; planes are `w_max / ((n_planes - 1)
/// / 2)` apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WSampling {
    /// largest |w| [wavelengths] which maps to a plane
    pub w_max: f64,
    /// number of planes
    pub n_planes: usize,
}

impl WSampling {
    fn half(&self) -> usize {
        self.n_planes.saturating_sub(1) / 2
    }

    fn scale(&self) -> f64 {
        self.w_max / self.half() as f64
    }

    /// The plane for `w_lambda`, `None` if it is beyond `w_max`.
    pub fn plane(&self, w_lambda: f64) -> Option<usize> {
        if !(w_lambda.abs() <= self.w_max) || self.n_planes == 0 {
            return None;
        }
        let half = self.half();
        if half == 0 {
            return Some(0);
        }
        let plane = (w_lambda / self.scale()).round() as i64 + half as i64;
        if plane >= 0 && (plane as usize) < self.n_planes {
            Some(plane as usize)
        } else {
            None
        }
    }

    /// The w-term [wavelengths] at the centre of `plane`.
    pub fn w_term(&self, plane: usize) -> f64 {
        let half = self.half();
        if half == 0 {
            return 0.;
        }
        (plane as f64 - half as f64) * self.scale()
    }
}

/// The simplest kernel: a single pixel of value 1 in every plane.
///
/// Gridding with it is nearest neighbour assignment, and there is nothing to
/// correct in the image plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxFunction;

impl ConvolutionFunctionBuilder for BoxFunction {
    fn name(&self) -> &str {
        "box"
    }

    fn build(&self, setup: &CFSetup) -> Result<ConvFuncCache, CFError> {
        let planes = (0..setup.oversample * setup.oversample)
            .map(|_| Array2::from_elem((1, 1), Complex::new(1., 0.)))
            .collect();
        ConvFuncCache::new(setup.oversample, planes)
    }
}

/// A separable image-plane correction, evaluated at `nu` in `[-1, 1]` across
/// each image axis.
pub type CorrectionFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Kernels tabulated elsewhere, e.g. by a w-projection synthesiser.
#[derive(Clone)]
pub struct TabulatedFunction {
    name: String,
    oversample: usize,
    planes: Vec<Array2<Complex<f32>>>,
    offsets: Vec<[i64; 2]>,
    w_sampling: Option<WSampling>,
    correction: Option<CorrectionFn>,
}

impl Debug for TabulatedFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabulatedFunction")
            .field("name", &self.name)
            .field("oversample", &self.oversample)
            .field("num_kernels", &self.planes.len())
            .field("offsets", &self.offsets)
            .field("w_sampling", &self.w_sampling)
            .field("correction", &self.correction.is_some())
            .finish()
    }
}

impl TabulatedFunction {
    /// Wrap `planes`, laid out in [`ConvFuncCache::c_index`] order for
    /// `oversample`.
    ///
    /// # Errors
    ///
    /// [`CFError::BadPlaneCount`] if the planes can't be split evenly.
    pub fn new(
        name: &str,
        oversample: usize,
        planes: Vec<Array2<Complex<f32>>>,
    ) -> Result<Self, CFError> {
        let per_plane = oversample * oversample;
        if per_plane == 0 || planes.is_empty() || planes.len() % per_plane != 0 {
            return Err(CFError::BadPlaneCount {
                len: planes.len(),
                oversample,
            });
        }
        Ok(Self {
            name: name.to_string(),
            oversample,
            planes,
            offsets: vec![],
            w_sampling: None,
            correction: None,
        })
    }

    /// Select planes by w-term.
    pub fn with_w_sampling(mut self, w_sampling: WSampling) -> Self {
        self.w_sampling = Some(w_sampling);
        self
    }

    /// Kernel centre offsets, one per plane before oversampling.
    pub fn with_offsets(mut self, offsets: Vec<[i64; 2]>) -> Self {
        self.offsets = offsets;
        self
    }

    /// Correct images by dividing by `correction(nu_x) * correction(nu_y)`.
    pub fn with_correction(mut self, correction: CorrectionFn) -> Self {
        self.correction = Some(correction);
        self
    }
}

impl ConvolutionFunctionBuilder for TabulatedFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_planes(&self) -> usize {
        self.planes.len() / (self.oversample * self.oversample)
    }

    fn plane_index(&self, w_lambda: f64) -> Option<usize> {
        match self.w_sampling {
            Some(w_sampling) => w_sampling
                .plane(w_lambda)
                .filter(|&plane| plane < self.num_planes()),
            None => Some(0),
        }
    }

    fn w_term(&self, plane: usize) -> f64 {
        self.w_sampling
            .map(|w_sampling| w_sampling.w_term(plane))
            .unwrap_or(0.)
    }

    fn build(&self, setup: &CFSetup) -> Result<ConvFuncCache, CFError> {
        if setup.oversample != self.oversample {
            return Err(CFError::OversampleMismatch {
                tabulated: self.oversample,
                requested: setup.oversample,
            });
        }
        let mut cache = ConvFuncCache::new(self.oversample, self.planes.clone())?;
        let support = cache.max_support();
        if setup.max_support > 0 && support > setup.max_support {
            return Err(CFError::SupportTooLarge {
                support,
                max_support: setup.max_support,
            });
        }
        for (plane, &offset) in self.offsets.iter().enumerate() {
            cache.set_offset(plane, offset)?;
        }
        Ok(cache)
    }

    fn correct_convolution(&self, mut image: ArrayViewMut2<f64>) {
        let correction = match self.correction.as_ref() {
            Some(correction) => correction,
            None => return,
        };
        let (nx, ny) = image.dim();
        let taper = |n: usize| -> Vec<f64> {
            let half = (n / 2).max(1) as f64;
            (0..n)
                .map(|i| correction((i as f64 - (n / 2) as f64) / half))
                .collect()
        };
        let (taper_x, taper_y) = (taper(nx), taper(ny));
        for ((ix, iy), pixel) in image.indexed_iter_mut() {
            let factor = taper_x[ix] * taper_y[iy];
            *pixel = if factor > 0. { *pixel / factor } else { 0. };
        }
    }
}
