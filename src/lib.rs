#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! Visgrid puts radio interferometer visibilities onto a regular uv grid, and
//! reads model visibilities back off it.
//!
//! Samples are convolved onto the grid with an oversampled table of
//! convolution functions supplied by a [`ConvolutionFunctionBuilder`]. The
//! same engine makes dirty images, point spread functions and preconditioner
//! functions, and predicts visibilities from a model image.
//!
//! # Examples
//!
//! Grid a handful of visibilities of a point source at the phase centre, and
//! make a dirty image.
//!
//! ```rust
//! use std::sync::Arc;
//! use visgrid::{
//!     ndarray::Array4, BoxFunction, Complex, DirectionAxis, GridMode, GridderConfigBuilder,
//!     ImageAxes, RADec, Stokes, VisChunk, VisGridder, UVW,
//! };
//!
//! let phase_centre = RADec::from_degrees(0., -27.);
//! let axes = ImageAxes::new(DirectionAxis {
//!     tangent: phase_centre,
//!     ref_pixel: [32., 32.],
//!     increment: [-(0.01_f64).to_radians(), (0.01_f64).to_radians()],
//! });
//!
//! let config = GridderConfigBuilder::default().padding(1.5).build().unwrap();
//! let mut gridder = VisGridder::new(config, Arc::new(BoxFunction)).unwrap();
//! gridder.initialise_grid(&axes, [64, 64, 1, 1], GridMode::Image).unwrap();
//!
//! let uvw = (0..10)
//!     .map(|i| UVW { u: 20. * i as f64, v: -7. * i as f64, w: 0. })
//!     .collect();
//! let chunk = VisChunk::new(uvw, vec![150e6], vec![Stokes::I], phase_centre)
//!     .with_visibility(Complex::new(1., 0.));
//! gridder.grid(&chunk).unwrap();
//!
//! let mut image = Array4::zeros((64, 64, 1, 1));
//! gridder.finalise_grid(image.view_mut()).unwrap();
//! let mut weights = Array4::zeros((64, 64, 1, 1));
//! gridder.finalise_weights(weights.view_mut()).unwrap();
//!
//! // the source is at the centre of the image
//! assert!((image[[32, 32, 0, 0]] - weights[[32, 32, 0, 0]]).abs() < 1e-3);
//! ```

pub mod accessor;
pub mod axes;
pub mod cf;
pub mod config;
pub mod constants;
pub mod error;
pub mod fft;
pub mod freq_map;
pub mod gridder;
pub mod kernel;
pub mod pixel;
pub mod pol;
pub mod pos;

pub use marlu;
pub use marlu::{ndarray, rayon, Complex, RADec, UVW};

pub use accessor::{DataAccessor, DataAccessorMut, VisChunk};
pub use axes::{DirectionAxis, ImageAxes, SpectralAxis};
pub use cf::{
    BoxFunction, CFCacheStats, CFSetup, ConvFuncCache, ConvolutionFunctionBuilder,
    TabulatedFunction, WSampling,
};
pub use config::{GridderConfig, GridderConfigBuilder};
pub use error::GridderError;
pub use gridder::{
    Direction, GridMode, GridderState, GridderStats, MfsWeights, VisGridder, VisWeights,
};
pub use pol::{PolConverter, Stokes};

/// Run the statements in `$body`, adding the time they took to the
/// [`std::time::Duration`] at `$duration`, and give back their value.
#[macro_export]
macro_rules! with_increment_duration {
    ($duration:expr, $($body:tt)*) => {{
        let _now = std::time::Instant::now();
        let _res = { $($body)* };
        $duration += _now.elapsed();
        _res
    }};
}

#[cfg(test)]
pub(crate) mod test_common;
