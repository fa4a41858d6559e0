//! Setting up and tearing down a gridding session.

use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info, trace};
use rustfft::FftDirection;

use super::{Direction, GridMode, GridderState, GridderStats, VisGridder};
use crate::{
    axes::{padded_size, ImageAxes},
    cf::{CFError, CFSetup},
    fft::{centred_fft2, embed_centre, extract_centre},
    ndarray::{s, Array2, Array3, Array4, ArrayView4, ArrayViewMut4, Axis},
    with_increment_duration, Complex, GridderError,
};

fn check_image_shape(
    argument: &str,
    function: &str,
    expected: [usize; 4],
    received: (usize, usize, usize, usize),
) -> Result<(), GridderError> {
    let (nx, ny, npol, nchan) = received;
    if [nx, ny, npol, nchan] == expected {
        Ok(())
    } else {
        Err(GridderError::BadArrayShape {
            argument: argument.to_string(),
            function: function.to_string(),
            expected: format!("{:?}", (expected[0], expected[1], expected[2], expected[3])),
            received: format!("{received:?}"),
        })
    }
}

impl VisGridder {
    /// Geometry, polarisation and frequency setup shared by gridding and
    /// degridding sessions.
    fn setup_session(
        &mut self,
        function: &'static str,
        axes: &ImageAxes,
        shape: [usize; 4],
    ) -> Result<(), GridderError> {
        let direction = axes.direction.ok_or_else(|| GridderError::Precondition {
            function,
            reason: "image axes have no direction axis".to_string(),
        })?;
        if direction.increment.iter().any(|&inc| !inc.is_finite() || inc == 0.) {
            return Err(GridderError::Precondition {
                function,
                reason: format!(
                    "can't work out the uv cell size from pixel increment {:?}",
                    direction.increment
                ),
            });
        }
        if shape.iter().any(|&n| n == 0) {
            return Err(GridderError::BadArrayShape {
                argument: "shape".to_string(),
                function: function.to_string(),
                expected: "no empty axes".to_string(),
                received: format!("{shape:?}"),
            });
        }
        let image_pol_frame = axes.image_pol_frame();
        if image_pol_frame.len() != shape[2] {
            return Err(GridderError::Configuration(format!(
                "image has {} polarisation planes but its axes list {} products",
                shape[2],
                image_pol_frame.len()
            )));
        }

        self.image_shape = shape;
        self.padded = [
            padded_size(shape[0], self.config.padding),
            padded_size(shape[1], self.config.padding),
        ];
        self.tangent = direction.tangent;
        self.image_centre = direction.pixel_to_radec([(shape[0] / 2) as f64, (shape[1] / 2) as f64]);
        self.uv_cell_size = [
            1. / (direction.increment[0] * self.padded[0] as f64),
            1. / (direction.increment[1] * self.padded[1] as f64),
        ];
        self.image_pol_frame = image_pol_frame;
        match axes.spectral {
            Some(spectral) => self.freq_map.setup_image(spectral, shape[3]),
            None => {
                debug!("no spectral axis, gridding every channel onto a single plane");
                self.freq_map.setup_single_plane();
            }
        }
        self.pol_conv = None;
        self.psf_representative = None;
        self.model_is_empty = false;
        self.stats = GridderStats::default();
        debug!(
            "{} grid of {}x{} for an image of {:?}, uv cell [{:.3}, {:.3}] wavelengths",
            function,
            self.padded[0],
            self.padded[1],
            shape,
            self.uv_cell_size[0],
            self.uv_cell_size[1]
        );
        Ok(())
    }

    fn build_cache(&mut self, mode: GridMode) -> Result<(), GridderError> {
        let setup = CFSetup {
            oversample: self.config.oversample as usize,
            uv_cell_size: self.uv_cell_size,
            grid_shape: self.padded,
            max_support: self.config.support as usize,
        };
        let cache = with_increment_duration!(self.stats.time_conv_functions, {
            match mode {
                GridMode::Pcf => self.builder.build_pcf(&setup)?,
                _ => self.builder.build(&setup)?,
            }
        });
        if cache.oversample() != setup.oversample {
            return Err(CFError::OversampleMismatch {
                tabulated: cache.oversample(),
                requested: setup.oversample,
            }
            .into());
        }
        cache.log_stats();
        self.cache = Some(Arc::new(cache));
        Ok(())
    }

    /// Start a gridding session for an image of `shape`
    /// `[nx, ny, npol, nchan]` (unpadded).
    ///
    /// Allowed in any state; everything from a previous session is dropped.
    ///
    /// # Errors
    ///
    /// - [`GridderError::Precondition`] without a usable direction axis
    /// - [`GridderError::Configuration`] if the axes' polarisations don't
    ///   match `shape`
    /// - [`GridderError::ConvolutionFunction`] if the builder fails
    pub fn initialise_grid(
        &mut self,
        axes: &ImageAxes,
        shape: [usize; 4],
        mode: GridMode,
    ) -> Result<(), GridderError> {
        trace!("start initialise_grid");
        self.state = GridderState::Uninitialised;
        self.setup_session("initialise_grid", axes, shape)?;
        self.mode = mode;
        self.build_cache(mode)?;
        let [_, _, npol, nchan] = shape;
        let grid_dim = (npol, nchan, self.padded[0], self.padded[1]);
        self.grids = (0..self.builder.num_grids().max(1))
            .map(|_| Array4::zeros(grid_dim))
            .collect();
        let rows = match self.cache.as_ref() {
            Some(cache) if self.config.track_weight_per_oversample_plane => cache.len(),
            Some(cache) => cache.num_planes(),
            None => 0,
        };
        self.sum_weights = Some(Array3::zeros((rows, npol, nchan)));
        self.state = GridderState::GridReady(Direction::Reverse);
        debug!(
            "{} gridding into {} grid(s), mode {:?}",
            self.builder.name(),
            self.grids.len(),
            mode
        );
        trace!("end initialise_grid");
        Ok(())
    }

    /// Transform the grids into an image, written into `out` of shape
    /// `[nx, ny, npol, nchan]`.
    ///
    /// The image is not normalised by the sum of weights.
    ///
    /// # Errors
    ///
    /// - [`GridderError::State`] unless in a gridding session
    /// - [`GridderError::BadArrayShape`] if `out` is the wrong shape
    pub fn finalise_grid(&mut self, mut out: ArrayViewMut4<f64>) -> Result<(), GridderError> {
        trace!("start finalise_grid");
        self.check_state("finalise_grid", Direction::Reverse)?;
        check_image_shape("out", "finalise_grid", self.image_shape, out.dim())?;
        let [nx, ny, npol, nchan] = self.image_shape;
        let padded_dim = (self.padded[0], self.padded[1]);
        let mut scratch = Array2::<Complex<f64>>::zeros(padded_dim);
        let mut image = Array2::<f64>::zeros(padded_dim);
        for (pol, chan) in (0..npol).cartesian_product(0..nchan) {
            image.fill(0.);
            for grid in &self.grids {
                scratch.zip_mut_with(&grid.slice(s![pol, chan, .., ..]), |out, value| {
                    *out = Complex::new(f64::from(value.re), f64::from(value.im));
                });
                centred_fft2(scratch.view_mut(), FftDirection::Inverse);
                image.zip_mut_with(&scratch, |out, value| *out += value.re);
            }
            self.builder.correct_convolution(image.view_mut());
            out.slice_mut(s![.., .., pol, chan])
                .assign(&extract_centre(image.view(), (nx, ny)));
        }
        self.log_unused_spectral_planes();
        if self.config.clear_grid {
            debug!("releasing {} grid(s)", self.grids.len());
            self.grids.clear();
        }
        self.stats.log_summary(self.builder.name(), self.mode);
        self.state = GridderState::Finalised;
        trace!("end finalise_grid");
        Ok(())
    }

    /// Write the sum of weights, reduced over cache rows, into every pixel of
    /// each `(pol, chan)` plane of `out`.
    ///
    /// # Errors
    ///
    /// - [`GridderError::Precondition`] if there are no weights
    /// - [`GridderError::BadArrayShape`] if `out` is the wrong shape
    pub fn finalise_weights(&self, mut out: ArrayViewMut4<f64>) -> Result<(), GridderError> {
        trace!("start finalise_weights");
        let sum_weights = self
            .sum_weights
            .as_ref()
            .ok_or_else(|| GridderError::Precondition {
                function: "finalise_weights",
                reason: "sum of weights has not been initialised".to_string(),
            })?;
        check_image_shape("out", "finalise_weights", self.image_shape, out.dim())?;
        let totals = sum_weights.sum_axis(Axis(0));
        for ((pol, chan), &total) in totals.indexed_iter() {
            out.slice_mut(s![.., .., pol, chan]).fill(total);
        }
        trace!("end finalise_weights");
        Ok(())
    }

    fn log_unused_spectral_planes(&self) {
        let sum_weights = match self.sum_weights.as_ref() {
            Some(sum_weights) => sum_weights,
            None => return,
        };
        let unused = sum_weights
            .axis_iter(Axis(2))
            .enumerate()
            .filter(|(_, plane)| plane.sum() <= 0.)
            .map(|(chan, _)| chan)
            .collect::<Vec<_>>();
        if unused.is_empty() {
            info!("{} gridder: all spectral planes have data", self.builder.name());
        } else {
            info!(
                "{} gridder: spectral planes without data: {}",
                self.builder.name(),
                unused.iter().join(",")
            );
        }
    }

    /// Start a degridding session for `model`, of shape `[nx, ny, npol,
    /// nchan]`.
    ///
    /// A model which is zero everywhere makes [`VisGridder::degrid`] a
    /// no-op.
    ///
    /// # Errors
    ///
    /// As [`VisGridder::initialise_grid`].
    pub fn initialise_degrid(
        &mut self,
        axes: &ImageAxes,
        model: ArrayView4<f64>,
    ) -> Result<(), GridderError> {
        trace!("start initialise_degrid");
        self.state = GridderState::Uninitialised;
        let (nx, ny, npol, nchan) = model.dim();
        let shape = [nx, ny, npol, nchan];
        self.setup_session("initialise_degrid", axes, shape)?;
        self.mode = GridMode::Image;
        self.build_cache(GridMode::Image)?;
        self.sum_weights = None;
        let mut grid = Array4::<Complex<f32>>::zeros((npol, nchan, self.padded[0], self.padded[1]));

        if model.iter().all(|&value| value == 0.) {
            debug!("no need to degrid: model is empty");
            self.model_is_empty = true;
        } else {
            let padded_dim = (self.padded[0], self.padded[1]);
            let mut padded = Array2::<f64>::zeros(padded_dim);
            let mut scratch = Array2::<Complex<f64>>::zeros(padded_dim);
            for (pol, chan) in (0..npol).cartesian_product(0..nchan) {
                padded.fill(0.);
                embed_centre(model.slice(s![.., .., pol, chan]), padded.view_mut());
                self.builder.correct_convolution(padded.view_mut());
                scratch.zip_mut_with(&padded, |out, &value| *out = Complex::new(value, 0.));
                centred_fft2(scratch.view_mut(), FftDirection::Forward);
                grid.slice_mut(s![pol, chan, .., ..])
                    .zip_mut_with(&scratch, |out, value| {
                        *out = Complex::new(value.re as f32, value.im as f32);
                    });
            }
        }
        self.grids = vec![grid];
        self.state = GridderState::GridReady(Direction::Forward);
        trace!("end initialise_degrid");
        Ok(())
    }

    /// End a degridding session.
    ///
    /// # Errors
    ///
    /// [`GridderError::State`] unless in a degridding session.
    pub fn finalise_degrid(&mut self) -> Result<(), GridderError> {
        trace!("start finalise_degrid");
        self.check_state("finalise_degrid", Direction::Forward)?;
        if self.config.clear_grid {
            debug!("releasing {} grid(s)", self.grids.len());
            self.grids.clear();
        }
        self.stats.log_summary(self.builder.name(), self.mode);
        self.state = GridderState::Finalised;
        trace!("end finalise_degrid");
        Ok(())
    }
}
