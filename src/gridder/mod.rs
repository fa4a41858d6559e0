//! The gridding engine.
//!
//! A [`VisGridder`] owns the grids, convolution function cache and sum of
//! weights for one imaging session. Chunks of visibilities are fed to it
//! through [`crate::DataAccessor`], and every sample goes through the same
//! steps: flag and pointing checks, frequency and polarisation mapping,
//! pixel mapping, then a kernel call from [`crate::kernel`].
//!
//! ```text
//!                 initialise_grid                 finalise_grid
//! Uninitialised ────────────────> GridReady(Reverse) ───────────> Finalised
//!       │         initialise_degrid               finalise_degrid    ▲
//!       └───────────────────────> GridReady(Forward) ────────────────┘
//! ```
//!
//! Re-initialising is allowed from any state.

use std::{f64::consts::TAU, fmt::Display, sync::Arc};

use log::{debug, trace, warn};

use crate::{
    accessor::{DataAccessor, DataAccessorMut},
    cf::{CFCacheStats, ConvFuncCache, ConvolutionFunctionBuilder},
    config::GridderConfig,
    constants::{PSF_POINTING_TOLERANCE_RAD, VEL_C},
    freq_map::FrequencyMapper,
    kernel::{self, patch_fits},
    marlu::rayon::prelude::*,
    ndarray::{s, Array3, Array4},
    pixel::{check_frequency, PixelMapper},
    pol::{PolConverter, Stokes},
    with_increment_duration, Complex, GridderError, RADec,
};

mod lifecycle;
pub mod stats;
pub mod weights;

pub use stats::GridderStats;
pub use weights::{MfsWeights, VisWeights};

/// What gets put on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridMode {
    /// weighted visibilities, for a dirty image
    Image,
    /// weights alone, for the point spread function
    Psf,
    /// unit weights with the preconditioner kernels
    Pcf,
}

/// Whether samples go onto the grid or come off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// visibilities to grid (gridding)
    Reverse,
    /// grid to visibilities (degridding, prediction)
    Forward,
}

/// Where a [`VisGridder`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridderState {
    /// nothing set up yet
    Uninitialised,
    /// grids allocated, chunks may be processed in the given direction
    GridReady(Direction),
    /// grids have been transformed, re-initialise to use again
    Finalised,
}

impl Display for GridderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridderState::Uninitialised => write!(f, "uninitialised"),
            GridderState::GridReady(Direction::Reverse) => write!(f, "ready to grid"),
            GridderState::GridReady(Direction::Forward) => write!(f, "ready to degrid"),
            GridderState::Finalised => write!(f, "finalised"),
        }
    }
}

fn check_len(
    argument: &str,
    function: &str,
    expected: usize,
    received: usize,
) -> Result<(), GridderError> {
    if expected == received {
        Ok(())
    } else {
        Err(GridderError::BadArrayShape {
            argument: argument.to_string(),
            function: function.to_string(),
            expected: format!("{expected}"),
            received: format!("{received}"),
        })
    }
}

fn check_dim3(
    argument: &str,
    function: &str,
    expected: (usize, usize, usize),
    received: (usize, usize, usize),
) -> Result<(), GridderError> {
    if expected == received {
        Ok(())
    } else {
        Err(GridderError::BadArrayShape {
            argument: argument.to_string(),
            function: function.to_string(),
            expected: format!("{expected:?}"),
            received: format!("{received:?}"),
        })
    }
}

/// Whether a preconditioner sample at `(iu, iv)` is added with the kernel
/// as is, rather than conjugated, so the result is Hermitian.
#[inline]
fn pcf_unconjugated(iu: i64, iv: i64, grid_shape: [usize; 2]) -> bool {
    let (half_u, half_v) = ((grid_shape[0] / 2) as i64, (grid_shape[1] / 2) as i64);
    (iv < half_v && iu >= half_u) || (iv <= half_v && iu < half_u)
}

/// Grids visibilities with a table of convolution functions, or degrids a
/// model back into visibilities.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use visgrid::{
///     ndarray::Array4, BoxFunction, DirectionAxis, GridMode, GridderConfig, ImageAxes,
///     RADec, Stokes, VisChunk, VisGridder, UVW,
/// };
///
/// let tangent = RADec::from_degrees(0., -27.);
/// let axes = ImageAxes::new(DirectionAxis {
///     tangent,
///     ref_pixel: [16., 16.],
///     increment: [-1e-3, 1e-3],
/// });
/// let mut gridder = VisGridder::new(GridderConfig::default(), Arc::new(BoxFunction)).unwrap();
/// gridder.initialise_grid(&axes, [32, 32, 1, 1], GridMode::Image).unwrap();
///
/// let uvw = vec![UVW { u: 10., v: -4., w: 0. }];
/// let chunk = VisChunk::new(uvw, vec![150e6], vec![Stokes::I], tangent);
/// gridder.grid(&chunk).unwrap();
///
/// let mut image = Array4::zeros((32, 32, 1, 1));
/// gridder.finalise_grid(image.view_mut()).unwrap();
/// assert_eq!(gridder.stats().samples_gridded, 1);
/// ```
#[derive(Debug, Clone)]
pub struct VisGridder {
    config: GridderConfig,
    builder: Arc<dyn ConvolutionFunctionBuilder>,
    vis_weights: Option<Arc<dyn VisWeights>>,
    state: GridderState,
    mode: GridMode,

    /// unpadded image shape `[nx, ny, npol, nchan]`
    image_shape: [usize; 4],
    /// padded grid shape `[nu, nv]`
    padded: [usize; 2],
    tangent: RADec,
    image_centre: RADec,
    /// [wavelengths]
    uv_cell_size: [f64; 2],
    image_pol_frame: Vec<Stokes>,

    /// one per builder grid, each `(npol, nchan, nu, nv)`
    grids: Vec<Array4<Complex<f32>>>,
    cache: Option<Arc<ConvFuncCache>>,
    /// `(cache row, pol, image channel)`
    sum_weights: Option<Array3<f64>>,
    freq_map: FrequencyMapper,
    pol_conv: Option<PolConverter>,
    psf_representative: Option<(u32, RADec)>,
    model_is_empty: bool,
    stats: GridderStats,
}

impl VisGridder {
    /// Create a gridder which gets its kernels from `builder`.
    ///
    /// # Errors
    ///
    /// [`GridderError::Configuration`] if `config` can't work.
    pub fn new(
        config: GridderConfig,
        builder: Arc<dyn ConvolutionFunctionBuilder>,
    ) -> Result<Self, GridderError> {
        config.validate()?;
        debug!("new {} gridder, {}", builder.name(), config.as_comment());
        Ok(Self {
            config,
            builder,
            vis_weights: None,
            state: GridderState::Uninitialised,
            mode: GridMode::Image,
            image_shape: [0; 4],
            padded: [0; 2],
            tangent: RADec::from_radians(0., 0.),
            image_centre: RADec::from_radians(0., 0.),
            uv_cell_size: [0.; 2],
            image_pol_frame: vec![],
            grids: vec![],
            cache: None,
            sum_weights: None,
            freq_map: FrequencyMapper::default(),
            pol_conv: None,
            psf_representative: None,
            model_is_empty: false,
            stats: GridderStats::default(),
        })
    }

    /// Multiply every gridded and degridded sample by `weights`.
    pub fn with_vis_weights(mut self, weights: Arc<dyn VisWeights>) -> Self {
        self.vis_weights = Some(weights);
        self
    }

    /// The options this gridder was made with.
    pub fn config(&self) -> &GridderConfig {
        &self.config
    }

    /// Where the gridder is in its lifecycle.
    pub fn state(&self) -> GridderState {
        self.state
    }

    /// What the current session grids.
    pub fn mode(&self) -> GridMode {
        self.mode
    }

    /// Counters and timers for the current session.
    pub fn stats(&self) -> &GridderStats {
        &self.stats
    }

    /// Whether the model given to [`VisGridder::initialise_degrid`] was all
    /// zero, in which case degridding does nothing.
    pub fn is_model_empty(&self) -> bool {
        self.model_is_empty
    }

    /// Memory used by the convolution function cache, if one was built.
    pub fn cf_cache_stats(&self) -> Option<CFCacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// The accumulated weights, indexed `(cache row, pol, image channel)`.
    pub fn sum_of_weights(&self) -> Option<&Array3<f64>> {
        self.sum_weights.as_ref()
    }

    /// The feed and dish pointing the PSF is being made from.
    pub fn psf_representative(&self) -> Option<(u32, RADec)> {
        self.psf_representative
    }

    fn check_state(&self, operation: &'static str, direction: Direction) -> Result<(), GridderError> {
        if self.state == GridderState::GridReady(direction) {
            Ok(())
        } else {
            Err(GridderError::State {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn check_accessor<A: DataAccessor + ?Sized>(
        acc: &A,
        function: &str,
    ) -> Result<(), GridderError> {
        let (n_row, n_chan, n_pol) = (acc.n_row(), acc.n_channel(), acc.n_pol());
        let dim = (n_row, n_chan, n_pol);
        check_dim3("visibility", function, dim, acc.visibility().dim())?;
        check_dim3("flag", function, dim, acc.flag().dim())?;
        check_dim3("noise", function, dim, acc.noise().dim())?;
        check_len("frequency", function, n_chan, acc.frequency().len())?;
        check_len("stokes", function, n_pol, acc.stokes().len())?;
        check_len("uvw", function, n_row, acc.uvw().len())?;
        check_len("feed1", function, n_row, acc.feed1().len())?;
        check_len("pointing_dir1", function, n_row, acc.pointing_dir1().len())?;
        check_len("dish_pointing1", function, n_row, acc.dish_pointing1().len())?;
        check_len("feed1_pa", function, n_row, acc.feed1_pa().len())?;
        check_len("feed2_pa", function, n_row, acc.feed2_pa().len())?;
        Ok(())
    }

    /// Rebuild the polarisation converter if the accessor's products changed.
    fn refresh_pol_converter(&mut self, stokes: &[Stokes], direction: Direction) -> Result<(), GridderError> {
        let (from, to, strict): (&[Stokes], &[Stokes], bool) = match direction {
            Direction::Reverse => (stokes, self.image_pol_frame.as_slice(), true),
            Direction::Forward => (self.image_pol_frame.as_slice(), stokes, false),
        };
        let current = self
            .pol_conv
            .as_ref()
            .map_or(false, |conv| conv.from_frame() == from && conv.to_frame() == to);
        if !current {
            debug!(
                "converting polarisations from {:?} to {:?}",
                from.iter().map(ToString::to_string).collect::<Vec<_>>(),
                to.iter().map(ToString::to_string).collect::<Vec<_>>()
            );
            let par_angle = self.config.pa_rotation.map(|_| 0.);
            self.pol_conv = Some(PolConverter::new(from, to, strict, par_angle)?);
        }
        Ok(())
    }

    /// Whether the PSF should use `row`, latching the representative feed
    /// from the first row seen.
    fn psf_accepts<A: DataAccessor + ?Sized>(&mut self, acc: &A, row: usize) -> bool {
        if self.mode != GridMode::Psf || self.config.use_all_data_for_psf {
            return true;
        }
        let feed = acc.feed1()[row];
        let dish = acc.dish_pointing1()[row];
        match self.psf_representative {
            Some((rep_feed, rep_dish)) => {
                feed == rep_feed && rep_dish.separation(dish) <= PSF_POINTING_TOLERANCE_RAD
            }
            None => {
                debug!(
                    "PSF is made from feed {} with dish pointing ({:.6}, {:.6}) deg",
                    feed,
                    dish.ra.to_degrees(),
                    dish.dec.to_degrees()
                );
                self.psf_representative = Some((feed, dish));
                true
            }
        }
    }

    /// Grid a chunk of visibilities.
    ///
    /// # Errors
    ///
    /// - [`GridderError::State`] unless [`VisGridder::initialise_grid`] was
    ///   called last
    /// - [`GridderError::BadArrayShape`] if the accessor is inconsistent
    /// - [`GridderError::NonPositiveWeight`] for a zero or negative noise
    /// - [`GridderError::PolConversion`] if the image products can't be
    ///   made from the accessor's
    pub fn grid<A: DataAccessor + ?Sized>(&mut self, acc: &A) -> Result<(), GridderError> {
        trace!("start grid");
        self.check_state("grid", Direction::Reverse)?;
        self.process(acc, Direction::Reverse)?;
        trace!("end grid");
        Ok(())
    }

    /// Degrid the model onto a chunk, adding the prediction to its
    /// visibilities.
    ///
    /// # Errors
    ///
    /// - [`GridderError::State`] unless [`VisGridder::initialise_degrid`]
    ///   was called last
    /// - [`GridderError::BadArrayShape`] if the accessor is inconsistent
    pub fn degrid<A: DataAccessorMut + ?Sized>(&mut self, acc: &mut A) -> Result<(), GridderError> {
        trace!("start degrid");
        self.check_state("degrid", Direction::Forward)?;
        if self.model_is_empty {
            return Ok(());
        }
        if let Some(predicted) = self.process(&*acc, Direction::Forward)? {
            let mut vis = acc.visibility_mut();
            vis += &predicted;
        }
        trace!("end degrid");
        Ok(())
    }

    /// Grid many chunks on the rayon thread pool.
    ///
    /// Each worker grids into its own [`VisGridder::empty_clone`], and the
    /// results are merged back into `self`. When the PSF is made from one
    /// feed, chunks are gridded in order until that feed is chosen.
    ///
    /// # Errors
    ///
    /// As [`VisGridder::grid`], the first error from any chunk.
    pub fn grid_par<A: DataAccessor>(&mut self, chunks: &[A]) -> Result<(), GridderError> {
        trace!("start grid_par");
        self.check_state("grid_par", Direction::Reverse)?;
        let mut rest = chunks;
        if self.mode == GridMode::Psf && !self.config.use_all_data_for_psf {
            while self.psf_representative.is_none() {
                match rest.split_first() {
                    Some((first, tail)) => {
                        self.grid(first)?;
                        rest = tail;
                    }
                    None => return Ok(()),
                }
            }
        }
        if rest.is_empty() {
            return Ok(());
        }
        let template = self.empty_clone();
        let merged = rest
            .par_iter()
            .try_fold(
                || template.clone(),
                |mut gridder, chunk| {
                    gridder.grid(chunk)?;
                    Ok::<_, GridderError>(gridder)
                },
            )
            .try_reduce(
                || template.clone(),
                |mut left, right| {
                    left.merge(&right)?;
                    Ok(left)
                },
            )?;
        self.merge(&merged)?;
        trace!("end grid_par");
        Ok(())
    }

    /// A gridder in the same session with zeroed grids, weights and
    /// statistics. The convolution function cache is shared.
    pub fn empty_clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            builder: Arc::clone(&self.builder),
            vis_weights: self.vis_weights.clone(),
            state: self.state,
            mode: self.mode,
            image_shape: self.image_shape,
            padded: self.padded,
            tangent: self.tangent,
            image_centre: self.image_centre,
            uv_cell_size: self.uv_cell_size,
            image_pol_frame: self.image_pol_frame.clone(),
            grids: self
                .grids
                .iter()
                .map(|grid| Array4::zeros(grid.raw_dim()))
                .collect(),
            cache: self.cache.clone(),
            sum_weights: self
                .sum_weights
                .as_ref()
                .map(|sum_weights| Array3::zeros(sum_weights.raw_dim())),
            freq_map: self.freq_map.clone(),
            pol_conv: self.pol_conv.clone(),
            psf_representative: self.psf_representative,
            model_is_empty: self.model_is_empty,
            stats: GridderStats::default(),
        }
    }

    /// Add the grids, weights and statistics of `other` into `self`.
    ///
    /// # Errors
    ///
    /// [`GridderError::BadArrayShape`] if the two aren't in the same session.
    pub fn merge(&mut self, other: &VisGridder) -> Result<(), GridderError> {
        check_len("grids", "merge", self.grids.len(), other.grids.len())?;
        for (grid, other_grid) in self.grids.iter_mut().zip(other.grids.iter()) {
            if grid.dim() != other_grid.dim() {
                return Err(GridderError::BadArrayShape {
                    argument: "grids".to_string(),
                    function: "merge".to_string(),
                    expected: format!("{:?}", grid.dim()),
                    received: format!("{:?}", other_grid.dim()),
                });
            }
            *grid += other_grid;
        }
        match (self.sum_weights.as_mut(), other.sum_weights.as_ref()) {
            (Some(sum_weights), Some(other_weights)) => {
                check_dim3("sum_weights", "merge", sum_weights.dim(), other_weights.dim())?;
                *sum_weights += other_weights;
            }
            (None, None) => {}
            (mine, theirs) => {
                return Err(GridderError::BadArrayShape {
                    argument: "sum_weights".to_string(),
                    function: "merge".to_string(),
                    expected: format!("{:?}", mine.map(|w| w.dim())),
                    received: format!("{:?}", theirs.map(|w| w.dim())),
                })
            }
        }
        if self.psf_representative.is_none() {
            self.psf_representative = other.psf_representative;
        }
        self.stats += &other.stats;
        Ok(())
    }

    /// The per-chunk loop shared by gridding and degridding. Forward
    /// returns the predicted visibilities in the accessor's frame.
    fn process<A: DataAccessor + ?Sized>(
        &mut self,
        acc: &A,
        direction: Direction,
    ) -> Result<Option<Array3<Complex<f32>>>, GridderError> {
        let function = match direction {
            Direction::Reverse => "grid",
            Direction::Forward => "degrid",
        };
        Self::check_accessor(acc, function)?;
        let (n_row, n_chan, n_pol) = (acc.n_row(), acc.n_channel(), acc.n_pol());
        if n_row == 0 {
            return Ok(None);
        }
        let forward = direction == Direction::Forward;

        let cache = with_increment_duration!(self.stats.time_conv_functions, {
            self.freq_map.setup_mapping(acc.frequency());
            self.refresh_pol_converter(acc.stokes(), direction)?;
            self.cache.clone()
        })
        .ok_or_else(|| GridderError::Precondition {
            function,
            reason: "convolution functions have not been built".to_string(),
        })?;
        if !forward && self.sum_weights.is_none() {
            return Err(GridderError::Precondition {
                function,
                reason: "sum of weights has not been initialised".to_string(),
            });
        }
        for &freq in acc.frequency() {
            if let Err(err) = check_frequency(freq) {
                warn!("{}", err);
            }
        }

        let (uvw, delays) = with_increment_duration!(self.stats.time_coordinates, {
            (
                acc.rotated_uvw(self.tangent),
                acc.uvw_rotation_delay(self.tangent, self.image_centre),
            )
        });
        let mapper = PixelMapper::new(self.uv_cell_size, self.padded, cache.oversample());
        let freqs = acc.frequency();
        let vis = acc.visibility();
        let flags = acc.flag();
        let noise = acc.noise();
        let n_image_pol = self.image_pol_frame.len();

        let mut predicted = if forward {
            Some(Array3::<Complex<f32>>::zeros((n_row, n_chan, n_pol)))
        } else {
            None
        };
        let zero = Complex::new(0., 0.);
        let mut acc_vec = vec![zero; n_pol];
        let mut acc_noise = vec![zero; n_pol];
        let mut image_vec = vec![zero; n_image_pol];
        let mut image_noise = vec![zero; n_image_pol];

        let mut contributions = 0_u64;
        let mut rejected_pointing = 0_usize;

        for row in 0..n_row {
            if let Some(max_sep) = self.config.max_pointing_separation {
                if acc.pointing_dir1()[row].separation(self.image_centre) > max_sep {
                    self.stats.rows_rejected_pointing += 1;
                    rejected_pointing += 1;
                    continue;
                }
            }
            if !self.psf_accepts(acc, row) {
                continue;
            }
            let conv = self.pol_conv.as_mut().ok_or_else(|| GridderError::Precondition {
                function,
                reason: "no polarisation converter".to_string(),
            })?;
            if let Some(offset) = self.config.pa_rotation {
                conv.set_par_angle(0.5 * (acc.feed1_pa()[row] + acc.feed2_pa()[row]) + offset);
            }

            for (chan, &freq) in freqs.iter().enumerate() {
                if (0..n_pol).any(|pol| flags[[row, chan, pol]]) {
                    self.stats.vectors_flagged += 1;
                    continue;
                }
                let image_chan = match self.freq_map.map(chan) {
                    Some(image_chan) => image_chan,
                    None => {
                        self.stats.vectors_unmapped += 1;
                        continue;
                    }
                };

                let w_lambda = uvw[row].w * freq / VEL_C;
                let pixel = with_increment_duration!(
                    self.stats.time_coordinates,
                    mapper.map(uvw[row].u, uvw[row].v, freq)?
                );
                let (plane, grid_idx) = match (
                    self.builder.plane_index(w_lambda),
                    self.builder.grid_index(w_lambda),
                ) {
                    (Some(plane), Some(grid_idx)) => (plane, grid_idx),
                    _ => {
                        self.stats.vectors_w_flagged += 1;
                        continue;
                    }
                };
                // a degridding session only has the one grid
                let grid_idx = if forward { 0 } else { grid_idx };
                if grid_idx >= self.grids.len() {
                    return Err(GridderError::Precondition {
                        function,
                        reason: format!(
                            "grid index {} is out of range, there are {} grids",
                            grid_idx,
                            self.grids.len()
                        ),
                    });
                }
                let (c_index, support, offset, cf) =
                    with_increment_duration!(self.stats.time_conv_functions, {
                        let c_index = cache.c_index(plane, pixel.frac_u, pixel.frac_v);
                        (
                            c_index,
                            cache.support(c_index)?,
                            cache.offset(plane)?,
                            cache.get(c_index)?,
                        )
                    });
                let (iu, iv) = (pixel.iu + offset[0], pixel.iv + offset[1]);
                if !patch_fits(iu, iv, support, (self.padded[0], self.padded[1])) {
                    self.stats.samples_off_grid += 1;
                    continue;
                }
                let points = ((2 * support + 1) * (2 * support + 1)) as u64;

                let phase = TAU * delays[row] * freq / VEL_C;
                let phasor = Complex::new(phase.cos() as f32, phase.sin() as f32);

                if let Some(predicted) = predicted.as_mut() {
                    let grid = &self.grids[grid_idx];
                    with_increment_duration!(self.stats.time_degridded, {
                        for (pol, value) in image_vec.iter_mut().enumerate() {
                            let plane_view = grid.slice(s![pol, image_chan, .., ..]);
                            *value = kernel::degrid(cf, plane_view, iu, iv, support) * phasor.conj();
                            if let Some(weights) = self.vis_weights.as_ref() {
                                *value *= weights.weight(row, chan, pol, freq);
                            }
                        }
                    });
                    conv.convert(&mut acc_vec, &image_vec);
                    for (pol, value) in acc_vec.iter().enumerate() {
                        predicted[[row, chan, pol]] += *value;
                    }
                    self.stats.samples_degridded += n_image_pol as u64;
                    self.stats.number_degridded += n_image_pol as u64 * points;
                } else {
                    for pol in 0..n_pol {
                        acc_vec[pol] = vis[[row, chan, pol]];
                        acc_noise[pol] = noise[[row, chan, pol]];
                    }
                    conv.convert(&mut image_vec, &acc_vec);
                    conv.noise(&mut image_noise, &acc_noise);
                    // all polarisations or none
                    if let Some((pol, sigma)) = image_noise
                        .iter()
                        .map(|noise| noise.re)
                        .enumerate()
                        .find(|&(_, sigma)| !(sigma > 0.))
                    {
                        return Err(GridderError::NonPositiveWeight {
                            row,
                            chan,
                            pol,
                            noise: sigma,
                        });
                    }
                    let sw_row = if self.config.track_weight_per_oversample_plane {
                        c_index
                    } else {
                        plane
                    };
                    let mode = self.mode;
                    let grid = &mut self.grids[grid_idx];
                    let vis_weights = self.vis_weights.as_ref();
                    let sum_weights = self.sum_weights.as_mut();
                    with_increment_duration!(self.stats.time_gridded, {
                        let mut sum_weights = sum_weights;
                        for pol in 0..n_image_pol {
                            let sigma = image_noise[pol].re;
                            let wt = 1. / (sigma * sigma);
                            let extra = vis_weights
                                .map_or(1., |weights| weights.weight(row, chan, pol, freq));
                            let plane_view = grid.slice_mut(s![pol, image_chan, .., ..]);
                            match mode {
                                GridMode::Image => kernel::grid(
                                    plane_view,
                                    cf,
                                    image_vec[pol] * phasor * (wt * extra),
                                    iu,
                                    iv,
                                    support,
                                ),
                                GridMode::Psf => kernel::grid(
                                    plane_view,
                                    cf,
                                    Complex::new(wt * extra, 0.),
                                    iu,
                                    iv,
                                    support,
                                ),
                                GridMode::Pcf if pcf_unconjugated(iu, iv, self.padded) => {
                                    kernel::grid_direct(
                                        plane_view,
                                        cf,
                                        Complex::new(wt, 0.),
                                        iu,
                                        iv,
                                        support,
                                    )
                                }
                                GridMode::Pcf => kernel::grid(
                                    plane_view,
                                    cf,
                                    Complex::new(wt, 0.),
                                    iu,
                                    iv,
                                    support,
                                ),
                            }
                            if let Some(sum_weights) = sum_weights.as_mut() {
                                sum_weights[[sw_row, pol, image_chan]] += f64::from(wt);
                            }
                        }
                    });
                    self.stats.samples_gridded += n_image_pol as u64;
                    self.stats.number_gridded += n_image_pol as u64 * points;
                }
                contributions += 1;
            }
        }

        if contributions == 0 {
            if rejected_pointing == n_row {
                warn!(
                    "all {} rows of this chunk point more than {:?} rad from the image centre",
                    n_row, self.config.max_pointing_separation
                );
            } else {
                warn!("nothing from this chunk of {} rows was {}ded", n_row, function);
            }
        }
        Ok(predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accessor::VisChunk,
        axes::{DirectionAxis, ImageAxes},
        cf::{BoxFunction, TabulatedFunction, WSampling},
        config::GridderConfigBuilder,
        ndarray::{Array2, Array4},
        test_common::random_chunk,
        UVW,
    };
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    const FREQ: f64 = 150e6;

    fn axes(n: usize, increment: f64) -> ImageAxes {
        ImageAxes::new(DirectionAxis {
            tangent: RADec::from_degrees(30., -30.),
            ref_pixel: [(n / 2) as f64, (n / 2) as f64],
            increment: [increment, increment],
        })
    }

    /// u in metres which lands exactly on grid cell `k` from the centre
    fn metres_for_cells(k: f64, n: usize, increment: f64) -> f64 {
        k / (increment * n as f64) * VEL_C / FREQ
    }

    fn box_gridder(config: GridderConfig) -> VisGridder {
        VisGridder::new(config, Arc::new(BoxFunction)).unwrap()
    }

    fn chunk(uvw: Vec<UVW>, vis: Complex<f32>) -> VisChunk {
        VisChunk::new(uvw, vec![FREQ], vec![Stokes::I], RADec::from_degrees(30., -30.))
            .with_visibility(vis)
    }

    fn origin() -> UVW {
        UVW {
            u: 0.,
            v: 0.,
            w: 0.,
        }
    }

    #[test]
    fn test_state_errors() {
        let mut gridder = box_gridder(GridderConfig::default());
        assert_eq!(gridder.state(), GridderState::Uninitialised);
        let mut data = chunk(vec![origin()], Complex::new(1., 0.));
        assert!(matches!(
            gridder.grid(&data),
            Err(GridderError::State { operation: "grid", .. })
        ));
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        assert!(matches!(
            gridder.degrid(&mut data),
            Err(GridderError::State { operation: "degrid", .. })
        ));
        gridder.grid(&data).unwrap();
        gridder
            .finalise_grid(Array4::zeros((16, 16, 1, 1)).view_mut())
            .unwrap();
        assert_eq!(gridder.state(), GridderState::Finalised);
        assert!(gridder.grid(&data).is_err());
    }

    #[test]
    fn test_centre_pixel_scenario() {
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let vis = Complex::new(2., -1.);
        let data = chunk(vec![origin()], vis).with_noise(Complex::new(0.5, 0.5));
        gridder.grid(&data).unwrap();
        // weight is 1 / 0.5²
        assert_eq!(gridder.grids[0][[0, 0, 8, 8]], vis * 4.);
        assert_eq!(gridder.stats().samples_gridded, 1);
        assert_eq!(gridder.stats().number_gridded, 1);
        assert_eq!(gridder.sum_of_weights().unwrap()[[0, 0, 0]], 4.);
    }

    #[test]
    fn test_flagged_and_off_grid_vectors() {
        let n = 16;
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(n, 1e-3), [n, n, 1, 1], GridMode::Image)
            .unwrap();
        let far = UVW {
            u: metres_for_cells(9., n, 1e-3),
            v: 0.,
            w: 0.,
        };
        let mut data = chunk(vec![origin(), origin(), far], Complex::new(1., 0.));
        data.flags[[1, 0, 0]] = true;
        gridder.grid(&data).unwrap();
        let stats = gridder.stats();
        assert_eq!(stats.samples_gridded, 1);
        assert_eq!(stats.vectors_flagged, 1);
        assert_eq!(stats.samples_off_grid, 1);
        assert_eq!(gridder.sum_of_weights().unwrap().sum(), 1.);
    }

    #[test]
    fn test_zero_noise_is_an_error() {
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let data = chunk(vec![origin()], Complex::new(1., 0.)).with_noise(Complex::new(0., 0.));
        assert!(matches!(
            gridder.grid(&data),
            Err(GridderError::NonPositiveWeight { row: 0, chan: 0, .. })
        ));
    }

    #[test]
    fn test_bad_noise_leaves_no_partial_sample() {
        let mut gridder = box_gridder(GridderConfig::default());
        let axes = axes(16, 1e-3).with_stokes(&[Stokes::XX, Stokes::YY]);
        gridder
            .initialise_grid(&axes, [16, 16, 2, 1], GridMode::Image)
            .unwrap();
        let mut data = VisChunk::new(
            vec![origin()],
            vec![FREQ],
            vec![Stokes::XX, Stokes::YY],
            RADec::from_degrees(30., -30.),
        )
        .with_visibility(Complex::new(1., 0.));
        data.noise[[0, 0, 1]] = Complex::new(0., 0.);
        assert!(matches!(
            gridder.grid(&data),
            Err(GridderError::NonPositiveWeight { pol: 1, .. })
        ));
        // XX comes first, but must not have been written either
        assert!(gridder.grids[0].iter().all(|value| value.norm() == 0.));
        assert_eq!(gridder.sum_of_weights().unwrap().sum(), 0.);
        assert_eq!(gridder.stats().samples_gridded, 0);
    }

    #[test]
    fn test_kernel_offset_moves_patch() {
        let n = 16;
        let kernel = Array2::from_elem((3, 3), Complex::new(1., 0.));
        let builder = TabulatedFunction::new("shifted", 1, vec![kernel])
            .unwrap()
            .with_offsets(vec![[2, -1]]);
        let mut gridder = VisGridder::new(GridderConfig::default(), Arc::new(builder)).unwrap();
        gridder
            .initialise_grid(&axes(n, 1e-3), [n, n, 1, 1], GridMode::Psf)
            .unwrap();
        let at = |ku: f64, kv: f64| UVW {
            u: metres_for_cells(ku, n, 1e-3),
            v: metres_for_cells(kv, n, 1e-3),
            w: 0.,
        };
        // (5, 0) would fit unshifted; (-8, 0) and (0, 7) only fit shifted
        let data = chunk(
            vec![at(0., 0.), at(5., 0.), at(-8., 0.), at(0., 7.)],
            Complex::new(1., 0.),
        );
        gridder.grid(&data).unwrap();

        assert_eq!(gridder.stats().samples_gridded, 3);
        assert_eq!(gridder.stats().samples_off_grid, 1);
        let grid = &gridder.grids[0];
        for &(cu, cv) in &[(10, 7), (2, 7), (10, 14)] {
            for (du, dv) in (0..3).flat_map(|du| (0..3).map(move |dv| (du, dv))) {
                assert_eq!(grid[[0, 0, cu + du - 1, cv + dv - 1]], Complex::new(1., 0.));
            }
        }
        assert_eq!(grid[[0, 0, 8, 8]], Complex::new(0., 0.));
        assert_abs_diff_eq!(grid.iter().map(|value| value.re).sum::<f32>(), 27.);
    }

    #[test]
    fn test_bad_accessor_shape() {
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let mut data = chunk(vec![origin()], Complex::new(1., 0.));
        data.feed1.push(3);
        assert!(matches!(
            gridder.grid(&data),
            Err(GridderError::BadArrayShape { argument, .. }) if argument == "feed1"
        ));
    }

    #[test]
    fn test_pointing_rejection() {
        let config = GridderConfigBuilder::default()
            .max_pointing_separation(Some(0.01))
            .build()
            .unwrap();
        let mut gridder = box_gridder(config);
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let mut data = chunk(vec![origin(), origin()], Complex::new(1., 0.));
        data.pointing_dir1[1] = RADec::from_degrees(32., -30.);
        gridder.grid(&data).unwrap();
        assert_eq!(gridder.stats().rows_rejected_pointing, 1);
        assert_eq!(gridder.stats().samples_gridded, 1);
    }

    #[test]
    fn test_w_out_of_range() {
        let builder = TabulatedFunction::new(
            "w",
            1,
            vec![Array2::from_elem((1, 1), Complex::new(1., 0.)); 3],
        )
        .unwrap()
        .with_w_sampling(WSampling {
            w_max: 10.,
            n_planes: 3,
        });
        let mut gridder = VisGridder::new(GridderConfig::default(), Arc::new(builder)).unwrap();
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let data = chunk(
            vec![
                UVW {
                    u: 0.,
                    v: 0.,
                    w: 100. * VEL_C / FREQ,
                },
                UVW {
                    u: 0.,
                    v: 0.,
                    w: 9. * VEL_C / FREQ,
                },
            ],
            Complex::new(1., 0.),
        );
        gridder.grid(&data).unwrap();
        assert_eq!(gridder.stats().vectors_w_flagged, 1);
        assert_eq!(gridder.stats().samples_gridded, 1);
        let sum_weights = gridder.sum_of_weights().unwrap();
        assert_eq!(sum_weights.dim(), (3, 1, 1));
        assert_eq!(sum_weights[[2, 0, 0]], 1.);
    }

    #[test]
    fn test_psf_uses_weights_only() {
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Psf)
            .unwrap();
        let data = chunk(vec![origin()], Complex::new(3., 7.));
        gridder.grid(&data).unwrap();
        assert_eq!(gridder.grids[0][[0, 0, 8, 8]], Complex::new(1., 0.));
        assert_eq!(gridder.psf_representative().map(|(feed, _)| feed), Some(0));
    }

    #[test]
    fn test_pcf_mirror_rule() {
        assert!(pcf_unconjugated(9, 7, [16, 16]));
        assert!(pcf_unconjugated(7, 8, [16, 16]));
        assert!(!pcf_unconjugated(7, 9, [16, 16]));
        assert!(!pcf_unconjugated(8, 8, [16, 16]));
        assert!(!pcf_unconjugated(9, 8, [16, 16]));
    }

    #[test]
    fn test_pcf_gridding_is_hermitian() {
        let n = 32;
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(n, 1e-3), [n, n, 1, 1], GridMode::Pcf)
            .unwrap();
        let cell = |k: f64| metres_for_cells(k, n, 1e-3);
        let data = chunk(
            vec![
                UVW {
                    u: cell(3.),
                    v: cell(-2.),
                    w: 0.,
                },
                UVW {
                    u: cell(-3.),
                    v: cell(2.),
                    w: 0.,
                },
            ],
            Complex::new(5., 5.),
        );
        gridder.grid(&data).unwrap();
        let grid = &gridder.grids[0];
        let here = grid[[0, 0, 19, 14]];
        let there = grid[[0, 0, 13, 18]];
        assert!(here.im.abs() > 0.);
        assert_abs_diff_eq!(here, there.conj(), epsilon = 1e-6);
        assert_abs_diff_eq!(here.re, 1., epsilon = 1e-6);
        assert_eq!(gridder.sum_of_weights().unwrap()[[0, 0, 0]], 2.);
    }

    #[test]
    fn test_empty_clone_and_merge() {
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let data = chunk(vec![origin()], Complex::new(1., 0.));
        gridder.grid(&data).unwrap();
        let mut other = gridder.empty_clone();
        assert_eq!(other.stats().samples_gridded, 0);
        assert_eq!(other.grids[0].sum(), Complex::new(0., 0.));
        other.grid(&data).unwrap();
        other.grid(&data).unwrap();
        gridder.merge(&other).unwrap();
        assert_eq!(gridder.stats().samples_gridded, 3);
        assert_eq!(gridder.grids[0][[0, 0, 8, 8]], Complex::new(3., 0.));
        assert_eq!(gridder.sum_of_weights().unwrap()[[0, 0, 0]], 3.);
    }

    #[test]
    fn test_merge_mismatch() {
        let mut small = box_gridder(GridderConfig::default());
        small
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let mut large = box_gridder(GridderConfig::default());
        large
            .initialise_grid(&axes(32, 1e-3), [32, 32, 1, 1], GridMode::Image)
            .unwrap();
        assert!(matches!(
            small.merge(&large),
            Err(GridderError::BadArrayShape { .. })
        ));
    }

    #[test]
    fn test_mfs_weights_scale_samples_not_sum() {
        let mut gridder = box_gridder(GridderConfig::default())
            .with_vis_weights(Arc::new(MfsWeights::new(100e6, 1)));
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let data = chunk(vec![origin()], Complex::new(1., 0.));
        gridder.grid(&data).unwrap();
        assert_abs_diff_eq!(gridder.grids[0][[0, 0, 8, 8]].re, 0.5, epsilon = 1e-6);
        assert_eq!(gridder.sum_of_weights().unwrap()[[0, 0, 0]], 1.);
    }

    #[test]
    fn test_linear_data_to_stokes_i() {
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(16, 1e-3), [16, 16, 1, 1], GridMode::Image)
            .unwrap();
        let mut data = VisChunk::new(
            vec![origin()],
            vec![FREQ],
            vec![Stokes::XX, Stokes::XY, Stokes::YX, Stokes::YY],
            RADec::from_degrees(30., -30.),
        );
        data.vis[[0, 0, 0]] = Complex::new(3., 0.);
        data.vis[[0, 0, 3]] = Complex::new(1., 0.);
        gridder.grid(&data).unwrap();
        // I = (XX + YY) / 2 with noise sqrt(1/2), so weight 2
        let value = gridder.grids[0][[0, 0, 8, 8]];
        assert_abs_diff_eq!(value.re, 4., epsilon = 1e-4);
        assert_abs_diff_eq!(value.im, 0., epsilon = 1e-6);
        assert_abs_diff_eq!(gridder.sum_of_weights().unwrap()[[0, 0, 0]], 2., epsilon = 1e-5);
        assert_eq!(gridder.stats().samples_gridded, 1);
    }

    #[test]
    fn test_sum_of_weights_is_monotonic() {
        let n = 64;
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(n, 1e-3), [n, n, 1, 1], GridMode::Image)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut previous = 0.;
        let mut expected = 0.;
        for _ in 0..5 {
            let data = random_chunk(&mut rng, 20, &[FREQ], 50., RADec::from_degrees(30., -30.));
            expected += data
                .noise
                .iter()
                .map(|noise| 1. / f64::from(noise.re * noise.re))
                .sum::<f64>();
            gridder.grid(&data).unwrap();
            let total = gridder.sum_of_weights().unwrap().sum();
            assert!(total >= previous);
            previous = total;
        }
        assert_eq!(gridder.stats().samples_off_grid, 0);
        assert_abs_diff_eq!(previous, expected, epsilon = 1e-6 * expected);
    }

    #[test]
    fn test_grid_par_matches_serial() {
        let n = 64;
        let mut rng = StdRng::seed_from_u64(42);
        let chunks: Vec<VisChunk> = (0..6)
            .map(|_| random_chunk(&mut rng, 25, &[FREQ, FREQ * 1.01], 60., RADec::from_degrees(30., -30.)))
            .collect();

        let mut serial = box_gridder(GridderConfig::default());
        serial
            .initialise_grid(&axes(n, 1e-3), [n, n, 1, 1], GridMode::Image)
            .unwrap();
        for chunk in &chunks {
            serial.grid(chunk).unwrap();
        }

        let mut parallel = box_gridder(GridderConfig::default());
        parallel
            .initialise_grid(&axes(n, 1e-3), [n, n, 1, 1], GridMode::Image)
            .unwrap();
        parallel.grid_par(&chunks).unwrap();

        assert_eq!(serial.stats().samples_gridded, parallel.stats().samples_gridded);
        assert_eq!(serial.stats().number_gridded, parallel.stats().number_gridded);
        assert_abs_diff_eq!(serial.grids[0], parallel.grids[0], epsilon = 1e-3);
        assert_abs_diff_eq!(
            serial.sum_of_weights().unwrap(),
            parallel.sum_of_weights().unwrap(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_grid_par_psf_latches_first_feed() {
        let n = 32;
        let mut chunks = vec![
            chunk(vec![origin(); 3], Complex::new(1., 0.)),
            chunk(vec![origin(); 3], Complex::new(1., 0.)),
            chunk(vec![origin(); 3], Complex::new(1., 0.)),
        ];
        chunks[0].feed1 = vec![4, 5, 4];
        chunks[1].feed1 = vec![5, 5, 5];
        chunks[2].feed1 = vec![4, 4, 3];
        let mut gridder = box_gridder(GridderConfig::default());
        gridder
            .initialise_grid(&axes(n, 1e-3), [n, n, 1, 1], GridMode::Psf)
            .unwrap();
        gridder.grid_par(&chunks).unwrap();
        assert_eq!(gridder.psf_representative().map(|(feed, _)| feed), Some(4));
        assert_eq!(gridder.stats().samples_gridded, 4);
        assert_eq!(gridder.sum_of_weights().unwrap()[[0, 0, 0]], 4.);
    }
}
