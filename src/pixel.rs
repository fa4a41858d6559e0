//! Mapping of baseline coordinates onto grid pixels.
//!
//! A (u, v) coordinate in metres is scaled by the channel wavelength and the
//! uv-cell size, then split into an integer pixel and an oversampling index
//! which selects the sub-pixel plane of the convolution function.

use thiserror::Error;

use crate::constants::{MAX_RECIPROCAL_WAVELENGTH, MIN_RECIPROCAL_WAVELENGTH, VEL_C};

/// Largest scaled coordinate [pixels] that is mapped.
const MAX_SCALED_PIXEL: f64 = i64::MAX as f64 / 4.;

#[derive(Error, Debug, Clone, PartialEq)]
/// Errors that can occur while mapping coordinates onto the grid.
pub enum PixelError {
    /// The fractional offset fell outside `[0, oversample)` after the carry.
    #[error("Fractional offset in {axis} is out of range, scaled={scaled} pixel={pixel} oversample={oversample} frac={frac}")]
    FractionalOffset {
        /// "u" or "v"
        axis: char,
        /// the coordinate in (fractional) pixels
        scaled: f64,
        /// the integer pixel before centring
        pixel: i64,
        /// the oversampling factor
        oversample: i64,
        /// the offending fractional index
        frac: i64,
    },

    /// The frequency is suspicious, but processing can carry on.
    #[error("Check frequencies in the input data as the order of magnitude is likely to be wrong. Frequency = {} GHz", freq_hz / 1e9)]
    SuspiciousFrequency {
        /// The frequency [Hz]
        freq_hz: f64,
    },
}

/// The location of a sample on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UvPixel {
    /// pixel along the first grid axis, origin at the grid centre
    pub iu: i64,
    /// oversampling index along u, in `[0, oversample)`
    pub frac_u: usize,
    /// pixel along the second grid axis, origin at the grid centre
    pub iv: i64,
    /// oversampling index along v, in `[0, oversample)`
    pub frac_v: usize,
}

/// Converts (u, v) in metres to grid pixels for one gridding session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelMapper {
    uv_cell_size: [f64; 2],
    centre: [i64; 2],
    oversample: i64,
}

impl PixelMapper {
    /// Create a mapper for a grid of `grid_shape` pixels (padded), with the
    /// given uv-cell size [wavelengths] and oversampling factor.
    pub fn new(uv_cell_size: [f64; 2], grid_shape: [usize; 2], oversample: usize) -> Self {
        Self {
            uv_cell_size,
            centre: [(grid_shape[0] / 2) as i64, (grid_shape[1] / 2) as i64],
            oversample: oversample as i64,
        }
    }

    /// The oversampling factor.
    pub fn oversample(&self) -> usize {
        self.oversample as usize
    }

    /// Map a baseline coordinate (metres) at frequency `freq_hz` onto the grid.
    ///
    /// # Errors
    ///
    /// [`PixelError::FractionalOffset`] if the oversampling index can't be
    /// brought into range, which means the coordinate was not finite or was
    /// too far from the origin to be a pixel at all.
    #[inline]
    pub fn map(&self, u: f64, v: f64, freq_hz: f64) -> Result<UvPixel, PixelError> {
        let (iu, frac_u) = self.map_axis('u', u * freq_hz / (VEL_C * self.uv_cell_size[0]))?;
        let (iv, frac_v) = self.map_axis('v', v * freq_hz / (VEL_C * self.uv_cell_size[1]))?;
        Ok(UvPixel {
            iu: iu + self.centre[0],
            frac_u,
            iv: iv + self.centre[1],
            frac_v,
        })
    }

    #[inline]
    fn map_axis(&self, axis: char, scaled: f64) -> Result<(i64, usize), PixelError> {
        // beyond this the casts below saturate and the carry overflows
        if !scaled.is_finite() || scaled.abs() > MAX_SCALED_PIXEL {
            return Err(PixelError::FractionalOffset {
                axis,
                scaled,
                pixel: 0,
                oversample: self.oversample,
                frac: 0,
            });
        }
        let mut pixel = scaled.round() as i64;
        let mut frac = (self.oversample as f64 * (pixel as f64 - scaled)).round() as i64;
        // frac / oversample tracks pixel - scaled, so the carry moves both together
        if frac < 0 {
            pixel += 1;
            frac += self.oversample;
        } else if frac >= self.oversample {
            pixel -= 1;
            frac -= self.oversample;
        }
        if frac < 0 || frac >= self.oversample {
            return Err(PixelError::FractionalOffset {
                axis,
                scaled,
                pixel,
                oversample: self.oversample,
                frac,
            });
        }
        Ok((pixel, frac as usize))
    }
}

/// Check a frequency is in a plausible range for radio interferometry.
///
/// # Errors
///
/// [`PixelError::SuspiciousFrequency`] if `freq_hz / c` is outside
/// `(0.1, 30000)` 1/m. This is only a warning condition.
pub fn check_frequency(freq_hz: f64) -> Result<(), PixelError> {
    let reciprocal_wavelength = freq_hz / VEL_C;
    if reciprocal_wavelength > MIN_RECIPROCAL_WAVELENGTH
        && reciprocal_wavelength < MAX_RECIPROCAL_WAVELENGTH
    {
        Ok(())
    } else {
        Err(PixelError::SuspiciousFrequency { freq_hz })
    }
}
