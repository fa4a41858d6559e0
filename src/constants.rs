// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All constants *must* be double precision.

pub use marlu::constants::VEL_C;

/// Two visibility rows are considered to share a dish pointing for PSF
/// estimation if their pointings are closer than this [radians].
pub const PSF_POINTING_TOLERANCE_RAD: f64 = 1e-6;

/// Lower bound of the sane range of `frequency / c` [1/m]. Anything below
/// this is likely an input file with frequencies in the wrong units.
pub const MIN_RECIPROCAL_WAVELENGTH: f64 = 0.1;

/// Upper bound of the sane range of `frequency / c` [1/m].
pub const MAX_RECIPROCAL_WAVELENGTH: f64 = 30000.0;

/// Relative kernel cutoff assumed when sizing preconditioner kernels.
pub const DEFAULT_CF_CUTOFF: f64 = 1e-3;
