//! Geometry of the image being made, or of the model being predicted.

use crate::{pol::Stokes, RADec};

/// A slant orthographic (SIN) projection of the sky onto the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionAxis {
    /// tangent point of the projection
    pub tangent: RADec,
    /// pixel (x, y) at the tangent point, may be fractional
    pub ref_pixel: [f64; 2],
    /// size of a pixel in direction cosines (l, m) [radians]
    pub increment: [f64; 2],
}

impl DirectionAxis {
    /// The direction at the centre of `pixel`.
    pub fn pixel_to_radec(&self, pixel: [f64; 2]) -> RADec {
        let l = (pixel[0] - self.ref_pixel[0]) * self.increment[0];
        let m = (pixel[1] - self.ref_pixel[1]) * self.increment[1];
        let n = (1. - l * l - m * m).max(0.).sqrt();
        let (s_dec0, c_dec0) = self.tangent.dec.sin_cos();
        let dec = (m * c_dec0 + n * s_dec0).asin();
        let ra = self.tangent.ra + l.atan2(n * c_dec0 - m * s_dec0);
        RADec::from_radians(ra, dec)
    }
}

/// A linear frequency axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralAxis {
    /// frequency of the first image channel [Hz]
    pub start_hz: f64,
    /// frequency of the last image channel [Hz]
    pub end_hz: f64,
}

/// Coordinate axes attached to an image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageAxes {
    /// the sky projection, required for gridding
    pub direction: Option<DirectionAxis>,
    /// channel frequencies, without it every channel goes to one plane
    pub spectral: Option<SpectralAxis>,
    /// polarisation products of the image planes, defaults to `[I]`
    pub stokes: Option<Vec<Stokes>>,
}

impl ImageAxes {
    /// Axes with only a direction.
    pub fn new(direction: DirectionAxis) -> Self {
        Self {
            direction: Some(direction),
            ..Default::default()
        }
    }

    /// Add a spectral axis.
    pub fn with_spectral(mut self, spectral: SpectralAxis) -> Self {
        self.spectral = Some(spectral);
        self
    }

    /// Set the polarisation products.
    pub fn with_stokes(mut self, stokes: &[Stokes]) -> Self {
        self.stokes = Some(stokes.to_vec());
        self
    }

    /// The image polarisation frame.
    pub fn image_pol_frame(&self) -> Vec<Stokes> {
        self.stokes.clone().unwrap_or_else(|| vec![Stokes::I])
    }
}

/// Size of one side of a padded image.
pub fn padded_size(n: usize, padding: f64) -> usize {
    (n as f64 * padding).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_pixel_to_radec_at_reference() {
        let axis = DirectionAxis {
            tangent: RADec::from_degrees(45., -30.),
            ref_pixel: [64., 64.],
            increment: [-1e-3, 1e-3],
        };
        let radec = axis.pixel_to_radec([64., 64.]);
        assert_abs_diff_eq!(radec.ra, axis.tangent.ra, epsilon = 1e-12);
        assert_abs_diff_eq!(radec.dec, axis.tangent.dec, epsilon = 1e-12);
    }

    #[test]
    fn test_pixel_to_radec_offsets() {
        let axis = DirectionAxis {
            tangent: RADec::from_degrees(0., 0.),
            ref_pixel: [10., 10.],
            increment: [1e-2, 1e-2],
        };
        // along m on the equator, declination is asin(m)
        let north = axis.pixel_to_radec([10., 13.]);
        assert_abs_diff_eq!(north.dec, 0.03_f64.asin(), epsilon = 1e-12);
        assert_abs_diff_eq!(north.ra, 0., epsilon = 1e-12);
        // and the round trip through marlu's projection gives l, m back
        let somewhere = axis.pixel_to_radec([7., 12.]);
        let lmn = somewhere.to_lmn(axis.tangent);
        assert_abs_diff_eq!(lmn.l, -0.03, epsilon = 1e-12);
        assert_abs_diff_eq!(lmn.m, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_default_pol_frame() {
        let axes = ImageAxes::default();
        assert_eq!(axes.image_pol_frame(), vec![Stokes::I]);
        let axes = axes.with_stokes(&[Stokes::XX, Stokes::YY]);
        assert_eq!(axes.image_pol_frame(), vec![Stokes::XX, Stokes::YY]);
    }

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(100, 1.0), 100);
        assert_eq!(padded_size(100, 1.5), 150);
        assert_eq!(padded_size(75, 1.5), 112);
    }
}
