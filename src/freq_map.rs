//! Mapping of accessor channels onto image channels.

use log::trace;

use crate::axes::SpectralAxis;

/// Maps data channels to image channels by frequency.
///
/// Without a spectral axis every channel goes to image channel 0. With one,
/// channel frequencies are rounded to the nearest image channel; anything
/// that falls outside the image is unmapped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrequencyMapper {
    axis: Option<SpectralAxis>,
    n_image_chan: usize,
    freqs: Vec<f64>,
    mapping: Vec<Option<usize>>,
}

impl FrequencyMapper {
    /// A mapper for an image with `n_image_chan` channels along `axis`.
    pub fn setup_image(&mut self, axis: SpectralAxis, n_image_chan: usize) {
        self.axis = Some(axis);
        self.n_image_chan = n_image_chan;
        self.freqs.clear();
        self.mapping.clear();
    }

    /// Send everything to image channel 0.
    pub fn setup_single_plane(&mut self) {
        self.axis = None;
        self.n_image_chan = 1;
        self.freqs.clear();
        self.mapping.clear();
    }

    /// Recompute the mapping for the channel frequencies `freqs` [Hz].
    ///
    /// Returns whether anything changed; the same frequencies as last time is
    /// a no-op.
    pub fn setup_mapping(&mut self, freqs: &[f64]) -> bool {
        if freqs == self.freqs.as_slice() && self.mapping.len() == freqs.len() {
            return false;
        }
        trace!("mapping {} channels onto {} image channels", freqs.len(), self.n_image_chan);
        self.freqs = freqs.to_vec();
        self.mapping = freqs.iter().map(|&freq| self.image_channel(freq)).collect();
        true
    }

    fn image_channel(&self, freq_hz: f64) -> Option<usize> {
        let axis = match self.axis {
            Some(axis) if self.n_image_chan > 1 => axis,
            _ => return if self.n_image_chan > 0 { Some(0) } else { None },
        };
        let width = (axis.end_hz - axis.start_hz) / (self.n_image_chan - 1) as f64;
        if width == 0. || !width.is_finite() {
            return None;
        }
        let chan = ((freq_hz - axis.start_hz) / width).round();
        if chan >= 0. && chan < self.n_image_chan as f64 {
            Some(chan as usize)
        } else {
            None
        }
    }

    /// Image channel for data channel `chan`.
    #[inline]
    pub fn map(&self, chan: usize) -> Option<usize> {
        self.mapping.get(chan).copied().flatten()
    }

    /// Whether data channel `chan` lands in the image.
    #[inline]
    pub fn is_mapped(&self, chan: usize) -> bool {
        self.map(chan).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_plane() {
        let mut mapper = FrequencyMapper::default();
        mapper.setup_single_plane();
        assert!(mapper.setup_mapping(&[100e6, 150e6, 200e6]));
        assert_eq!(mapper.map(0), Some(0));
        assert_eq!(mapper.map(2), Some(0));
        assert_eq!(mapper.map(3), None);
    }

    #[test]
    fn test_one_image_channel_is_mfs() {
        let mut mapper = FrequencyMapper::default();
        mapper.setup_image(
            SpectralAxis {
                start_hz: 150e6,
                end_hz: 150e6,
            },
            1,
        );
        mapper.setup_mapping(&[120e6, 180e6]);
        assert!(mapper.is_mapped(0));
        assert_eq!(mapper.map(1), Some(0));
    }

    #[test]
    fn test_spectral_mapping() {
        let mut mapper = FrequencyMapper::default();
        mapper.setup_image(
            SpectralAxis {
                start_hz: 100e6,
                end_hz: 130e6,
            },
            4,
        );
        mapper.setup_mapping(&[96e6, 104e6, 106e6, 130e6, 140e6, 80e6]);
        assert_eq!(mapper.map(0), Some(0));
        assert_eq!(mapper.map(1), Some(0));
        assert_eq!(mapper.map(2), Some(1));
        assert_eq!(mapper.map(3), Some(3));
        assert_eq!(mapper.map(4), None);
        assert!(!mapper.is_mapped(5));
    }

    #[test]
    fn test_mapping_cached() {
        let mut mapper = FrequencyMapper::default();
        mapper.setup_single_plane();
        assert!(mapper.setup_mapping(&[1e8, 2e8]));
        assert!(!mapper.setup_mapping(&[1e8, 2e8]));
        assert!(mapper.setup_mapping(&[1e8]));
        mapper.setup_single_plane();
        assert!(mapper.setup_mapping(&[1e8]));
    }
}
