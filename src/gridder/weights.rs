//! Extra per-sample weights applied on top of the noise weight.

use std::fmt::Debug;

/// A weight which multiplies gridded and degridded samples.
///
/// Never applied to the preconditioner function.
pub trait VisWeights: Debug + Send + Sync {
    /// The weight of a sample in accessor channel `chan`, at `freq_hz`, for
    /// image polarisation `pol`.
    fn weight(&self, row: usize, chan: usize, pol: usize, freq_hz: f64) -> f32;
}

/// Taylor term weighting for multi-frequency synthesis.
///
/// Term `order` weights each sample by `((f - f0) / f0)^order`, so order 0
/// is a plain unit weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MfsWeights {
    /// reference frequency [Hz]
    pub ref_freq_hz: f64,
    /// Taylor term
    pub order: i32,
}

impl MfsWeights {
    /// Weights for Taylor term `order` about `ref_freq_hz`.
    pub fn new(ref_freq_hz: f64, order: i32) -> Self {
        Self { ref_freq_hz, order }
    }
}

impl VisWeights for MfsWeights {
    #[inline]
    fn weight(&self, _row: usize, _chan: usize, _pol: usize, freq_hz: f64) -> f32 {
        ((freq_hz - self.ref_freq_hz) / self.ref_freq_hz).powi(self.order) as f32
    }
}
