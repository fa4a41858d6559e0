//! Cache of convolution functions, indexed by w-plane and oversampling offset.
//!
//! A cache holds `num_planes * oversample²` complex matrices. The matrix used
//! for a sample is found with [`ConvFuncCache::c_index`], which combines the
//! plane (before oversampling) with the fractional pixel offsets from
//! [`crate::pixel::PixelMapper`].

use std::mem::size_of;

use log::debug;
use thiserror::Error;

use crate::{
    ndarray::{Array2, ArrayView2},
    Complex,
};

pub mod builder;

pub use builder::{
    BoxFunction, CFSetup, ConvolutionFunctionBuilder, CorrectionFn, TabulatedFunction, WSampling,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors from building or reading a cache of convolution functions.
pub enum CFError {
    /// An index beyond the end of the cache. This is a logic error.
    #[error("Convolution function index {index} is out of range, cache has {len} entries")]
    IndexOutOfRange {
        /// the offending index
        index: usize,
        /// the number of entries in the cache
        len: usize,
    },

    /// A plane (before oversampling) beyond the end of the cache.
    #[error("CF plane {plane} (before oversampling) is out of range, cache has {num_planes} planes")]
    PlaneOutOfRange {
        /// the offending plane
        plane: usize,
        /// the number of planes before oversampling
        num_planes: usize,
    },

    /// A plane which can't be used as a kernel.
    #[error("Convolution function {index} has shape {shape:?}, expected a square matrix with odd side")]
    MalformedPlane {
        /// index into the cache
        index: usize,
        /// shape of the plane
        shape: [usize; 2],
    },

    /// The number of supplied matrices is not a multiple of `oversample²`.
    #[error("{len} convolution functions can't be split into planes of {oversample}x{oversample} oversampled kernels")]
    BadPlaneCount {
        /// number of matrices supplied
        len: usize,
        /// the oversampling factor
        oversample: usize,
    },

    /// The builder's tabulation doesn't match the gridder's oversampling.
    #[error("Convolution functions were tabulated with oversample={tabulated}, gridder uses {requested}")]
    OversampleMismatch {
        /// oversampling of the tabulated kernels
        tabulated: usize,
        /// oversampling requested by the gridder
        requested: usize,
    },

    /// A kernel is wider than the builder is allowed to produce.
    #[error("Convolution function support {support} exceeds the maximum of {max_support}")]
    SupportTooLarge {
        /// support of the widest kernel
        support: usize,
        /// limit from the setup
        max_support: usize,
    },
}

/// Memory usage summary of a [`ConvFuncCache`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CFCacheStats {
    /// planes before oversampling
    pub num_planes: usize,
    /// bytes taken by the matrices and their headers
    pub memory_bytes: usize,
    /// side of a square kernel which would take the same memory per plane
    pub effective_size: f64,
    /// `(effective_size - 1) / 2`
    pub effective_support: f64,
}

/// Convolution functions for one gridding session.
///
/// Immutable once built; share it between gridders with an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvFuncCache {
    planes: Vec<Array2<Complex<f32>>>,
    offsets: Vec<[i64; 2]>,
    oversample: usize,
}

impl ConvFuncCache {
    /// Create a cache from matrices laid out in [`ConvFuncCache::c_index`]
    /// order. All offsets start at zero.
    ///
    /// # Errors
    ///
    /// [`CFError::BadPlaneCount`] if `planes.len()` is not a multiple of
    /// `oversample²`.
    pub fn new(oversample: usize, planes: Vec<Array2<Complex<f32>>>) -> Result<Self, CFError> {
        let per_plane = oversample * oversample;
        if per_plane == 0 || planes.len() % per_plane != 0 {
            return Err(CFError::BadPlaneCount {
                len: planes.len(),
                oversample,
            });
        }
        let num_planes = planes.len() / per_plane;
        Ok(Self {
            planes,
            offsets: vec![[0, 0]; num_planes],
            oversample,
        })
    }

    /// The oversampling factor the cache was built with.
    pub fn oversample(&self) -> usize {
        self.oversample
    }

    /// Number of planes before oversampling.
    pub fn num_planes(&self) -> usize {
        self.offsets.len()
    }

    /// Total number of matrices.
    pub fn len(&self) -> usize {
        self.planes.len()
    }

    /// Whether the cache has no matrices at all.
    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    /// Index of the matrix for `plane` at oversampling offsets
    /// (`frac_u`, `frac_v`).
    #[inline]
    pub fn c_index(&self, plane: usize, frac_u: usize, frac_v: usize) -> usize {
        frac_u + self.oversample * (frac_v + self.oversample * plane)
    }

    /// The matrix at `c_index`.
    ///
    /// # Errors
    ///
    /// [`CFError::IndexOutOfRange`] if `c_index` is beyond the cache.
    #[inline]
    pub fn get(&self, c_index: usize) -> Result<ArrayView2<'_, Complex<f32>>, CFError> {
        self.planes
            .get(c_index)
            .map(|plane| plane.view())
            .ok_or(CFError::IndexOutOfRange {
                index: c_index,
                len: self.planes.len(),
            })
    }

    /// Support of the matrix at `c_index`, i.e. `(side - 1) / 2`.
    ///
    /// # Errors
    ///
    /// [`CFError::IndexOutOfRange`] or [`CFError::MalformedPlane`] if the
    /// matrix is empty, rectangular or has an even side.
    #[inline]
    pub fn support(&self, c_index: usize) -> Result<usize, CFError> {
        let (nx, ny) = self.get(c_index)?.dim();
        if nx != ny || nx % 2 != 1 {
            return Err(CFError::MalformedPlane {
                index: c_index,
                shape: [nx, ny],
            });
        }
        Ok((nx - 1) / 2)
    }

    /// The largest support of any well formed matrix in the cache.
    pub fn max_support(&self) -> usize {
        (0..self.planes.len())
            .filter_map(|idx| self.support(idx).ok())
            .max()
            .unwrap_or(0)
    }

    /// Offset of the kernel centre for `plane` (before oversampling).
    ///
    /// # Errors
    ///
    /// [`CFError::PlaneOutOfRange`] if there is no such plane.
    pub fn offset(&self, plane: usize) -> Result<[i64; 2], CFError> {
        self.offsets
            .get(plane)
            .copied()
            .ok_or(CFError::PlaneOutOfRange {
                plane,
                num_planes: self.offsets.len(),
            })
    }

    /// Set the kernel centre offset for `plane` (before oversampling).
    ///
    /// # Errors
    ///
    /// [`CFError::PlaneOutOfRange`] if there is no such plane.
    pub fn set_offset(&mut self, plane: usize, offset: [i64; 2]) -> Result<(), CFError> {
        let num_planes = self.offsets.len();
        let slot = self
            .offsets
            .get_mut(plane)
            .ok_or(CFError::PlaneOutOfRange { plane, num_planes })?;
        *slot = offset;
        Ok(())
    }

    /// Summarise the memory used by the cache.
    ///
    /// Only the first oversampled matrix of each plane is inspected, the rest
    /// are assumed to have the same shape.
    pub fn stats(&self) -> CFCacheStats {
        let header = size_of::<Array2<Complex<f32>>>();
        let elem = size_of::<Complex<f32>>();
        let per_plane = self.oversample * self.oversample;
        let num_planes = self.num_planes();
        let mut memory_bytes = 0;
        for plane in 0..num_planes {
            memory_bytes += header + elem * self.planes[plane * per_plane].len() * per_plane;
        }
        let (effective_size, effective_support) = if num_planes > 0 {
            let size = ((memory_bytes - header * num_planes) as f64
                / (elem * per_plane * num_planes) as f64)
                .sqrt();
            (size, (size - 1.) / 2.)
        } else {
            (0., 0.)
        };
        CFCacheStats {
            num_planes,
            memory_bytes,
            effective_size,
            effective_support,
        }
    }

    /// Write the support, size and offset of every plane to the debug log.
    pub fn log_stats(&self) {
        let per_plane = self.oversample * self.oversample;
        for plane in 0..self.num_planes() {
            let c_index = plane * per_plane;
            let (nx, ny) = self.planes[c_index].dim();
            if nx * ny == 0 {
                debug!("CF plane={} (before oversampling) is unused", plane);
                continue;
            }
            match self.support(c_index) {
                Ok(support) => {
                    let [off_u, off_v] = self.offsets[plane];
                    debug!(
                        "CF plane={} (before oversampling): support={}, size={} at offset ({},{})",
                        plane, support, nx, off_u, off_v
                    );
                }
                Err(_) => debug!(
                    "CF plane={} (before oversampling) has a rectangular support or even size",
                    plane
                ),
            }
        }
        let stats = self.stats();
        if stats.num_planes > 0 {
            debug!(
                "Cache of convolution functions take {:.3} MiB of memory, {:.3} MiB per plane (before oversampling)",
                stats.memory_bytes as f64 / 1024. / 1024.,
                stats.memory_bytes as f64 / stats.num_planes as f64 / 1024. / 1024.
            );
            debug!(
                "Effective CF size (in terms of memory usage) is {}, effective support={}",
                stats.effective_size as i64, stats.effective_support as i64
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndarray::Array2;

    fn unit(side: usize) -> Array2<Complex<f32>> {
        Array2::from_elem((side, side), Complex::new(1., 0.))
    }

    #[test]
    fn test_c_index_layout() {
        let planes = (0..2 * 9).map(|_| unit(3)).collect();
        let cache = ConvFuncCache::new(3, planes).unwrap();
        assert_eq!(cache.num_planes(), 2);
        assert_eq!(cache.len(), 18);
        assert_eq!(cache.c_index(0, 0, 0), 0);
        assert_eq!(cache.c_index(0, 2, 0), 2);
        assert_eq!(cache.c_index(0, 0, 1), 3);
        assert_eq!(cache.c_index(1, 1, 2), 1 + 3 * (2 + 3));
    }

    #[test]
    fn test_bad_plane_count() {
        let planes = (0..5).map(|_| unit(1)).collect();
        assert!(matches!(
            ConvFuncCache::new(2, planes),
            Err(CFError::BadPlaneCount {
                len: 5,
                oversample: 2
            })
        ));
    }

    #[test]
    fn test_get_out_of_range_is_internal_error() {
        let cache = ConvFuncCache::new(1, vec![unit(1)]).unwrap();
        assert!(cache.get(0).is_ok());
        assert!(matches!(
            cache.get(1),
            Err(CFError::IndexOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_support() {
        let cache = ConvFuncCache::new(1, vec![unit(7), Array2::zeros((4, 4)), unit(1)]).unwrap();
        assert_eq!(cache.support(0), Ok(3));
        assert!(matches!(
            cache.support(1),
            Err(CFError::MalformedPlane { index: 1, .. })
        ));
        assert_eq!(cache.support(2), Ok(0));
        assert_eq!(cache.max_support(), 3);
    }

    #[test]
    fn test_offsets() {
        let mut cache = ConvFuncCache::new(1, vec![unit(3), unit(5)]).unwrap();
        assert_eq!(cache.offset(1), Ok([0, 0]));
        cache.set_offset(1, [2, -3]).unwrap();
        assert_eq!(cache.offset(1), Ok([2, -3]));
        assert_eq!(cache.offset(0), Ok([0, 0]));
        assert!(matches!(
            cache.set_offset(2, [0, 0]),
            Err(CFError::PlaneOutOfRange {
                plane: 2,
                num_planes: 2
            })
        ));
        assert!(cache.offset(5).is_err());
    }

    #[test]
    fn test_stats_effective_size() {
        // two planes, oversample 2, sides 3 and 5
        let mut planes: Vec<_> = (0..4).map(|_| unit(3)).collect();
        planes.extend((0..4).map(|_| unit(5)));
        let cache = ConvFuncCache::new(2, planes).unwrap();
        let stats = cache.stats();
        let header = size_of::<Array2<Complex<f32>>>();
        let elem = size_of::<Complex<f32>>();
        assert_eq!(stats.num_planes, 2);
        assert_eq!(stats.memory_bytes, 2 * header + elem * 4 * (9 + 25));
        let expected = (17.0_f64).sqrt();
        assert!((stats.effective_size - expected).abs() < 1e-12);
        assert!((stats.effective_support - (expected - 1.) / 2.).abs() < 1e-12);
    }

    #[test]
    fn test_stats_empty() {
        let cache = ConvFuncCache::new(4, vec![]).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CFCacheStats::default());
        cache.log_stats();
    }
}
