//! Errors that can occur while gridding or degridding visibilities.
//!
//! Module-level errors ([`PixelError`], [`CFError`], [`PolConvError`]) live
//! next to the code that raises them and are wrapped by [`GridderError`].

use thiserror::Error;

pub use crate::{cf::CFError, pixel::PixelError, pol::PolConvError};

#[derive(Error, Debug)]
/// All the errors that can occur in a gridding session.
pub enum GridderError {
    /// A gridder was constructed with parameters that can never work.
    #[error("Invalid gridder configuration: {0}")]
    Configuration(String),

    /// The gridder was used before it was set up properly.
    #[error("Precondition failed in {function}: {reason}")]
    Precondition {
        /// The function name
        function: &'static str,
        /// What was missing or inconsistent
        reason: String,
    },

    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    /// Error for bad array shape in provided argument
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    /// An operation was called in the wrong lifecycle state.
    #[error("Cannot call {operation} while the gridder is {state}")]
    State {
        /// The operation that was attempted
        operation: &'static str,
        /// The current state, as text
        state: String,
    },

    /// A visibility has a noise estimate which gives no usable weight.
    #[error("Weight is supposed to be a positive number; row={row} chan={chan} pol={pol} noise={noise}")]
    NonPositiveWeight {
        /// accessor row
        row: usize,
        /// accessor channel
        chan: usize,
        /// image polarisation
        pol: usize,
        /// the noise value used to derive the weight
        noise: f32,
    },

    #[error(transparent)]
    /// Error derived from [`PixelError`]
    Pixel(#[from] PixelError),

    #[error(transparent)]
    /// Error derived from [`CFError`]
    ConvolutionFunction(#[from] CFError),

    #[error(transparent)]
    /// Error derived from [`PolConvError`]
    PolConversion(#[from] PolConvError),
}
