//! Error types for streamalign.

use thiserror::Error;

/// Result type alias using streamalign's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
///
/// Only configuration and programming mistakes are errors. Out-of-order
/// samples, buffer overflows and lost samples are expected at runtime; they
/// are counted in the status structures instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Degenerate configuration (zero window, zero period, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A period estimate was requested before enough samples were seen.
    #[error("period requested with no initial period and less than 2 valid samples")]
    InsufficientSamples,

    /// The stream id does not refer to a registered stream.
    #[error("invalid stream index: {0}")]
    InvalidStream(usize),

    /// The payload type does not match the type the stream was registered with.
    #[error("stream {id} was registered with payload type {expected}")]
    PayloadType {
        /// Stream id.
        id: usize,
        /// Type name of the registered payload.
        expected: &'static str,
    },

    /// Two aligners do not share the same stream layout.
    #[error("stream setup of the two aligners differs: {0}")]
    StreamSetupMismatch(String),

    /// Status snapshot could not be encoded or decoded (rkyv).
    #[error("status serialization failed: {0}")]
    Serialization(String),
}
