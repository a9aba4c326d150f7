//! Temporal alignment of periodic, jittery sample streams.
//!
//! Two engines live here:
//!
//! - [`TimestampEstimator`]: turns the noisy arrival times of one nominally
//!   periodic source into a regular time base, accounting for lost samples
//! - [`StreamAligner`]: merges N independently buffered streams into a single
//!   time-ordered sequence of consumer calls, waiting at most a configurable
//!   timeout for streams that fall silent
//!
//! [`PullStreamAligner`] inverts control of the aligner for sources that are
//! queried rather than pushed from.
//!
//! # Alignment
//!
//! Every stream declares a period: the time after its last sample during
//! which an earlier sample may still show up. The aligner only emits a sample
//! once no active stream can still produce an older one, or once the
//! timeout has expired.
//!
//! ```rust
//! use streamalign::clock::ClockTime;
//! use streamalign::temporal::{StreamAligner, StreamConfig};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! let out = Rc::new(RefCell::new(Vec::new()));
//! let mut aligner = StreamAligner::new(Duration::from_secs(2));
//!
//! let sink = out.clone();
//! let imu = aligner
//!     .register_stream(
//!         StreamConfig::new(Duration::from_millis(10)).with_capacity(8),
//!         move |ts, value: &u32| sink.borrow_mut().push((ts, *value)),
//!     )
//!     .unwrap();
//!
//! aligner.push(imu, ClockTime::from_millis(10), 1).unwrap();
//! aligner.push(imu, ClockTime::from_millis(20), 2).unwrap();
//! while aligner.step() {}
//!
//! assert_eq!(out.borrow().len(), 2);
//! ```

/// Implements rkyv `encode()` / `decode()` for a status snapshot.
macro_rules! impl_status_codec {
    ($status:ty) => {
        impl $status {
            /// Encode as an rkyv archive.
            pub fn encode(&self) -> $crate::error::Result<Vec<u8>> {
                rkyv::to_bytes::<rkyv::rancor::Error>(self)
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| $crate::error::Error::Serialization(e.to_string()))
            }

            /// Decode from bytes produced by `encode()`.
            pub fn decode(bytes: &[u8]) -> $crate::error::Result<Self> {
                let mut aligned = rkyv::util::AlignedVec::<16>::new();
                aligned.extend_from_slice(bytes);
                rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
                    .map_err(|e| $crate::error::Error::Serialization(e.to_string()))
            }
        }
    };
}

pub(crate) use impl_status_codec;

mod aligner;
mod estimator;
mod pull;
pub mod readiness;
mod ring;
mod stream;

pub use aligner::{AlignerStatus, DEFAULT_TIMEOUT, StreamAligner, StreamHandle, StreamId};
pub use estimator::{EstimatorConfig, EstimatorStatus, TimestampEstimator};
pub use pull::PullStreamAligner;
pub use ring::SampleRing;
pub use stream::{DEFAULT_PRIORITY, StreamConfig, StreamStatus};
