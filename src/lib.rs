//! # streamalign
//!
//! Temporal alignment of independently arriving, periodic but jittery sample
//! streams, such as the sensor channels of a robot.
//!
//! ## Features
//!
//! - **Timestamp estimation**: denoise the arrival times of a periodic source,
//!   estimate its period and latency, account for lost samples
//! - **Stream alignment**: emit samples of many streams in global timestamp
//!   order with a bounded, configurable latency
//! - **Pull mode**: the same ordering for sources that are queried
//! - **Diagnostics**: status snapshots with rkyv archives, `tracing` events
//!   and `metrics` counters
//!
//! ## Quick Start
//!
//! ```rust
//! use streamalign::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> streamalign::Result<()> {
//! let mut estimator = TimestampEstimator::new(
//!     EstimatorConfig::with_window(Duration::from_secs(2)).with_lost_threshold(2),
//! )?;
//! let mut aligner = StreamAligner::new(Duration::from_millis(100));
//! let imu = aligner.register_stream(
//!     StreamConfig::new(Duration::from_millis(10)).with_name("imu"),
//!     |ts, sample: &[f32; 3]| println!("{} {:?}", ts, sample),
//! )?;
//!
//! let arrival = ClockTime::from_millis(1_003);
//! aligner.push(imu, estimator.update(arrival), [0.0, 0.0, 9.81])?;
//! while aligner.step() {}
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod observability;
pub mod temporal;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::clock::ClockTime;
    pub use crate::error::{Error, Result};
    pub use crate::temporal::{
        EstimatorConfig, PullStreamAligner, StreamAligner, StreamConfig, StreamHandle, StreamId,
        TimestampEstimator,
    };
}

pub use error::{Error, Result};
