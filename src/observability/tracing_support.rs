//! Tracing integration for structured logging.

use super::metrics::DropReason;
use crate::clock::ClockTime;

/// Log a sample handed to its consumer.
#[inline]
pub fn trace_sample_emitted(stream: &str, id: usize, timestamp: ClockTime) {
    tracing::trace!(
        stream = %stream,
        id = id,
        timestamp = %timestamp,
        "sample emitted"
    );
}

/// Log a discarded sample.
#[inline]
pub fn trace_sample_dropped(stream: &str, id: usize, timestamp: ClockTime, reason: DropReason) {
    tracing::debug!(
        stream = %stream,
        id = id,
        timestamp = %timestamp,
        reason = reason.as_str(),
        "sample dropped"
    );
}

/// Log a stream buffer that grows at runtime.
#[inline]
pub fn trace_dynamic_buffer(stream: &str, capacity: usize) {
    tracing::debug!(
        stream = %stream,
        capacity = capacity,
        "dynamically allocating stream aligner buffer"
    );
}

/// Log lost samples materialized by the estimator.
#[inline]
pub fn trace_samples_lost(count: u64, base_time_secs: f64) {
    tracing::debug!(count = count, base_time = base_time_secs, "lost samples detected");
}

/// Warn about threshold loss detection firing while sample indexes are supplied.
#[inline]
pub fn warn_mixed_loss_detection(sample_distance: i64) {
    tracing::warn!(
        sample_distance = sample_distance,
        "detected lost samples even though sample indexes were provided, \
         the lost threshold should probably be disabled"
    );
}
