//! Metrics collection using metrics-rs.

use metrics::{Counter, Gauge, SharedString, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const SAMPLES_RECEIVED: &str = "streamalign_samples_received";
const SAMPLES_EMITTED: &str = "streamalign_samples_emitted";
const SAMPLES_DROPPED: &str = "streamalign_samples_dropped";
const SAMPLES_LOST: &str = "streamalign_samples_lost";
const BUFFER_FILL: &str = "streamalign_buffer_fill";

/// Reason a sample was discarded by a stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Older than the last sample the aligner already emitted.
    LateArrival,
    /// Older than the last sample accepted on the same stream.
    BackwardInTime,
    /// Evicted because the stream buffer was full.
    BufferFull,
}

impl DropReason {
    /// Label value used for the `reason` metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            DropReason::LateArrival => "late_arrival",
            DropReason::BackwardInTime => "backward_in_time",
            DropReason::BufferFull => "buffer_full",
        }
    }
}

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        SAMPLES_RECEIVED,
        Unit::Count,
        "Total number of samples pushed into stream buffers"
    );
    metrics::describe_counter!(
        SAMPLES_EMITTED,
        Unit::Count,
        "Total number of samples handed to stream consumers"
    );
    metrics::describe_counter!(
        SAMPLES_DROPPED,
        Unit::Count,
        "Total number of samples discarded, labelled by reason"
    );
    metrics::describe_counter!(
        SAMPLES_LOST,
        Unit::Count,
        "Total number of lost samples detected by timestamp estimators"
    );
    metrics::describe_gauge!(
        BUFFER_FILL,
        Unit::Count,
        "Number of samples waiting in a stream buffer"
    );
}

/// Metric handles of one stream.
///
/// The labels are resolved once, when the stream is registered, so
/// recording on the sample path does not allocate. Handles registered before
/// a recorder is installed stay no-ops: call [`init_metrics`] and install the
/// recorder before registering streams.
#[derive(Clone)]
pub struct StreamMetrics {
    received: Counter,
    emitted: Counter,
    dropped_late: Counter,
    dropped_backward: Counter,
    dropped_full: Counter,
    buffer_fill: Gauge,
}

impl StreamMetrics {
    /// Register the handles of the stream labelled `stream`.
    pub fn new(stream: &str) -> Self {
        let label = SharedString::from(stream.to_string());
        let dropped = |reason: DropReason| {
            counter!(SAMPLES_DROPPED, "stream" => label.clone(), "reason" => reason.as_str())
        };
        Self {
            received: counter!(SAMPLES_RECEIVED, "stream" => label.clone()),
            emitted: counter!(SAMPLES_EMITTED, "stream" => label.clone()),
            dropped_late: dropped(DropReason::LateArrival),
            dropped_backward: dropped(DropReason::BackwardInTime),
            dropped_full: dropped(DropReason::BufferFull),
            buffer_fill: gauge!(BUFFER_FILL, "stream" => label.clone()),
        }
    }

    /// Record a sample pushed into the stream buffer.
    #[inline]
    pub fn sample_received(&self) {
        self.received.increment(1);
    }

    /// Record a sample handed to the consumer.
    #[inline]
    pub fn sample_emitted(&self) {
        self.emitted.increment(1);
    }

    /// Record a discarded sample.
    #[inline]
    pub fn sample_dropped(&self, reason: DropReason) {
        match reason {
            DropReason::LateArrival => &self.dropped_late,
            DropReason::BackwardInTime => &self.dropped_backward,
            DropReason::BufferFull => &self.dropped_full,
        }
        .increment(1);
    }

    /// Record the current fill level of the buffer.
    #[inline]
    pub fn buffer_fill(&self, fill: usize) {
        self.buffer_fill.set(fill as f64);
    }
}

impl std::fmt::Debug for StreamMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMetrics").finish_non_exhaustive()
    }
}

/// Record lost samples materialized by an estimator.
#[inline]
pub fn record_samples_lost(count: u64) {
    counter!(SAMPLES_LOST).increment(count);
}
