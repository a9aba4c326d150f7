//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters and gauges via `metrics-rs`
//! - **Tracing**: Structured log events via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `streamalign_samples_received` | Counter | Samples accepted by stream buffers |
//! | `streamalign_samples_emitted` | Counter | Samples handed to consumers |
//! | `streamalign_samples_dropped` | Counter | Samples discarded (`reason` label) |
//! | `streamalign_samples_lost` | Counter | Lost samples detected by estimators |
//! | `streamalign_buffer_fill` | Gauge | Samples waiting in a stream buffer |
//!
//! Without an installed recorder every call is a no-op. Stream handles are
//! registered with the stream, so install the recorder before registering
//! streams.

mod metrics;
mod tracing_support;

pub use self::metrics::{DropReason, StreamMetrics, init_metrics, record_samples_lost};
pub use self::tracing_support::{
    trace_dynamic_buffer, trace_sample_dropped, trace_sample_emitted, trace_samples_lost,
    warn_mixed_loss_detection,
};
