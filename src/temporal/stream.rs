//! Per-stream sample buffers.

use super::readiness::StreamView;
use super::ring::SampleRing;
use crate::clock::ClockTime;
use crate::error::{Error, Result};
use crate::observability::{
    DropReason, StreamMetrics, trace_dynamic_buffer, trace_sample_dropped, trace_sample_emitted,
};
use rkyv::{Archive, Deserialize, Serialize};
use std::any::Any;
use std::time::Duration;

/// Initial capacity of a dynamically sized buffer.
const DYNAMIC_INITIAL_CAPACITY: usize = 20;

/// Priority of streams registered without an explicit one.
pub const DEFAULT_PRIORITY: i32 = -1;

/// Registration parameters of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Name used in status output, logs and metric labels.
    pub name: String,
    /// Time between samples. After the last sample of a stream, the aligner
    /// waits up to this long for an earlier sample of that stream. Zero for
    /// streams that are not periodic.
    pub period: Duration,
    /// Buffer capacity. `None` derives it from the period and the aligner
    /// timeout, `Some(0)` grows the buffer on demand.
    pub capacity: Option<usize>,
    /// Tie-break between samples with equal timestamps: lower values are
    /// emitted first.
    pub priority: i32,
    /// Whether the period is used as lookahead, or only to size the buffer.
    pub lookahead: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            period: Duration::ZERO,
            capacity: None,
            priority: DEFAULT_PRIORITY,
            lookahead: true,
        }
    }
}

impl StreamConfig {
    /// Create a configuration for a stream with the given period.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Set the stream name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set a fixed buffer capacity (0 for a dynamically growing buffer).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Only use the period to size the buffer; the stream never delays
    /// other streams beyond the aligner timeout.
    pub fn without_lookahead(mut self) -> Self {
        self.lookahead = false;
        self
    }

    /// Buffer capacity for this stream under the given aligner timeout.
    pub(crate) fn resolve_capacity(&self, timeout: Duration, size_factor: u64) -> Result<usize> {
        if let Some(capacity) = self.capacity {
            return Ok(capacity);
        }
        ClockTime::from(timeout)
            .div_ceil(ClockTime::from(self.period))
            .map(|periods| periods.saturating_mul(size_factor) as usize)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "stream '{}' has neither a buffer capacity nor a period",
                    self.name
                ))
            })
    }

    fn lookahead_period(&self) -> ClockTime {
        if self.lookahead {
            ClockTime::from(self.period)
        } else {
            ClockTime::ZERO
        }
    }
}

/// Diagnostic snapshot of one stream buffer.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct StreamStatus {
    /// Stream name.
    pub name: String,
    /// Whether the stream takes part in the readiness decision.
    pub active: bool,
    /// Priority.
    pub priority: i32,
    /// Buffer capacity.
    pub buffer_size: u64,
    /// Samples currently buffered.
    pub buffer_fill: u64,
    /// Samples pushed, including dropped ones.
    pub samples_received: u64,
    /// Samples handed to the consumer.
    pub samples_processed: u64,
    /// Samples evicted from a full buffer.
    pub samples_dropped_buffer_full: u64,
    /// Samples older than the last emitted sample of the aligner.
    pub samples_dropped_late_arriving: u64,
    /// Samples older than the last accepted sample of this stream.
    pub samples_backward_in_time: u64,
    /// Timestamp of the last pushed sample, `NONE` before the first push.
    pub latest_sample_time: ClockTime,
    /// Timestamp of the last accepted sample.
    pub latest_data_time: ClockTime,
    /// Timestamp of the oldest buffered sample, `NONE` when empty.
    pub earliest_data_time: ClockTime,
}

crate::temporal::impl_status_codec!(StreamStatus);

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] prio {} fill {}/{}",
            if self.name.is_empty() { "<unnamed>" } else { &self.name },
            if self.active { "active" } else { "inactive" },
            self.priority,
            self.buffer_fill,
            self.buffer_size,
        )?;
        write!(
            f,
            " received {} processed {} dropped (full {}, late {}, backward {})",
            self.samples_received,
            self.samples_processed,
            self.samples_dropped_buffer_full,
            self.samples_dropped_late_arriving,
            self.samples_backward_in_time,
        )?;
        write!(f, " data {}..{}", self.earliest_data_time, self.latest_data_time)
    }
}

/// Result of a push into a stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Buffered,
    Late,
    BackwardInTime,
}

pub(crate) type Consumer<T> = Box<dyn FnMut(ClockTime, &T)>;

/// Buffer of one registered stream, with its consumer.
pub(crate) struct Stream<T> {
    id: usize,
    label: String,
    metrics: StreamMetrics,
    period: ClockTime,
    priority: i32,
    dynamic: bool,
    buffer: SampleRing<(ClockTime, T)>,
    last_time: ClockTime,
    active: bool,
    consumer: Consumer<T>,
    status: StreamStatus,
}

impl<T> Stream<T> {
    pub(crate) fn new(
        id: usize,
        config: &StreamConfig,
        capacity: usize,
        consumer: Consumer<T>,
    ) -> Self {
        let label = if config.name.is_empty() {
            format!("stream{}", id)
        } else {
            config.name.clone()
        };
        let dynamic = capacity == 0;
        if dynamic {
            trace_dynamic_buffer(&label, DYNAMIC_INITIAL_CAPACITY);
        }
        let buffer = SampleRing::with_capacity(if dynamic {
            DYNAMIC_INITIAL_CAPACITY
        } else {
            capacity
        });

        Self {
            id,
            period: config.lookahead_period(),
            priority: config.priority,
            dynamic,
            last_time: ClockTime::ZERO,
            active: true,
            consumer,
            status: StreamStatus {
                name: config.name.clone(),
                active: true,
                priority: config.priority,
                buffer_size: buffer.capacity() as u64,
                buffer_fill: 0,
                samples_received: 0,
                samples_processed: 0,
                samples_dropped_buffer_full: 0,
                samples_dropped_late_arriving: 0,
                samples_backward_in_time: 0,
                latest_sample_time: ClockTime::NONE,
                latest_data_time: ClockTime::ZERO,
                earliest_data_time: ClockTime::NONE,
            },
            buffer,
            metrics: StreamMetrics::new(&label),
            label,
        }
    }

    /// Push a sample. `emitted_until` is the timestamp of the last sample
    /// the aligner emitted, if any.
    pub(crate) fn push(
        &mut self,
        timestamp: ClockTime,
        data: T,
        emitted_until: Option<ClockTime>,
    ) -> PushOutcome {
        self.active = true;
        self.status.samples_received += 1;
        self.status.latest_sample_time = timestamp;
        self.metrics.sample_received();

        if emitted_until.is_some_and(|current| timestamp < current) {
            self.status.samples_dropped_late_arriving += 1;
            self.record_drop(timestamp, DropReason::LateArrival);
            return PushOutcome::Late;
        }

        if timestamp < self.last_time {
            self.status.samples_backward_in_time += 1;
            self.record_drop(timestamp, DropReason::BackwardInTime);
            return PushOutcome::BackwardInTime;
        }
        self.last_time = timestamp;

        if self.buffer.is_full() && self.dynamic {
            let capacity = self.buffer.capacity() * 2;
            self.buffer.set_capacity(capacity);
            self.status.buffer_size = capacity as u64;
            trace_dynamic_buffer(&self.label, capacity);
        }
        if let Some((evicted, _)) = self.buffer.push_back((timestamp, data)) {
            self.status.samples_dropped_buffer_full += 1;
            self.record_drop(evicted, DropReason::BufferFull);
        }
        self.metrics.buffer_fill(self.buffer.len());
        PushOutcome::Buffered
    }

    fn record_drop(&self, timestamp: ClockTime, reason: DropReason) {
        self.metrics.sample_dropped(reason);
        trace_sample_dropped(&self.label, self.id, timestamp, reason);
    }

    /// Oldest buffered sample.
    pub(crate) fn next_sample(&self) -> Option<(ClockTime, &T)> {
        self.buffer.front().map(|(timestamp, data)| (*timestamp, data))
    }
}

/// Type-erased view of a [`Stream`], so streams of different payload types
/// can share one aligner.
pub(crate) trait StreamSlot {
    /// Snapshot for the readiness decision.
    fn view(&self) -> StreamView;

    /// Pop the oldest sample and hand it to the consumer.
    fn emit(&mut self) -> Option<ClockTime>;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// Whether a push would not evict anything.
    fn has_spare_capacity(&self) -> bool;

    /// Drop buffered samples and drop counters, keep the registration.
    fn clear(&mut self);

    fn status(&self) -> StreamStatus;

    /// Take over buffer contents, last time and counters of `other`.
    fn copy_state_from(&mut self, other: &dyn StreamSlot) -> Result<()>;

    fn payload_type(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Clone + 'static> StreamSlot for Stream<T> {
    fn view(&self) -> StreamView {
        StreamView {
            id: self.id,
            head: self.buffer.front().map(|(timestamp, _)| *timestamp),
            last_time: self.last_time,
            period: self.period,
            priority: self.priority,
            active: self.active,
        }
    }

    fn emit(&mut self) -> Option<ClockTime> {
        let (timestamp, data) = self.buffer.pop_front()?;
        self.status.samples_processed += 1;
        (self.consumer)(timestamp, &data);

        self.metrics.sample_emitted();
        self.metrics.buffer_fill(self.buffer.len());
        trace_sample_emitted(&self.label, self.id, timestamp);
        Some(timestamp)
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn has_spare_capacity(&self) -> bool {
        self.dynamic || !self.buffer.is_full()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.last_time = ClockTime::ZERO;
        self.status.latest_sample_time = ClockTime::NONE;
        self.status.samples_dropped_buffer_full = 0;
        self.status.samples_dropped_late_arriving = 0;
        self.status.samples_backward_in_time = 0;
        self.metrics.buffer_fill(0);
    }

    fn status(&self) -> StreamStatus {
        StreamStatus {
            active: self.active,
            buffer_size: self.buffer.capacity() as u64,
            buffer_fill: self.buffer.len() as u64,
            latest_data_time: self.last_time,
            earliest_data_time: self
                .buffer
                .front()
                .map_or(ClockTime::NONE, |(timestamp, _)| *timestamp),
            ..self.status.clone()
        }
    }

    fn copy_state_from(&mut self, other: &dyn StreamSlot) -> Result<()> {
        let other = other
            .as_any()
            .downcast_ref::<Stream<T>>()
            .ok_or_else(|| {
                Error::StreamSetupMismatch(format!(
                    "stream {} carries {}, other stream carries {}",
                    self.id,
                    self.payload_type(),
                    other.payload_type()
                ))
            })?;

        self.buffer = other.buffer.clone();
        self.dynamic = other.dynamic;
        self.last_time = other.last_time;
        self.active = other.active;
        self.status = StreamStatus {
            name: self.status.name.clone(),
            ..other.status.clone()
        };
        Ok(())
    }

    fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn stream(capacity: usize) -> (Stream<u32>, Rc<RefCell<Vec<u32>>>) {
        let out = Rc::new(RefCell::new(Vec::new()));
        let sink = out.clone();
        let config = StreamConfig::new(Duration::from_secs(1)).with_name("test");
        let stream = Stream::new(
            0,
            &config,
            capacity,
            Box::new(move |_, value: &u32| sink.borrow_mut().push(*value)),
        );
        (stream, out)
    }

    fn secs(s: u64) -> ClockTime {
        ClockTime::from_secs(s)
    }

    #[test]
    fn test_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.priority, DEFAULT_PRIORITY);
        assert!(config.lookahead);
        assert_eq!(config.capacity, None);
    }

    #[test]
    fn test_resolve_capacity() {
        let timeout = Duration::from_secs(2);
        let config = StreamConfig::new(Duration::from_millis(300));
        // ceil(2 / 0.3) = 7
        assert_eq!(config.resolve_capacity(timeout, 2).unwrap(), 14);
        assert_eq!(config.clone().with_capacity(3).resolve_capacity(timeout, 2).unwrap(), 3);

        let aperiodic = StreamConfig::new(Duration::ZERO).with_name("gps");
        assert!(matches!(
            aperiodic.resolve_capacity(timeout, 2),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(aperiodic.with_capacity(5).resolve_capacity(timeout, 2).unwrap(), 5);
    }

    #[test]
    fn test_without_lookahead_keeps_buffer_sizing() {
        let config = StreamConfig::new(Duration::from_secs(1)).without_lookahead();
        assert_eq!(config.resolve_capacity(Duration::from_secs(2), 2).unwrap(), 4);
        assert_eq!(config.lookahead_period(), ClockTime::ZERO);
    }

    #[test]
    fn test_backward_in_time_is_dropped() {
        let (mut stream, _) = stream(4);
        assert_eq!(stream.push(secs(10), 1, None), PushOutcome::Buffered);
        assert_eq!(stream.push(secs(11), 2, None), PushOutcome::Buffered);
        assert_eq!(stream.push(secs(10), 3, None), PushOutcome::BackwardInTime);
        assert_eq!(stream.push(secs(9), 4, None), PushOutcome::BackwardInTime);

        let status = stream.status();
        assert_eq!(status.samples_received, 4);
        assert_eq!(status.samples_backward_in_time, 2);
        assert_eq!(status.buffer_fill, 2);
        assert_eq!(status.latest_data_time, secs(11));
        assert_eq!(status.latest_sample_time, secs(9));
    }

    #[test]
    fn test_late_arrival_is_dropped() {
        let (mut stream, _) = stream(4);
        assert_eq!(stream.push(secs(5), 1, Some(secs(6))), PushOutcome::Late);
        assert_eq!(stream.push(secs(6), 1, Some(secs(6))), PushOutcome::Buffered);
        assert_eq!(stream.status().samples_dropped_late_arriving, 1);
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let (mut stream, out) = stream(2);
        for (i, t) in [1, 2, 3, 4].into_iter().enumerate() {
            stream.push(secs(t), i as u32, None);
        }
        assert_eq!(stream.status().samples_dropped_buffer_full, 2);
        assert_eq!(stream.emit(), Some(secs(3)));
        assert_eq!(stream.emit(), Some(secs(4)));
        assert_eq!(stream.emit(), None);
        assert_eq!(*out.borrow(), vec![2, 3]);
        assert_eq!(stream.status().samples_processed, 2);
    }

    #[test]
    fn test_dynamic_buffer_doubles() {
        let (mut stream, _) = stream(0);
        assert_eq!(stream.status().buffer_size, 20);
        for t in 0..45 {
            stream.push(secs(t), 0, None);
        }
        let status = stream.status();
        assert_eq!(status.buffer_size, 80);
        assert_eq!(status.buffer_fill, 45);
        assert_eq!(status.samples_dropped_buffer_full, 0);
        assert!(stream.has_spare_capacity());
    }

    #[test]
    fn test_clear_resets_drop_counters() {
        let (mut stream, _) = stream(1);
        stream.push(secs(2), 0, None);
        stream.push(secs(3), 0, None);
        stream.push(secs(1), 0, None);
        stream.clear();

        let status = stream.status();
        assert_eq!(status.buffer_fill, 0);
        assert_eq!(status.samples_dropped_buffer_full, 0);
        assert_eq!(status.samples_backward_in_time, 0);
        assert_eq!(status.samples_received, 3);
        assert_eq!(status.latest_data_time, ClockTime::ZERO);

        // old timestamps are accepted again
        assert_eq!(stream.push(secs(1), 0, None), PushOutcome::Buffered);
    }

    #[test]
    fn test_view_watermark_inputs() {
        let (mut stream, _) = stream(4);
        let view = stream.view();
        assert_eq!(view.head, None);
        assert_eq!(view.last_time, ClockTime::ZERO);
        assert_eq!(view.period, secs(1));

        stream.push(secs(7), 0, None);
        stream.set_active(false);
        let view = stream.view();
        assert_eq!(view.head, Some(secs(7)));
        assert!(!view.active);

        // pushing reactivates
        stream.push(secs(8), 0, None);
        assert!(stream.is_active());
    }

    #[test]
    fn test_copy_state_requires_same_payload() {
        let (mut a, _) = stream(4);
        let (mut b, _) = stream(4);
        b.push(secs(3), 9, None);
        a.copy_state_from(&b).unwrap();
        assert_eq!(a.next_sample(), Some((secs(3), &9)));
        assert_eq!(a.status().name, "test");

        let other: Stream<String> = Stream::new(
            0,
            &StreamConfig::new(Duration::from_secs(1)),
            4,
            Box::new(|_, _: &String| {}),
        );
        assert!(matches!(
            a.copy_state_from(&other),
            Err(Error::StreamSetupMismatch(_))
        ));
    }

    #[test]
    fn test_status_display() {
        let (mut stream, _) = stream(4);
        stream.push(secs(1), 0, None);
        let text = stream.status().to_string();
        assert!(text.starts_with("test [active]"));
        assert!(text.contains("fill 1/4"));
    }
}
