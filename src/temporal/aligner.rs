//! Bounded-latency, time-ordered merge of multiple sample streams.

use super::readiness::{self, AlignerClock, Readiness, StreamView};
use super::stream::{PushOutcome, Stream, StreamConfig, StreamSlot, StreamStatus};
use crate::clock::ClockTime;
use crate::error::{Error, Result};
use rkyv::{Archive, Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

/// Timeout used by [`StreamAligner::default`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Buffer capacity, in periods per timeout, of streams registered without one.
const BUFFER_SIZE_FACTOR: u64 = 2;

/// Identifier of a registered stream.
///
/// Ids are dense indices and are reused after a stream is unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(usize);

impl StreamId {
    /// Create an id from a raw index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for StreamId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typed handle to a registered stream.
pub struct StreamHandle<T> {
    id: StreamId,
    _payload: PhantomData<fn() -> T>,
}

impl<T> StreamHandle<T> {
    fn new(id: StreamId) -> Self {
        Self {
            id,
            _payload: PhantomData,
        }
    }

    /// Get the stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl<T> Clone for StreamHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StreamHandle<T> {}

impl<T> PartialEq for StreamHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for StreamHandle<T> {}

impl<T> std::fmt::Debug for StreamHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> From<StreamHandle<T>> for StreamId {
    fn from(handle: StreamHandle<T>) -> Self {
        handle.id
    }
}

/// Diagnostic snapshot of a [`StreamAligner`].
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct AlignerStatus {
    /// Timestamp of the last emitted sample, `NONE` before the first one.
    pub current_time: ClockTime,
    /// Newest accepted timestamp, `NONE` before the first one.
    pub latest_time: ClockTime,
    /// Difference between the newest accepted and the last emitted sample.
    pub latency: ClockTime,
    /// Samples dropped because they were older than the last emitted one.
    pub samples_dropped_late_arriving: u64,
    /// Status of every stream slot, `None` for unregistered slots.
    pub streams: Vec<Option<StreamStatus>>,
}

crate::temporal::impl_status_codec!(AlignerStatus);

impl std::fmt::Display for AlignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "current time: {} latest time: {} latency: {} late: {}",
            self.current_time, self.latest_time, self.latency, self.samples_dropped_late_arriving
        )?;
        for (index, stream) in self.streams.iter().enumerate() {
            match stream {
                Some(status) => write!(f, "\n{}: {}", index, status)?,
                None => write!(f, "\n{}: <unregistered>", index)?,
            }
        }
        Ok(())
    }
}

/// Merges sample streams into one time-ordered sequence of consumer calls.
///
/// Samples are pushed per stream, in non-decreasing timestamp order, and
/// buffered until [`step`](Self::step) decides that no active stream can
/// still deliver an older one. Each stream declares how long that may take
/// (its period). A global timeout bounds the wait for streams that fall
/// silent.
///
/// Streams carry their own payload type; a consumer is registered with each
/// stream and called synchronously from `step`.
pub struct StreamAligner {
    streams: Vec<Option<Box<dyn StreamSlot>>>,
    timeout: Duration,
    latest_time: Option<ClockTime>,
    current_time: Option<ClockTime>,
    samples_dropped_late_arriving: u64,
}

impl Default for StreamAligner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl std::fmt::Debug for StreamAligner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAligner")
            .field("streams", &self.stream_count())
            .field("timeout", &self.timeout)
            .field("latest_time", &self.latest_time)
            .field("current_time", &self.current_time)
            .finish_non_exhaustive()
    }
}

impl StreamAligner {
    /// Create an aligner that waits at most `timeout` for silent streams.
    pub fn new(timeout: Duration) -> Self {
        Self {
            streams: Vec::new(),
            timeout,
            latest_time: None,
            current_time: None,
            samples_dropped_late_arriving: 0,
        }
    }

    /// Builder-style variant of [`set_timeout`](Self::set_timeout).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the timeout.
    ///
    /// This bounds the lag created by delayed or missing samples. It does
    /// not resize the buffers of already registered streams.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Get the timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a stream and its consumer.
    ///
    /// Without a configured capacity the buffer holds twice the number of
    /// periods in one timeout; this requires a non-zero period. The lowest
    /// free id is used.
    pub fn register_stream<T, F>(
        &mut self,
        config: StreamConfig,
        consumer: F,
    ) -> Result<StreamHandle<T>>
    where
        T: Clone + 'static,
        F: FnMut(ClockTime, &T) + 'static,
    {
        let capacity = config.resolve_capacity(self.timeout, BUFFER_SIZE_FACTOR)?;
        let index = self
            .streams
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.streams.len());

        let stream: Box<dyn StreamSlot> =
            Box::new(Stream::<T>::new(index, &config, capacity, Box::new(consumer)));
        if index == self.streams.len() {
            self.streams.push(Some(stream));
        } else {
            self.streams[index] = Some(stream);
        }

        tracing::debug!(id = index, name = %config.name, capacity, "registered stream");
        Ok(StreamHandle::new(StreamId(index)))
    }

    /// Remove a stream. Its buffered samples are discarded and its id becomes
    /// free for the next registration.
    pub fn unregister_stream(&mut self, id: impl Into<StreamId>) -> Result<()> {
        let index = id.into().index();
        match self.streams.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                tracing::debug!(id = index, "unregistered stream");
                Ok(())
            }
            _ => Err(Error::InvalidStream(index)),
        }
    }

    pub(crate) fn slot(&self, id: StreamId) -> Result<&dyn StreamSlot> {
        self.streams
            .get(id.index())
            .and_then(|slot| slot.as_deref())
            .ok_or(Error::InvalidStream(id.index()))
    }

    fn slot_mut(&mut self, id: StreamId) -> Result<&mut dyn StreamSlot> {
        match self.streams.get_mut(id.index()) {
            Some(Some(slot)) => Ok(slot.as_mut()),
            _ => Err(Error::InvalidStream(id.index())),
        }
    }

    fn typed<T: 'static>(&self, id: StreamId) -> Result<&Stream<T>> {
        let slot = self.slot(id)?;
        let expected = slot.payload_type();
        slot.as_any()
            .downcast_ref::<Stream<T>>()
            .ok_or(Error::PayloadType {
                id: id.index(),
                expected,
            })
    }

    fn typed_mut<T: 'static>(&mut self, id: StreamId) -> Result<&mut Stream<T>> {
        let slot = self.slot_mut(id)?;
        let expected = slot.payload_type();
        slot.as_any_mut()
            .downcast_mut::<Stream<T>>()
            .ok_or(Error::PayloadType {
                id: id.index(),
                expected,
            })
    }

    /// Exclude a stream from the readiness decision.
    ///
    /// Its buffered samples are still emitted in order, but it no longer
    /// delays other streams. Pushing to the stream enables it again.
    pub fn disable_stream(&mut self, id: impl Into<StreamId>) -> Result<()> {
        self.slot_mut(id.into())?.set_active(false);
        Ok(())
    }

    /// Include a stream in the readiness decision again.
    pub fn enable_stream(&mut self, id: impl Into<StreamId>) -> Result<()> {
        self.slot_mut(id.into())?.set_active(true);
        Ok(())
    }

    /// Check if a stream takes part in the readiness decision.
    pub fn is_stream_active(&self, id: impl Into<StreamId>) -> Result<bool> {
        Ok(self.slot(id.into())?.is_active())
    }

    /// Push a sample into a stream. The stream becomes active.
    ///
    /// Samples older than the last emitted sample, or older than the last
    /// sample of the same stream, are dropped and counted. When a fixed-size
    /// buffer is full, its oldest sample is evicted.
    pub fn push<T: Clone + 'static>(
        &mut self,
        id: impl Into<StreamId>,
        timestamp: ClockTime,
        data: T,
    ) -> Result<()> {
        let current = self.current_time;
        let outcome = self.typed_mut::<T>(id.into())?.push(timestamp, data, current);
        if outcome == PushOutcome::Late {
            self.samples_dropped_late_arriving += 1;
            return Ok(());
        }
        if self.latest_time.is_none_or(|latest| timestamp > latest) {
            self.latest_time = Some(timestamp);
        }
        Ok(())
    }

    /// Peek at the oldest buffered sample of a stream.
    pub fn next_sample<T: 'static>(
        &self,
        id: impl Into<StreamId>,
    ) -> Result<Option<(ClockTime, &T)>> {
        Ok(self.typed::<T>(id.into())?.next_sample())
    }

    /// Emit at most one sample.
    ///
    /// Returns `true` if a consumer was called; more samples may then be
    /// ready. Returns `false` when nothing is buffered, or when an active
    /// stream may still deliver an older sample and the timeout has not
    /// expired.
    pub fn step(&mut self) -> bool {
        let views: Vec<StreamView> = self
            .streams
            .iter()
            .flatten()
            .map(|slot| slot.view())
            .collect();
        let clock = AlignerClock {
            latest: self.latest_time,
            current: self.current_time,
            timeout: ClockTime::from(self.timeout),
        };

        match readiness::decide(&views, &clock) {
            Readiness::Emit(index) => match self.streams.get_mut(index) {
                Some(Some(stream)) => match stream.emit() {
                    Some(timestamp) => {
                        self.current_time = Some(timestamp);
                        true
                    }
                    None => false,
                },
                _ => false,
            },
            Readiness::Wait(_) | Readiness::Idle => false,
        }
    }

    /// Drop every buffered sample and reset playback times and drop
    /// counters. Registrations are kept.
    pub fn clear(&mut self) {
        for stream in self.streams.iter_mut().flatten() {
            stream.clear();
        }
        self.latest_time = None;
        self.current_time = None;
        self.samples_dropped_late_arriving = 0;
    }

    /// Take over the state of `other`: playback times, the late-arrival
    /// counter, and buffer contents, last times and counters of every stream.
    ///
    /// Both aligners must have the same streams registered under the same ids
    /// with the same payload types. Configuration and consumers are not
    /// copied. Nothing is modified when the layouts differ.
    pub fn copy_state(&mut self, other: &StreamAligner) -> Result<()> {
        if self.streams.len() != other.streams.len() {
            return Err(Error::StreamSetupMismatch(format!(
                "{} stream slots, other aligner has {}",
                self.streams.len(),
                other.streams.len()
            )));
        }
        for (index, (mine, theirs)) in self.streams.iter().zip(&other.streams).enumerate() {
            match (mine, theirs) {
                (Some(mine), Some(theirs)) if mine.payload_type() != theirs.payload_type() => {
                    return Err(Error::StreamSetupMismatch(format!(
                        "stream {} carries {}, other stream carries {}",
                        index,
                        mine.payload_type(),
                        theirs.payload_type()
                    )));
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(Error::StreamSetupMismatch(format!(
                        "stream {} is registered in only one aligner",
                        index
                    )));
                }
                _ => {}
            }
        }

        for (mine, theirs) in self.streams.iter_mut().zip(&other.streams) {
            if let (Some(mine), Some(theirs)) = (mine, theirs) {
                mine.copy_state_from(&**theirs)?;
            }
        }
        self.latest_time = other.latest_time;
        self.current_time = other.current_time;
        self.samples_dropped_late_arriving = other.samples_dropped_late_arriving;
        Ok(())
    }

    /// Time between the newest accepted sample and the last emitted one.
    pub fn latency(&self) -> ClockTime {
        self.latest_time
            .unwrap_or(ClockTime::ZERO)
            .saturating_sub(self.current_time.unwrap_or(ClockTime::ZERO))
    }

    /// Timestamp of the last emitted sample.
    pub fn current_time(&self) -> Option<ClockTime> {
        self.current_time
    }

    /// Newest accepted timestamp.
    pub fn latest_time(&self) -> Option<ClockTime> {
        self.latest_time
    }

    /// Number of registered streams.
    pub fn stream_count(&self) -> usize {
        self.streams.iter().flatten().count()
    }

    /// Number of samples dropped for arriving after newer samples were emitted.
    pub fn samples_dropped_late_arriving(&self) -> u64 {
        self.samples_dropped_late_arriving
    }

    /// Get the status of one stream.
    pub fn buffer_status(&self, id: impl Into<StreamId>) -> Result<StreamStatus> {
        Ok(self.slot(id.into())?.status())
    }

    /// Get a diagnostic snapshot.
    pub fn status(&self) -> AlignerStatus {
        AlignerStatus {
            current_time: self.current_time.unwrap_or(ClockTime::NONE),
            latest_time: self.latest_time.unwrap_or(ClockTime::NONE),
            latency: self.latency(),
            samples_dropped_late_arriving: self.samples_dropped_late_arriving,
            streams: self
                .streams
                .iter()
                .map(|slot| slot.as_ref().map(|stream| stream.status()))
                .collect(),
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.streams.len()
    }
}
