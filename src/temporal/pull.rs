//! Pull-driven stream aligner.

use super::aligner::{StreamAligner, StreamHandle, StreamId};
use super::stream::StreamConfig;
use crate::clock::ClockTime;
use crate::error::Result;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Fetches at most one sample from a source and pushes it into the aligner.
type PullSource = Box<dyn FnMut(&mut StreamAligner) -> Result<bool>>;

/// A [`StreamAligner`] that queries its sources instead of being pushed to.
///
/// Every stream gets a pull function returning the next available sample,
/// if any. [`pull`](Self::pull) moves samples from the sources into the
/// stream buffers; [`step`](StreamAligner::step) then works exactly like on
/// the push-based aligner, which this type dereferences to.
///
/// ```rust
/// use streamalign::clock::ClockTime;
/// use streamalign::temporal::{PullStreamAligner, StreamConfig};
/// use std::time::Duration;
///
/// let mut aligner = PullStreamAligner::new(Duration::from_secs(1));
/// let mut pending = vec![(ClockTime::from_millis(20), 2u8), (ClockTime::from_millis(10), 1u8)];
/// aligner
///     .register_stream(
///         StreamConfig::new(Duration::from_millis(10)).with_capacity(4),
///         move || pending.pop(),
///         |ts, value: &u8| println!("{} {}", ts, value),
///     )
///     .unwrap();
///
/// while aligner.pull().unwrap() {}
/// assert!(aligner.step());
/// ```
pub struct PullStreamAligner {
    aligner: StreamAligner,
    sources: Vec<Option<PullSource>>,
}

impl Default for PullStreamAligner {
    fn default() -> Self {
        Self::from_aligner(StreamAligner::default())
    }
}

impl std::fmt::Debug for PullStreamAligner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullStreamAligner")
            .field("aligner", &self.aligner)
            .field("sources", &self.sources.iter().flatten().count())
            .finish()
    }
}

impl PullStreamAligner {
    /// Create an aligner that waits at most `timeout` for silent streams.
    pub fn new(timeout: Duration) -> Self {
        Self::from_aligner(StreamAligner::new(timeout))
    }

    fn from_aligner(aligner: StreamAligner) -> Self {
        Self {
            aligner,
            sources: Vec::new(),
        }
    }

    /// Register a stream with its pull function and consumer.
    pub fn register_stream<T, P, F>(
        &mut self,
        config: StreamConfig,
        mut pull: P,
        consumer: F,
    ) -> Result<StreamHandle<T>>
    where
        T: Clone + 'static,
        P: FnMut() -> Option<(ClockTime, T)> + 'static,
        F: FnMut(ClockTime, &T) + 'static,
    {
        let handle = self.aligner.register_stream(config, consumer)?;
        let source: PullSource = Box::new(move |aligner: &mut StreamAligner| match pull() {
            Some((timestamp, data)) => aligner.push(handle, timestamp, data).map(|()| true),
            None => Ok(false),
        });

        let index = handle.id().index();
        if self.sources.len() <= index {
            self.sources.resize_with(index + 1, || None);
        }
        self.sources[index] = Some(source);
        Ok(handle)
    }

    /// Remove a stream together with its pull function.
    pub fn unregister_stream(&mut self, id: impl Into<StreamId>) -> Result<()> {
        let id = id.into();
        self.aligner.unregister_stream(id)?;
        if let Some(source) = self.sources.get_mut(id.index()) {
            *source = None;
        }
        Ok(())
    }

    /// Fetch at most one sample for every active stream with room in its
    /// buffer.
    ///
    /// Returns `true` if any source delivered a sample. Call it until it
    /// returns `false` to drain the sources.
    pub fn pull(&mut self) -> Result<bool> {
        let mut advanced = false;
        let slots = self.aligner.slot_count().min(self.sources.len());
        for index in 0..slots {
            let ready = self
                .aligner
                .slot(StreamId::new(index))
                .is_ok_and(|stream| stream.is_active() && stream.has_spare_capacity());
            if !ready {
                continue;
            }
            if let Some(source) = self.sources[index].as_mut() {
                advanced |= source(&mut self.aligner)?;
            }
        }
        Ok(advanced)
    }

    /// Get the underlying push-based aligner.
    pub fn into_inner(self) -> StreamAligner {
        self.aligner
    }
}

impl Deref for PullStreamAligner {
    type Target = StreamAligner;

    fn deref(&self) -> &StreamAligner {
        &self.aligner
    }
}

impl DerefMut for PullStreamAligner {
    fn deref_mut(&mut self) -> &mut StreamAligner {
        &mut self.aligner
    }
}
