//! Emission readiness of the stream aligner.
//!
//! The decision only looks at plain snapshots of the streams, so it can be
//! exercised without any buffer or consumer.
//!
//! Each stream has a watermark: the timestamp of its oldest buffered sample,
//! or, when it is empty, the time of its last sample plus its period (the
//! earliest timestamp it could still deliver). Streams are walked in
//! watermark order. The first stream with data is emitted. An empty active
//! stream ahead of it blocks emission, unless the aligner timed out.

use crate::clock::ClockTime;
use std::cmp::Ordering;

/// Snapshot of one registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamView {
    /// Stream id.
    pub id: usize,
    /// Timestamp of the oldest buffered sample.
    pub head: Option<ClockTime>,
    /// Timestamp of the last accepted sample.
    pub last_time: ClockTime,
    /// Lookahead period.
    pub period: ClockTime,
    /// Tie-break priority, lower first.
    pub priority: i32,
    /// Whether the stream may block emission.
    pub active: bool,
}

impl StreamView {
    /// Earliest timestamp this stream can still emit.
    pub fn watermark(&self) -> ClockTime {
        self.head
            .unwrap_or_else(|| self.last_time.saturating_add(self.period))
    }

    fn has_data(&self) -> bool {
        self.head.is_some()
    }

    /// Emission order: watermark, streams with data first, priority, id.
    fn emission_order(&self, other: &Self) -> Ordering {
        self.watermark()
            .cmp(&other.watermark())
            .then_with(|| other.has_data().cmp(&self.has_data()))
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Playback clock of the aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignerClock {
    /// Newest timestamp accepted on any stream.
    pub latest: Option<ClockTime>,
    /// Timestamp of the last emitted sample.
    pub current: Option<ClockTime>,
    /// Maximum time to wait for a silent stream.
    pub timeout: ClockTime,
}

impl AlignerClock {
    /// Whether the aligner waited long enough to skip empty streams.
    ///
    /// The wait is measured on the data clock: from the last emitted sample
    /// to the newest accepted one. Before the first emission, it spans the
    /// buffered samples instead.
    pub fn timed_out(&self, streams: &[StreamView]) -> bool {
        let (latest, reference) = match self.current {
            Some(current) => (self.latest.unwrap_or(ClockTime::ZERO), current),
            None => {
                let mut latest = ClockTime::ZERO;
                let mut first: Option<ClockTime> = None;
                for stream in streams {
                    if let Some(head) = stream.head {
                        latest = latest.max(stream.last_time);
                        first = Some(first.map_or(head, |first| first.min(head)));
                    }
                }
                (latest, first.unwrap_or(ClockTime::ZERO))
            }
        };
        latest.saturating_sub(reference) >= self.timeout
    }
}

/// Outcome of the readiness decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Emit the oldest sample of this stream.
    Emit(usize),
    /// This empty stream may still deliver an earlier sample.
    Wait(usize),
    /// Nothing is buffered.
    Idle,
}

/// Decide which stream, if any, may emit its oldest sample.
pub fn decide(streams: &[StreamView], clock: &AlignerClock) -> Readiness {
    let mut order: Vec<&StreamView> = streams.iter().collect();
    order.sort_unstable_by(|a, b| a.emission_order(b));

    let mut timed_out = None;
    for stream in order {
        if stream.has_data() {
            return Readiness::Emit(stream.id);
        }
        if stream.active && !*timed_out.get_or_insert_with(|| clock.timed_out(streams)) {
            return Readiness::Wait(stream.id);
        }
    }
    Readiness::Idle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> ClockTime {
        ClockTime::from_secs_f64(s)
    }

    fn view(id: usize, head: Option<f64>, last: f64, period: f64) -> StreamView {
        StreamView {
            id,
            head: head.map(secs),
            last_time: secs(last),
            period: secs(period),
            priority: -1,
            active: true,
        }
    }

    fn clock(latest: Option<f64>, current: Option<f64>) -> AlignerClock {
        AlignerClock {
            latest: latest.map(secs),
            current: current.map(secs),
            timeout: secs(2.0),
        }
    }

    #[test]
    fn test_watermark() {
        assert_eq!(view(0, Some(3.0), 5.0, 2.0).watermark(), secs(3.0));
        assert_eq!(view(0, None, 5.0, 2.0).watermark(), secs(7.0));
    }

    #[test]
    fn test_oldest_head_is_emitted() {
        let streams = [view(0, Some(3.0), 3.0, 2.0), view(1, Some(2.0), 4.0, 2.0)];
        assert_eq!(decide(&streams, &clock(Some(4.0), None)), Readiness::Emit(1));
    }

    #[test]
    fn test_equal_timestamps_use_priority_then_id() {
        let mut streams = [view(0, Some(2.0), 2.0, 0.0), view(1, Some(2.0), 2.0, 0.0)];
        assert_eq!(decide(&streams, &clock(None, None)), Readiness::Emit(0));

        streams[1].priority = -5;
        assert_eq!(decide(&streams, &clock(None, None)), Readiness::Emit(1));
    }

    #[test]
    fn test_data_wins_over_equal_watermark() {
        // stream 0 is empty and expects its next sample at 2.0
        let streams = [view(0, None, 1.0, 1.0), view(1, Some(2.0), 2.0, 0.0)];
        assert_eq!(decide(&streams, &clock(Some(2.0), Some(1.0))), Readiness::Emit(1));
    }

    #[test]
    fn test_empty_active_stream_blocks_until_timeout() {
        let streams = [view(0, Some(10.0), 11.0, 2.0), view(1, None, 0.0, 0.0)];
        assert_eq!(decide(&streams, &clock(Some(11.0), None)), Readiness::Wait(1));

        let streams = [view(0, Some(10.0), 12.0, 2.0), view(1, None, 0.0, 0.0)];
        assert_eq!(decide(&streams, &clock(Some(12.0), None)), Readiness::Emit(0));
    }

    #[test]
    fn test_inactive_stream_never_blocks() {
        let mut streams = [view(0, Some(10.0), 10.0, 2.0), view(1, None, 0.0, 0.0)];
        streams[1].active = false;
        assert_eq!(decide(&streams, &clock(Some(10.0), None)), Readiness::Emit(0));
    }

    #[test]
    fn test_idle_without_data() {
        let mut streams = [view(0, None, 4.0, 2.0)];
        assert_eq!(decide(&streams, &clock(Some(4.0), Some(4.0))), Readiness::Wait(0));
        streams[0].active = false;
        assert_eq!(decide(&streams, &clock(Some(4.0), Some(4.0))), Readiness::Idle);
        assert_eq!(decide(&[], &clock(None, None)), Readiness::Idle);
    }

    #[test]
    fn test_timeout_reference_after_first_emission() {
        let streams = [view(0, None, 3.0, 1.0)];
        assert!(!clock(Some(3.0), Some(1.1)).timed_out(&streams));
        assert!(clock(Some(3.1), Some(1.1)).timed_out(&streams));
    }

    #[test]
    fn test_timeout_reference_before_first_emission() {
        // spans the earliest buffered head and the newest buffered last time
        let streams = [
            view(0, Some(1.0), 1.1, 1.0),
            view(1, None, 9.0, 0.0),
            view(2, Some(1.5), 3.0, 1.0),
        ];
        assert!(clock(None, None).timed_out(&streams));

        let streams = [view(0, Some(1.0), 1.1, 1.0), view(1, None, 9.0, 0.0)];
        assert!(!clock(None, None).timed_out(&streams));
    }
}
