//! Timestamp estimation for nominally periodic sources.
//!
//! A device that produces samples at a fixed rate rarely delivers them at
//! that rate: transport and scheduling add jitter, and some samples never
//! arrive at all. [`TimestampEstimator`] turns the noisy arrival times of such
//! a source into a regular time base:
//!
//! - the period is estimated from a sliding window of recent arrivals
//! - the base time follows the earliest plausible arrival (the lower envelope
//!   of the jitter) and is recalibrated at least once per window
//! - lost samples are accounted for, either from explicit sequence indexes or
//!   from gaps in the arrival times (with hysteresis)
//! - an optional reference timestamp (e.g. a hardware clock) recalibrates the
//!   latency between the source's sample time and the arrival time
//!
//! # Example
//!
//! ```rust
//! use streamalign::clock::ClockTime;
//! use streamalign::temporal::{EstimatorConfig, TimestampEstimator};
//! use std::time::Duration;
//!
//! let config = EstimatorConfig::with_window(Duration::from_secs(2));
//! let mut estimator = TimestampEstimator::new(config).unwrap();
//!
//! let mut arrival = ClockTime::from_secs(100);
//! for _ in 0..50 {
//!     arrival += ClockTime::from_millis(10);
//!     let stamp = estimator.update(arrival);
//!     assert_eq!(stamp, arrival);
//! }
//! assert_eq!(estimator.period().unwrap(), ClockTime::from_millis(10));
//! ```
//!
//! Internally all arithmetic is done in `f64` seconds relative to the first
//! timestamp ever seen, so that large absolute timestamps do not eat the
//! precision of the estimate.

use super::ring::SampleRing;
use crate::clock::ClockTime;
use crate::error::{Error, Result};
use crate::observability::{record_samples_lost, trace_samples_lost, warn_mixed_loss_detection};
use rkyv::{Archive, Deserialize, Serialize};
use std::time::Duration;

/// Sample capacity used until a period estimate exists.
const INITIAL_CAPACITY: usize = 20;

/// Extra slots on top of the number of periods in one window.
const CAPACITY_MARGIN: usize = 10;

/// Upper bound on the number of periods per window used to size the history.
const MAX_WINDOW_PERIODS: usize = 1 << 20;

/// Upper bound on the history capacity.
const MAX_CAPACITY: usize = CAPACITY_MARGIN + MAX_WINDOW_PERIODS;

/// A gap of at least this many periods between two valid samples ends a burst.
const BURST_GAP_FACTOR: f64 = 0.9;

/// Arrivals within this fraction of a period of the prediction snap the base time.
const SNAP_TOLERANCE: f64 = 1e-4;

/// Slack, in periods, when matching a reference timestamp to the estimate.
const REFERENCE_SLACK: f64 = 0.1;

/// Configuration of a [`TimestampEstimator`].
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorConfig {
    /// Amount of history used for the period estimate.
    pub window: Duration,
    /// Known nominal period, used until the first window is full.
    ///
    /// It should be slightly over-estimated rather than under-estimated: an
    /// under-estimated period makes the base time run ahead of the samples.
    pub initial_period: Option<Duration>,
    /// Initial latency between the source's sample time and the arrival time.
    pub initial_latency: Duration,
    /// Number of consecutive suspicious arrivals required before gaps in the
    /// arrival times are declared as lost samples. `None` disables this
    /// detection, which is what you want when sample indexes are provided.
    pub lost_threshold: Option<u32>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            initial_period: None,
            initial_latency: Duration::ZERO,
            lost_threshold: None,
        }
    }
}

impl EstimatorConfig {
    /// Create a configuration with the given window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }

    /// Set the initial period.
    pub fn with_initial_period(mut self, period: Duration) -> Self {
        self.initial_period = Some(period);
        self
    }

    /// Set the initial latency.
    pub fn with_initial_latency(mut self, latency: Duration) -> Self {
        self.initial_latency = latency;
        self
    }

    /// Enable loss detection from arrival gaps.
    pub fn with_lost_threshold(mut self, threshold: u32) -> Self {
        self.lost_threshold = Some(threshold);
        self
    }

    /// Check that the history capacity can be derived from this configuration.
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(Error::InvalidConfig("estimator window must be non-zero".into()));
        }
        if self.initial_period.is_some_and(|period| period.is_zero()) {
            return Err(Error::InvalidConfig(
                "estimator initial period must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Diagnostic snapshot of a [`TimestampEstimator`].
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct EstimatorStatus {
    /// Current estimate (what the last update returned).
    pub stamp: ClockTime,
    /// Current period estimate, `NONE` if there is none yet.
    pub period: ClockTime,
    /// Estimated latency, in seconds.
    pub latency_secs: f64,
    /// Largest observed delay between an arrival and its estimate, in seconds.
    pub max_jitter_secs: f64,
    /// Number of lost-sample markers in the current window.
    pub lost_samples: u64,
    /// Number of entries in the history window.
    pub window_size: u64,
    /// Capacity of the history window.
    pub window_capacity: u64,
    /// Arrival time that last anchored the base time.
    pub base_time: ClockTime,
    /// Correction applied by the last base time reset, in seconds.
    pub base_time_reset_offset_secs: f64,
}

crate::temporal::impl_status_codec!(EstimatorStatus);

impl std::fmt::Display for EstimatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "== Timestamp Estimator Status")?;
        writeln!(f, "stamp: {}", self.stamp)?;
        writeln!(f, "period: {}", self.period)?;
        writeln!(f, "latency: {:.6}s", self.latency_secs)?;
        writeln!(f, "max_jitter: {:.6}s", self.max_jitter_secs)?;
        writeln!(f, "lost_samples: {}", self.lost_samples)?;
        write!(f, "window_size: {}/{}", self.window_size, self.window_capacity)
    }
}

/// Denoising timestamp estimator for a single periodic source.
///
/// The estimator is a synchronous state machine: every method either mutates
/// the state and returns, or only reads it.
#[derive(Debug, Clone)]
pub struct TimestampEstimator {
    config: EstimatorConfig,
    window: f64,
    initial_period: Option<f64>,
    lost_threshold: Option<usize>,
    /// Set once a valid sample has been dropped for being older than the window.
    got_full_window: bool,
    /// First timestamp ever seen; `NONE` until the first update.
    zero: ClockTime,
    /// Arrival times relative to `zero`; `None` marks a lost sample.
    samples: SampleRing<Option<f64>>,
    /// Number of `None` markers in `samples`.
    missing_samples: usize,
    /// Streak of arrivals that looked like they followed lost samples.
    suspected_losses: Vec<u64>,
    /// Base time: the next sample is expected at `last + period`.
    last: f64,
    base_time_reset: f64,
    base_time_reset_offset: f64,
    last_reference: ClockTime,
    latency: f64,
    last_index: Option<u64>,
    max_jitter: f64,
}

impl TimestampEstimator {
    /// Create an estimator, validating the configuration.
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::fresh(config))
    }

    fn fresh(config: EstimatorConfig) -> Self {
        let window = config.window.as_secs_f64();
        let initial_period = config.initial_period.map(|period| period.as_secs_f64());
        let capacity = match initial_period {
            Some(period) => Self::capacity_for(window, period),
            None => INITIAL_CAPACITY,
        };
        Self {
            window,
            initial_period,
            lost_threshold: config.lost_threshold.map(|threshold| threshold as usize),
            got_full_window: false,
            zero: ClockTime::NONE,
            samples: SampleRing::with_capacity(capacity),
            missing_samples: 0,
            suspected_losses: Vec::new(),
            last: 0.0,
            base_time_reset: 0.0,
            base_time_reset_offset: 0.0,
            last_reference: ClockTime::NONE,
            latency: config.initial_latency.as_secs_f64(),
            last_index: None,
            max_jitter: 0.0,
            config,
        }
    }

    fn capacity_for(window: f64, period: f64) -> usize {
        let periods = ((window + period) / period).min(MAX_WINDOW_PERIODS as f64);
        CAPACITY_MARGIN + periods as usize
    }

    /// Reset to the state right after construction.
    pub fn reset(&mut self) {
        *self = Self::fresh(self.config.clone());
    }

    /// Reset with a new configuration.
    pub fn reset_with(&mut self, config: EstimatorConfig) -> Result<()> {
        config.validate()?;
        *self = Self::fresh(config);
        Ok(())
    }

    /// Get the configuration.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Whether enough samples were seen to estimate a period.
    pub fn have_estimate(&self) -> bool {
        let valid = self.samples.len() - self.missing_samples;
        let required = if self.initial_period.is_some() { 1 } else { 2 };
        valid >= required && self.estimated_period().is_some()
    }

    /// Current period estimate.
    ///
    /// Returns [`Error::InsufficientSamples`] when no initial period is
    /// configured and less than two valid samples are in the window.
    pub fn period(&self) -> Result<ClockTime> {
        self.estimated_period()
            .map(ClockTime::from_secs_f64)
            .ok_or(Error::InsufficientSamples)
    }

    /// Estimated latency, in seconds.
    pub fn latency_secs(&self) -> f64 {
        self.latency
    }

    /// Largest observed delay between an arrival and its estimate, in seconds.
    pub fn max_jitter_secs(&self) -> f64 {
        self.max_jitter
    }

    /// Number of lost-sample markers in the current window.
    pub fn lost_sample_count(&self) -> usize {
        self.missing_samples
    }

    fn estimated_period(&self) -> Option<f64> {
        if !self.got_full_window && self.initial_period.is_some() {
            return self.initial_period;
        }
        self.sampled_period().or(self.initial_period)
    }

    /// Period from the history: span of the window divided by the number of
    /// slots it covers, lost-sample markers included.
    fn sampled_period(&self) -> Option<f64> {
        let mut count = self.samples.len();
        while count > 0 && self.samples[count - 1].is_none() {
            count -= 1;
        }
        if count <= 1 {
            return None;
        }
        let latest = self.samples[count - 1]?;
        let earliest = self.samples[0]?;
        Some((latest - earliest) / (count - 1) as f64)
    }

    fn usable_period(&self) -> Option<f64> {
        self.estimated_period().filter(|_| self.have_estimate())
    }

    fn stamp(&self) -> ClockTime {
        self.zero.offset_by_secs(self.last - self.latency)
    }

    fn clear_samples(&mut self) {
        self.samples.clear();
        self.missing_samples = 0;
    }

    fn push_sample(&mut self, value: Option<f64>) {
        if let Some(None) = self.samples.push_back(value) {
            self.missing_samples -= 1;
        }
        if value.is_none() {
            self.missing_samples += 1;
        }
        // eviction can leave a marker at the front
        while let Some(None) = self.samples.front() {
            self.samples.pop_front();
            self.missing_samples -= 1;
        }
    }

    /// Drop the history that is older than one window before `current`.
    ///
    /// The cut is moved back to the last sample of the burst preceding the
    /// window boundary, so that idle gaps do not bias the period estimate.
    fn shorten(&mut self, current: f64) {
        if let Some(period) = self.usable_period() {
            let len = self.samples.len();
            let min_time = current - self.window;

            let mut end = 0;
            while end < len {
                match self.samples[end] {
                    Some(time) if time >= min_time => break,
                    Some(_) => self.got_full_window = true,
                    None => {}
                }
                end += 1;
            }

            if end == len {
                self.clear_samples();
                return;
            }

            let window_begin = end;
            let mut last_good = end;
            let mut gap_slots = 0usize;
            while end > 0 {
                if let Some(time) = self.samples[end] {
                    if gap_slots > 0 {
                        if let Some(good) = self.samples[last_good] {
                            if (good - time) / gap_slots as f64 >= BURST_GAP_FACTOR * period {
                                break;
                            }
                        }
                    }
                    last_good = end;
                    gap_slots = 0;
                }
                end -= 1;
                gap_slots += 1;
            }

            // no burst boundary and the history is already too long
            if end == 0
                && matches!(self.samples[0], Some(oldest) if oldest < min_time - self.window)
            {
                end = window_begin;
            }

            while end < len && self.samples[end].is_none() {
                end += 1;
            }

            let dropped_markers = (0..end).filter(|&i| self.samples[i].is_none()).count();
            self.missing_samples -= dropped_markers;
            self.samples.drain_front(end);
        }

        if self.samples.len() == self.missing_samples {
            self.clear_samples();
        }
    }

    fn reset_base_time(&mut self, value: f64, reset_time: f64) {
        self.base_time_reset_offset = value - self.last;
        self.last = value;
        self.base_time_reset = reset_time;
        if self.last_reference.is_some() {
            self.update_reference(self.last_reference);
        }
    }

    /// Feed an arrival time and get the estimated sample time back.
    pub fn update(&mut self, time: ClockTime) -> ClockTime {
        if self.zero.is_none() {
            self.zero = time;
        }
        let current = time.seconds_since(self.zero);

        self.shorten(current);

        if self.samples.is_empty() {
            self.reset_base_time(current, current);
            self.push_sample(Some(current));
            return self.stamp();
        }

        // With an initial period the history is sized once and for all.
        // Otherwise it has to follow the period estimate.
        if self.samples.is_full() && self.initial_period.is_none() {
            let capacity = match self.usable_period() {
                Some(period) if period > 0.0 => Self::capacity_for(self.window, period),
                // identical timestamps: evict the oldest sample instead
                Some(_) => self.samples.capacity(),
                None => (self.samples.capacity() + INITIAL_CAPACITY).min(MAX_CAPACITY),
            };
            if capacity > self.samples.capacity() {
                self.samples.set_capacity(capacity);
            }
        }

        self.push_sample(Some(current));

        let Some(period) = self.usable_period() else {
            return self.stamp();
        };

        // Bound long-term drift: re-anchor the base time on the sample with
        // the lowest jitter at least once per window.
        if current - self.base_time_reset > self.window {
            let mut base_time = current;
            let mut base_time_reset = current;
            let newest = self.samples.len() - 1;
            for base_count in 1..=newest {
                if let Some(time) = self.samples[newest - base_count] {
                    let offset = base_count as f64 * period;
                    if time < base_time - offset {
                        base_time = time + offset;
                        base_time_reset = time;
                    }
                }
            }
            self.reset_base_time(base_time - period, base_time_reset);
        }

        if let (Some(threshold), true) = (self.lost_threshold, period > 0.0) {
            self.detect_losses(current, period, threshold);
        }

        if self.last + period > current - period * SNAP_TOLERANCE {
            self.reset_base_time(current, current);
        } else {
            self.last += period;
        }

        self.max_jitter = self.max_jitter.max(current - self.last);
        self.stamp()
    }

    /// Threshold loss detection: `threshold` consecutive arrivals that are
    /// more than one period after the base time are needed before the
    /// smallest observed gap is declared lost.
    fn detect_losses(&mut self, current: f64, period: f64, threshold: usize) {
        let sample_distance = ((current - self.last) / period) as i64;
        if sample_distance > 1 {
            if self.last_index.is_some() {
                warn_mixed_loss_detection(sample_distance);
                self.suspected_losses.clear();
            } else {
                self.suspected_losses.push((sample_distance - 1) as u64);
            }
        } else {
            self.suspected_losses.clear();
        }

        if self.suspected_losses.len() > threshold {
            let lost = self.suspected_losses.iter().copied().min().unwrap_or(0);
            self.suspected_losses.clear();
            self.announce_losses(lost);
            trace_samples_lost(lost, self.last);
        }
    }

    /// Feed an arrival time together with the source's sample index.
    ///
    /// Gaps in the index are accounted for as lost samples. A decreasing
    /// index (e.g. a device restart) only restarts the index tracking.
    pub fn update_indexed(&mut self, time: ClockTime, index: u64) -> ClockTime {
        match self.last_index {
            Some(last_index) if index >= last_index => {
                let lost = index.saturating_sub(last_index).saturating_sub(1);
                self.last_index = Some(index);
                self.announce_losses(lost);
                self.update(time)
            }
            _ => {
                self.last_index = Some(index);
                self.update(time)
            }
        }
    }

    /// Materialize `lost` consecutive losses.
    ///
    /// Once as many markers as the history holds have been pushed, every
    /// valid sample is gone and the history is empty. Further markers change
    /// nothing, so they are not pushed.
    fn announce_losses(&mut self, lost: u64) {
        let pushed = lost.min(self.samples.capacity() as u64);
        for _ in 0..pushed {
            self.update_loss();
        }
    }

    /// Announce that one sample was lost.
    ///
    /// Advances the base time by one period and returns the new estimate.
    pub fn update_loss(&mut self) -> ClockTime {
        // a marker only makes sense after a valid sample
        if !self.samples.is_empty() {
            self.push_sample(None);
            record_samples_lost(1);
        }
        if let Some(period) = self.usable_period() {
            self.last += period;
        }
        self.stamp()
    }

    /// Recalibrate the latency from an authoritative timestamp of the sample
    /// that was just estimated (e.g. a hardware timestamp).
    ///
    /// The reference may be off by any whole number of periods. It is
    /// remembered and re-applied every time the base time is reset. Does
    /// nothing until the first window has been filled.
    pub fn update_reference(&mut self, reference: ClockTime) {
        if !self.got_full_window || reference.is_none() {
            return;
        }
        let Some(period) = self.estimated_period().filter(|period| *period > 0.0) else {
            return;
        };

        let hw_time = reference.seconds_since(self.zero);
        let est_time = self.last - self.latency;
        let n = ((est_time + period * REFERENCE_SLACK - hw_time) / period).floor();
        let diff = est_time - (hw_time + n * period);

        self.latency += diff;
        self.last_reference = reference;
    }

    /// Get a diagnostic snapshot.
    pub fn status(&self) -> EstimatorStatus {
        EstimatorStatus {
            stamp: self.stamp(),
            period: self.period().unwrap_or(ClockTime::NONE),
            latency_secs: self.latency,
            max_jitter_secs: self.max_jitter,
            lost_samples: self.missing_samples as u64,
            window_size: self.samples.len() as u64,
            window_capacity: self.samples.capacity() as u64,
            base_time: self.zero.offset_by_secs(self.base_time_reset),
            base_time_reset_offset_secs: self.base_time_reset_offset,
        }
    }
}
