//! Sliding time-window collectors.
//!
//! [`TimeWindowCollector`] keeps a bounded-duration history of event stamps
//! and reports the running average interval between them. The client feeds it
//! one stamp per received authoritative update to estimate how often the
//! server actually replicates.
//!
//! Window rules:
//! - The oldest entry always carries a duration of 0.
//! - `running_duration` is the sum of all entry durations, updated
//!   incrementally on insert and eviction.
//! - A gap larger than the drop threshold restarts the window from the new
//!   stamp, so a pause or reconnect never shows up as one huge interval.
//!
//! [`ChangeCollector`] applies the same window to a scalar value and reports
//! its rate of change.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;

/// Gaps below this many seconds count as the same instant.
pub const STAMP_EPSILON: f64 = 1e-8;

/// Default window span in seconds.
pub const DEFAULT_MAX_WINDOW_SPAN: f64 = 3.0;

/// Default stall threshold in seconds.
pub const DEFAULT_DROP_THRESHOLD: f64 = 0.4;

/// A point in time the collectors can measure gaps between.
pub trait Stamp: Copy {
    /// Seconds elapsed from `earlier` to `self` (negative if `self` is older).
    fn seconds_since(&self, earlier: &Self) -> f64;
}

/// Seconds on a simulation clock.
impl Stamp for f64 {
    fn seconds_since(&self, earlier: &Self) -> f64 {
        self - earlier
    }
}

impl Stamp for DateTime<Utc> {
    fn seconds_since(&self, earlier: &Self) -> f64 {
        let delta = *self - *earlier;
        match delta.num_nanoseconds() {
            Some(ns) => ns as f64 * 1e-9,
            None => delta.num_milliseconds() as f64 * 1e-3,
        }
    }
}

/// One window entry: a stamp and the seconds since the previous entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<S> {
    pub stamp: S,
    pub duration: f64,
}

/// What [`TimeWindowCollector::add`] did with a stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Window was empty; the stamp is now the only entry.
    Seeded,
    /// Gap was nearly zero; nothing changed.
    Duplicate,
    /// Gap exceeded the drop threshold; the window restarted from the stamp.
    Reset,
    /// Stamp was appended and `evicted` old entries were dropped.
    Appended { evicted: usize },
}

/// Running average of the interval between events over a sliding window.
#[derive(Debug, Clone)]
pub struct TimeWindowCollector<S = f64> {
    max_window_span: f64,
    drop_threshold: f64,
    window: VecDeque<Sample<S>>,
    running_duration: f64,
}

/// Wall-clock instantiation used by the harness client.
pub type DateTimeStampCollector = TimeWindowCollector<DateTime<Utc>>;

impl<S: Stamp> Default for TimeWindowCollector<S> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WINDOW_SPAN, DEFAULT_DROP_THRESHOLD)
    }
}

impl<S: Stamp> TimeWindowCollector<S> {
    pub fn new(max_window_span: f64, drop_threshold: f64) -> Self {
        Self {
            max_window_span,
            drop_threshold,
            window: VecDeque::new(),
            running_duration: 0.0,
        }
    }

    /// Records one event.
    pub fn add(&mut self, stamp: S) -> AddOutcome {
        let Some(last) = self.window.back() else {
            self.window.push_back(Sample {
                stamp,
                duration: 0.0,
            });
            return AddOutcome::Seeded;
        };

        let gap = stamp.seconds_since(&last.stamp);
        if gap.abs() < STAMP_EPSILON {
            return AddOutcome::Duplicate;
        }

        if gap > self.drop_threshold {
            debug!(
                gap,
                threshold = self.drop_threshold,
                "Stamp gap over drop threshold, resetting window"
            );
            self.clear();
            self.window.push_back(Sample {
                stamp,
                duration: 0.0,
            });
            return AddOutcome::Reset;
        }

        self.window.push_back(Sample {
            stamp,
            duration: gap,
        });
        self.running_duration += gap;

        let mut evicted = 0;
        while self.running_duration > self.max_window_span && self.window.len() > 1 {
            self.window.pop_front();
            evicted += 1;
            // The new oldest entry's interval now starts outside the window.
            if let Some(front) = self.window.front_mut() {
                self.running_duration -= front.duration;
                front.duration = 0.0;
            }
        }
        AddOutcome::Appended { evicted }
    }

    /// True once at least one real interval has been measured.
    pub fn is_valid(&self) -> bool {
        self.window.len() > 1
    }

    /// Total span of the window in seconds.
    pub fn full_time(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.running_duration
    }

    /// Most recently measured interval.
    pub fn last_duration(&self) -> f64 {
        match self.window.back() {
            Some(s) if self.is_valid() => s.duration,
            _ => 0.0,
        }
    }

    /// Average interval between events, 0 until valid.
    pub fn average_duration(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.running_duration / (self.window.len() - 1) as f64
    }

    /// Shortest and longest measured interval.
    pub fn min_max_duration(&self) -> Option<(f64, f64)> {
        if !self.is_valid() {
            return None;
        }
        // Skip the oldest entry: it carries no measured interval.
        self.window.iter().skip(1).fold(None, |acc, s| match acc {
            None => Some((s.duration, s.duration)),
            Some((lo, hi)) => Some((lo.min(s.duration), hi.max(s.duration))),
        })
    }

    pub fn last_stamp(&self) -> Option<S> {
        self.window.back().map(|s| s.stamp)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample<S>> {
        self.window.iter()
    }

    pub fn clear(&mut self) {
        self.running_duration = 0.0;
        self.window.clear();
    }

    pub fn max_window_span(&self) -> f64 {
        self.max_window_span
    }

    pub fn drop_threshold(&self) -> f64 {
        self.drop_threshold
    }
}

#[derive(Debug, Clone, Copy)]
struct ChangeSample<S> {
    stamp: S,
    value: f64,
    duration: f64,
    change: f64,
}

/// Tracks a scalar over a sliding window and reports its rate of change.
///
/// `change(new, previous)` computes the change contributed by each new value.
#[derive(Clone)]
pub struct ChangeCollector<S = f64, F = fn(f64, f64) -> f64> {
    max_window_span: f64,
    change: F,
    window: VecDeque<ChangeSample<S>>,
    full_duration: f64,
    sum_changes: f64,
}

impl<S: fmt::Debug, F> fmt::Debug for ChangeCollector<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeCollector")
            .field("max_window_span", &self.max_window_span)
            .field("window", &self.window)
            .field("full_duration", &self.full_duration)
            .field("sum_changes", &self.sum_changes)
            .finish_non_exhaustive()
    }
}

impl<S: Stamp> ChangeCollector<S> {
    /// Collector whose change is the plain difference `new - previous`.
    pub fn difference(max_window_span: f64) -> Self {
        Self::new(max_window_span, |new, prev| new - prev)
    }
}

impl<S: Stamp, F: Fn(f64, f64) -> f64> ChangeCollector<S, F> {
    pub fn new(max_window_span: f64, change: F) -> Self {
        Self {
            max_window_span,
            change,
            window: VecDeque::new(),
            full_duration: 0.0,
            sum_changes: 0.0,
        }
    }

    pub fn add(&mut self, stamp: S, value: f64) {
        let Some(last) = self.window.back() else {
            self.window.push_back(ChangeSample {
                stamp,
                value,
                duration: 0.0,
                change: 0.0,
            });
            return;
        };

        let gap = stamp.seconds_since(&last.stamp);
        if gap.abs() < STAMP_EPSILON {
            // Same instant: overwrite the latest value and re-derive its change.
            let prev_value = self
                .window
                .len()
                .checked_sub(2)
                .map(|i| self.window[i].value);
            if let Some(latest) = self.window.back_mut() {
                latest.value = value;
                if let Some(prev) = prev_value {
                    let change = (self.change)(value, prev);
                    self.sum_changes += change - latest.change;
                    latest.change = change;
                }
            }
            return;
        }

        let change = (self.change)(value, last.value);
        self.window.push_back(ChangeSample {
            stamp,
            value,
            duration: gap,
            change,
        });
        self.full_duration += gap;
        self.sum_changes += change;

        while self.full_duration > self.max_window_span && self.window.len() > 1 {
            self.window.pop_front();
            if let Some(front) = self.window.front_mut() {
                self.full_duration -= front.duration;
                self.sum_changes -= front.change;
                front.duration = 0.0;
                front.change = 0.0;
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.window.len() > 1
    }

    pub fn full_time(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.full_duration
    }

    pub fn sum_changes(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.sum_changes
    }

    /// Change per second over the window, 0 until valid.
    pub fn rate(&self) -> f64 {
        if !self.is_valid() || self.full_duration <= 0.0 {
            return 0.0;
        }
        self.sum_changes / self.full_duration
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.full_duration = 0.0;
        self.sum_changes = 0.0;
        self.window.clear();
    }
}
