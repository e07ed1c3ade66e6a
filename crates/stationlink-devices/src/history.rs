/*!
 * In-memory history of air-quality readings.
 *
 * Sensors push far more often than anyone wants to keep, so a reading is
 * only recorded once the logging period has passed since the previous
 * sample. The oldest samples fall out once the history is full.
 */
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::device::Reading;

/// Default minimum spacing between two recorded samples
pub const DEFAULT_LOGGING_PERIOD: Duration = Duration::from_secs(1);

/// Default number of samples kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 3600;

/// One recorded reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// When the reading was recorded
    pub at: Instant,
    /// The reading
    pub reading: Reading,
}

/// Bounded, throttled reading history
#[derive(Debug)]
pub struct ReadingHistory {
    logging_period: Duration,
    capacity: usize,
    samples: Mutex<VecDeque<Sample>>,
}

impl ReadingHistory {
    /// Keep at most `capacity` samples, spaced at least `logging_period` apart
    pub fn new(logging_period: Duration, capacity: usize) -> Self {
        Self {
            logging_period,
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY))),
        }
    }

    /// The minimum spacing between two samples
    pub fn logging_period(&self) -> Duration {
        self.logging_period
    }

    /// The maximum number of samples kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record `reading` now, unless the last sample is younger than the logging period
    ///
    /// Returns whether the reading was kept.
    pub fn record(&self, reading: Reading) -> bool {
        self.record_at(Instant::now(), reading)
    }

    fn record_at(&self, at: Instant, reading: Reading) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let mut samples = self.lock();
        if let Some(last) = samples.back() {
            if at.saturating_duration_since(last.at) < self.logging_period {
                return false;
            }
        }
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(Sample { at, reading });
        trace!("Recorded reading, {} samples kept", samples.len());
        true
    }

    /// Every kept sample, oldest first
    pub fn samples(&self) -> Vec<Sample> {
        self.lock().iter().copied().collect()
    }

    /// Readings recorded within `window` of now, oldest first
    pub fn readings_within(&self, window: Duration) -> Vec<Reading> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|sample| now.saturating_duration_since(sample.at) <= window)
            .map(|sample| sample.reading)
            .collect()
    }

    /// The most recent sample
    pub fn latest(&self) -> Option<Sample> {
        self.lock().back().copied()
    }

    /// Number of kept samples
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Sample>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReadingHistory {
    fn default() -> Self {
        Self::new(DEFAULT_LOGGING_PERIOD, DEFAULT_HISTORY_CAPACITY)
    }
}
