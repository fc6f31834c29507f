use crate::models::PriceSample;
use std::collections::VecDeque;

/// Samples kept by default
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// Bounded, time-ordered price series
///
/// Maintains a rolling window of samples; the oldest sample is dropped once
/// the window is full.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    samples: VecDeque<PriceSample>,
    max_samples: usize,
}

impl PriceHistory {
    /// Create a new history buffer
    ///
    /// # Arguments
    /// * `max_samples` - Maximum number of samples to keep
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.max(1)),
            max_samples: max_samples.max(1),
        }
    }

    /// Add a sample, evicting the oldest if the buffer is full
    ///
    /// A sample stamped earlier than the newest one is re-stamped to the
    /// newest timestamp so the series stays non-decreasing.
    pub fn append(&mut self, mut sample: PriceSample) {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                tracing::debug!(
                    sample_ts = %sample.timestamp,
                    last_ts = %last.timestamp,
                    "Out-of-order price sample, clamping timestamp"
                );
                sample.timestamp = last.timestamp;
            }
        }

        self.samples.push_back(sample);

        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// The `n` most recent samples in chronological order
    pub fn last_n(&self, n: usize) -> Vec<PriceSample> {
        self.samples.iter().rev().take(n).rev().copied().collect()
    }

    /// All retained prices, oldest first
    pub fn prices(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.price).collect()
    }

    pub fn latest(&self) -> Option<&PriceSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_samples
    }
}

impl Default for PriceHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
