//! Fixed-capacity time-series store keyed by metric name
//!
//! Each metric owns a ring that is pre-filled with the "no data yet" sentinel and
//! always holds exactly `capacity` samples. Writers append at the back (newest),
//! evicting from the front (oldest). Readers get an owned copy of a whole window,
//! so a window never observes a half-applied append.

use super::lock;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One slot of a window; `None` is the "no data yet" sentinel
pub type Sample = Option<f64>;

/// Thread-safe map of metric name to fixed-length ring of samples
#[derive(Debug)]
pub struct SampleStore {
    capacity: usize,
    series: Mutex<HashMap<String, VecDeque<Sample>>>,
}

impl SampleStore {
    /// Create an empty store whose windows hold `capacity` samples
    ///
    /// # Examples
    ///
    /// ```
    /// use zview::history::SampleStore;
    ///
    /// let store = SampleStore::new(3);
    /// store.record("hits", 7.0);
    /// assert_eq!(store.window("hits"), vec![None, None, Some(7.0)]);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: Mutex::new(HashMap::new()),
        }
    }

    /// Create a store with the given metrics already present (all sentinel)
    pub fn with_metrics(capacity: usize, metrics: &[&str]) -> Self {
        let store = Self::new(capacity);
        {
            let mut series = lock(&store.series);
            for metric in metrics {
                series.insert(metric.to_string(), store.empty_window());
            }
        }
        store
    }

    fn empty_window(&self) -> VecDeque<Sample> {
        std::iter::repeat(None).take(self.capacity).collect()
    }

    /// Number of samples in every window
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample to the window of `metric`, evicting the oldest one
    pub fn record(&self, metric: &str, value: f64) {
        let mut series = lock(&self.series);
        self.push(&mut series, metric, Some(value));
    }

    /// Append one sample to several windows under a single lock, so a reader never
    /// sees only part of one poll
    pub fn record_all(&self, values: &[(&str, f64)]) {
        let mut series = lock(&self.series);
        for (metric, value) in values {
            self.push(&mut series, metric, Some(*value));
        }
    }

    fn push(&self, series: &mut HashMap<String, VecDeque<Sample>>, metric: &str, sample: Sample) {
        let window = series
            .entry(metric.to_string())
            .or_insert_with(|| self.empty_window());
        window.push_back(sample);
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    /// Full window for `metric`, oldest first
    ///
    /// An unknown metric yields a window made only of sentinels.
    pub fn window(&self, metric: &str) -> Vec<Sample> {
        let series = lock(&self.series);
        match series.get(metric) {
            Some(window) => window.iter().copied().collect(),
            None => vec![None; self.capacity],
        }
    }

    /// Most recent sample of `metric`, if any has been recorded
    pub fn latest(&self, metric: &str) -> Sample {
        let series = lock(&self.series);
        series.get(metric).and_then(|window| window.back().copied().flatten())
    }

    /// Names of all metrics with a window, sorted
    pub fn metrics(&self) -> Vec<String> {
        let series = lock(&self.series);
        let mut names: Vec<String> = series.keys().cloned().collect();
        names.sort();
        names
    }
}
