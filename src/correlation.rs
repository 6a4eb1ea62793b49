//! Read-correlation engine
//!
//! Keeps the newest sampled reads of one pool and derives, per dataset, how many
//! reads each process issued and how often each ARC flag was set. Reads against
//! any dataset other than the pool's root are also counted under the pool's own
//! name, so the pool entry always holds pool-wide totals.

use crate::history::BoundedQueue;
use crate::records::{ReadFlag, ReadRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Aggregated reads of one dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetReadStats {
    pub count: u64,
    pub pid_counts: BTreeMap<u32, u64>,
    pub flag_counts: BTreeMap<ReadFlag, u64>,
}

impl DatasetReadStats {
    fn add(&mut self, record: &ReadRecord) {
        self.count += 1;
        *self.pid_counts.entry(record.pid).or_insert(0) += 1;
        for flag in &record.flags {
            *self.flag_counts.entry(*flag).or_insert(0) += 1;
        }
    }

    /// Reads issued by `pid`
    pub fn reads_by(&self, pid: u32) -> u64 {
        self.pid_counts.get(&pid).copied().unwrap_or(0)
    }

    pub fn flag_count(&self, flag: ReadFlag) -> u64 {
        self.flag_counts.get(&flag).copied().unwrap_or(0)
    }
}

/// Read history and aggregates of one pool
#[derive(Debug)]
pub struct ReadCorrelator {
    pool_name: String,
    last_uid: Option<u64>,
    queue: BoundedQueue<ReadRecord>,
    pid_names: HashMap<u32, String>,
    aggregates: BTreeMap<String, DatasetReadStats>,
    time_window: Option<Duration>,
}

impl ReadCorrelator {
    pub fn new(pool_name: &str, capacity: usize) -> Self {
        Self {
            pool_name: pool_name.to_string(),
            last_uid: None,
            queue: BoundedQueue::new(capacity),
            pid_names: HashMap::new(),
            aggregates: BTreeMap::new(),
            time_window: None,
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Queue `record` unless its uid was already seen
    ///
    /// Returns false, leaving every piece of state untouched, when `record.uid`
    /// is not greater than the last accepted uid.
    ///
    /// # Examples
    ///
    /// ```
    /// use zview::correlation::ReadCorrelator;
    /// use zview::records::ReadRecord;
    ///
    /// let read = |uid| ReadRecord::new(uid, 0, "tank".into(), 1, 0, 42, "cp".into());
    /// let mut reads = ReadCorrelator::new("tank", 10);
    /// assert!(reads.insert(read(5)));
    /// assert!(!reads.insert(read(5)));
    /// assert_eq!(reads.len(), 1);
    /// ```
    pub fn insert(&mut self, record: ReadRecord) -> bool {
        if self.last_uid.is_some_and(|last| record.uid <= last) {
            return false;
        }
        self.last_uid = Some(record.uid);
        self.pid_names
            .insert(record.pid, record.process_name.clone());
        self.queue.push(record);
        true
    }

    /// Rebuild the per-dataset aggregates from the current queue
    ///
    /// Process names of pids no longer in the queue are forgotten.
    pub fn recompute_aggregates(&mut self) {
        let mut aggregates: BTreeMap<String, DatasetReadStats> = BTreeMap::new();
        for record in self.queue.iter() {
            aggregates
                .entry(record.dataset_name.clone())
                .or_default()
                .add(record);
            if record.dataset_name != self.pool_name {
                aggregates
                    .entry(self.pool_name.clone())
                    .or_default()
                    .add(record);
            }
        }
        self.aggregates = aggregates;

        let live: std::collections::HashSet<u32> = self.queue.iter().map(|r| r.pid).collect();
        self.pid_names.retain(|pid, _| live.contains(pid));
    }

    /// Aggregates as of the last [`recompute_aggregates`](Self::recompute_aggregates)
    pub fn aggregates(&self) -> &BTreeMap<String, DatasetReadStats> {
        &self.aggregates
    }

    pub fn dataset_stats(&self, dataset: &str) -> Option<&DatasetReadStats> {
        self.aggregates.get(dataset)
    }

    /// Newest `n` reads, newest first
    pub fn recent(&self, n: usize) -> Vec<ReadRecord> {
        self.queue.recent(n)
    }

    pub fn process_name(&self, pid: u32) -> Option<&str> {
        self.pid_names.get(&pid).map(String::as_str)
    }

    pub fn last_uid(&self) -> Option<u64> {
        self.last_uid
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Span of time covered by the kernel's read history at the last poll
    pub fn time_window(&self) -> Option<Duration> {
        self.time_window
    }

    pub fn set_time_window(&mut self, window: Option<Duration>) {
        self.time_window = window;
    }
}
