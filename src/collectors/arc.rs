use super::procfs::{parse_named_kstat, KstatRecord, ProcfsSource};
use crate::error::CollectorError;
use crate::history::{lock, percent_or_full, CounterNormalizer, SampleStore};
use chrono::Local;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const HEADER_LINES: usize = 2;
const SOURCE: &str = "arc";

/// Metrics recorded per interval
pub const ARC_METRICS: [&str; 15] = [
    "time",
    "hits",
    "misses",
    "io_total",
    "size",
    "mru_size",
    "mfu_size",
    "hitrate",
    "other_size",
    "data_size",
    "metadata_size",
    "dnode_size",
    "dbuf_size",
    "bonus_size",
    "hdr_size",
];

/// Gauges recorded as-is
const GAUGES: [&str; 9] = [
    "size",
    "mru_size",
    "mfu_size",
    "data_size",
    "metadata_size",
    "dnode_size",
    "dbuf_size",
    "bonus_size",
    "hdr_size",
];

/// Cache structures reported together as "other"
const OTHER_PARTS: [&str; 5] = ["dnode_size", "dbuf_size", "bonus_size", "anon_size", "hdr_size"];

/// The system-wide `arcstats` kstat
pub struct ArcSource {
    path: PathBuf,
    store: Arc<SampleStore>,
    latest: Arc<Mutex<KstatRecord>>,
    normalizer: CounterNormalizer,
}

impl ArcSource {
    pub fn new(path: PathBuf, store: Arc<SampleStore>) -> Self {
        Self {
            path,
            store,
            latest: Arc::new(Mutex::new(KstatRecord::default())),
            normalizer: CounterNormalizer::new(),
        }
    }

    /// Raw values of the last successful read
    pub fn latest(&self) -> Arc<Mutex<KstatRecord>> {
        Arc::clone(&self.latest)
    }
}

impl ProcfsSource for ArcSource {
    fn name(&self) -> String {
        "arcstats".to_string()
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn ingest(&mut self, text: &str) -> Result<(), CollectorError> {
        let record = parse_named_kstat(text, HEADER_LINES);
        let hits = self
            .normalizer
            .delta(SOURCE, "hits", record.require_int("hits")?);
        let misses = self
            .normalizer
            .delta(SOURCE, "misses", record.require_int("misses")?);

        if hits.valid && misses.valid {
            let gauge = |name: &str| record.int(name).unwrap_or(0);
            let other: i64 = OTHER_PARTS.iter().map(|&name| gauge(name)).sum();

            let mut values = vec![
                ("time", Local::now().timestamp() as f64),
                ("hits", hits.value as f64),
                ("misses", misses.value as f64),
                ("io_total", (hits.value + misses.value) as f64),
                ("hitrate", percent_or_full(hits.value, hits.value + misses.value)),
                ("other_size", other as f64),
            ];
            values.extend(GAUGES.iter().map(|&name| (name, gauge(name) as f64)));
            self.store.record_all(&values);
        }

        *lock(&self.latest) = record;
        Ok(())
    }

    fn mark_unavailable(&mut self) {
        self.normalizer.forget(SOURCE);
    }
}
