use super::procfs::{parse_named_kstat, ProcfsSource};
use crate::error::CollectorError;
use crate::history::{CounterNormalizer, SampleStore};
use chrono::Local;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HEADER_LINES: usize = 2;

/// Counters turned into per-interval deltas
const COUNTERS: [&str; 6] = ["reads", "writes", "nread", "nwritten", "nunlinks", "nunlinked"];

/// Metrics recorded per interval
pub const DATASET_METRICS: [&str; 10] = [
    "time",
    "reads",
    "writes",
    "nread",
    "nwritten",
    "nunlinks",
    "nunlinked",
    "c_total",
    "b_total",
    "del_queue",
];

/// Path of the object-set kstat of one dataset
pub fn objset_path(kstat_root: &Path, pool: &str, objset_id: u64) -> PathBuf {
    kstat_root.join(pool).join(format!("objset-0x{:x}", objset_id))
}

/// Per-dataset object-set counters
pub struct DatasetIoSource {
    dataset: String,
    path: PathBuf,
    store: Arc<SampleStore>,
    normalizer: CounterNormalizer,
}

impl DatasetIoSource {
    pub fn new(dataset: &str, path: PathBuf, store: Arc<SampleStore>) -> Self {
        Self {
            dataset: dataset.to_string(),
            path,
            store,
            normalizer: CounterNormalizer::new(),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }
}

impl ProcfsSource for DatasetIoSource {
    fn name(&self) -> String {
        format!("dataset {}", self.dataset)
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn ingest(&mut self, text: &str) -> Result<(), CollectorError> {
        let record = parse_named_kstat(text, HEADER_LINES);
        if let Some(name) = record.text("dataset_name") {
            if name != self.dataset {
                debug!("{} now reports dataset {}", self.path.display(), name);
            }
        }

        let mut deltas = Vec::with_capacity(COUNTERS.len());
        let mut valid = true;
        for field in COUNTERS {
            let delta = self
                .normalizer
                .delta(&self.dataset, field, record.require_int(field)?);
            valid &= delta.valid;
            deltas.push((field, delta.value));
        }
        if !valid {
            return Ok(());
        }

        let value = |field: &str| {
            deltas
                .iter()
                .find(|(name, _)| *name == field)
                .map_or(0, |(_, value)| *value)
        };
        let absolute = |field: &str| record.int(field).unwrap_or(0);

        let mut values: Vec<(&str, f64)> = deltas.iter().map(|&(name, v)| (name, v as f64)).collect();
        values.push(("time", Local::now().timestamp() as f64));
        values.push(("c_total", (value("reads") + value("writes")) as f64));
        values.push(("b_total", (value("nread") + value("nwritten")) as f64));
        values.push((
            "del_queue",
            (absolute("nunlinks").abs() - absolute("nunlinked").abs()) as f64,
        ));
        self.store.record_all(&values);
        Ok(())
    }

    fn mark_unavailable(&mut self) {
        self.normalizer.forget(&self.dataset);
    }
}
