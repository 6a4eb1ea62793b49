use super::procfs::ProcfsSource;
use crate::error::CollectorError;
use crate::history::{lock, BoundedQueue, SampleStore};
use crate::records::{TxgIoStats, TxgRecord, TxgTimeStats};
use log::debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const HEADER_LINES: usize = 1;
const COMMITTED: &str = "C";

/// Metrics recorded per committed transaction group
pub const TXG_METRICS: [&str; 13] = [
    "index", "birth", "ndirty", "reads", "nread", "total_c", "writes", "nwritten", "total_b",
    "otime", "qtime", "wtime", "stime",
];

/// Parse one `txg birth state ndirty nread nwritten reads writes otime qtime
/// wtime stime` row, returning the record and its state letter
pub fn parse_txg_row(line: &str) -> Option<(TxgRecord, &str)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 12 {
        return None;
    }
    let num = |i: usize| fields[i].parse::<u64>().ok();

    let record = TxgRecord {
        index: num(0)?,
        birth_time: num(1)?,
        io_stats: TxgIoStats {
            ndirty: num(3)?,
            nread: num(4)?,
            nwritten: num(5)?,
            reads: num(6)?,
            writes: num(7)?,
        },
        time_stats: TxgTimeStats {
            otime: num(8)?,
            qtime: num(9)?,
            wtime: num(10)?,
            stime: num(11)?,
        },
    };
    Some((record, fields[2]))
}

/// A pool's `txgs` kstat
pub struct TxgSource {
    pool: String,
    path: PathBuf,
    last_index: Option<u64>,
    store: Arc<SampleStore>,
    queue: Arc<Mutex<BoundedQueue<TxgRecord>>>,
}

impl TxgSource {
    pub fn new(
        pool: &str,
        path: PathBuf,
        store: Arc<SampleStore>,
        queue: Arc<Mutex<BoundedQueue<TxgRecord>>>,
    ) -> Self {
        Self {
            pool: pool.to_string(),
            path,
            last_index: None,
            store,
            queue,
        }
    }

    /// Index of the newest admitted transaction group
    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    fn admit(&mut self, record: TxgRecord) {
        let io = record.io_stats;
        let time = record.time_stats;
        self.store.record_all(&[
            ("index", record.index as f64),
            ("birth", record.birth_time as f64),
            ("ndirty", io.ndirty as f64),
            ("reads", io.reads as f64),
            ("nread", io.nread as f64),
            ("total_c", io.total_count() as f64),
            ("writes", io.writes as f64),
            ("nwritten", io.nwritten as f64),
            ("total_b", io.total_bytes() as f64),
            ("otime", time.otime as f64),
            ("qtime", time.qtime as f64),
            ("wtime", time.wtime as f64),
            ("stime", time.stime as f64),
        ]);
        lock(&self.queue).push(record);
        self.last_index = Some(record.index);
    }
}

impl ProcfsSource for TxgSource {
    fn name(&self) -> String {
        format!("txgs {}", self.pool)
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn ingest(&mut self, text: &str) -> Result<(), CollectorError> {
        for line in text.lines().skip(HEADER_LINES) {
            let Some((record, state)) = parse_txg_row(line) else {
                debug!("Skipping txg row: {:?}", line);
                continue;
            };
            if state != COMMITTED {
                continue;
            }
            if self.last_index.map_or(true, |last| record.index > last) {
                self.admit(record);
            }
        }
        Ok(())
    }
}
