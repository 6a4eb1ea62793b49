use super::procfs::{KstatHeader, ProcfsSource};
use crate::correlation::ReadCorrelator;
use crate::error::CollectorError;
use crate::history::lock;
use crate::records::ReadRecord;
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HEADER_LINES: usize = 1;

/// Fields of one row of a pool's `reads` kstat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRead {
    pub uid: u64,
    /// Kernel monotonic time of the read, in nanoseconds
    pub start: u64,
    pub objset: u64,
    pub object: u64,
    pub flag_bits: u32,
    pub pid: u32,
    pub process_name: String,
}

fn parse_hex(field: &str) -> Option<u64> {
    u64::from_str_radix(field.trim_start_matches("0x"), 16).ok()
}

/// Parse `uid start objset object level blkid aflags pid process...`
pub fn parse_read_row(line: &str) -> Option<RawRead> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return None;
    }
    Some(RawRead {
        uid: fields[0].parse().ok()?,
        start: fields[1].parse().ok()?,
        objset: parse_hex(fields[2])?,
        object: fields[3].parse().ok()?,
        flag_bits: parse_hex(fields[6])? as u32,
        pid: fields[7].parse().ok()?,
        process_name: fields[8..].join(" "),
    })
}

/// Offset between wall-clock nanoseconds and the kernel's monotonic clock
pub fn clock_offset(header: &KstatHeader) -> i128 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128;
    now - header.snaptime as i128
}

/// A pool's `reads` kstat feeding its [`ReadCorrelator`]
pub struct ReadStatsSource {
    pool: String,
    path: PathBuf,
    /// Kstat whose header supplies the kernel clock
    clock_source: PathBuf,
    clock_offset: Option<i128>,
    datasets: HashMap<u64, String>,
    correlator: Arc<Mutex<ReadCorrelator>>,
}

impl ReadStatsSource {
    /// `datasets` maps object-set ids to dataset names; object set 0 is always
    /// the pool's root dataset
    pub fn new(
        pool: &str,
        path: PathBuf,
        clock_source: PathBuf,
        datasets: HashMap<u64, String>,
        correlator: Arc<Mutex<ReadCorrelator>>,
    ) -> Self {
        Self {
            pool: pool.to_string(),
            path,
            clock_source,
            clock_offset: None,
            datasets,
            correlator,
        }
    }

    /// Replace the object-set index after a dataset rescan
    pub fn set_datasets(&mut self, datasets: HashMap<u64, String>) {
        self.datasets = datasets;
    }

    fn dataset_name(&self, objset: u64) -> Option<&str> {
        match self.datasets.get(&objset) {
            Some(name) => Some(name.as_str()),
            None if objset == 0 => Some(self.pool.as_str()),
            None => None,
        }
    }

    fn ensure_clock_offset(&mut self) {
        if self.clock_offset.is_some() {
            return;
        }
        match KstatHeader::read(&self.clock_source) {
            Ok(header) => self.clock_offset = Some(clock_offset(&header)),
            Err(e) => debug!("Cannot read kernel clock from {}: {}", self.clock_source.display(), e),
        }
    }

    fn time_window(&self, oldest_start: Option<u64>) -> Option<Duration> {
        let offset = self.clock_offset?;
        let start = oldest_start? as i128;
        let now = Utc::now().timestamp_nanos_opt()? as i128;
        let span = now - offset - start;
        u64::try_from(span).ok().map(Duration::from_nanos)
    }
}

impl ProcfsSource for ReadStatsSource {
    fn name(&self) -> String {
        format!("reads {}", self.pool)
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn ingest(&mut self, text: &str) -> Result<(), CollectorError> {
        self.ensure_clock_offset();

        let mut oldest_start = None;
        let mut records = Vec::new();
        for line in text.lines().skip(HEADER_LINES) {
            let Some(raw) = parse_read_row(line) else {
                debug!("Skipping read row: {:?}", line);
                continue;
            };
            oldest_start.get_or_insert(raw.start);
            let Some(dataset) = self.dataset_name(raw.objset) else {
                continue;
            };
            records.push(ReadRecord::new(
                raw.uid,
                raw.objset,
                dataset.to_string(),
                raw.object,
                raw.flag_bits,
                raw.pid,
                raw.process_name,
            ));
        }

        let window = self.time_window(oldest_start);
        let mut correlator = lock(&self.correlator);
        for record in records {
            correlator.insert(record);
        }
        correlator.recompute_aggregates();
        correlator.set_time_window(window);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ReadFlag;
    use tempfile::TempDir;

    const READS: &str = "uid      start            objset   object   level    blkid    aflags   pid      process
1021     87226000000000   0x36     2        0        7        0x2      4411     rsync
1022     87226100000000   0x0      34       0        0        0xa      1        systemd
1023     87226200000000   0x99     12       0        0        0x8      4411     rsync
1024     87226300000000   0x44     80       0        3        0x24     912      kworker/u8:2 io
";

    fn source(dir: &TempDir) -> (ReadStatsSource, Arc<Mutex<ReadCorrelator>>) {
        let arcstats = dir.path().join("arcstats");
        std::fs::write(&arcstats, "13 1 0x01 147 39984 3830702545 87226934218066\n").unwrap();
        let correlator = Arc::new(Mutex::new(ReadCorrelator::new("tank", 300)));
        let datasets = HashMap::from([
            (0x36, "tank/home".to_string()),
            (0x44, "tank/vm".to_string()),
        ]);
        let source = ReadStatsSource::new(
            "tank",
            dir.path().join("reads"),
            arcstats,
            datasets,
            Arc::clone(&correlator),
        );
        (source, correlator)
    }

    #[test]
    fn test_parse_read_row() {
        let raw = parse_read_row("1024 87226300000000 0x44 80 0 3 0x24 912 kworker/u8:2 io").unwrap();
        assert_eq!(raw.uid, 1024);
        assert_eq!(raw.objset, 0x44);
        assert_eq!(raw.flag_bits, 0x24);
        assert_eq!(raw.pid, 912);
        assert_eq!(raw.process_name, "kworker/u8:2 io");
        assert!(parse_read_row("uid start objset object level blkid aflags pid process").is_none());
        assert!(parse_read_row("1 2 3").is_none());
    }

    #[test]
    fn test_ingest_resolves_datasets_and_skips_unknown() {
        let dir = TempDir::new().unwrap();
        let (mut source, correlator) = source(&dir);
        source.ingest(READS).unwrap();

        let correlator = lock(&correlator);
        assert_eq!(correlator.len(), 3);
        assert_eq!(correlator.last_uid(), Some(1024));

        let recent = correlator.recent(3);
        assert_eq!(recent[0].dataset_name, "tank/vm");
        assert_eq!(recent[0].flags, vec![ReadFlag::Prefetch, ReadFlag::Zfetch]);
        assert_eq!(recent[1].dataset_name, "tank");
        assert_eq!(recent[2].dataset_name, "tank/home");

        assert_eq!(correlator.dataset_stats("tank").unwrap().count, 3);
        assert_eq!(correlator.dataset_stats("tank/home").unwrap().reads_by(4411), 1);
        assert_eq!(correlator.process_name(912), Some("kworker/u8:2 io"));
        assert!(correlator.time_window().is_some());
    }

    #[test]
    fn test_reingest_adds_only_new_uids() {
        let dir = TempDir::new().unwrap();
        let (mut source, correlator) = source(&dir);
        source.ingest(READS).unwrap();
        source
            .ingest("header\n1024 87226300000000 0x44 80 0 3 0x24 912 x\n1030 87226400000000 0x36 1 0 0 0x0 5 cat\n")
            .unwrap();
        let correlator = lock(&correlator);
        assert_eq!(correlator.len(), 4);
        assert_eq!(correlator.recent(1)[0].process_name, "cat");
    }

    #[test]
    fn test_missing_clock_source_leaves_window_unknown() {
        let dir = TempDir::new().unwrap();
        let correlator = Arc::new(Mutex::new(ReadCorrelator::new("tank", 10)));
        let mut source = ReadStatsSource::new(
            "tank",
            dir.path().join("reads"),
            dir.path().join("missing"),
            HashMap::new(),
            Arc::clone(&correlator),
        );
        source.ingest(READS).unwrap();
        let correlator = lock(&correlator);
        assert_eq!(correlator.len(), 1);
        assert_eq!(correlator.time_window(), None);
    }
}
