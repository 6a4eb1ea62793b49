//! Periodic reader for kernel statistics pseudo-files
//!
//! A [`ProcfsPoller`] owns one thread that rereads a single file on a fixed
//! interval and hands the lines after its header to a [`ProcfsSource`]. When the
//! file disappears the poller stays alive, backs off, and tells the source so it
//! can drop its counter baselines.

use super::sleep_while_running;
use crate::error::CollectorError;
use crate::history::lock;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Value of one `name type value` row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KstatValue {
    Int(i64),
    Text(String),
}

/// Rows of a named kstat, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KstatRecord {
    values: BTreeMap<String, KstatValue>,
}

impl KstatRecord {
    pub fn get(&self, name: &str) -> Option<&KstatValue> {
        self.values.get(name)
    }

    /// Numeric value of `name`, `None` if missing or textual
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(KstatValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(KstatValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Numeric value of `name` or a parse error naming the field
    pub fn require_int(&self, name: &str) -> Result<i64, CollectorError> {
        self.int(name)
            .ok_or_else(|| CollectorError::ParseError(format!("missing counter {}", name)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse `name type value` rows after `header_lines` header lines
///
/// Rows with fewer than three fields are skipped. Values that do not parse as
/// integers are kept as text; counters above `i64::MAX` saturate.
pub fn parse_named_kstat(text: &str, header_lines: usize) -> KstatRecord {
    let mut values = BTreeMap::new();
    for line in text.lines().skip(header_lines) {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(_kind), Some(first)) = (fields.next(), fields.next(), fields.next())
        else {
            if !line.trim().is_empty() {
                debug!("Skipping short kstat row: {:?}", line);
            }
            continue;
        };

        let value = match first.parse::<i64>() {
            Ok(value) => KstatValue::Int(value),
            Err(_) => match first.parse::<u64>() {
                Ok(_) => KstatValue::Int(i64::MAX),
                Err(_) => {
                    let rest: Vec<&str> = std::iter::once(first).chain(fields).collect();
                    KstatValue::Text(rest.join(" "))
                }
            },
        };
        values.insert(name.to_string(), value);
    }
    KstatRecord { values }
}

/// The leading `kid type flags ndata data_size crtime snaptime` line of a kstat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KstatHeader {
    pub kid: u64,
    pub kind: u32,
    pub flags: u32,
    pub ndata: u64,
    pub data_size: u64,
    /// Creation time on the kernel's monotonic clock, in nanoseconds
    pub crtime: u64,
    /// Time of the last snapshot on the kernel's monotonic clock, in nanoseconds
    pub snaptime: u64,
}

fn parse_number(field: &str) -> Option<u64> {
    match field.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

impl KstatHeader {
    /// Parse a header line; the flags column is hexadecimal
    pub fn parse(line: &str) -> Result<Self, CollectorError> {
        let fields: Vec<u64> = line
            .split_whitespace()
            .map(parse_number)
            .collect::<Option<_>>()
            .ok_or_else(|| CollectorError::ParseError(format!("kstat header {:?}", line)))?;
        if fields.len() < 7 {
            return Err(CollectorError::ParseError(format!(
                "kstat header has {} fields: {:?}",
                fields.len(),
                line
            )));
        }
        Ok(Self {
            kid: fields[0],
            kind: fields[1] as u32,
            flags: fields[2] as u32,
            ndata: fields[3],
            data_size: fields[4],
            crtime: fields[5],
            snaptime: fields[6],
        })
    }

    /// Read the header line of the kstat at `path`
    pub fn read(path: &Path) -> Result<Self, CollectorError> {
        let text = read_source(path)?;
        Self::parse(text.lines().next().unwrap_or_default())
    }
}

/// Read a pseudo-file, mapping a missing file to `SourceUnavailable`
pub fn read_source(path: &Path) -> Result<String, CollectorError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CollectorError::SourceUnavailable(path.to_path_buf()),
        _ => CollectorError::IoError(e),
    })
}

/// One pseudo-file and what to do with its content
pub trait ProcfsSource: Send + 'static {
    /// Short name for log lines
    fn name(&self) -> String;

    fn path(&self) -> PathBuf;

    /// Consume the full file content, header included
    fn ingest(&mut self, text: &str) -> Result<(), CollectorError>;

    /// The file went away; the next successful read starts a new baseline
    fn mark_unavailable(&mut self) {}
}

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ingested,
    Unavailable,
    Failed,
}

/// Poll `source` once, logging failures
pub fn poll_once<S: ProcfsSource>(source: &mut S) -> PollOutcome {
    let path = source.path();
    let result = read_source(&path).and_then(|text| source.ingest(&text));
    match result {
        Ok(()) => PollOutcome::Ingested,
        Err(e) if e.is_unavailable() => {
            source.mark_unavailable();
            PollOutcome::Unavailable
        }
        Err(e) => {
            debug!("{}: poll failed: {}", source.name(), e);
            PollOutcome::Failed
        }
    }
}

/// Periodic poller thread for one [`ProcfsSource`]
pub struct ProcfsPoller<S: ProcfsSource> {
    source: Arc<Mutex<S>>,
    interval: Duration,
    /// Interval multiplier while the file is missing
    unavailable_backoff: u32,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
}

impl<S: ProcfsSource> ProcfsPoller<S> {
    pub fn new(source: S, interval: Duration, unavailable_backoff: u32) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            interval,
            unavailable_backoff: unavailable_backoff.max(1),
            thread_handle: None,
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// Shared handle to the source, for reading its state outside the thread
    pub fn source(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.source)
    }

    /// Start the polling thread; a no-op when already running
    pub fn start(&mut self) {
        {
            let mut running = lock(&self.running);
            if *running {
                return;
            }
            *running = true;
        }

        let source = Arc::clone(&self.source);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let backoff = self.unavailable_backoff;
        let name = lock(&self.source).name();

        self.thread_handle = Some(thread::spawn(move || {
            Self::poller_thread(source, running, interval, backoff);
        }));
        info!("{} poller started ({:?})", name, self.interval);
    }

    /// Signal the thread to stop and wait for it
    pub fn stop(&mut self) {
        *lock(&self.running) = false;
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("{} poller thread panicked", lock(&self.source).name());
            }
        }
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.running)
    }

    fn poller_thread(
        source: Arc<Mutex<S>>,
        running: Arc<Mutex<bool>>,
        interval: Duration,
        backoff: u32,
    ) {
        let mut available = true;

        while *lock(&running) {
            let (outcome, name, path) = {
                let mut source = lock(&source);
                (poll_once(&mut *source), source.name(), source.path())
            };

            let delay = match outcome {
                PollOutcome::Unavailable => {
                    if available {
                        warn!(
                            "{}: {} is not available, retrying every {:?}",
                            name,
                            path.display(),
                            interval * backoff
                        );
                        available = false;
                    }
                    interval * backoff
                }
                PollOutcome::Ingested | PollOutcome::Failed => {
                    if !available {
                        info!("{}: {} is available again", name, path.display());
                        available = true;
                    }
                    interval
                }
            };

            sleep_while_running(delay, &running);
        }

        debug!("Poller thread for {} finished", lock(&source).name());
    }
}

impl<S: ProcfsSource> Drop for ProcfsPoller<S> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}
