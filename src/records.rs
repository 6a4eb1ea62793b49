//! Immutable records produced by the collectors
//!
//! Records are created once by their producing collector and queued; nothing
//! mutates them afterwards, so consumers may hold clones freely.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Timestamp type for records stamped on arrival
pub type Timestamp = DateTime<Local>;

/// Named bits of the per-read ARC flag word
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ReadFlag {
    /// Asynchronous read
    Async,
    /// Read issued as a prefetch
    Prefetch,
    /// Read satisfied from the cache
    Cached,
    /// Read issued by the predictive prefetcher
    Zfetch,
    /// Prescient prefetch for a send stream
    Send,
}

impl ReadFlag {
    /// All decoded flags, in display order
    pub const ALL: [ReadFlag; 5] = [
        ReadFlag::Async,
        ReadFlag::Prefetch,
        ReadFlag::Cached,
        ReadFlag::Zfetch,
        ReadFlag::Send,
    ];

    /// Bit of this flag in the kernel's flag word
    pub const fn bit(self) -> u32 {
        match self {
            ReadFlag::Async => 1 << 1,
            ReadFlag::Prefetch => 1 << 2,
            ReadFlag::Cached => 1 << 3,
            ReadFlag::Zfetch => 1 << 5,
            ReadFlag::Send => 1 << 6,
        }
    }

    /// One-letter code used in compact listings
    pub const fn code(self) -> char {
        match self {
            ReadFlag::Async => 'A',
            ReadFlag::Prefetch => 'P',
            ReadFlag::Cached => 'C',
            ReadFlag::Zfetch => 'Z',
            ReadFlag::Send => 'S',
        }
    }

    /// Flags set in `bits`; unknown bits are ignored
    pub fn decode(bits: u32) -> Vec<ReadFlag> {
        Self::ALL
            .iter()
            .copied()
            .filter(|flag| bits & flag.bit() != 0)
            .collect()
    }
}

/// One sampled read from a pool's read history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadRecord {
    /// Strictly increasing per pool
    pub uid: u64,
    pub object_set_id: u64,
    pub dataset_name: String,
    pub object_id: u64,
    pub flag_bits: u32,
    /// Decoded from `flag_bits`
    pub flags: Vec<ReadFlag>,
    pub pid: u32,
    pub process_name: String,
}

impl ReadRecord {
    pub fn new(
        uid: u64,
        object_set_id: u64,
        dataset_name: String,
        object_id: u64,
        flag_bits: u32,
        pid: u32,
        process_name: String,
    ) -> Self {
        Self {
            uid,
            object_set_id,
            dataset_name,
            object_id,
            flag_bits,
            flags: ReadFlag::decode(flag_bits),
            pid,
            process_name,
        }
    }

    /// Flag codes as a short string, e.g. `"AP"`
    pub fn flag_codes(&self) -> String {
        self.flags.iter().map(|flag| flag.code()).collect()
    }
}

/// One multi-line event from a pool's event stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    /// When the first row of the event was read
    pub received_at: Timestamp,
    /// Raw rows, each ending in a newline
    pub rows: Vec<String>,
}

impl EventRecord {
    /// Header row of the event without surrounding whitespace
    pub fn title(&self) -> Option<&str> {
        self.rows.first().map(|row| row.trim())
    }
}

/// IO counters of one transaction group
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxgIoStats {
    pub ndirty: u64,
    pub nread: u64,
    pub nwritten: u64,
    pub reads: u64,
    pub writes: u64,
}

impl TxgIoStats {
    /// Read plus write operations
    pub fn total_count(&self) -> u64 {
        self.reads + self.writes
    }

    /// Bytes read plus bytes written
    pub fn total_bytes(&self) -> u64 {
        self.nread + self.nwritten
    }
}

/// Phase durations of one transaction group, in nanoseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxgTimeStats {
    pub otime: u64,
    pub qtime: u64,
    pub wtime: u64,
    pub stime: u64,
}

/// One committed transaction group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxgRecord {
    pub index: u64,
    pub birth_time: u64,
    pub io_stats: TxgIoStats,
    pub time_stats: TxgTimeStats,
}

/// One line of the kernel module's internal debug log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebugMessage {
    pub timestamp: Timestamp,
    pub text: String,
}

impl DebugMessage {
    /// `HH:MM:SS` in local time
    pub fn clock(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}
