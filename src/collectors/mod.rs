//! Collectors: one independent thread per data source
//!
//! Pseudo-file sources are driven by [`ProcfsPoller`], subprocess sources by
//! [`StreamingCollector`]. Each writes into the shared histories and the
//! topology tree; none of them returns errors to its owner.

/// External command invocation
pub mod command;

/// Periodic pseudo-file reader and kstat parsing
pub mod procfs;

/// Restarting subprocess reader
pub mod stream;

/// ARC counters
pub mod arc;

/// Per-dataset object-set counters
pub mod dataset_io;

/// Transaction group history
pub mod txg;

/// Per-read history feeding the correlation engine
pub mod reads;

/// Kernel module debug log
pub mod dbgmsg;

/// Pool IO, capacity and latency report
pub mod pool_io;

/// Device utilization and temperature report
pub mod utilization;

/// Request size histogram report
pub mod histogram;

/// Pool event stream
pub mod event_log;

/// One-shot SMART listing
pub mod smart;

pub use command::{spawn_merged, CommandRunner, CommandSpec, SystemCommandRunner};
pub use procfs::{parse_named_kstat, KstatHeader, KstatRecord, ProcfsPoller, ProcfsSource};
pub use stream::{LineHandler, StreamingCollector};

use crate::history::lock;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Sleep for `duration` in short slices, returning early once `running` clears
pub(crate) fn sleep_while_running(duration: Duration, running: &Mutex<bool>) {
    let slice = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO && *lock(running) {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
