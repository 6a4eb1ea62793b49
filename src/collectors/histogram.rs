//! Request size histogram report
//!
//! `zpool iostat -r <pool> <secs>` prints one table per interval, closed by a
//! line made only of dashes. Lines are collected into an in-progress buffer
//! that replaces the committed one in a single atomic store when the closing
//! line arrives, so readers always see a whole table.

use super::command::CommandSpec;
use super::stream::LineHandler;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shortest dashed line accepted as a table delimiter
const MIN_DELIMITER_LEN: usize = 20;

pub fn histogram_command(zpool: &str, pool: &str, interval_secs: u64) -> CommandSpec {
    CommandSpec::new(zpool, ["iostat", "-r", pool, &interval_secs.to_string()])
        .env("ZPOOL_SCRIPTS_AS_ROOT", "yes")
}

/// Whether `line` closes a table
///
/// The separator under the column headers has gaps between its dashes and is
/// part of the table.
pub fn is_delimiter(line: &str) -> bool {
    let line = line.trim();
    line.len() >= MIN_DELIMITER_LEN && line.bytes().all(|b| b == b'-')
}

/// Latest complete histogram table, shared with readers
pub type CommittedHistogram = Arc<ArcSwap<Vec<String>>>;

pub struct HistogramHandler {
    committed: CommittedHistogram,
    in_progress: Vec<String>,
}

impl HistogramHandler {
    pub fn new(committed: CommittedHistogram) -> Self {
        Self {
            committed,
            in_progress: Vec::new(),
        }
    }

    fn commit(&mut self) {
        if self.in_progress.iter().all(|line| line.trim().is_empty()) {
            self.in_progress.clear();
            return;
        }
        let table = std::mem::take(&mut self.in_progress);
        self.committed.store(Arc::new(table));
    }
}

impl LineHandler for HistogramHandler {
    fn handle_line(&mut self, line: &str) {
        if is_delimiter(line) {
            self.commit();
        } else if !(self.in_progress.is_empty() && line.trim().is_empty()) {
            self.in_progress.push(line.to_string());
        }
    }

    fn on_exit(&mut self) {
        self.commit();
    }
}
