use super::procfs::ProcfsSource;
use crate::error::CollectorError;
use crate::history::{lock, BoundedQueue};
use crate::records::DebugMessage;
use chrono::{Local, TimeZone};
use log::debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const HEADER_LINES: usize = 1;

/// Parse one `epoch payload` row
pub fn parse_debug_line(line: &str) -> Option<DebugMessage> {
    let line = line.trim_end();
    let (epoch, text) = line.split_once(char::is_whitespace)?;
    let seconds: i64 = epoch.parse().ok()?;
    let timestamp = Local.timestamp_opt(seconds, 0).single()?;
    Some(DebugMessage {
        timestamp,
        text: text.trim_start().to_string(),
    })
}

/// Tail of the kernel module's `dbgmsg` log
///
/// The file is a ring kept by the kernel, so every read returns old lines too.
/// The last emitted line marks where new content starts; if it has rotated out
/// the whole file is new.
pub struct DebugMessageSource {
    path: PathBuf,
    last_line: Option<String>,
    queue: Arc<Mutex<BoundedQueue<DebugMessage>>>,
}

impl DebugMessageSource {
    pub fn new(path: PathBuf, queue: Arc<Mutex<BoundedQueue<DebugMessage>>>) -> Self {
        Self {
            path,
            last_line: None,
            queue,
        }
    }
}

impl ProcfsSource for DebugMessageSource {
    fn name(&self) -> String {
        "dbgmsg".to_string()
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }

    fn ingest(&mut self, text: &str) -> Result<(), CollectorError> {
        let lines: Vec<&str> = text
            .lines()
            .skip(HEADER_LINES)
            .filter(|line| !line.trim().is_empty())
            .collect();

        let start = self
            .last_line
            .as_deref()
            .and_then(|last| lines.iter().rposition(|line| *line == last))
            .map_or(0, |pos| pos + 1);

        let fresh = &lines[start..];
        if fresh.is_empty() {
            return Ok(());
        }

        let mut queue = lock(&self.queue);
        for line in fresh {
            match parse_debug_line(line) {
                Some(message) => queue.push(message),
                None => debug!("Skipping debug message row: {:?}", line),
            }
        }
        self.last_line = fresh.last().map(|line| line.to_string());
        Ok(())
    }
}
