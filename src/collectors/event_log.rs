//! Pool event stream framing
//!
//! `zpool events -vf <pool>` prints one unindented header line per event,
//! followed by indented `name = value` fields and a blank line. The framer turns
//! that stream into [`EventRecord`]s. Knowledge of the tool's layout is confined
//! to [`EventFramer::feed`].

use super::command::CommandSpec;
use super::stream::LineHandler;
use crate::history::{lock, BoundedQueue};
use crate::records::EventRecord;
use chrono::Local;
use std::sync::{Arc, Mutex};

pub fn events_command(zpool: &str, pool: &str) -> CommandSpec {
    CommandSpec::new(zpool, ["events", "-vf", pool])
}

/// Line classifier holding the event being assembled
#[derive(Debug)]
pub struct EventFramer {
    denylist: Vec<String>,
    current: Option<EventRecord>,
}

impl EventFramer {
    /// `denylist` names indented fields to drop
    pub fn new(denylist: Vec<String>) -> Self {
        Self {
            denylist,
            current: None,
        }
    }

    fn open() -> EventRecord {
        EventRecord {
            received_at: Local::now(),
            rows: Vec::new(),
        }
    }

    fn is_denied(&self, line: &str) -> bool {
        line.split_whitespace()
            .next()
            .is_some_and(|field| self.denylist.iter().any(|denied| denied == field))
    }

    /// Feed one line, without its terminator
    ///
    /// Returns the previous event when this line closes it.
    ///
    /// # Examples
    ///
    /// ```
    /// use zview::collectors::event_log::EventFramer;
    ///
    /// let mut framer = EventFramer::new(vec!["time".to_string()]);
    /// assert!(framer.feed("Oct 19 2026 ereport.fs.zfs.checksum").is_none());
    /// assert!(framer.feed("\ttime = 0x6714 0x1").is_none());
    /// let event = framer.feed("").unwrap();
    /// assert_eq!(event.rows, vec!["Oct 19 2026 ereport.fs.zfs.checksum\n", "\n"]);
    /// ```
    pub fn feed(&mut self, line: &str) -> Option<EventRecord> {
        if line.trim().is_empty() {
            return self.flush();
        }

        if line.starts_with(char::is_whitespace) {
            if !self.is_denied(line) {
                self.current
                    .get_or_insert_with(Self::open)
                    .rows
                    .push(format!("{}\n", line));
            }
            return None;
        }

        let closed = self.flush();
        let mut record = Self::open();
        record.rows.push(format!("{}\n", line));
        self.current = Some(record);
        closed
    }

    /// Close the current event, if it has any rows
    ///
    /// A closed event gets a trailing blank row as its separator.
    pub fn flush(&mut self) -> Option<EventRecord> {
        let mut record = self.current.take()?;
        if record.rows.is_empty() {
            return None;
        }
        record.rows.push("\n".to_string());
        Some(record)
    }

    /// Rows of the event still being assembled
    pub fn pending_rows(&self) -> &[String] {
        self.current
            .as_ref()
            .map(|record| record.rows.as_slice())
            .unwrap_or(&[])
    }
}

/// Feeds the stream through an [`EventFramer`] into a bounded queue
pub struct EventLogHandler {
    framer: EventFramer,
    queue: Arc<Mutex<BoundedQueue<EventRecord>>>,
}

impl EventLogHandler {
    pub fn new(denylist: Vec<String>, queue: Arc<Mutex<BoundedQueue<EventRecord>>>) -> Self {
        Self {
            framer: EventFramer::new(denylist),
            queue,
        }
    }
}

impl LineHandler for EventLogHandler {
    fn handle_line(&mut self, line: &str) {
        if let Some(record) = self.framer.feed(line) {
            lock(&self.queue).push(record);
        }
    }

    fn on_exit(&mut self) {
        if let Some(record) = self.framer.flush() {
            lock(&self.queue).push(record);
        }
    }

    /// The stream opens with a `TIME CLASS` column header
    fn header_lines(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denylist() -> Vec<String> {
        ["version", "history_hostname", "pool_guid", "history_time", "time"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn feed_all(framer: &mut EventFramer, text: &str) -> Vec<EventRecord> {
        text.lines().filter_map(|line| framer.feed(line)).collect()
    }

    #[test]
    fn test_blank_line_closes_event_and_next_stays_open() {
        let mut framer = EventFramer::new(denylist());
        let closed = feed_all(&mut framer, "A\n sub1\n sub2\n\nB\n sub3\n");

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].rows, vec!["A\n", " sub1\n", " sub2\n", "\n"]);
        assert_eq!(framer.pending_rows(), ["B\n", " sub3\n"]);

        let last = framer.flush().unwrap();
        assert_eq!(last.rows, vec!["B\n", " sub3\n", "\n"]);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn test_new_header_closes_previous_event() {
        let mut framer = EventFramer::new(denylist());
        let closed = feed_all(&mut framer, "A\n\tx = 1\nB\n");
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].title(), Some("A"));
        assert_eq!(framer.pending_rows(), ["B\n"]);
    }

    #[test]
    fn test_denylisted_fields_dropped() {
        let mut framer = EventFramer::new(denylist());
        let text = "Oct 19 2026 08:00:01.123 sysevent.fs.zfs.history_event
\tversion = 0x0
\tclass = \"sysevent.fs.zfs.history_event\"
\tpool_guid = 0x1234
\thistory_internal_str = \"pool version 5000\"
\ttime = 0x67146d91 0x2b1c
\ttimestamp = 0x1

";
        let closed = feed_all(&mut framer, text);
        assert_eq!(closed.len(), 1);
        assert_eq!(
            closed[0].rows,
            vec![
                "Oct 19 2026 08:00:01.123 sysevent.fs.zfs.history_event\n",
                "\tclass = \"sysevent.fs.zfs.history_event\"\n",
                "\thistory_internal_str = \"pool version 5000\"\n",
                "\ttimestamp = 0x1\n",
                "\n",
            ]
        );
    }

    #[test]
    fn test_empty_events_discarded() {
        let mut framer = EventFramer::new(denylist());
        assert!(feed_all(&mut framer, "\n\n\n").is_empty());
        assert!(framer.flush().is_none());
    }

    #[test]
    fn test_handler_queues_newest_first() {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(2)));
        let mut handler = EventLogHandler::new(denylist(), Arc::clone(&queue));
        assert_eq!(handler.header_lines(), 1);

        for line in "A\n\nB\n\nC\n\n".lines() {
            handler.handle_line(line);
        }
        let titles: Vec<String> = lock(&queue)
            .iter()
            .filter_map(|r| r.title().map(str::to_string))
            .collect();
        assert_eq!(titles, vec!["C", "B"]);
    }

    #[test]
    fn test_exit_flushes_open_event() {
        let queue = Arc::new(Mutex::new(BoundedQueue::new(10)));
        let mut handler = EventLogHandler::new(denylist(), Arc::clone(&queue));
        handler.handle_line("A");
        assert!(lock(&queue).is_empty());
        handler.on_exit();
        assert_eq!(lock(&queue).len(), 1);
    }
}
