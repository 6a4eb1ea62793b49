//! Long-lived subprocess reader
//!
//! A [`StreamingCollector`] keeps one external command running, feeds every
//! complete output line to its [`LineHandler`] and restarts the command after a
//! fixed backoff whenever it exits or cannot be launched. Failures never leave
//! the collector thread.

use super::command::{spawn_merged, CommandSpec};
use super::sleep_while_running;
use crate::error::CollectorError;
use crate::history::lock;
use log::{debug, error, info, warn};
use std::io::Read;
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Per-source state machine driven by the output lines of one command
pub trait LineHandler: Send + 'static {
    /// One complete line, without its terminator
    fn handle_line(&mut self, line: &str);

    /// No output is available for now: the pipe is drained or the command is
    /// waiting to be restarted
    fn on_idle(&mut self) {}

    /// The process exited; called after its last line
    fn on_exit(&mut self) {}

    /// Lines to drop at the start of every run
    fn header_lines(&self) -> usize {
        0
    }
}

/// Splits a byte stream into lines, holding back a trailing partial line
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(newline_pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw[..newline_pos]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Take whatever unterminated text is left
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Deliver lines to the handler, dropping the first `skip` of the run
fn deliver<H: LineHandler>(handler: &Mutex<H>, lines: Vec<String>, skip: &mut usize) {
    if lines.is_empty() {
        return;
    }
    let mut handler = lock(handler);
    for line in lines {
        if *skip > 0 {
            *skip -= 1;
            continue;
        }
        handler.handle_line(&line);
    }
}

/// Read `reader` until EOF or shutdown, feeding lines to `handler`
///
/// `reader` must be non-blocking. Each time it runs dry the handler's
/// `on_idle` is called and the loop sleeps for `poll_interval`.
pub fn process_stream<R: Read, H: LineHandler>(
    reader: &mut R,
    handler: &Mutex<H>,
    running: &Mutex<bool>,
    poll_interval: Duration,
) -> Result<(), CollectorError> {
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; 4096];
    let mut skip = lock(handler).header_lines();

    loop {
        if !*lock(running) {
            debug!("Stopping stream processing due to shutdown signal");
            return Ok(());
        }

        match reader.read(&mut chunk) {
            Ok(0) => {
                let rest = buffer.finish().into_iter().collect();
                deliver(handler, rest, &mut skip);
                return Ok(());
            }
            Ok(n) => deliver(handler, buffer.push(&chunk[..n]), &mut skip),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                lock(handler).on_idle();
                thread::sleep(poll_interval);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CollectorError::IoError(e)),
        }
    }
}

/// Restarting reader for one external command
pub struct StreamingCollector<H: LineHandler> {
    spec: CommandSpec,
    handler: Arc<Mutex<H>>,
    poll_interval: Duration,
    restart_backoff: Duration,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
}

impl<H: LineHandler> StreamingCollector<H> {
    pub fn new(spec: CommandSpec, handler: H, poll_interval: Duration, restart_backoff: Duration) -> Self {
        Self {
            spec,
            handler: Arc::new(Mutex::new(handler)),
            poll_interval,
            restart_backoff,
            thread_handle: None,
            running: Arc::new(Mutex::new(false)),
        }
    }

    pub fn handler(&self) -> Arc<Mutex<H>> {
        Arc::clone(&self.handler)
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Start the reader thread
    ///
    /// Launch failures are handled inside the thread, which keeps retrying; this
    /// never fails.
    pub fn start(&mut self) {
        {
            let mut running = lock(&self.running);
            if *running {
                return;
            }
            *running = true;
        }

        let spec = self.spec.clone();
        let handler = Arc::clone(&self.handler);
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;
        let restart_backoff = self.restart_backoff;

        self.thread_handle = Some(thread::spawn(move || {
            Self::collector_thread(spec, handler, running, poll_interval, restart_backoff);
        }));
        info!("Stream collector started: {}", self.spec);
    }

    /// Signal the thread to stop, kill the child and wait for the thread
    pub fn stop(&mut self) {
        *lock(&self.running) = false;
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Stream collector thread for {} panicked", self.spec);
            }
        }
        info!("Stream collector stopped: {}", self.spec);
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.running)
    }

    fn collector_thread(
        spec: CommandSpec,
        handler: Arc<Mutex<H>>,
        running: Arc<Mutex<bool>>,
        poll_interval: Duration,
        restart_backoff: Duration,
    ) {
        while *lock(&running) {
            match spawn_merged(&spec) {
                Ok((mut child, mut reader)) => {
                    debug!("Started {} (pid {})", spec, child.id());

                    if let Err(e) = process_stream(&mut reader, &handler, &running, poll_interval) {
                        error!("Error reading output of {}: {}", spec, e);
                    }
                    if let Err(e) = Self::reap(&spec, &mut child) {
                        warn!("{}", e);
                    }
                    lock(&handler).on_exit();
                }
                Err(e) => {
                    error!("Failed to launch {}: {}", spec, e);
                }
            }

            if !*lock(&running) {
                break;
            }
            warn!("Restarting {} in {:?}", spec, restart_backoff);
            Self::idle_until_restart(&handler, &running, poll_interval, restart_backoff);
        }

        debug!("Stream collector thread for {} finished", spec);
    }

    /// Sleep out the restart backoff, ticking the handler's `on_idle`
    fn idle_until_restart(
        handler: &Mutex<H>,
        running: &Mutex<bool>,
        poll_interval: Duration,
        restart_backoff: Duration,
    ) {
        let deadline = Instant::now() + restart_backoff;
        while *lock(running) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep_while_running(remaining.min(poll_interval), running);
            lock(handler).on_idle();
        }
    }

    /// Collect the child, killing it first if it is still alive
    ///
    /// A command that exited on its own with a failure status is reported as
    /// `SubprocessTerminated`.
    fn reap(spec: &CommandSpec, child: &mut Child) -> Result<(), CollectorError> {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                info!("{} exited with status: {}", spec, status);
                Ok(())
            }
            Ok(Some(status)) => Err(CollectorError::SubprocessTerminated(format!(
                "{}: {}",
                spec, status
            ))),
            Ok(None) => {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill {}: {}", spec, e);
                }
                let _ = child.wait();
                Ok(())
            }
            Err(e) => {
                error!("Failed to check status of {}: {}", spec, e);
                let _ = child.kill();
                let _ = child.wait();
                Ok(())
            }
        }
    }
}

impl<H: LineHandler> Drop for StreamingCollector<H> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
        idles: usize,
        exits: usize,
        skip: usize,
    }

    impl LineHandler for Recorder {
        fn handle_line(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }

        fn on_idle(&mut self) {
            self.idles += 1;
        }

        fn on_exit(&mut self) {
            self.exits += 1;
        }

        fn header_lines(&self) -> usize {
            self.skip
        }
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"tank 1"), Vec::<String>::new());
        assert_eq!(buffer.push(b"0 20\nmirr"), vec!["tank 10 20".to_string()]);
        assert_eq!(buffer.push(b"or-0\r\n\n"), vec!["mirror-0".to_string(), String::new()]);
        assert_eq!(buffer.finish(), None);
        buffer.push(b"tail");
        assert_eq!(buffer.finish(), Some("tail".to_string()));
    }

    #[test]
    fn test_line_buffer_multibyte_split() {
        let mut buffer = LineBuffer::new();
        let text = "caf\u{e9}\n".as_bytes();
        assert!(buffer.push(&text[..4]).is_empty());
        assert_eq!(buffer.push(&text[4..]), vec!["caf\u{e9}".to_string()]);
    }

    #[test]
    fn test_process_stream_skips_header_and_flushes_tail() {
        let handler = Mutex::new(Recorder {
            skip: 1,
            ..Default::default()
        });
        let running = Mutex::new(true);
        let mut reader = Cursor::new(b"TIME CLASS\nfirst\nsecond\nlast".to_vec());

        process_stream(&mut reader, &handler, &running, Duration::from_millis(1)).unwrap();

        let handler = handler.into_inner().unwrap();
        assert_eq!(handler.lines, vec!["first", "second", "last"]);
    }

    #[test]
    fn test_process_stream_stops_when_not_running() {
        let handler = Mutex::new(Recorder::default());
        let running = Mutex::new(false);
        let mut reader = Cursor::new(b"never\n".to_vec());
        process_stream(&mut reader, &handler, &running, Duration::from_millis(1)).unwrap();
        assert!(handler.into_inner().unwrap().lines.is_empty());
    }

    #[test]
    fn test_process_stream_with_real_child() {
        let (mut child, mut reader) =
            spawn_merged(&CommandSpec::new("sh", ["-c", "printf 'a\\n'; sleep 0.2; printf 'b\\nc'"]))
                .unwrap();
        let handler = Mutex::new(Recorder::default());
        let running = Mutex::new(true);

        process_stream(&mut reader, &handler, &running, Duration::from_millis(10)).unwrap();
        let _ = child.wait();

        let handler = handler.into_inner().unwrap();
        assert_eq!(handler.lines, vec!["a", "b", "c"]);
        assert!(handler.idles > 0);
    }

    #[test]
    fn test_collector_restarts_exited_command() {
        let mut collector = StreamingCollector::new(
            CommandSpec::new("sh", ["-c", "echo tick"]),
            Recorder::default(),
            Duration::from_millis(5),
            Duration::from_millis(20),
        );
        collector.start();
        assert!(collector.is_running());
        thread::sleep(Duration::from_millis(400));
        collector.stop();
        assert!(!collector.is_running());

        let handler = collector.handler();
        let handler = lock(&handler);
        assert!(handler.exits >= 2, "exits: {}", handler.exits);
        assert!(handler.lines.iter().all(|line| line == "tick"));
        assert!(handler.lines.len() >= 2);
    }

    #[test]
    fn test_reap_reports_failed_exit() {
        let spec = CommandSpec::new("sh", ["-c", "exit 3"]);
        let (mut child, _reader) = spawn_merged(&spec).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while child.try_wait().unwrap().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let err = StreamingCollector::<Recorder>::reap(&spec, &mut child).unwrap_err();
        assert!(matches!(err, CollectorError::SubprocessTerminated(_)));
        assert!(err.to_string().contains("sh -c exit 3"));

        let spec = CommandSpec::new("sh", ["-c", "exit 0"]);
        let (mut child, _reader) = spawn_merged(&spec).unwrap();
        child.wait().unwrap();
        assert!(StreamingCollector::<Recorder>::reap(&spec, &mut child).is_ok());
    }

    #[test]
    fn test_reap_kills_running_child() {
        let spec = CommandSpec::new("sleep", ["5"]);
        let (mut child, _reader) = spawn_merged(&spec).unwrap();
        assert!(StreamingCollector::<Recorder>::reap(&spec, &mut child).is_ok());
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_handler_idles_during_restart_backoff() {
        let mut collector = StreamingCollector::new(
            CommandSpec::new("/nonexistent/zpool", ["iostat"]),
            Recorder::default(),
            Duration::from_millis(10),
            Duration::from_secs(10),
        );
        collector.start();
        thread::sleep(Duration::from_millis(150));
        collector.stop();

        let handler = collector.handler();
        let handler = lock(&handler);
        assert!(handler.idles >= 3, "idles: {}", handler.idles);
        assert_eq!(handler.exits, 0);
    }

    #[test]
    fn test_collector_survives_missing_program() {
        let mut collector = StreamingCollector::new(
            CommandSpec::new("/nonexistent/zpool", ["events", "-vf"]),
            Recorder::default(),
            Duration::from_millis(5),
            Duration::from_millis(10),
        );
        collector.start();
        thread::sleep(Duration::from_millis(50));
        assert!(collector.is_running());
        collector.stop();
        assert_eq!(lock(&collector.handler()).exits, 0);
    }
}
