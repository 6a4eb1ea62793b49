//! Pool IO, capacity and latency report
//!
//! Reads `zpool iostat -vHPLlp <pool> <secs>`. Every report repeats the pool's
//! whole tree: path-named rows are leaf devices and carry IO counters, capacity
//! and latency; the pool row and raid group rows carry capacity and latency
//! only. When a report has been read in full the pool sums are refreshed and
//! appended to the pool's history. A quiet stream repeats the last sums once
//! per report interval so the history keeps moving.

use super::command::CommandSpec;
use super::stream::LineHandler;
use crate::history::{lock, SampleStore};
use crate::topology::{
    normalize_device_name, IoCounters, IoKind, LatencyField, LatencyStats, Pool,
};
use log::debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Column where the ten latency fields start
const LATENCY_COLUMN: usize = 7;

/// History keys per IO kind
pub const IO_HISTORY_KEYS: [&str; 6] = ["r_c", "w_c", "t_c", "r_b", "w_b", "t_b"];

/// History metric for one IO key of one kind, e.g. `logical.r_b`
pub fn io_metric(kind: IoKind, key: &str) -> String {
    format!("{}.{}", kind.as_str(), key)
}

/// History metric for one latency field of the pool row, e.g. `latency.r_tw`
pub fn latency_metric(field: LatencyField) -> String {
    format!("latency.{}", field.key())
}

/// Every metric kept in a pool's IO history
pub fn pool_io_metrics() -> Vec<String> {
    let mut metrics = Vec::new();
    for kind in [IoKind::Physical, IoKind::Logical] {
        metrics.extend(IO_HISTORY_KEYS.iter().map(|key| io_metric(kind, key)));
    }
    metrics.extend(LatencyField::ALL.iter().map(|field| latency_metric(*field)));
    metrics
}

pub fn iostat_command(zpool: &str, pool: &str, interval_secs: u64) -> CommandSpec {
    CommandSpec::new(
        zpool,
        ["iostat", "-vHPLlp", pool, &interval_secs.to_string()],
    )
    .env("ZPOOL_SCRIPTS_AS_ROOT", "yes")
}

/// Numeric report column, `None` for `-` or anything unparsable
pub fn parse_column(token: &str) -> Option<u64> {
    token.parse().ok()
}

/// One row of the report
#[derive(Debug, Clone, PartialEq)]
pub struct IostatRow {
    pub name: String,
    pub used: Option<u64>,
    pub free: Option<u64>,
    /// `None` unless all four counters are numeric
    pub io: Option<IoCounters>,
    pub latency: LatencyStats,
}

impl IostatRow {
    /// Whether the row names a leaf device rather than the pool or a group
    pub fn is_device(&self) -> bool {
        self.name.starts_with('/')
    }
}

/// Parse `name used free r_c w_c r_b w_b` followed by up to ten latency columns
pub fn parse_iostat_row(line: &str) -> Option<IostatRow> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < LATENCY_COLUMN {
        return None;
    }

    let counters: Option<Vec<u64>> = tokens[3..7].iter().map(|t| parse_column(t)).collect();
    let io = counters.map(|c| IoCounters {
        read_ops: c[0],
        write_ops: c[1],
        read_bytes: c[2],
        write_bytes: c[3],
    });

    let mut latency = LatencyStats::default();
    for (field, token) in LatencyField::ALL.iter().zip(&tokens[LATENCY_COLUMN..]) {
        latency.set(*field, parse_column(token));
    }

    Some(IostatRow {
        name: normalize_device_name(tokens[0]).to_string(),
        used: parse_column(tokens[1]),
        free: parse_column(tokens[2]),
        io,
        latency,
    })
}

/// Applies report rows to a pool tree and snapshots its sums into history
pub struct PoolIoHandler {
    pool: Arc<Mutex<Pool>>,
    history: Arc<SampleStore>,
    /// Set by the first row of a report, cleared once its sums are saved
    report_pending: bool,
    snapshot_interval: Duration,
    last_snapshot: Instant,
}

impl PoolIoHandler {
    pub fn new(pool: Arc<Mutex<Pool>>, history: Arc<SampleStore>, snapshot_interval: Duration) -> Self {
        Self {
            pool,
            history,
            report_pending: false,
            snapshot_interval,
            last_snapshot: Instant::now(),
        }
    }

    fn apply(&mut self, row: IostatRow) {
        let mut pool = lock(&self.pool);

        if row.is_device() {
            let Some(device) = pool.device_mut(&row.name) else {
                debug!("Skipping iostat row for unknown device {}", row.name);
                return;
            };
            if let Some(io) = row.io {
                device.stats.io = io;
            }
            device.stats.set_capacity(row.used, row.free);
            device.latency = row.latency;
            return;
        }

        if row.name == pool.name {
            pool.stats.set_capacity(row.used, row.free);
            pool.latency = row.latency;
            drop(pool);
            let values: Vec<(String, f64)> = row
                .latency
                .iter()
                .map(|(field, value)| (latency_metric(field), value.unwrap_or(0) as f64))
                .collect();
            let refs: Vec<(&str, f64)> = values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
            self.history.record_all(&refs);
            return;
        }

        match pool.group_mut(&row.name) {
            Some(group) => {
                group.stats.set_capacity(row.used, row.free);
                group.latency = row.latency;
            }
            None => debug!("Skipping iostat row {}", row.name),
        }
    }

    /// Refresh pool sums and append them to the IO history
    pub fn save_snapshot(&mut self) {
        let (physical, logical) = {
            let mut pool = lock(&self.pool);
            pool.refresh_aggregates();
            (
                pool.aggregated_io(IoKind::Physical),
                pool.aggregated_io(IoKind::Logical),
            )
        };

        let mut values = Vec::with_capacity(IO_HISTORY_KEYS.len() * 2);
        for (kind, io) in [(IoKind::Physical, physical), (IoKind::Logical, logical)] {
            let samples = [
                io.read_ops,
                io.write_ops,
                io.total_ops(),
                io.read_bytes,
                io.write_bytes,
                io.total_bytes(),
            ];
            for (key, value) in IO_HISTORY_KEYS.iter().zip(samples) {
                values.push((io_metric(kind, key), value as f64));
            }
        }
        let refs: Vec<(&str, f64)> = values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        self.history.record_all(&refs);
        self.report_pending = false;
        self.last_snapshot = Instant::now();
    }
}

impl LineHandler for PoolIoHandler {
    fn handle_line(&mut self, line: &str) {
        if line.trim().len() <= 3 {
            return;
        }
        match parse_iostat_row(line) {
            Some(row) => {
                self.report_pending = true;
                self.apply(row);
            }
            None => debug!("Skipping short iostat row: {:?}", line),
        }
    }

    fn on_idle(&mut self) {
        if self.report_pending || self.last_snapshot.elapsed() >= self.snapshot_interval {
            self.save_snapshot();
        }
    }

    fn on_exit(&mut self) {
        if self.report_pending {
            self.save_snapshot();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::parse_topology;

    const TOPOLOGY: &str = "tank\t2000\t1000\t1000
\tmirror-0\t2000\t1000\t1000
\t/dev/sda-part1\t-\t-\t-
\t/dev/sdb-part1\t-\t-\t-
logs\t-\t-\t-
\t/dev/nvme0n1\t100\t10\t90";

    const REPORT: &str = "tank\t1000\t1000\t20\t10\t81920\t40960\t100\t200\t90\t180\t5\t6\t7\t8\t-\t-
mirror-0\t990\t1010\t20\t8\t81920\t32768\t110\t210\t95\t190\t5\t6\t7\t8\t-\t-
/dev/sda-part1\t-\t-\t10\t4\t40960\t16384\t100\t200\t90\t180\t5\t6\t7\t8\t-\t-
/dev/sdb-part1\t-\t-\t10\t4\t40960\t16384\t120\t220\t95\t190\t5\t6\t7\t8\t-\t-
logs\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-
/dev/nvme0n1\t10\t90\t0\t2\t0\t8192\t-\t40\t-\t30\t-\t2\t-\t1\t-\t-
/dev/unknown\t1\t1\t1\t1\t1\t1";

    fn handler() -> (PoolIoHandler, Arc<Mutex<Pool>>, Arc<SampleStore>) {
        handler_with_interval(Duration::from_secs(60))
    }

    fn handler_with_interval(interval: Duration) -> (PoolIoHandler, Arc<Mutex<Pool>>, Arc<SampleStore>) {
        let pool = Arc::new(Mutex::new(parse_topology("tank", TOPOLOGY.lines())));
        let metrics = pool_io_metrics();
        let names: Vec<&str> = metrics.iter().map(String::as_str).collect();
        let history = Arc::new(SampleStore::with_metrics(5, &names));
        (
            PoolIoHandler::new(Arc::clone(&pool), Arc::clone(&history), interval),
            pool,
            history,
        )
    }

    #[test]
    fn test_parse_iostat_row() {
        let row = parse_iostat_row("/dev/sda-part1\t-\t-\t10\t4\t40960\t16384\t100\t200\t-").unwrap();
        assert_eq!(row.name, "/dev/sda");
        assert!(row.is_device());
        assert_eq!(row.used, None);
        assert_eq!(row.io.unwrap().read_bytes, 40960);
        assert_eq!(row.latency.get(LatencyField::ReadTotalWait), Some(100));
        assert_eq!(row.latency.get(LatencyField::WriteTotalWait), Some(200));
        assert_eq!(row.latency.get(LatencyField::ReadDiskWait), None);
        assert_eq!(row.latency.get(LatencyField::TrimWait), None);

        assert!(parse_iostat_row("tank 1 2").is_none());
        assert!(parse_iostat_row("logs\t-\t-\t-\t-\t-\t-").unwrap().io.is_none());
    }

    #[test]
    fn test_report_updates_devices_groups_and_pool() {
        let (mut handler, pool, history) = handler();
        for line in REPORT.lines() {
            handler.handle_line(line);
        }

        {
            let pool = lock(&pool);
            let sda = pool.device("/dev/sda").unwrap();
            assert_eq!(sda.stats.io.read_ops, 10);
            assert_eq!(sda.latency.get(LatencyField::ReadTotalWait), Some(100));

            let mirror = pool.group("mirror-0").unwrap();
            assert_eq!(mirror.stats.used, Some(990));
            assert_eq!(mirror.latency.get(LatencyField::ReadTotalWait), Some(110));
            // groups never take IO counters from the report
            assert_eq!(mirror.stats.io, IoCounters::default());

            assert_eq!(pool.stats.used, Some(1000));
            assert_eq!(pool.latency.get(LatencyField::WriteTotalWait), Some(200));
        }
        assert_eq!(history.latest("latency.r_tw"), Some(100.0));
        assert_eq!(history.latest("latency.s_w"), Some(0.0));
        assert_eq!(history.latest("physical.r_c"), None);

        handler.on_idle();

        // mirror: 20 reads physical -> 10 logical; log: writes only
        assert_eq!(history.latest("physical.r_c"), Some(20.0));
        assert_eq!(history.latest("logical.r_c"), Some(10.0));
        assert_eq!(history.latest("logical.w_c"), Some(4.0 + 2.0));
        assert_eq!(history.latest("physical.t_c"), Some(30.0));
        assert_eq!(history.latest("logical.w_b"), Some(16384.0 + 8192.0));

        let pool = lock(&pool);
        let log_group = &pool.classes[&crate::topology::RaidClass::Log][0];
        assert_eq!(log_group.stats.used, Some(10));
        assert_eq!(log_group.latency.get(LatencyField::WriteTotalWait), Some(40));
    }

    #[test]
    fn test_idle_within_interval_records_nothing_new() {
        let (mut handler, _, history) = handler();
        handler.on_idle();
        assert_eq!(history.latest("physical.r_c"), None);

        handler.handle_line(REPORT.lines().next().unwrap());
        handler.on_idle();
        handler.on_idle();
        handler.on_exit();
        let samples: Vec<f64> = history.window("physical.r_c").into_iter().flatten().collect();
        assert_eq!(samples, vec![0.0]);
    }

    #[test]
    fn test_quiet_interval_repeats_last_sums() {
        let (mut handler, _, history) = handler_with_interval(Duration::from_millis(50));
        for line in REPORT.lines() {
            handler.handle_line(line);
        }
        handler.on_idle();

        std::thread::sleep(Duration::from_millis(80));
        handler.on_idle();
        // the repeat restarts the interval
        handler.on_idle();
        std::thread::sleep(Duration::from_millis(80));
        handler.on_idle();

        let samples: Vec<f64> = history.window("logical.r_c").into_iter().flatten().collect();
        assert_eq!(samples, vec![10.0, 10.0, 10.0]);
        assert_eq!(history.latest("physical.r_c"), Some(20.0));
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(io_metric(IoKind::Logical, "t_b"), "logical.t_b");
        assert_eq!(latency_metric(LatencyField::TrimWait), "latency.t_w");
        assert_eq!(pool_io_metrics().len(), 22);
    }

    #[test]
    fn test_iostat_command() {
        let spec = iostat_command("/sbin/zpool", "tank", 5);
        assert_eq!(spec.to_string(), "/sbin/zpool iostat -vHPLlp tank 5");
        assert_eq!(spec.env[0].0, "ZPOOL_SCRIPTS_AS_ROOT");
    }
}
