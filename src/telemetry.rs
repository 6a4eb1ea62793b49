//! Telemetry orchestrator
//!
//! [`Telemetry`] discovers the imported pools, wires one collector per data
//! source to the shared histories and starts each on its own thread. Everything
//! it hands out afterwards is an owned snapshot; nothing here mutates collector
//! state on behalf of a reader.

use crate::collectors::arc::{ArcSource, ARC_METRICS};
use crate::collectors::dataset_io::{objset_path, DatasetIoSource, DATASET_METRICS};
use crate::collectors::dbgmsg::DebugMessageSource;
use crate::collectors::event_log::{events_command, EventLogHandler};
use crate::collectors::histogram::{histogram_command, CommittedHistogram, HistogramHandler};
use crate::collectors::pool_io::{io_metric, iostat_command, latency_metric, pool_io_metrics, PoolIoHandler};
use crate::collectors::reads::ReadStatsSource;
use crate::collectors::smart::refresh_smart;
use crate::collectors::txg::{TxgSource, TXG_METRICS};
use crate::collectors::utilization::{utilization_command, UtilizationHandler};
use crate::collectors::{CommandRunner, KstatRecord, ProcfsPoller, StreamingCollector};
use crate::config::{Config, PathsConfig};
use crate::correlation::{DatasetReadStats, ReadCorrelator};
use crate::error::CollectorError;
use crate::history::{lock, BoundedQueue, Sample, SampleStore};
use crate::inventory::{discover_datasets, discover_pools, load_topology, objset_index, pool_properties};
use crate::records::{DebugMessage, EventRecord, ReadRecord, Timestamp, TxgRecord};
use crate::topology::{IoCounters, IoKind, LatencyField, Pool};
use arc_swap::ArcSwap;
use chrono::Local;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Read interval of the report streams while their pipe is empty
const STREAM_POLL: Duration = Duration::from_millis(200);

/// Records of each kind included in a [`TelemetrySnapshot`]
const SNAPSHOT_RECENT: usize = 5;

/// Object-set counters of one dataset
struct DatasetTelemetry {
    store: Arc<SampleStore>,
    poller: ProcfsPoller<DatasetIoSource>,
}

/// Histories and collectors of one pool
///
/// Dropping it stops every collector it owns.
pub struct PoolTelemetry {
    name: String,
    topology: Arc<Mutex<Pool>>,
    io_history: Arc<SampleStore>,
    txg_store: Arc<SampleStore>,
    txgs: Arc<Mutex<BoundedQueue<TxgRecord>>>,
    events: Arc<Mutex<BoundedQueue<EventRecord>>>,
    reads: Arc<Mutex<ReadCorrelator>>,
    histogram: CommittedHistogram,
    properties: Mutex<BTreeMap<String, String>>,
    datasets: BTreeMap<String, DatasetTelemetry>,
    pool_io: StreamingCollector<PoolIoHandler>,
    utilization: StreamingCollector<UtilizationHandler>,
    histogram_stream: StreamingCollector<HistogramHandler>,
    event_stream: StreamingCollector<EventLogHandler>,
    txg_poller: ProcfsPoller<TxgSource>,
    read_poller: ProcfsPoller<ReadStatsSource>,
}

impl PoolTelemetry {
    /// Run the pool's inventory listings and build its collectors, stopped
    ///
    /// A failing listing leaves the corresponding part empty.
    fn build(config: &Config, runner: &dyn CommandRunner, name: &str) -> Self {
        let paths = &config.paths;
        let pool_dir = paths.kstat_root.join(name);

        let topology = load_topology(runner, &paths.zpool, name).unwrap_or_else(|e| {
            warn!("Cannot list devices of pool {}: {}", name, e);
            Pool::new(name)
        });
        let datasets = discover_datasets(runner, &paths.zfs, name).unwrap_or_else(|e| {
            warn!("Cannot list datasets of pool {}: {}", name, e);
            BTreeMap::new()
        });
        let properties = pool_properties(runner, &paths.zpool, name).unwrap_or_else(|e| {
            warn!("Cannot read properties of pool {}: {}", name, e);
            BTreeMap::new()
        });
        info!(
            "Pool {}: {} devices, {} datasets",
            name,
            topology.device_count(),
            datasets.len()
        );

        let topology = Arc::new(Mutex::new(topology));
        let io_names = pool_io_metrics();
        let io_names: Vec<&str> = io_names.iter().map(String::as_str).collect();
        let io_history = Arc::new(SampleStore::with_metrics(config.pool_io.history, &io_names));
        let txg_store = Arc::new(SampleStore::with_metrics(config.txg.history, &TXG_METRICS));
        let txgs = Arc::new(Mutex::new(BoundedQueue::new(config.txg.history)));
        let events = Arc::new(Mutex::new(BoundedQueue::new(config.events.queue)));
        let reads = Arc::new(Mutex::new(ReadCorrelator::new(name, config.reads.queue)));
        let histogram: CommittedHistogram = Arc::new(ArcSwap::from_pointee(Vec::new()));

        let backoff = config.subprocess.restart_backoff();
        let report_secs = config.pool_io.report_interval_secs;

        let pool_io = StreamingCollector::new(
            iostat_command(&paths.zpool, name, report_secs),
            PoolIoHandler::new(
                Arc::clone(&topology),
                Arc::clone(&io_history),
                Duration::from_secs(report_secs),
            ),
            STREAM_POLL,
            backoff,
        );
        let utilization = StreamingCollector::new(
            utilization_command(&paths.zpool, name, config.pool_io.utilization_interval_secs),
            UtilizationHandler::new(Arc::clone(&topology)),
            STREAM_POLL,
            backoff,
        );
        let histogram_stream = StreamingCollector::new(
            histogram_command(&paths.zpool, name, report_secs),
            HistogramHandler::new(Arc::clone(&histogram)),
            STREAM_POLL,
            backoff,
        );
        let event_stream = StreamingCollector::new(
            events_command(&paths.zpool, name),
            EventLogHandler::new(config.events.denylist.clone(), Arc::clone(&events)),
            Duration::from_millis(config.events.poll_ms),
            backoff,
        );

        let txg_poller = ProcfsPoller::new(
            TxgSource::new(name, pool_dir.join("txgs"), Arc::clone(&txg_store), Arc::clone(&txgs)),
            Duration::from_millis(config.txg.interval_ms),
            1,
        );
        let read_poller = ProcfsPoller::new(
            ReadStatsSource::new(
                name,
                pool_dir.join("reads"),
                paths.kstat_root.join("arcstats"),
                objset_index(&datasets),
                Arc::clone(&reads),
            ),
            Duration::from_millis(config.reads.interval_ms),
            1,
        );

        let datasets = datasets
            .iter()
            .map(|(dataset, id)| {
                let store = Arc::new(SampleStore::with_metrics(config.datasets.history, &DATASET_METRICS));
                let poller = ProcfsPoller::new(
                    DatasetIoSource::new(
                        dataset,
                        objset_path(&paths.kstat_root, name, *id),
                        Arc::clone(&store),
                    ),
                    Duration::from_millis(config.datasets.interval_ms),
                    config.datasets.unavailable_backoff,
                );
                (dataset.clone(), DatasetTelemetry { store, poller })
            })
            .collect();

        Self {
            name: name.to_string(),
            topology,
            io_history,
            txg_store,
            txgs,
            events,
            reads,
            histogram,
            properties: Mutex::new(properties),
            datasets,
            pool_io,
            utilization,
            histogram_stream,
            event_stream,
            txg_poller,
            read_poller,
        }
    }

    fn start(&mut self, runner: Arc<dyn CommandRunner>, zpool: &str) {
        self.pool_io.start();
        self.utilization.start();
        self.histogram_stream.start();
        self.event_stream.start();
        self.txg_poller.start();
        self.read_poller.start();
        for dataset in self.datasets.values_mut() {
            dataset.poller.start();
        }

        let name = self.name.clone();
        let zpool = zpool.to_string();
        let topology = Arc::clone(&self.topology);
        thread::spawn(move || {
            if let Err(e) = refresh_smart(runner.as_ref(), &zpool, &name, &topology) {
                warn!("SMART listing for pool {} failed: {}", name, e);
            }
        });
    }

    fn stop(&mut self) {
        self.pool_io.stop();
        self.utilization.stop();
        self.histogram_stream.stop();
        self.event_stream.stop();
        self.txg_poller.stop();
        self.read_poller.stop();
        for dataset in self.datasets.values_mut() {
            dataset.poller.stop();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the device tree
    pub fn topology(&self) -> Pool {
        lock(&self.topology).clone()
    }

    /// Pool-wide IO sums as of the last complete report
    pub fn pool_io(&self, kind: IoKind) -> IoCounters {
        lock(&self.topology).aggregated_io(kind)
    }

    /// History of one IO key (`r_c`, `w_b`, ...) of `kind`
    pub fn io_window(&self, kind: IoKind, metric: &str) -> Vec<Sample> {
        self.io_history.window(&io_metric(kind, metric))
    }

    /// History of one latency field of the pool row
    pub fn latency_window(&self, field: LatencyField) -> Vec<Sample> {
        self.io_history.window(&latency_metric(field))
    }

    pub fn txg_window(&self, metric: &str) -> Vec<Sample> {
        self.txg_store.window(metric)
    }

    /// Newest `n` committed transaction groups, newest first
    pub fn recent_txgs(&self, n: usize) -> Vec<TxgRecord> {
        lock(&self.txgs).recent(n)
    }

    pub fn recent_events(&self, n: usize) -> Vec<EventRecord> {
        lock(&self.events).recent(n)
    }

    pub fn recent_reads(&self, n: usize) -> Vec<ReadRecord> {
        lock(&self.reads).recent(n)
    }

    /// Per-dataset read aggregates, the pool's own entry covering all datasets
    pub fn read_aggregates(&self) -> BTreeMap<String, DatasetReadStats> {
        lock(&self.reads).aggregates().clone()
    }

    /// Time span covered by the kernel's read history, when known
    pub fn read_time_window(&self) -> Option<Duration> {
        lock(&self.reads).time_window()
    }

    /// Last complete request size histogram
    pub fn histogram(&self) -> Arc<Vec<String>> {
        self.histogram.load_full()
    }

    /// `None` for datasets not found at discovery
    pub fn dataset_window(&self, dataset: &str, metric: &str) -> Option<Vec<Sample>> {
        self.datasets
            .get(dataset)
            .map(|telemetry| telemetry.store.window(metric))
    }

    pub fn dataset_names(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        lock(&self.properties).clone()
    }

    /// Reread properties and the object-set index used to name reads
    ///
    /// Datasets created after discovery get named reads but no counter history.
    fn refresh_inventory(&self, runner: &dyn CommandRunner, paths: &PathsConfig) {
        match pool_properties(runner, &paths.zpool, &self.name) {
            Ok(properties) => *lock(&self.properties) = properties,
            Err(e) => warn!("Cannot read properties of pool {}: {}", self.name, e),
        }
        match discover_datasets(runner, &paths.zfs, &self.name) {
            Ok(datasets) => lock(&self.read_poller.source()).set_datasets(objset_index(&datasets)),
            Err(e) => warn!("Cannot list datasets of pool {}: {}", self.name, e),
        }
    }

    fn snapshot(&self) -> PoolSnapshot {
        let datasets = self
            .datasets
            .iter()
            .map(|(name, telemetry)| {
                let latest = DATASET_METRICS
                    .iter()
                    .map(|metric| (metric.to_string(), telemetry.store.latest(metric)))
                    .collect();
                (name.clone(), latest)
            })
            .collect();

        PoolSnapshot {
            name: self.name.clone(),
            properties: self.properties(),
            topology: self.topology(),
            latest_txg: self.recent_txgs(1).into_iter().next(),
            recent_events: self.recent_events(SNAPSHOT_RECENT),
            read_aggregates: self.read_aggregates(),
            read_window_secs: self.read_time_window().map(|window| window.as_secs_f64()),
            histogram: self.histogram().as_ref().clone(),
            datasets,
        }
    }
}

/// Serializable summary of one pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub topology: Pool,
    pub latest_txg: Option<TxgRecord>,
    pub recent_events: Vec<EventRecord>,
    pub read_aggregates: BTreeMap<String, DatasetReadStats>,
    pub read_window_secs: Option<f64>,
    pub histogram: Vec<String>,
    /// Latest sample of every metric, per dataset
    pub datasets: BTreeMap<String, BTreeMap<String, Sample>>,
}

/// Serializable summary of everything collected
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub taken_at: Timestamp,
    pub arc: BTreeMap<String, Sample>,
    pub pools: Vec<PoolSnapshot>,
    pub debug_messages: Vec<DebugMessage>,
}

/// Every collector of the host, global and per pool
pub struct Telemetry {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    arc_store: Arc<SampleStore>,
    arc_latest: Arc<Mutex<KstatRecord>>,
    arc_poller: ProcfsPoller<ArcSource>,
    debug_messages: Arc<Mutex<BoundedQueue<DebugMessage>>>,
    dbgmsg_poller: ProcfsPoller<DebugMessageSource>,
    pools: BTreeMap<String, PoolTelemetry>,
}

impl Telemetry {
    /// Discover pools and start every collector
    ///
    /// # Errors
    ///
    /// Returns an error only if the pool list itself cannot be obtained; any
    /// later failure is logged and degrades the affected source.
    pub fn start(config: Config, runner: Arc<dyn CommandRunner>) -> Result<Self, CollectorError> {
        let pool_names = discover_pools(runner.as_ref(), &config.paths.zpool)?;
        info!("Discovered {} pools: {}", pool_names.len(), pool_names.join(", "));

        let arc_store = Arc::new(SampleStore::with_metrics(config.arc.history, &ARC_METRICS));
        let arc_source = ArcSource::new(config.paths.kstat_root.join("arcstats"), Arc::clone(&arc_store));
        let arc_latest = arc_source.latest();
        let mut arc_poller = ProcfsPoller::new(arc_source, Duration::from_millis(config.arc.interval_ms), 1);

        let debug_messages = Arc::new(Mutex::new(BoundedQueue::new(config.debug_messages.queue)));
        let mut dbgmsg_poller = ProcfsPoller::new(
            DebugMessageSource::new(config.paths.kstat_root.join("dbgmsg"), Arc::clone(&debug_messages)),
            Duration::from_millis(config.debug_messages.interval_ms),
            1,
        );

        arc_poller.start();
        dbgmsg_poller.start();

        let mut telemetry = Self {
            config,
            runner,
            arc_store,
            arc_latest,
            arc_poller,
            debug_messages,
            dbgmsg_poller,
            pools: BTreeMap::new(),
        };
        for name in pool_names {
            telemetry.add_pool(&name);
        }
        Ok(telemetry)
    }

    fn add_pool(&mut self, name: &str) {
        let mut pool = PoolTelemetry::build(&self.config, self.runner.as_ref(), name);
        pool.start(Arc::clone(&self.runner), &self.config.paths.zpool);
        self.pools.insert(name.to_string(), pool);
    }

    /// Pick up newly imported pools and drop exported ones
    ///
    /// Pools that stay get their properties and object-set index refreshed.
    pub fn rescan(&mut self) -> Result<(), CollectorError> {
        let current = discover_pools(self.runner.as_ref(), &self.config.paths.zpool)?;

        let vanished: Vec<String> = self
            .pools
            .keys()
            .filter(|name| !current.contains(name))
            .cloned()
            .collect();
        for name in vanished {
            info!("Pool {} is gone, stopping its collectors", name);
            if let Some(mut pool) = self.pools.remove(&name) {
                pool.stop();
            }
        }

        for name in &current {
            match self.pools.get(name) {
                Some(pool) => pool.refresh_inventory(self.runner.as_ref(), &self.config.paths),
                None => {
                    info!("New pool {}", name);
                    self.add_pool(name);
                }
            }
        }
        Ok(())
    }

    pub fn pool(&self, name: &str) -> Option<&PoolTelemetry> {
        self.pools.get(name)
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn arc_window(&self, metric: &str) -> Vec<Sample> {
        self.arc_store.window(metric)
    }

    /// Raw `arcstats` values of the last successful read
    pub fn arc_latest(&self) -> KstatRecord {
        lock(&self.arc_latest).clone()
    }

    /// Newest `n` kernel debug messages, newest first
    pub fn recent_debug_messages(&self, n: usize) -> Vec<DebugMessage> {
        lock(&self.debug_messages).recent(n)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            taken_at: Local::now(),
            arc: ARC_METRICS
                .iter()
                .map(|metric| (metric.to_string(), self.arc_store.latest(metric)))
                .collect(),
            pools: self.pools.values().map(PoolTelemetry::snapshot).collect(),
            debug_messages: self.recent_debug_messages(SNAPSHOT_RECENT),
        }
    }

    /// Stop every collector and wait for its thread
    pub fn stop(&mut self) {
        info!("Stopping telemetry");
        self.arc_poller.stop();
        self.dbgmsg_poller.stop();
        for pool in self.pools.values_mut() {
            pool.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::command::MockCommandRunner;
    use crate::collectors::CommandSpec;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    const ARCSTATS: &str = "13 1 0x01 147 39984 3830702545 87226934218066
name                            type data
hits                            4    100
misses                          4    10
size                            4    8000
";

    fn reply(spec: &CommandSpec, pools: &str) -> Result<String, CollectorError> {
        let output = match (spec.args[0].as_str(), spec.args.get(1).map(String::as_str)) {
            ("list", Some("-Ho")) => pools,
            ("list", Some("-rHpo")) => "tank\t54\ntank/home\t387\n",
            ("list", Some("-vHLP")) => "tank\t-\n\tmirror-0\t-\n\t/dev/sda\t-\n\t/dev/sdb\t-\n",
            ("get", _) => "health\tONLINE\n",
            _ => "",
        };
        Ok(output.to_string())
    }

    fn setup(pools: Arc<Mutex<String>>) -> (TempDir, Config, Arc<dyn CommandRunner>) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("arcstats"), ARCSTATS).unwrap();
        fs::create_dir(dir.path().join("tank")).unwrap();

        let mut config = Config::default();
        config.paths.kstat_root = dir.path().to_path_buf();
        config.paths.zpool = dir.path().join("no-such-zpool").display().to_string();
        config.arc.interval_ms = 20;
        config.subprocess.restart_backoff_secs = 60;

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(move |spec| reply(spec, &lock(&pools)));
        (dir, config, Arc::new(runner))
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_start_builds_pool_from_inventory() {
        let pools = Arc::new(Mutex::new("tank\n".to_string()));
        let (_dir, config, runner) = setup(pools);
        let mut telemetry = Telemetry::start(config, runner).unwrap();

        assert_eq!(telemetry.pool_names(), vec!["tank"]);
        let tank = telemetry.pool("tank").unwrap();
        assert_eq!(tank.topology().device_count(), 2);
        assert_eq!(tank.properties()["health"], "ONLINE");
        assert_eq!(tank.dataset_names(), vec!["tank", "tank/home"]);
        assert_eq!(tank.dataset_window("tank/home", "reads").map(|w| w.len()), Some(3600));
        assert!(tank.dataset_window("tank/missing", "reads").is_none());
        assert!(tank.histogram().is_empty());
        assert_eq!(tank.io_window(IoKind::Logical, "r_c").len(), 300);

        assert!(wait_for(|| telemetry.arc_latest().int("hits") == Some(100)));

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.pools.len(), 1);
        assert!(serde_json::to_string(&snapshot).unwrap().contains("\"health\":\"ONLINE\""));

        telemetry.stop();
    }

    #[test]
    fn test_rescan_follows_pool_list() {
        let pools = Arc::new(Mutex::new("tank\n".to_string()));
        let (_dir, config, runner) = setup(Arc::clone(&pools));
        let mut telemetry = Telemetry::start(config, runner).unwrap();

        *lock(&pools) = "tank\nbackup\n".to_string();
        telemetry.rescan().unwrap();
        assert_eq!(telemetry.pool_names(), vec!["backup", "tank"]);

        *lock(&pools) = "backup\n".to_string();
        telemetry.rescan().unwrap();
        assert_eq!(telemetry.pool_names(), vec!["backup"]);
        assert!(telemetry.pool("tank").is_none());

        telemetry.stop();
    }

    #[test]
    fn test_start_fails_without_pool_list() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Err(CollectorError::SubprocessSpawn("zpool: not found".to_string())));
        let result = Telemetry::start(Config::default(), Arc::new(runner));
        assert!(result.is_err());
    }
}
