//! Pool → raid group → device hierarchy
//!
//! A [`Pool`] exclusively owns its raid groups and their devices. The
//! device-by-name index on the pool only stores positions into that tree, so
//! lookups by name are O(1) without a second owner.

/// Verbose pool listing parser
pub mod parse;

/// Physical and redundancy-aware logical IO sums
pub mod aggregate;

pub use parse::{classify_row, parse_topology, TopologyRow};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Role a set of raid groups plays in a pool
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RaidClass {
    Data,
    Special,
    Dedup,
    Log,
    Cache,
    Spare,
}

impl RaidClass {
    /// Class for a class header row of the pool listing
    pub fn from_header(name: &str) -> Option<Self> {
        match name {
            "data" => Some(RaidClass::Data),
            "special" => Some(RaidClass::Special),
            "dedup" => Some(RaidClass::Dedup),
            "logs" | "log" => Some(RaidClass::Log),
            "cache" => Some(RaidClass::Cache),
            "spare" | "spares" => Some(RaidClass::Spare),
            _ => None,
        }
    }
}

/// Redundancy layout of a raid group
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RaidKind {
    Stripe,
    Mirror,
    Raidz1,
    Raidz2,
    Raidz3,
}

impl RaidKind {
    /// Kind for a group name such as `mirror-0` or `raidz2-1`
    pub fn from_group_name(name: &str) -> Option<Self> {
        let prefix = name.split('-').next().unwrap_or_default();
        match prefix {
            "stripe" => Some(RaidKind::Stripe),
            "mirror" => Some(RaidKind::Mirror),
            "raidz" | "raidz1" => Some(RaidKind::Raidz1),
            "raidz2" => Some(RaidKind::Raidz2),
            "raidz3" => Some(RaidKind::Raidz3),
            _ => None,
        }
    }

    /// Number of parity devices
    pub fn parity(self) -> u64 {
        match self {
            RaidKind::Raidz1 => 1,
            RaidKind::Raidz2 => 2,
            RaidKind::Raidz3 => 3,
            RaidKind::Stripe | RaidKind::Mirror => 0,
        }
    }
}

/// Which IO sum to compute
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IoKind {
    /// Operations as issued to the disks
    Physical,
    /// Operations as seen by the pool's consumers
    Logical,
}

impl IoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IoKind::Physical => "physical",
            IoKind::Logical => "logical",
        }
    }
}

/// Per-interval operation and byte counts
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct IoCounters {
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl IoCounters {
    pub fn total_ops(&self) -> u64 {
        self.read_ops + self.write_ops
    }

    pub fn total_bytes(&self) -> u64 {
        self.read_bytes + self.write_bytes
    }

    pub fn add(&mut self, other: &IoCounters) {
        self.read_ops += other.read_ops;
        self.write_ops += other.write_ops;
        self.read_bytes += other.read_bytes;
        self.write_bytes += other.write_bytes;
    }

    /// Only the read side of `other`
    pub fn add_reads(&mut self, other: &IoCounters) {
        self.read_ops += other.read_ops;
        self.read_bytes += other.read_bytes;
    }

    /// Only the write side of `other`
    pub fn add_writes(&mut self, other: &IoCounters) {
        self.write_ops += other.write_ops;
        self.write_bytes += other.write_bytes;
    }
}

/// IO, capacity and utilisation snapshot of a device, raid group or pool
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct IoStats {
    pub io: IoCounters,
    /// Allocated bytes, `None` when the tool reports `-`
    pub used: Option<u64>,
    /// Free bytes, `None` when the tool reports `-`
    pub free: Option<u64>,
    /// Percent busy, when known
    pub utilization: Option<f64>,
}

impl IoStats {
    pub fn set_capacity(&mut self, used: Option<u64>, free: Option<u64>) {
        self.used = used;
        self.free = free;
    }
}

/// Named wait-time fields reported per device and group
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum LatencyField {
    ReadTotalWait,
    WriteTotalWait,
    ReadDiskWait,
    WriteDiskWait,
    ReadSyncQueueWait,
    WriteSyncQueueWait,
    ReadAsyncQueueWait,
    WriteAsyncQueueWait,
    ScrubWait,
    TrimWait,
}

impl LatencyField {
    /// Fields in the column order of the latency report
    pub const ALL: [LatencyField; 10] = [
        LatencyField::ReadTotalWait,
        LatencyField::WriteTotalWait,
        LatencyField::ReadDiskWait,
        LatencyField::WriteDiskWait,
        LatencyField::ReadSyncQueueWait,
        LatencyField::WriteSyncQueueWait,
        LatencyField::ReadAsyncQueueWait,
        LatencyField::WriteAsyncQueueWait,
        LatencyField::ScrubWait,
        LatencyField::TrimWait,
    ];

    /// Short metric key
    pub fn key(self) -> &'static str {
        match self {
            LatencyField::ReadTotalWait => "r_tw",
            LatencyField::WriteTotalWait => "w_tw",
            LatencyField::ReadDiskWait => "r_dw",
            LatencyField::WriteDiskWait => "w_dw",
            LatencyField::ReadSyncQueueWait => "r_sw",
            LatencyField::WriteSyncQueueWait => "w_sw",
            LatencyField::ReadAsyncQueueWait => "r_aw",
            LatencyField::WriteAsyncQueueWait => "w_aw",
            LatencyField::ScrubWait => "s_w",
            LatencyField::TrimWait => "t_w",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Wait times in nanoseconds; `None` means the tool reported `-`
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LatencyStats {
    values: [Option<u64>; 10],
}

impl LatencyStats {
    pub fn get(&self, field: LatencyField) -> Option<u64> {
        self.values[field.index()]
    }

    pub fn set(&mut self, field: LatencyField, value: Option<u64>) {
        self.values[field.index()] = value;
    }

    /// `(field, value)` pairs in report column order
    pub fn iter(&self) -> impl Iterator<Item = (LatencyField, Option<u64>)> + '_ {
        LatencyField::ALL
            .iter()
            .map(move |field| (*field, self.get(*field)))
    }
}

/// SMART and inventory attributes reported for a device
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SmartInfo {
    pub attributes: BTreeMap<String, String>,
}

impl SmartInfo {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }
}

/// Leaf device
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Device {
    pub name: String,
    pub stats: IoStats,
    pub latency: LatencyStats,
    pub smart: SmartInfo,
}

impl Device {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stats: IoStats::default(),
            latency: LatencyStats::default(),
            smart: SmartInfo::default(),
        }
    }
}

/// Group of devices sharing one redundancy layout
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RaidGroup {
    pub name: String,
    pub kind: RaidKind,
    /// Devices in listing order
    pub devices: Vec<Device>,
    pub stats: IoStats,
    pub latency: LatencyStats,
}

impl RaidGroup {
    pub fn new(name: &str, kind: RaidKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            devices: Vec::new(),
            stats: IoStats::default(),
            latency: LatencyStats::default(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.name == name)
    }
}

/// Position of a device inside the pool tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeviceLocation {
    class: RaidClass,
    group: usize,
    slot: usize,
}

/// A storage pool and its device tree
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pool {
    pub name: String,
    /// Raid groups per class, in listing order
    pub classes: BTreeMap<RaidClass, Vec<RaidGroup>>,
    /// Pool summary row: capacity and latency
    pub stats: IoStats,
    pub latency: LatencyStats,
    /// Sums computed by the last `refresh_aggregates`
    pub physical_io: IoCounters,
    pub logical_io: IoCounters,
    #[serde(skip)]
    device_index: HashMap<String, DeviceLocation>,
}

impl Pool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            classes: BTreeMap::new(),
            stats: IoStats::default(),
            latency: LatencyStats::default(),
            physical_io: IoCounters::default(),
            logical_io: IoCounters::default(),
            device_index: HashMap::new(),
        }
    }

    /// Open a new raid group in `class`, returning its position in the class
    pub fn add_group(&mut self, class: RaidClass, name: &str, kind: RaidKind) -> usize {
        let groups = self.classes.entry(class).or_default();
        groups.push(RaidGroup::new(name, kind));
        groups.len() - 1
    }

    /// Add a device to an existing group and index it by name
    ///
    /// Returns false if the group does not exist or the name is already indexed.
    pub fn add_device(&mut self, class: RaidClass, group: usize, name: &str) -> bool {
        if self.device_index.contains_key(name) {
            return false;
        }
        let Some(raid) = self
            .classes
            .get_mut(&class)
            .and_then(|groups| groups.get_mut(group))
        else {
            return false;
        };
        raid.devices.push(Device::new(name));
        let slot = raid.devices.len() - 1;
        self.device_index
            .insert(name.to_string(), DeviceLocation { class, group, slot });
        true
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        let location = self.device_index.get(name)?;
        self.classes
            .get(&location.class)?
            .get(location.group)?
            .devices
            .get(location.slot)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        let location = *self.device_index.get(name)?;
        self.classes
            .get_mut(&location.class)?
            .get_mut(location.group)?
            .devices
            .get_mut(location.slot)
    }

    pub fn device_count(&self) -> usize {
        self.device_index.len()
    }

    /// Device names in tree order
    pub fn device_names(&self) -> Vec<&str> {
        self.groups()
            .flat_map(|(_, group)| group.devices.iter().map(|device| device.name.as_str()))
            .collect()
    }

    /// All groups with their class, in class then listing order
    pub fn groups(&self) -> impl Iterator<Item = (RaidClass, &RaidGroup)> {
        self.classes
            .iter()
            .flat_map(|(class, groups)| groups.iter().map(move |group| (*class, group)))
    }

    pub fn group(&self, name: &str) -> Option<&RaidGroup> {
        self.groups()
            .map(|(_, group)| group)
            .find(|group| group.name == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut RaidGroup> {
        self.classes
            .values_mut()
            .flat_map(|groups| groups.iter_mut())
            .find(|group| group.name == name)
    }
}

/// Strip the partition suffix the pool tools append to whole-disk members
pub fn normalize_device_name(name: &str) -> &str {
    name.strip_suffix("-part1").unwrap_or(name)
}
