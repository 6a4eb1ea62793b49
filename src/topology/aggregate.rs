//! IO aggregation across the pool tree
//!
//! Physical sums add up what every device reported. Logical sums undo the
//! redundancy overhead of each raid group: a mirror writes every block to all of
//! its devices, and a raidz group spends `parity` of every `n` devices on parity.
//! The raidz factor `(n - parity) / n` is an approximation, since raidz stripes
//! are variable-width.

use super::{IoCounters, IoKind, LatencyField, Pool, RaidClass, RaidGroup, RaidKind};

/// Multiply every counter by `mult / div` with integer truncation
fn scale(io: &IoCounters, mult: u64, div: u64) -> IoCounters {
    if div == 0 {
        return IoCounters::default();
    }
    let apply = |value: u64| ((value as u128 * mult as u128) / div as u128) as u64;
    IoCounters {
        read_ops: apply(io.read_ops),
        write_ops: apply(io.write_ops),
        read_bytes: apply(io.read_bytes),
        write_bytes: apply(io.write_bytes),
    }
}

impl RaidGroup {
    /// Plain sum of the devices' counters
    pub fn sum_io_physical(&self) -> IoCounters {
        let mut total = IoCounters::default();
        for device in &self.devices {
            total.add(&device.stats.io);
        }
        total
    }

    /// Physical sum corrected for this group's redundancy
    pub fn sum_io_logical(&self) -> IoCounters {
        let physical = self.sum_io_physical();
        let count = self.device_count() as u64;
        match self.kind {
            RaidKind::Stripe => physical,
            RaidKind::Mirror => scale(&physical, 1, count),
            RaidKind::Raidz1 | RaidKind::Raidz2 | RaidKind::Raidz3 => {
                scale(&physical, count.saturating_sub(self.kind.parity()), count)
            }
        }
    }

    pub fn sum_io(&self, kind: IoKind) -> IoCounters {
        match kind {
            IoKind::Physical => self.sum_io_physical(),
            IoKind::Logical => self.sum_io_logical(),
        }
    }

    /// Fill capacity and latency of a stripe group from its members, since the
    /// IO report has no row for single-device stripes
    ///
    /// Capacity is the sum over members that reported one; each latency field is
    /// the mean over members that reported it.
    pub fn synthesize_from_devices(&mut self) {
        let used: Vec<u64> = self.devices.iter().filter_map(|d| d.stats.used).collect();
        let free: Vec<u64> = self.devices.iter().filter_map(|d| d.stats.free).collect();
        self.stats.used = (!used.is_empty()).then(|| used.iter().sum());
        self.stats.free = (!free.is_empty()).then(|| free.iter().sum());

        for field in LatencyField::ALL {
            let known: Vec<u64> = self
                .devices
                .iter()
                .filter_map(|device| device.latency.get(field))
                .collect();
            let mean = (!known.is_empty()).then(|| known.iter().sum::<u64>() / known.len() as u64);
            self.latency.set(field, mean);
        }
    }
}

impl Pool {
    /// Pool-wide IO of the requested kind
    ///
    /// The logical sum only counts a class on the side it serves: data, special
    /// and dedup groups on both sides, cache devices on the read side, log
    /// devices on the write side, spares not at all.
    pub fn sum_io(&self, kind: IoKind) -> IoCounters {
        let mut total = IoCounters::default();
        for (class, group) in self.groups() {
            match kind {
                IoKind::Physical => total.add(&group.sum_io_physical()),
                IoKind::Logical => {
                    let io = group.sum_io_logical();
                    match class {
                        RaidClass::Data | RaidClass::Special | RaidClass::Dedup => total.add(&io),
                        RaidClass::Cache => total.add_reads(&io),
                        RaidClass::Log => total.add_writes(&io),
                        RaidClass::Spare => {}
                    }
                }
            }
        }
        total
    }

    /// Synthesize stripe group stats and store both pool sums
    pub fn refresh_aggregates(&mut self) {
        for groups in self.classes.values_mut() {
            for group in groups.iter_mut().filter(|g| g.kind == RaidKind::Stripe) {
                group.synthesize_from_devices();
            }
        }
        self.physical_io = self.sum_io(IoKind::Physical);
        self.logical_io = self.sum_io(IoKind::Logical);
    }

    /// Last stored sum of the requested kind
    pub fn aggregated_io(&self, kind: IoKind) -> IoCounters {
        match kind {
            IoKind::Physical => self.physical_io,
            IoKind::Logical => self.logical_io,
        }
    }
}
