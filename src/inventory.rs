//! One-shot inventory listings: pools, datasets, pool properties and the
//! device tree
//!
//! Everything here runs through a [`CommandRunner`] so the orchestrator can be
//! exercised against canned tool output.

use crate::collectors::{CommandRunner, CommandSpec};
use crate::error::CollectorError;
use crate::topology::{parse_topology, Pool};
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Pool properties fetched for the summary view, in display order
pub const POOL_PROPERTIES: [&str; 11] = [
    "health",
    "size",
    "capacity",
    "dedupratio",
    "allocated",
    "free",
    "fragmentation",
    "autotrim",
    "freeing",
    "checkpoint",
    "readonly",
];

/// Names of all imported pools
pub fn discover_pools(runner: &dyn CommandRunner, zpool: &str) -> Result<Vec<String>, CollectorError> {
    let output = runner.run(&CommandSpec::new(zpool, ["list", "-Ho", "name"]))?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

/// Datasets of `pool` mapped to their object-set ids
pub fn discover_datasets(
    runner: &dyn CommandRunner,
    zfs: &str,
    pool: &str,
) -> Result<BTreeMap<String, u64>, CollectorError> {
    let output = runner.run(&CommandSpec::new(zfs, ["list", "-rHpo", "name,objsetid", pool]))?;
    let mut datasets = BTreeMap::new();
    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(name), Some(id)) = (fields.next(), fields.next()) else {
            continue;
        };
        match id.trim().parse::<u64>() {
            Ok(id) => {
                datasets.insert(name.trim().to_string(), id);
            }
            Err(_) => debug!("Skipping dataset row without object-set id: {:?}", line),
        }
    }
    Ok(datasets)
}

/// Invert a dataset listing into the object-set index used by the read history
pub fn objset_index(datasets: &BTreeMap<String, u64>) -> HashMap<u64, String> {
    datasets
        .iter()
        .map(|(name, id)| (*id, name.clone()))
        .collect()
}

/// Summary properties of `pool`, keyed by property name
pub fn pool_properties(
    runner: &dyn CommandRunner,
    zpool: &str,
    pool: &str,
) -> Result<BTreeMap<String, String>, CollectorError> {
    let list = POOL_PROPERTIES.join(",");
    let spec = CommandSpec::new(zpool, ["get", "-Hpo", "property,value", list.as_str(), pool]);
    let output = runner.run(&spec)?;
    Ok(output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(property, value)| (property.trim().to_string(), value.trim().to_string()))
        .collect())
}

/// Device tree of `pool` from the verbose listing
pub fn load_topology(runner: &dyn CommandRunner, zpool: &str, pool: &str) -> Result<Pool, CollectorError> {
    let output = runner.run(&CommandSpec::new(zpool, ["list", "-vHLP", pool]))?;
    Ok(parse_topology(pool, output.lines()))
}
