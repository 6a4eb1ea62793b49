//! Parser for the verbose, tab-separated pool listing
//!
//! The listing starts with the pool's own row, followed by class headers
//! (`logs`, `cache`, ...), raid group headers (`mirror-0`, `raidz2-1`, ...) and
//! device rows. Row recognition lives in [`classify_row`] so a change in the
//! tool's output format stays local to this file.

use super::{normalize_device_name, Pool, RaidClass, RaidKind};
use log::debug;

/// Kind of one listing row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyRow<'a> {
    ClassHeader(RaidClass),
    GroupHeader { name: &'a str, kind: RaidKind },
    Device(&'a str),
}

/// Classify one row of the listing, `None` for rows carrying no name
pub fn classify_row(line: &str) -> Option<TopologyRow<'_>> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut fields = line.split('\t');
    let first = fields.next().unwrap_or_default();
    let (type_column, name) = match fields.next() {
        Some(name) => (first.trim(), name.trim()),
        None => (first.split(' ').next().unwrap_or_default().trim(), ""),
    };

    if let Some(kind) = RaidKind::from_group_name(name) {
        return Some(TopologyRow::GroupHeader { name, kind });
    }
    if let Some(class) = RaidClass::from_header(type_column) {
        return Some(TopologyRow::ClassHeader(class));
    }
    if name.is_empty() || name == "-" {
        return None;
    }
    Some(TopologyRow::Device(normalize_device_name(name)))
}

/// Parser position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    ExpectClassOrGroup,
    InGroup(usize),
}

/// Build the pool tree from the listing's lines
///
/// A device row before any group header gets its own synthetic stripe group;
/// device rows before any class header belong to the data class.
pub fn parse_topology<'a, I>(pool_name: &str, lines: I) -> Pool
where
    I: IntoIterator<Item = &'a str>,
{
    let mut pool = Pool::new(pool_name);
    let mut class = RaidClass::Data;
    let mut state = ParseState::ExpectClassOrGroup;

    for (i, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if i == 0 && line.split('\t').next().map(str::trim) == Some(pool_name) {
            continue;
        }

        match classify_row(line) {
            Some(TopologyRow::ClassHeader(next)) => {
                class = next;
                state = ParseState::ExpectClassOrGroup;
            }
            Some(TopologyRow::GroupHeader { name, kind }) => {
                state = ParseState::InGroup(pool.add_group(class, name, kind));
            }
            Some(TopologyRow::Device(name)) => {
                let group = match state {
                    ParseState::InGroup(group) => group,
                    ParseState::ExpectClassOrGroup => {
                        let stripes = pool.classes.get(&class).map_or(0, Vec::len);
                        let group = pool.add_group(
                            class,
                            &format!("stripe-{}", stripes),
                            RaidKind::Stripe,
                        );
                        state = ParseState::InGroup(group);
                        group
                    }
                };
                if !pool.add_device(class, group, name) {
                    debug!("Ignoring duplicate device {} in pool {}", name, pool_name);
                }
            }
            None => debug!("Skipping topology row: {:?}", line),
        }
    }

    pool
}
