//! One-shot SMART listing
//!
//! `zpool iostat -vHPL <pool> -c smart,...` runs the pool tool's SMART scripts
//! once per device. The script columns follow the seven IO columns in a fixed
//! order; the model name comes last and may contain spaces.

use super::command::{CommandRunner, CommandSpec};
use super::pool_io::parse_column;
use crate::error::CollectorError;
use crate::history::lock;
use crate::topology::{normalize_device_name, Pool};
use log::debug;
use std::sync::Mutex;

/// First script column
const FIRST_ATTRIBUTE_COLUMN: usize = 7;

/// Script columns before the model name, in output order
pub const SMART_ATTRIBUTES: [&str; 14] = [
    "health", "realloc", "temp", "ata_err", "rep_ucor", "cmd_to", "pend_sec", "off_ucor",
    "hours_on", "pwr_cyc", "serial", "vendor", "media", "size",
];

pub fn smart_command(zpool: &str, pool: &str) -> CommandSpec {
    CommandSpec::new(
        zpool,
        [
            "iostat",
            "-vHPL",
            pool,
            "-c",
            "smart,smartx,realloc,serial,vendor,media,size,model",
        ],
    )
    .env("ZPOOL_SCRIPTS_AS_ROOT", "yes")
}

/// Apply a SMART listing to the pool tree
///
/// Device rows fill SMART attributes and capacity; raid group rows update
/// capacity only. Unknown names are skipped.
pub fn apply_smart_listing(pool: &mut Pool, listing: &str) {
    for line in listing.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if line.trim().len() <= 3 || tokens.len() < 3 {
            continue;
        }
        let name = normalize_device_name(tokens[0]);
        let (used, free) = (parse_column(tokens[1]), parse_column(tokens[2]));

        if !name.starts_with('/') {
            if let Some(group) = pool.group_mut(name) {
                group.stats.set_capacity(used, free);
            }
            continue;
        }

        let Some(device) = pool.device_mut(name) else {
            debug!("Skipping SMART row for unknown device {}", name);
            continue;
        };
        for (i, attribute) in SMART_ATTRIBUTES.iter().enumerate() {
            if let Some(value) = tokens.get(FIRST_ATTRIBUTE_COLUMN + i) {
                device.smart.set(attribute, value);
            }
        }
        let model_column = FIRST_ATTRIBUTE_COLUMN + SMART_ATTRIBUTES.len();
        let model = tokens.get(model_column..).map(|rest| rest.join(" "));
        device.smart.set("model", model.as_deref().unwrap_or_default());
        device.stats.set_capacity(used, free);
    }
}

/// Run the SMART listing for `pool_name` and apply it to `pool`
pub fn refresh_smart(
    runner: &dyn CommandRunner,
    zpool: &str,
    pool_name: &str,
    pool: &Mutex<Pool>,
) -> Result<(), CollectorError> {
    let listing = runner.run(&smart_command(zpool, pool_name))?;
    apply_smart_listing(&mut lock(pool), &listing);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::command::MockCommandRunner;
    use crate::topology::parse_topology;

    const LISTING: &str = "tank\t2000\t1000\t-\t-\t-\t-
mirror-0\t1990\t1010\t-\t-\t-\t-
/dev/sda-part1\t-\t-\t-\t-\t-\t-\tPASSED\t0\t38\t0\t0\t0\t0\t0\t21000\t45\tZA1\tATA\thdd\t4000787030016\tST4000VN008 IronWolf Pro
/dev/sdb\t-\t-\t-\t-\t-\t-\tPASSED\t0";

    fn pool() -> Pool {
        parse_topology(
            "tank",
            "tank\t-\n\tmirror-0\t-\n\t/dev/sda-part1\t-\n\t/dev/sdb\t-".lines(),
        )
    }

    #[test]
    fn test_listing_fills_attributes_and_model() {
        let mut pool = pool();
        apply_smart_listing(&mut pool, LISTING);

        let sda = pool.device("/dev/sda").unwrap();
        assert_eq!(sda.smart.get("health"), Some("PASSED"));
        assert_eq!(sda.smart.get("temp"), Some("38"));
        assert_eq!(sda.smart.get("hours_on"), Some("21000"));
        assert_eq!(sda.smart.get("serial"), Some("ZA1"));
        assert_eq!(sda.smart.get("size"), Some("4000787030016"));
        assert_eq!(sda.smart.get("model"), Some("ST4000VN008 IronWolf Pro"));

        let sdb = pool.device("/dev/sdb").unwrap();
        assert_eq!(sdb.smart.get("realloc"), Some("0"));
        assert_eq!(sdb.smart.get("temp"), None);
        assert_eq!(sdb.smart.get("model"), Some(""));

        assert_eq!(pool.group("mirror-0").unwrap().stats.used, Some(1990));
    }

    #[test]
    fn test_refresh_smart_uses_runner() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| spec.args.last().map(String::as_str) == Some("smart,smartx,realloc,serial,vendor,media,size,model"))
            .times(1)
            .returning(|_| Ok(LISTING.to_string()));

        let pool = Mutex::new(pool());
        refresh_smart(&runner, "/sbin/zpool", "tank", &pool).unwrap();
        assert_eq!(lock(&pool).device("/dev/sda").unwrap().smart.get("vendor"), Some("ATA"));
    }

    #[test]
    fn test_refresh_smart_propagates_failure() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|spec| {
            Err(CollectorError::CommandFailed {
                command: spec.to_string(),
                status: "exit status: 1".to_string(),
            })
        });
        let pool = Mutex::new(pool());
        assert!(refresh_smart(&runner, "zpool", "tank", &pool).is_err());
    }
}
