//! Device utilization and temperature report
//!
//! Reads `zpool iostat -vHPL -c iostat-10s,temp <pool> <secs>`. The two script
//! columns are appended after the latency columns, so utilization is always the
//! second to last token and temperature the last one.

use super::command::CommandSpec;
use super::stream::LineHandler;
use crate::history::lock;
use crate::topology::{normalize_device_name, Pool};
use log::debug;
use std::sync::{Arc, Mutex};

/// Minimum tokens for a row to carry a utilization column
const MIN_UTIL_TOKENS: usize = 10;

pub fn utilization_command(zpool: &str, pool: &str, interval_secs: u64) -> CommandSpec {
    CommandSpec::new(
        zpool,
        [
            "iostat",
            "-vHPL",
            "-c",
            "iostat-10s,temp",
            pool,
            &interval_secs.to_string(),
        ],
    )
    .env("ZPOOL_SCRIPTS_AS_ROOT", "yes")
}

/// Writes per-device utilization and temperature into the pool tree
pub struct UtilizationHandler {
    pool: Arc<Mutex<Pool>>,
}

impl UtilizationHandler {
    pub fn new(pool: Arc<Mutex<Pool>>) -> Self {
        Self { pool }
    }
}

impl LineHandler for UtilizationHandler {
    fn handle_line(&mut self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            return;
        };
        if !first.starts_with('/') || tokens.len() < 2 {
            return;
        }

        let name = normalize_device_name(first);
        let mut pool = lock(&self.pool);
        let Some(device) = pool.device_mut(name) else {
            debug!("Skipping utilization row for unknown device {}", name);
            return;
        };

        if tokens.len() >= MIN_UTIL_TOKENS {
            device.stats.utilization = tokens[tokens.len() - 2].parse().ok();
        }
        device.smart.set("temp", tokens[tokens.len() - 1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::parse_topology;

    fn handler() -> (UtilizationHandler, Arc<Mutex<Pool>>) {
        let pool = parse_topology("tank", "tank\t-\n\tmirror-0\t-\n\t/dev/sda-part1\t-\n\t/dev/sdb\t-".lines());
        let pool = Arc::new(Mutex::new(pool));
        (UtilizationHandler::new(Arc::clone(&pool)), pool)
    }

    #[test]
    fn test_device_rows_update_util_and_temp() {
        let (mut handler, pool) = handler();
        handler.handle_line("tank\t100\t100\t1\t2\t3\t4\t5\t6\t7\t8\t9\t10\t11\t12\t-\t-\t-\t-");
        handler.handle_line("mirror-0\t100\t100\t1\t2\t3\t4\t5\t6\t7\t8\t9\t10\t11\t12\t-\t-\t-\t-");
        handler.handle_line("/dev/sda-part1\t-\t-\t1\t2\t3\t4\t5\t6\t7\t8\t9\t10\t11\t12\t-\t-\t12.50\t38");
        handler.handle_line("/dev/sdb\t-\t-\t1\t2\t3\t4\t5\t6\t7\t8\t9\t10\t11\t12\t-\t-\t-\t41");

        let pool = lock(&pool);
        let sda = pool.device("/dev/sda").unwrap();
        assert_eq!(sda.stats.utilization, Some(12.5));
        assert_eq!(sda.smart.get("temp"), Some("38"));

        let sdb = pool.device("/dev/sdb").unwrap();
        assert_eq!(sdb.stats.utilization, None);
        assert_eq!(sdb.smart.get("temp"), Some("41"));
    }

    #[test]
    fn test_short_rows_update_temperature_only() {
        let (mut handler, pool) = handler();
        handler.handle_line("/dev/sdb\t-\t-\t33");
        handler.handle_line("/dev/missing\t-\t-\t1\t2\t3\t4\t5\t6\t7\t8\t40");
        handler.handle_line("");

        let pool = lock(&pool);
        let sdb = pool.device("/dev/sdb").unwrap();
        assert_eq!(sdb.stats.utilization, None);
        assert_eq!(sdb.smart.get("temp"), Some("33"));
    }

    #[test]
    fn test_command() {
        assert_eq!(
            utilization_command("zpool", "tank", 10).to_string(),
            "zpool iostat -vHPL -c iostat-10s,temp tank 10"
        );
    }
}
