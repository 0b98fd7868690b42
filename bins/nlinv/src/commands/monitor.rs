//! nlinv monitor command implementation.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use nlmux::inventory::{Inventory, NetworkRecord, Prefix};

const TICK: Duration = Duration::from_millis(200);

#[derive(Args)]
pub struct MonitorCmd {
    /// Stop after this many seconds (0 runs until interrupted).
    #[arg(long, short, default_value_t = 0)]
    seconds: u64,
}

/// What `monitor` compares between ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    name: String,
    up: bool,
    addresses: Vec<Prefix>,
}

impl From<&NetworkRecord> for Snapshot {
    fn from(record: &NetworkRecord) -> Self {
        Self {
            name: record.name().to_string(),
            up: record.is_up(),
            addresses: record.addresses().map(|e| e.prefix()).collect(),
        }
    }
}

impl MonitorCmd {
    pub fn run(self, inventory: &Inventory, json: bool) -> anyhow::Result<()> {
        inventory.reload().context("reload inventory")?;

        let deadline =
            (self.seconds > 0).then(|| Instant::now() + Duration::from_secs(self.seconds));
        let mut seen = snapshot(inventory);
        let mut stdout = io::stdout().lock();

        while deadline.is_none_or(|d| Instant::now() < d) {
            thread::sleep(TICK);

            if !inventory.is_complete() {
                tracing::warn!("notifications were lost, reloading");
                inventory.reload().context("reload inventory")?;
            }

            let current = snapshot(inventory);
            for (index, now) in &current {
                if seen.get(index) == Some(now) {
                    continue;
                }
                let record = match inventory.get(*index) {
                    Some(record) => record,
                    None => continue,
                };
                if json {
                    serde_json::to_writer(&mut stdout, &record)?;
                    writeln!(stdout)?;
                } else {
                    super::show::print_record(&mut stdout, &record)?;
                }
            }
            stdout.flush()?;
            seen = current;
        }
        Ok(())
    }
}

fn snapshot(inventory: &Inventory) -> BTreeMap<u32, Snapshot> {
    inventory
        .records()
        .iter()
        .map(|r| (r.index(), Snapshot::from(r)))
        .collect()
}
