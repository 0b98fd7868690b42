//! nlinv addr command implementation.

use anyhow::Context;
use clap::{Args, Subcommand};
use nlmux::inventory::{Inventory, Prefix};

#[derive(Args)]
pub struct AddrCmd {
    #[command(subcommand)]
    action: AddrAction,
}

#[derive(Subcommand)]
enum AddrAction {
    /// Add an address.
    Add {
        /// Address with prefix (e.g., 192.168.1.1/24).
        address: Prefix,

        /// Device name.
        #[arg(long, short)]
        dev: String,
    },

    /// Delete an address.
    Del {
        /// Address with prefix.
        address: Prefix,

        /// Device name.
        #[arg(long, short)]
        dev: String,
    },
}

impl AddrCmd {
    pub fn run(self, inventory: &Inventory) -> anyhow::Result<()> {
        inventory.reload().context("reload inventory")?;

        match self.action {
            AddrAction::Add { address, dev } => {
                inventory.require(&dev)?.add(address)?;
            }
            AddrAction::Del { address, dev } => {
                inventory.require(&dev)?.delete(address)?;
            }
        }
        Ok(())
    }
}
