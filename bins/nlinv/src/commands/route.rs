//! nlinv route command implementation.

use std::net::IpAddr;

use anyhow::Context;
use clap::{Args, Subcommand};
use nlmux::inventory::{Inventory, Prefix};

#[derive(Args)]
pub struct RouteCmd {
    #[command(subcommand)]
    action: RouteAction,
}

#[derive(Args)]
struct RouteSpec {
    /// Destination network (e.g., 10.0.0.0/8 or 0.0.0.0/0).
    network: Prefix,

    /// Gateway address.
    #[arg(long)]
    via: IpAddr,

    /// Device name.
    #[arg(long, short)]
    dev: String,
}

#[derive(Subcommand)]
enum RouteAction {
    /// Add a route through a gateway.
    Add(RouteSpec),

    /// Delete a route through a gateway.
    Del(RouteSpec),
}

impl RouteCmd {
    pub fn run(self, inventory: &Inventory) -> anyhow::Result<()> {
        inventory.reload().context("reload inventory")?;

        match self.action {
            RouteAction::Add(spec) => {
                inventory.require(&spec.dev)?.gateway(spec.network, spec.via)?;
            }
            RouteAction::Del(spec) => {
                inventory
                    .require(&spec.dev)?
                    .remove_gateway(spec.network, spec.via)?;
            }
        }
        Ok(())
    }
}
