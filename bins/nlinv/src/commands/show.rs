//! nlinv show command implementation.

use std::io::{self, Write};

use anyhow::Context;
use clap::Args;
use nlmux::inventory::{AddressEntry, Inventory, NetworkRecord};
use nlmux::netlink::types::addr::Scope;

#[derive(Args)]
pub struct ShowCmd {
    /// Interface name.
    dev: Option<String>,
}

impl ShowCmd {
    pub fn run(self, inventory: &Inventory, json: bool) -> anyhow::Result<()> {
        inventory.reload().context("reload inventory")?;

        let records = match &self.dev {
            Some(dev) => vec![inventory.require(dev)?],
            None => inventory.records(),
        };

        let mut stdout = io::stdout().lock();
        if json {
            serde_json::to_writer_pretty(&mut stdout, &records)?;
            writeln!(stdout)?;
        } else {
            for record in &records {
                print_record(&mut stdout, record)?;
            }
        }
        Ok(())
    }
}

/// Render a record the way `ip address show` does.
pub fn print_record<W: Write>(out: &mut W, record: &NetworkRecord) -> io::Result<()> {
    let state = if record.is_up() { "UP" } else { "DOWN" };
    write!(out, "{}: {}: <{}>", record.index(), record.name(), state)?;
    if let Some(mtu) = record.mtu() {
        write!(out, " mtu {}", mtu)?;
    }
    writeln!(out)?;

    if !record.hw_address().is_empty() {
        let kind = if record.is_loopback() { "loopback" } else { "ether" };
        writeln!(out, "    link/{} {}", kind, record.hw_address_string())?;
    }

    for entry in record.ipv4() {
        print_address(out, "inet", entry)?;
    }
    for entry in record.ipv6() {
        print_address(out, "inet6", entry)?;
    }
    Ok(())
}

fn print_address<W: Write>(out: &mut W, family: &str, entry: &AddressEntry) -> io::Result<()> {
    write!(out, "    {} {}", family, entry.prefix())?;
    if let Some(peer) = entry.peer {
        write!(out, " peer {}", peer)?;
    }
    if let Some(brd) = entry.broadcast {
        write!(out, " brd {}", brd)?;
    }
    write!(out, " scope {}", Scope::from(entry.scope).name())?;
    if let Some(label) = &entry.label {
        write!(out, " {}", label)?;
    }
    writeln!(out)
}
