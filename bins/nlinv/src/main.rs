//! nlinv command - interface inventory, addresses and routes.

mod commands;

use std::time::Duration;

use clap::{Parser, Subcommand};
use nlmux::config::{InventoryConfig, ReactorConfig};
use nlmux::inventory::Inventory;
use nlmux::reactor::Reactor;

#[derive(Parser)]
#[command(name = "nlinv", version, about = "Network interface inventory tool")]
struct Cli {
    /// Output JSON.
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show interfaces and their addresses.
    #[command(visible_alias = "s")]
    Show(commands::show::ShowCmd),

    /// Add or delete an address.
    #[command(visible_alias = "a", visible_alias = "address")]
    Addr(commands::addr::AddrCmd),

    /// Add or delete a gateway route.
    #[command(visible_alias = "r")]
    Route(commands::route::RouteCmd),

    /// Print link and address changes as they happen.
    #[command(visible_alias = "m", visible_alias = "mon")]
    Monitor(commands::monitor::MonitorCmd),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let reactor = Reactor::new(ReactorConfig::default())?;
    let config = InventoryConfig::default()
        .timeout(Duration::from_millis(cli.timeout_ms))
        .monitor(matches!(cli.command, Command::Monitor(_)));
    let inventory = Inventory::open(&reactor.handle(), config)?;

    let result = match cli.command {
        Command::Show(cmd) => cmd.run(&inventory, cli.json),
        Command::Addr(cmd) => cmd.run(&inventory),
        Command::Route(cmd) => cmd.run(&inventory),
        Command::Monitor(cmd) => cmd.run(&inventory, cli.json),
    };

    // Inventory before reactor.
    drop(inventory);
    drop(reactor);

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
