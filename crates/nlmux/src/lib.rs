//! Poll reactor, netlink request/response transport and interface inventory.
//!
//! The crate is built in three layers:
//!
//! - [`reactor`] - one worker thread per [`Reactor`](reactor::Reactor)
//!   multiplexing non-blocking endpoints (serial lines, stream and datagram
//!   sockets) with `poll(2)`.
//! - [`netlink`] - message framing plus a [`Transport`](netlink::Transport)
//!   that correlates kernel replies by sequence number, reassembles
//!   multi-part dumps and offers a blocking call API.
//! - [`inventory`] - per-interface records populated from link and address
//!   dumps, with address and route mutation.
//!
//! # Features
//!
//! - `serde` - Serialize/Deserialize for configuration and inventory records
//! - `integration` - tests against the running kernel (need `CAP_NET_ADMIN`)
//!
//! # Example
//!
//! ```ignore
//! use nlmux::config::{InventoryConfig, ReactorConfig};
//! use nlmux::inventory::Inventory;
//! use nlmux::reactor::Reactor;
//!
//! fn main() -> nlmux::Result<()> {
//!     let reactor = Reactor::new(ReactorConfig::default())?;
//!     let inventory = Inventory::open(&reactor.handle(), InventoryConfig::default())?;
//!     inventory.reload()?;
//!
//!     for record in inventory.records() {
//!         println!("{}: {} {}", record.index(), record.name(), record.hw_address_string());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Teardown runs top down: drop the inventory, then the transport, then the
//! reactor.

pub mod config;
pub mod error;
pub mod inventory;
pub mod io;
pub mod netlink;
pub mod reactor;

pub use error::{Error, Result};
