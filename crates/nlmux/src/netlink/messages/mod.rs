//! Strongly-typed netlink message structures.
//!
//! ```ignore
//! use nlmux::netlink::messages::AddressMessage;
//! use nlmux::netlink::parse::FromNetlink;
//!
//! let msg = AddressMessage::from_bytes(payload)?;
//! println!("{:?} on {}", msg.local, msg.ifindex());
//! ```

mod address;
mod link;

pub use address::*;
pub use link::*;
