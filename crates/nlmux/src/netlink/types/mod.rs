//! Fixed-size kernel headers that follow the netlink header.

pub mod addr;
pub mod link;
pub mod route;

/// Address families.
pub const AF_UNSPEC: u8 = 0;
pub const AF_INET: u8 = 2;
pub const AF_INET6: u8 = 10;
