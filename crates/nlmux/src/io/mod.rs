//! Concrete [`Link`](crate::reactor::Link) implementations.
//!
//! Sockets from `std` and `netlink-sys` implement `Link` directly;
//! [`SerialPort`] wraps a termios character device.

mod serial;
mod socket;

pub use serial::SerialPort;
