//! Kernel netlink socket setup.
//!
//! The socket is handed to the reactor as a datagram [`Link`](crate::reactor::Link);
//! the `Link` impl lives in [`crate::io`].

use netlink_sys::{Socket, SocketAddr, protocols};

use crate::error::Result;

/// Netlink protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Protocol {
    /// Routing/device hook (ip, tc, etc.)
    #[default]
    Route,
    /// Generic netlink
    Generic,
    /// Netfilter
    Netfilter,
    /// Kernel connector
    Connector,
    /// Kobject uevent
    KobjectUevent,
}

impl Protocol {
    fn as_isize(self) -> isize {
        match self {
            Protocol::Route => protocols::NETLINK_ROUTE,
            Protocol::Generic => protocols::NETLINK_GENERIC,
            Protocol::Netfilter => protocols::NETLINK_NETFILTER,
            Protocol::Connector => protocols::NETLINK_CONNECTOR,
            Protocol::KobjectUevent => protocols::NETLINK_KOBJECT_UEVENT,
        }
    }
}

/// Open a non-blocking netlink socket bound to a kernel-assigned port and
/// subscribed to `groups`.
pub fn open(protocol: Protocol, groups: &[u32]) -> Result<Socket> {
    let mut socket = Socket::new(protocol.as_isize())?;
    socket.set_non_blocking(true)?;

    let mut addr = SocketAddr::new(0, 0);
    socket.bind(&addr)?;
    socket.get_address(&mut addr)?;

    // Extended ACK is optional on older kernels.
    socket.set_ext_ack(true).ok();

    for &group in groups {
        socket.add_membership(group)?;
    }

    tracing::debug!(
        ?protocol,
        pid = addr.port_number(),
        ?groups,
        "netlink socket bound"
    );
    Ok(socket)
}

/// Multicast groups for rtnetlink.
pub mod rtnetlink_groups {
    pub const RTNLGRP_LINK: u32 = 1;
    pub const RTNLGRP_NOTIFY: u32 = 2;
    pub const RTNLGRP_NEIGH: u32 = 3;
    pub const RTNLGRP_IPV4_IFADDR: u32 = 5;
    pub const RTNLGRP_IPV4_ROUTE: u32 = 7;
    pub const RTNLGRP_IPV6_IFADDR: u32 = 9;
    pub const RTNLGRP_IPV6_ROUTE: u32 = 11;
}
