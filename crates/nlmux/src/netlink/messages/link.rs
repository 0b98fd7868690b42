//! Strongly-typed link message.

use crate::netlink::parse::{FromNetlink, PResult, cut, parse_attrs, parse_fixed, parse_string_from_bytes};
use crate::netlink::types::link::{IfInfoMsg, ifla, iff};

/// Link message with the attributes the inventory keeps.
#[derive(Debug, Clone, Default)]
pub struct LinkMessage {
    /// Fixed-size header.
    pub header: IfInfoMsg,
    /// Interface name (IFLA_IFNAME).
    pub name: Option<String>,
    /// Hardware address (IFLA_ADDRESS).
    pub address: Option<Vec<u8>>,
    /// MTU (IFLA_MTU).
    pub mtu: Option<u32>,
}

impl LinkMessage {
    /// Get the interface index.
    pub fn ifindex(&self) -> u32 {
        self.header.ifi_index as u32
    }

    /// Check if the interface is administratively up.
    pub fn is_up(&self) -> bool {
        self.header.ifi_flags & iff::UP != 0
    }

    /// Check if this is the loopback interface.
    pub fn is_loopback(&self) -> bool {
        self.header.ifi_flags & iff::LOOPBACK != 0
    }
}

impl FromNetlink for LinkMessage {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header_bytes = parse_fixed(input, IfInfoMsg::SIZE)?;
        let Ok(header) = IfInfoMsg::from_bytes(header_bytes) else {
            return cut();
        };

        let mut msg = LinkMessage {
            header: *header,
            ..Default::default()
        };

        for (attr_type, data) in parse_attrs(input)? {
            match attr_type {
                ifla::IFNAME => msg.name = Some(parse_string_from_bytes(data)),
                ifla::ADDRESS => msg.address = Some(data.to_vec()),
                ifla::MTU => {
                    if let Ok(bytes) = <[u8; 4]>::try_from(data) {
                        msg.mtu = Some(u32::from_ne_bytes(bytes));
                    }
                }
                _ => {}
            }
        }

        Ok(msg)
    }
}
