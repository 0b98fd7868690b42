//! Strongly-typed address message.

use std::net::IpAddr;

use crate::netlink::parse::{
    FromNetlink, PResult, cut, parse_attrs, parse_fixed, parse_ip_addr, parse_string_from_bytes,
};
use crate::netlink::types::addr::{IfAddrMsg, Scope, ifa};

/// Address message with all inventory-relevant attributes parsed.
///
/// Each address attribute carries its own length, so an IPv4 and an IPv6
/// value can be told apart without consulting the header family.
#[derive(Debug, Clone, Default)]
pub struct AddressMessage {
    /// Fixed-size header.
    pub header: IfAddrMsg,
    /// Address (IFA_ADDRESS); the peer on point-to-point links.
    pub address: Option<IpAddr>,
    /// Local address (IFA_LOCAL).
    pub local: Option<IpAddr>,
    /// Interface label (IFA_LABEL).
    pub label: Option<String>,
    /// Broadcast address (IFA_BROADCAST).
    pub broadcast: Option<IpAddr>,
    /// Anycast address (IFA_ANYCAST).
    pub anycast: Option<IpAddr>,
    /// Multicast address (IFA_MULTICAST).
    pub multicast: Option<IpAddr>,
}

impl AddressMessage {
    /// Get the prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.header.ifa_prefixlen
    }

    /// Get the interface index.
    pub fn ifindex(&self) -> u32 {
        self.header.ifa_index
    }

    /// Get the scope.
    pub fn scope(&self) -> Scope {
        Scope::from(self.header.ifa_scope)
    }

    /// Get the primary address (local or address).
    pub fn primary_address(&self) -> Option<&IpAddr> {
        self.local.as_ref().or(self.address.as_ref())
    }

    /// The point-to-point peer, when it differs from the local address.
    pub fn peer(&self) -> Option<&IpAddr> {
        match (&self.local, &self.address) {
            (Some(local), Some(address)) if local != address => Some(address),
            _ => None,
        }
    }
}

impl FromNetlink for AddressMessage {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let header_bytes = parse_fixed(input, IfAddrMsg::SIZE)?;
        let Ok(header) = IfAddrMsg::from_bytes(header_bytes) else {
            return cut();
        };

        let mut msg = AddressMessage {
            header: *header,
            ..Default::default()
        };

        for (attr_type, data) in parse_attrs(input)? {
            match attr_type {
                ifa::ADDRESS => msg.address = parse_ip_addr(data).ok(),
                ifa::LOCAL => msg.local = parse_ip_addr(data).ok(),
                ifa::LABEL => msg.label = Some(parse_string_from_bytes(data)),
                ifa::BROADCAST => msg.broadcast = parse_ip_addr(data).ok(),
                ifa::ANYCAST => msg.anycast = parse_ip_addr(data).ok(),
                ifa::MULTICAST => msg.multicast = parse_ip_addr(data).ok(),
                _ => {}
            }
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;
    use crate::netlink::builder::MessageBuilder;
    use crate::netlink::message::{NLMSG_HDRLEN, NlMsgType};
    use crate::netlink::types::AF_INET;

    #[test]
    fn test_parse_point_to_point() {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWADDR, 0);
        builder.append(&IfAddrMsg::new().with_family(AF_INET).with_prefixlen(32).with_index(5));
        builder.append_attr(ifa::ADDRESS, &[10, 0, 0, 2]);
        builder.append_attr(ifa::LOCAL, &[10, 0, 0, 1]);
        builder.append_attr_str(ifa::LABEL, "ppp0");
        builder.append_attr(ifa::CACHEINFO, &[0u8; 16]);
        let frame = builder.finish();

        let msg = AddressMessage::from_bytes(&frame[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(msg.ifindex(), 5);
        assert_eq!(msg.prefix_len(), 32);
        assert_eq!(msg.primary_address(), Some(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(msg.peer(), Some(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        assert_eq!(msg.label.as_deref(), Some("ppp0"));
    }

    #[test]
    fn test_length_selects_family() {
        let v6: Ipv6Addr = "ff02::1".parse().unwrap();
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWADDR, 0);
        builder.append(&IfAddrMsg::new().with_index(1));
        builder.append_attr(ifa::MULTICAST, &v6.octets());
        builder.append_attr(ifa::ANYCAST, &[1, 2, 3]);
        let frame = builder.finish();

        let msg = AddressMessage::from_bytes(&frame[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(msg.multicast, Some(IpAddr::V6(v6)));
        assert_eq!(msg.anycast, None);
        assert_eq!(msg.peer(), None);
    }
}
