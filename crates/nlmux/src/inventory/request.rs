//! Typed rtnetlink requests issued by the inventory.

use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;

use super::Prefix;
use crate::error::{Error, Result};
use crate::netlink::types::addr::{IfAddrMsg, ifa};
use crate::netlink::types::link::IfInfoMsg;
use crate::netlink::types::route::{RT_SCOPE_NOWHERE, RtMsg, rta};
use crate::netlink::types::{AF_INET, AF_INET6};
use crate::netlink::{
    MessageBuilder, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST,
    NlMsgHdr, NlMsgType, Request, Response,
};

fn family(address: &IpAddr) -> u8 {
    if address.is_ipv4() { AF_INET } else { AF_INET6 }
}

/// `RTM_GETLINK` dump of every interface.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkDump;

impl Request for LinkDump {
    fn msg_type(&self) -> u16 {
        NlMsgType::RTM_GETLINK
    }

    fn flags(&self) -> u16 {
        NLM_F_REQUEST | NLM_F_DUMP
    }

    fn write_payload(&self, builder: &mut MessageBuilder) -> Result<()> {
        builder.append(&IfInfoMsg::new());
        Ok(())
    }
}

/// `RTM_GETADDR` dump of one address family.
#[derive(Debug, Clone, Copy)]
pub struct AddressDump {
    family: u8,
}

impl AddressDump {
    /// IPv4 addresses.
    pub fn ipv4() -> Self {
        Self { family: AF_INET }
    }

    /// IPv6 addresses.
    pub fn ipv6() -> Self {
        Self { family: AF_INET6 }
    }
}

impl Request for AddressDump {
    fn msg_type(&self) -> u16 {
        NlMsgType::RTM_GETADDR
    }

    fn flags(&self) -> u16 {
        NLM_F_REQUEST | NLM_F_DUMP
    }

    fn write_payload(&self, builder: &mut MessageBuilder) -> Result<()> {
        builder.append(&IfAddrMsg::new().with_family(self.family));
        Ok(())
    }
}

/// `RTM_NEWADDR` / `RTM_DELADDR` for one address on one interface.
#[derive(Debug, Clone, Copy)]
pub struct AddressRequest {
    msg_type: u16,
    index: u32,
    prefix: Prefix,
}

impl AddressRequest {
    /// Add `prefix` to interface `index`; fails if it already exists.
    pub fn add(index: u32, prefix: Prefix) -> Self {
        Self {
            msg_type: NlMsgType::RTM_NEWADDR,
            index,
            prefix,
        }
    }

    /// Remove `prefix` from interface `index`.
    pub fn delete(index: u32, prefix: Prefix) -> Self {
        Self {
            msg_type: NlMsgType::RTM_DELADDR,
            index,
            prefix,
        }
    }

    fn broadcast(&self) -> Option<Ipv4Addr> {
        match self.prefix.address {
            // /31 and /32 have no broadcast address.
            IpAddr::V4(v4) if self.prefix.len < 31 => {
                let host_mask = u32::MAX >> self.prefix.len;
                Some(Ipv4Addr::from(u32::from(v4) | host_mask))
            }
            _ => None,
        }
    }
}

impl Request for AddressRequest {
    fn msg_type(&self) -> u16 {
        self.msg_type
    }

    fn flags(&self) -> u16 {
        if self.msg_type == NlMsgType::RTM_NEWADDR {
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL
        } else {
            NLM_F_REQUEST | NLM_F_ACK
        }
    }

    fn write_payload(&self, builder: &mut MessageBuilder) -> Result<()> {
        let address = &self.prefix.address;
        let header = IfAddrMsg::new()
            .with_family(family(address))
            .with_prefixlen(self.prefix.len)
            .with_index(self.index);
        builder.append(&header);

        builder.append_attr_ip(ifa::LOCAL, address);
        builder.append_attr_ip(ifa::ADDRESS, address);
        if self.msg_type == NlMsgType::RTM_NEWADDR
            && let Some(broadcast) = self.broadcast()
        {
            builder.append_attr(ifa::BROADCAST, &broadcast.octets());
        }
        Ok(())
    }
}

/// `RTM_NEWROUTE` / `RTM_DELROUTE` for a static unicast route via a gateway.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest {
    msg_type: u16,
    index: u32,
    network: Prefix,
    gateway: IpAddr,
}

impl RouteRequest {
    /// Route `network` via `gateway` out of interface `index`, replacing any
    /// existing route to the same destination.
    pub fn add(index: u32, network: Prefix, gateway: IpAddr) -> Result<Self> {
        Self::new(NlMsgType::RTM_NEWROUTE, index, network, gateway)
    }

    /// Remove the route to `network` via `gateway`.
    pub fn delete(index: u32, network: Prefix, gateway: IpAddr) -> Result<Self> {
        Self::new(NlMsgType::RTM_DELROUTE, index, network, gateway)
    }

    fn new(msg_type: u16, index: u32, network: Prefix, gateway: IpAddr) -> Result<Self> {
        if network.is_ipv4() != gateway.is_ipv4() {
            return Err(Error::InvalidAttribute(format!(
                "gateway {} does not match the family of {}",
                gateway, network
            )));
        }
        Ok(Self {
            msg_type,
            index,
            network,
            gateway,
        })
    }
}

impl Request for RouteRequest {
    fn msg_type(&self) -> u16 {
        self.msg_type
    }

    fn flags(&self) -> u16 {
        if self.msg_type == NlMsgType::RTM_NEWROUTE {
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE
        } else {
            NLM_F_REQUEST | NLM_F_ACK
        }
    }

    fn write_payload(&self, builder: &mut MessageBuilder) -> Result<()> {
        let mut header = RtMsg::unicast(family(&self.network.address), self.network.len);
        if self.msg_type == NlMsgType::RTM_DELROUTE {
            header = header.with_scope(RT_SCOPE_NOWHERE);
        }
        builder.append(&header);

        if !self.network.is_default() {
            builder.append_attr_ip(rta::DST, &self.network.address);
        }
        builder.append_attr_ip(rta::GATEWAY, &self.gateway);
        builder.append_attr_u32(rta::OIF, self.index);
        Ok(())
    }
}

/// One reply frame kept for later application.
#[derive(Debug, Clone)]
pub(crate) struct Captured {
    pub header: NlMsgHdr,
    pub payload: Bytes,
}

/// Dump decoder that keeps every frame of one message type.
///
/// Frames are applied to records after the exchange returns, on the calling
/// thread, so the decoder never touches the inventory lock.
#[derive(Debug)]
pub(crate) struct Capture {
    msg_type: u16,
    pub frames: Vec<Captured>,
}

impl Capture {
    pub fn new(msg_type: u16) -> Self {
        Self {
            msg_type,
            frames: Vec::new(),
        }
    }
}

impl Response for Capture {
    fn on_message(&mut self, header: &NlMsgHdr, payload: &[u8]) -> Result<()> {
        if header.nlmsg_type == self.msg_type {
            self.frames.push(Captured {
                header: *header,
                payload: Bytes::copy_from_slice(payload),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::AttrIter;
    use crate::netlink::{NLMSG_HDRLEN, encode};

    fn attrs(frame: &[u8], header_len: usize) -> Vec<(u16, Vec<u8>)> {
        AttrIter::new(&frame[NLMSG_HDRLEN + header_len..])
            .map(|(kind, data)| (kind, data.to_vec()))
            .collect()
    }

    #[test]
    fn test_address_add_encoding() {
        let prefix: Prefix = "192.0.2.10/24".parse().unwrap();
        let frame = encode(&AddressRequest::add(3, prefix), 42).unwrap();

        let header = NlMsgHdr::from_bytes(&frame).unwrap();
        assert_eq!(header.nlmsg_type, NlMsgType::RTM_NEWADDR);
        assert_eq!(
            header.nlmsg_flags,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL
        );
        assert_eq!(header.nlmsg_seq, 42);

        let ifa = IfAddrMsg::from_bytes(&frame[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(ifa.ifa_family, AF_INET);
        assert_eq!(ifa.ifa_prefixlen, 24);
        assert_eq!(ifa.ifa_index, 3);

        let attrs = attrs(&frame, IfAddrMsg::SIZE);
        assert_eq!(
            attrs,
            vec![
                (ifa::LOCAL, vec![192, 0, 2, 10]),
                (ifa::ADDRESS, vec![192, 0, 2, 10]),
                (ifa::BROADCAST, vec![192, 0, 2, 255]),
            ]
        );
    }

    #[test]
    fn test_address_delete_ipv6_encoding() {
        let prefix: Prefix = "2001:db8::5/64".parse().unwrap();
        let frame = encode(&AddressRequest::delete(7, prefix), 1).unwrap();

        let header = NlMsgHdr::from_bytes(&frame).unwrap();
        assert_eq!(header.nlmsg_type, NlMsgType::RTM_DELADDR);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);

        let ifa = IfAddrMsg::from_bytes(&frame[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(ifa.ifa_family, AF_INET6);
        let attrs = attrs(&frame, IfAddrMsg::SIZE);
        assert_eq!(attrs.len(), 2);
        assert!(attrs.iter().all(|(_, data)| data.len() == 16));
    }

    #[test]
    fn test_route_encoding() {
        let network: Prefix = "10.1.0.0/16".parse().unwrap();
        let gateway: IpAddr = "192.0.2.1".parse().unwrap();
        let frame = encode(&RouteRequest::add(2, network, gateway).unwrap(), 9).unwrap();

        let header = NlMsgHdr::from_bytes(&frame).unwrap();
        assert_eq!(header.nlmsg_type, NlMsgType::RTM_NEWROUTE);
        assert_eq!(
            header.nlmsg_flags,
            NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE
        );

        let attrs = attrs(&frame, RtMsg::SIZE);
        assert_eq!(
            attrs,
            vec![
                (rta::DST, vec![10, 1, 0, 0]),
                (rta::GATEWAY, vec![192, 0, 2, 1]),
                (rta::OIF, 2u32.to_ne_bytes().to_vec()),
            ]
        );
    }

    #[test]
    fn test_default_route_omits_destination() {
        let network: Prefix = "0.0.0.0/0".parse().unwrap();
        let request = RouteRequest::delete(2, network, "192.0.2.1".parse().unwrap()).unwrap();
        let frame = encode(&request, 1).unwrap();
        let kinds: Vec<u16> = attrs(&frame, RtMsg::SIZE).into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![rta::GATEWAY, rta::OIF]);
    }

    #[test]
    fn test_route_rejects_mixed_families() {
        let network: Prefix = "10.0.0.0/8".parse().unwrap();
        assert!(RouteRequest::add(1, network, "fe80::1".parse().unwrap()).is_err());
    }

    #[test]
    fn test_capture_filters_by_type() {
        let mut capture = Capture::new(NlMsgType::RTM_NEWLINK);
        capture
            .on_message(&NlMsgHdr::new(NlMsgType::RTM_NEWLINK, 0), &[1, 2])
            .unwrap();
        capture
            .on_message(&NlMsgHdr::new(NlMsgType::ERROR, 0), &[0; 20])
            .unwrap();
        assert_eq!(capture.frames.len(), 1);
        assert_eq!(&capture.frames[0].payload[..], &[1, 2]);
    }
}
