//! Per-interface record kept by the inventory.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::Prefix;
use super::request::{AddressRequest, RouteRequest};
use crate::error::{Error, Result};
use crate::netlink::messages::{AddressMessage, LinkMessage};
use crate::netlink::parse::{FromNetlink, format_hw_addr};
use crate::netlink::types::link::iff;
use crate::netlink::{Message, NlMsgHdr, NlMsgType, Request, Transport};

/// One address assigned to an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AddressEntry {
    /// Local address.
    pub address: IpAddr,
    /// Prefix length.
    pub prefix_len: u8,
    /// Remote end of a point-to-point link.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub peer: Option<IpAddr>,
    /// Broadcast address.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub broadcast: Option<IpAddr>,
    /// Anycast address.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub anycast: Option<IpAddr>,
    /// Multicast address.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub multicast: Option<IpAddr>,
    /// Interface label (IPv4 aliases).
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub label: Option<String>,
    /// Address scope (RT_SCOPE_*).
    pub scope: u8,
}

impl AddressEntry {
    fn from_message(msg: &AddressMessage) -> Option<Self> {
        Some(Self {
            address: *msg.primary_address()?,
            prefix_len: msg.prefix_len(),
            peer: msg.peer().copied(),
            broadcast: msg.broadcast,
            anycast: msg.anycast,
            multicast: msg.multicast,
            label: msg.label.clone(),
            scope: msg.header.ifa_scope,
        })
    }

    /// The address with its prefix length.
    pub fn prefix(&self) -> Prefix {
        Prefix {
            address: self.address,
            len: self.prefix_len,
        }
    }

    fn same_address(&self, other: &Self) -> bool {
        self.address == other.address && self.prefix_len == other.prefix_len
    }
}

/// Accumulated state of one interface, keyed by its index.
///
/// Created from a link dump reply and updated in place by every later reply
/// or notification for the same index. Mutations go straight to the kernel
/// through the shared transport and do not touch the record.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NetworkRecord {
    index: u32,
    name: String,
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_hw_address"))]
    hw_address: Vec<u8>,
    mtu: Option<u32>,
    flags: u32,
    ipv4: Vec<AddressEntry>,
    ipv6: Vec<AddressEntry>,
    #[cfg_attr(feature = "serde", serde(skip))]
    transport: Arc<Transport>,
    #[cfg_attr(feature = "serde", serde(skip))]
    timeout: Option<Duration>,
}

#[cfg(feature = "serde")]
fn serialize_hw_address<S: serde::Serializer>(addr: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_hw_addr(addr))
}

impl NetworkRecord {
    pub(crate) fn new(index: u32, transport: Arc<Transport>, timeout: Option<Duration>) -> Self {
        Self {
            index,
            name: String::new(),
            hw_address: Vec::new(),
            mtu: None,
            flags: 0,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            transport,
            timeout,
        }
    }

    /// Apply one reply or notification frame.
    ///
    /// Link frames refresh the name, hardware address, MTU and flags.
    /// Address frames add or replace an entry; `RTM_DELADDR` removes it.
    /// Each address attribute's length decides between IPv4 and IPv6.
    /// Frames of other types are ignored.
    pub fn update(&mut self, header: &NlMsgHdr, payload: &[u8]) -> Result<()> {
        match header.nlmsg_type {
            NlMsgType::RTM_NEWLINK => {
                let link = LinkMessage::from_bytes(payload)?;
                self.check_index(link.ifindex())?;
                if let Some(name) = link.name {
                    self.name = name;
                }
                if let Some(address) = link.address {
                    self.hw_address = address;
                }
                if link.mtu.is_some() {
                    self.mtu = link.mtu;
                }
                self.flags = link.header.ifi_flags;
            }
            NlMsgType::RTM_NEWADDR | NlMsgType::RTM_DELADDR => {
                let msg = AddressMessage::from_bytes(payload)?;
                self.check_index(msg.ifindex())?;
                let Some(entry) = AddressEntry::from_message(&msg) else {
                    tracing::trace!(ifindex = self.index, "address frame without address");
                    return Ok(());
                };
                let list = if entry.address.is_ipv4() {
                    &mut self.ipv4
                } else {
                    &mut self.ipv6
                };
                let existing = list.iter().position(|e| e.same_address(&entry));
                match (header.nlmsg_type, existing) {
                    (NlMsgType::RTM_DELADDR, Some(i)) => {
                        list.remove(i);
                    }
                    (NlMsgType::RTM_DELADDR, None) => {}
                    (_, Some(i)) => list[i] = entry,
                    (_, None) => list.push(entry),
                }
            }
            other => {
                tracing::trace!(ifindex = self.index, msg_type = other, "frame ignored");
            }
        }
        Ok(())
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index != self.index {
            return Err(Error::InvalidMessage(format!(
                "frame for interface {} applied to record {}",
                index, self.index
            )));
        }
        Ok(())
    }

    /// Interface index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Interface name (empty until a link frame named it).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hardware address bytes.
    pub fn hw_address(&self) -> &[u8] {
        &self.hw_address
    }

    /// Hardware address as colon-separated hex.
    pub fn hw_address_string(&self) -> String {
        format_hw_addr(&self.hw_address)
    }

    /// MTU, if reported.
    pub fn mtu(&self) -> Option<u32> {
        self.mtu
    }

    /// Interface flags (IFF_*).
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Check if the interface is administratively up.
    pub fn is_up(&self) -> bool {
        self.flags & iff::UP != 0
    }

    /// Check if this is the loopback interface.
    pub fn is_loopback(&self) -> bool {
        self.flags & iff::LOOPBACK != 0
    }

    /// IPv4 addresses in the order the kernel reported them.
    pub fn ipv4(&self) -> &[AddressEntry] {
        &self.ipv4
    }

    /// IPv6 addresses in the order the kernel reported them.
    pub fn ipv6(&self) -> &[AddressEntry] {
        &self.ipv6
    }

    /// All addresses, IPv4 first.
    pub fn addresses(&self) -> impl Iterator<Item = &AddressEntry> {
        self.ipv4.iter().chain(self.ipv6.iter())
    }

    /// Assign `address` to this interface.
    pub fn add(&self, address: Prefix) -> Result<()> {
        self.mutate(&AddressRequest::add(self.index, address), "add address")
    }

    /// Remove `address` from this interface.
    pub fn delete(&self, address: Prefix) -> Result<()> {
        self.mutate(&AddressRequest::delete(self.index, address), "delete address")
    }

    /// Route `network` via `gateway` out of this interface.
    pub fn gateway(&self, network: Prefix, gateway: IpAddr) -> Result<()> {
        let request = RouteRequest::add(self.index, network, gateway)?;
        self.mutate(&request, "add route")
    }

    /// Remove the route to `network` via `gateway`.
    pub fn remove_gateway(&self, network: Prefix, gateway: IpAddr) -> Result<()> {
        let request = RouteRequest::delete(self.index, network, gateway)?;
        self.mutate(&request, "delete route")
    }

    fn mutate(&self, request: &dyn Request, operation: &str) -> Result<()> {
        tracing::debug!(ifindex = self.index, operation, "mutation");
        self.transport
            .exchange(request, Message::default(), self.timeout)
            .map(|_| ())
            .map_err(|e| e.with_context(operation))
    }
}

impl std::fmt::Debug for NetworkRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRecord")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("hw_address", &self.hw_address_string())
            .field("mtu", &self.mtu)
            .field("flags", &format_args!("{:#x}", self.flags))
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .finish()
    }
}
