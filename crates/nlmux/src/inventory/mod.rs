//! Network inventory: interface records kept current from rtnetlink dumps.
//!
//! ```ignore
//! use nlmux::config::{InventoryConfig, ReactorConfig};
//! use nlmux::inventory::Inventory;
//! use nlmux::reactor::Reactor;
//!
//! let reactor = Reactor::new(ReactorConfig::default())?;
//! let inventory = Inventory::open(&reactor.handle(), InventoryConfig::default())?;
//! inventory.reload()?;
//!
//! let eth0 = inventory.require("eth0")?;
//! eth0.add("192.0.2.10/24".parse()?)?;
//! ```
//!
//! Every public operation holds the inventory lock for its whole duration,
//! including the dump exchanges of [`Inventory::reload`]. Kernel
//! notifications (when monitoring) are queued by the reactor thread and
//! applied at the start of the next operation.

mod prefix;
mod record;
mod request;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub use prefix::Prefix;
pub use record::{AddressEntry, NetworkRecord};
pub use request::{AddressDump, AddressRequest, LinkDump, RouteRequest};

use request::{Capture, Captured};

use crate::config::{InventoryConfig, TransportConfig};
use crate::error::{Error, Result};
use crate::netlink::socket::rtnetlink_groups::{RTNLGRP_IPV4_IFADDR, RTNLGRP_IPV6_IFADDR, RTNLGRP_LINK};
use crate::netlink::types::addr::IfAddrMsg;
use crate::netlink::types::link::IfInfoMsg;
use crate::netlink::{NlMsgType, Transport};
use crate::reactor::{ReactorHandle, lock};

/// Notifications held between operations before the oldest are dropped.
const MAX_QUEUED: usize = 4096;

#[derive(Default)]
struct State {
    records: BTreeMap<u32, NetworkRecord>,
    complete: bool,
}

#[derive(Default)]
struct Queue {
    frames: VecDeque<Captured>,
    overflowed: bool,
}

/// Table of [`NetworkRecord`]s, one per interface index.
pub struct Inventory {
    transport: Arc<Transport>,
    config: InventoryConfig,
    state: Mutex<State>,
    queue: Arc<Mutex<Queue>>,
}

fn record_index(msg_type: u16, payload: &[u8]) -> Option<u32> {
    match msg_type {
        NlMsgType::RTM_NEWLINK | NlMsgType::RTM_DELLINK => {
            IfInfoMsg::from_bytes(payload).ok().map(|h| h.ifi_index as u32)
        }
        NlMsgType::RTM_NEWADDR | NlMsgType::RTM_DELADDR => {
            IfAddrMsg::from_bytes(payload).ok().map(|h| h.ifa_index)
        }
        _ => None,
    }
}

impl Inventory {
    /// Open a dedicated route-netlink transport on `reactor`.
    ///
    /// With `config.monitor`, the socket joins the link and address
    /// multicast groups.
    pub fn open(reactor: &ReactorHandle, config: InventoryConfig) -> Result<Self> {
        let mut transport = TransportConfig::default().timeout(config.timeout);
        if config.monitor {
            transport = transport
                .group(RTNLGRP_LINK)
                .group(RTNLGRP_IPV4_IFADDR)
                .group(RTNLGRP_IPV6_IFADDR);
        }
        let transport = Transport::open(reactor, &transport)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Build an inventory over an existing transport.
    ///
    /// Monitoring installs the transport's notification handler; the
    /// transport must already be subscribed to the groups of interest.
    pub fn new(transport: Arc<Transport>, config: InventoryConfig) -> Self {
        let queue = Arc::new(Mutex::new(Queue::default()));
        if config.monitor {
            let sink = queue.clone();
            transport.set_notification_handler(move |header, payload| {
                // Late replies to abandoned requests also land here.
                if header.nlmsg_seq != 0 || record_index(header.nlmsg_type, payload).is_none() {
                    return;
                }
                let mut queue = lock(&sink);
                if queue.frames.len() == MAX_QUEUED {
                    queue.frames.pop_front();
                    queue.overflowed = true;
                }
                queue.frames.push_back(Captured {
                    header: *header,
                    payload: bytes::Bytes::copy_from_slice(payload),
                });
            });
        }
        Self {
            transport,
            config,
            state: Mutex::new(State::default()),
            queue,
        }
    }

    /// Re-read every link, then every IPv4 and IPv6 address.
    ///
    /// A failed link dump leaves the previous table untouched. Once the link
    /// dump succeeds the table is replaced; a failed address dump then stops
    /// the reload with the remaining families unpopulated. Either way
    /// [`is_complete`](Self::is_complete) reports false until a reload
    /// succeeds.
    pub fn reload(&self) -> Result<()> {
        let mut state = lock(&self.state);
        lock(&self.queue).frames.clear();
        state.complete = false;

        let timeout = self.config.timeout;
        let links = self
            .transport
            .exchange(&LinkDump, Capture::new(NlMsgType::RTM_NEWLINK), timeout)
            .map_err(|e| e.with_context("link dump"))?;

        let mut records = BTreeMap::new();
        for frame in &links.frames {
            let Some(index) = record_index(frame.header.nlmsg_type, &frame.payload) else {
                continue;
            };
            let record = records
                .entry(index)
                .or_insert_with(|| NetworkRecord::new(index, self.transport.clone(), timeout));
            if let Err(error) = record.update(&frame.header, &frame.payload) {
                tracing::warn!(ifindex = index, %error, "link frame not applied");
            }
        }
        tracing::debug!(links = records.len(), "link dump applied");
        state.records = records;

        for (dump, family) in [(AddressDump::ipv4(), "ipv4"), (AddressDump::ipv6(), "ipv6")] {
            let addresses = self
                .transport
                .exchange(&dump, Capture::new(NlMsgType::RTM_NEWADDR), timeout)
                .map_err(|e| e.with_context(format!("{} address dump", family)))?;
            for frame in &addresses.frames {
                Self::apply(&mut state, frame);
            }
            tracing::debug!(family, addresses = addresses.frames.len(), "address dump applied");
        }

        state.complete = true;
        Ok(())
    }

    fn apply(state: &mut State, frame: &Captured) {
        let Some(index) = record_index(frame.header.nlmsg_type, &frame.payload) else {
            return;
        };
        let Some(record) = state.records.get_mut(&index) else {
            tracing::trace!(ifindex = index, "frame for unknown interface");
            return;
        };
        if let Err(error) = record.update(&frame.header, &frame.payload) {
            tracing::warn!(ifindex = index, %error, "frame not applied");
        }
    }

    /// Apply queued notifications; records are never removed here.
    fn sync(&self) -> MutexGuard<'_, State> {
        let mut state = lock(&self.state);
        let (frames, overflowed) = {
            let mut queue = lock(&self.queue);
            let overflowed = std::mem::take(&mut queue.overflowed);
            (std::mem::take(&mut queue.frames), overflowed)
        };
        if overflowed {
            tracing::warn!("notification queue overflowed, table may be stale");
            state.complete = false;
        }

        for frame in &frames {
            match frame.header.nlmsg_type {
                NlMsgType::RTM_NEWLINK => {
                    let Some(index) = record_index(frame.header.nlmsg_type, &frame.payload) else {
                        continue;
                    };
                    let record = state.records.entry(index).or_insert_with(|| {
                        NetworkRecord::new(index, self.transport.clone(), self.config.timeout)
                    });
                    if let Err(error) = record.update(&frame.header, &frame.payload) {
                        tracing::warn!(ifindex = index, %error, "link notification not applied");
                    }
                }
                NlMsgType::RTM_DELLINK => {
                    tracing::debug!("interface removed, record kept until reload");
                }
                _ => Self::apply(&mut state, frame),
            }
        }
        state
    }

    /// Check if the last reload ran every phase successfully.
    pub fn is_complete(&self) -> bool {
        self.sync().complete
    }

    /// Snapshot of the record for interface `index`.
    pub fn get(&self, index: u32) -> Option<NetworkRecord> {
        self.sync().records.get(&index).cloned()
    }

    /// Snapshot of the record named `name`.
    pub fn by_name(&self, name: &str) -> Option<NetworkRecord> {
        self.sync()
            .records
            .values()
            .find(|r| r.name() == name)
            .cloned()
    }

    /// Like [`by_name`](Self::by_name), failing with
    /// [`Error::InterfaceNotFound`].
    pub fn require(&self, name: &str) -> Result<NetworkRecord> {
        self.by_name(name).ok_or_else(|| Error::InterfaceNotFound {
            name: name.to_string(),
        })
    }

    /// Snapshot of every record, ordered by index.
    pub fn records(&self) -> Vec<NetworkRecord> {
        self.sync().records.values().cloned().collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.sync().records.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shared transport.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

impl Drop for Inventory {
    fn drop(&mut self) {
        if self.config.monitor {
            self.transport.clear_notification_handler();
        }
    }
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Inventory")
            .field("records", &state.records.len())
            .field("complete", &state.complete)
            .field("monitor", &self.config.monitor)
            .finish()
    }
}
