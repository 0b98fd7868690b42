//! Configuration for reactors, endpoints, transports and the inventory.
//!
//! Every struct has a `Default` suited to a routing-netlink client and
//! consuming builder methods:
//!
//! ```ignore
//! let config = TransportConfig::default()
//!     .timeout(Duration::from_secs(2))
//!     .group(rtnetlink_groups::RTNLGRP_LINK);
//! config.validate()?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::netlink::Protocol;

/// Default endpoint send buffer size.
pub const DEFAULT_SEND_CAPACITY: usize = 8192;
/// Default endpoint receive buffer size (one full dump datagram and then some).
pub const DEFAULT_RECEIVE_CAPACITY: usize = 65536;
/// Default number of wait-set slots added each time the set outgrows its array.
pub const DEFAULT_SLOT_INCREMENT: usize = 16;
/// Default deadline for transport exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint family a reactor instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Family {
    /// Serial lines.
    Serial,
    /// Stream, datagram and netlink sockets.
    #[default]
    Socket,
}

impl Family {
    fn thread_name(self) -> &'static str {
        match self {
            Family::Serial => "nlmux-serial",
            Family::Socket => "nlmux-socket",
        }
    }
}

/// Reactor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReactorConfig {
    /// Endpoint family served by this instance.
    pub family: Family,
    /// Wait-set growth step.
    pub slot_increment: usize,
    /// Upper bound on one wait while endpoints are registered (`None` blocks
    /// until something is ready).
    pub poll_timeout: Option<Duration>,
    /// Worker thread name; derived from the family when `None`.
    pub thread_name: Option<String>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            family: Family::default(),
            slot_increment: DEFAULT_SLOT_INCREMENT,
            poll_timeout: None,
            thread_name: None,
        }
    }
}

impl ReactorConfig {
    /// Configuration for a serial-line reactor.
    pub fn serial() -> Self {
        Self::default().family(Family::Serial)
    }

    /// Set the family.
    pub fn family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    /// Set the wait-set growth step.
    pub fn slot_increment(mut self, increment: usize) -> Self {
        self.slot_increment = increment;
        self
    }

    /// Bound every wait while endpoints are registered.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Set the worker thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Thread name actually used for the worker.
    pub fn effective_thread_name(&self) -> String {
        self.thread_name
            .clone()
            .unwrap_or_else(|| self.family.thread_name().to_string())
    }

    /// Check the configuration for values the reactor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.slot_increment == 0 {
            return Err(Error::Config("slot_increment must be > 0".into()));
        }
        Ok(())
    }
}

/// Endpoint buffer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EndpointConfig {
    /// Send buffer size in bytes.
    pub send_capacity: usize,
    /// Receive buffer size in bytes.
    pub receive_capacity: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            send_capacity: DEFAULT_SEND_CAPACITY,
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
        }
    }
}

impl EndpointConfig {
    /// Set the send buffer size.
    pub fn send_capacity(mut self, bytes: usize) -> Self {
        self.send_capacity = bytes;
        self
    }

    /// Set the receive buffer size.
    pub fn receive_capacity(mut self, bytes: usize) -> Self {
        self.receive_capacity = bytes;
        self
    }

    /// Reject zero-sized buffers.
    pub fn validate(&self) -> Result<()> {
        if self.send_capacity == 0 {
            return Err(Error::Config("send_capacity must be > 0".into()));
        }
        if self.receive_capacity == 0 {
            return Err(Error::Config("receive_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Netlink transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransportConfig {
    /// Netlink protocol family of the socket.
    pub protocol: Protocol,
    /// Multicast groups joined at open.
    pub groups: Vec<u32>,
    /// Default deadline used by callers that do not pass their own.
    pub timeout: Option<Duration>,
    /// Endpoint buffers.
    pub endpoint: EndpointConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Route,
            groups: Vec::new(),
            timeout: Some(DEFAULT_TIMEOUT),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Set the protocol.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Join a multicast group at open.
    pub fn group(mut self, group: u32) -> Self {
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
        self
    }

    /// Set the default deadline; `None` waits forever.
    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Set the endpoint buffers.
    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.groups.contains(&0) {
            return Err(Error::Config("multicast group 0 does not exist".into()));
        }
        self.endpoint.validate()
    }
}

/// Network inventory configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InventoryConfig {
    /// Deadline for each dump or mutation exchange.
    pub timeout: Option<Duration>,
    /// Apply kernel link/address notifications between reloads.
    pub monitor: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            monitor: false,
        }
    }
}

impl InventoryConfig {
    /// Set the exchange deadline; `None` waits forever.
    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Enable or disable notification monitoring.
    pub fn monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }
}

/// Serial line parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SerialConfig {
    /// Device node, e.g. `/dev/ttyS0`.
    pub path: PathBuf,
    /// Line speed in bits per second.
    pub baud_rate: u32,
    /// Data bits per character (5-8).
    pub data_bits: u8,
    /// Parity.
    pub parity: Parity,
    /// Stop bits (1 or 2).
    pub stop_bits: u8,
    /// RTS/CTS hardware flow control.
    pub flow_control: bool,
    /// Endpoint buffers.
    pub endpoint: EndpointConfig,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/ttyS0"),
            baud_rate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: false,
            endpoint: EndpointConfig::default(),
        }
    }
}

impl SerialConfig {
    /// Configuration for the given device with 115200 8N1 defaults.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the line speed.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the data bits.
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set the parity.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the stop bits.
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Enable RTS/CTS flow control.
    pub fn flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }

    /// Check the line settings.
    pub fn validate(&self) -> Result<()> {
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::Config(format!(
                "data_bits must be 5..=8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(Error::Config(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.baud_rate == 0 {
            return Err(Error::Config("baud_rate must be > 0".into()));
        }
        self.endpoint.validate()
    }
}
