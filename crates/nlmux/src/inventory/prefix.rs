//! Address with prefix length (CIDR notation).

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// An IP address and prefix length, e.g. `192.0.2.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Prefix {
    /// The address.
    pub address: IpAddr,
    /// Prefix length in bits.
    pub len: u8,
}

impl Prefix {
    /// Create a prefix, checking the length against the address family.
    pub fn new(address: IpAddr, len: u8) -> Result<Self> {
        let max = max_len(&address);
        if len > max {
            return Err(Error::InvalidAttribute(format!(
                "prefix length {} exceeds maximum {} for address family",
                len, max
            )));
        }
        Ok(Self { address, len })
    }

    /// A full-length prefix for a single host.
    pub fn host(address: IpAddr) -> Self {
        Self {
            address,
            len: max_len(&address),
        }
    }

    /// Check if this is an IPv4 prefix.
    pub fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// The zero-length prefix of the same family.
    pub fn is_default(&self) -> bool {
        self.len == 0
    }
}

fn max_len(address: &IpAddr) -> u8 {
    if address.is_ipv4() { 32 } else { 128 }
}

impl FromStr for Prefix {
    type Err = Error;

    /// Parse `addr/len`; a bare address is a host prefix.
    fn from_str(s: &str) -> Result<Self> {
        let parse_addr = |a: &str| {
            a.parse::<IpAddr>()
                .map_err(|_| Error::InvalidAttribute(format!("invalid address: {}", a)))
        };

        match s.split_once('/') {
            Some((addr, len)) => {
                let address = parse_addr(addr)?;
                let len = len
                    .parse::<u8>()
                    .map_err(|_| Error::InvalidAttribute(format!("invalid prefix length: {}", len)))?;
                Self::new(address, len)
            }
            None => parse_addr(s).map(Self::host),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.len)
    }
}
