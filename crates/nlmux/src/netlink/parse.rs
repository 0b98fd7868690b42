//! Parser combinators and traits for strongly-typed netlink message parsing.
//!
//! This module provides:
//! - `FromNetlink` trait for parsing netlink payloads
//! - Core parser combinators using winnow
//!
//! Header and attribute fields are in machine byte order; addresses inside
//! attribute values are in network order.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use winnow::binary::{Endianness, u16 as ne_field};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use super::attr::{NLA_HDRLEN, NLA_TYPE_MASK, nla_align};
use crate::error::{Error, Result};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// Trait for types that can be parsed from netlink wire format.
pub trait FromNetlink: Sized {
    /// Parse from a mutable byte slice reference.
    /// The slice is advanced past the consumed bytes.
    fn parse(input: &mut &[u8]) -> PResult<Self>;

    /// Parse from a complete payload.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::parse
            .parse(data)
            .map_err(|e| Error::Parse(format!("{}", e)))
    }
}

/// Hard failure that stops the surrounding parser.
pub(crate) fn cut<T>() -> PResult<T> {
    Err(ErrMode::Cut(ContextError::new()))
}

/// Take a fixed kernel header off the front of the payload.
pub fn parse_fixed<'a>(input: &mut &'a [u8], size: usize) -> PResult<&'a [u8]> {
    if input.len() < size {
        return cut();
    }
    take(size).parse_next(input)
}

/// Parse a netlink attribute header and return (type, payload).
///
/// The type is returned with the NESTED and NET_BYTEORDER flags masked out.
pub fn parse_attr<'a>(input: &mut &'a [u8]) -> PResult<(u16, &'a [u8])> {
    let len = ne_field(Endianness::Native).parse_next(input)? as usize;
    let attr_type: u16 = ne_field(Endianness::Native).parse_next(input)?;

    if len < NLA_HDRLEN || input.len() < len - NLA_HDRLEN {
        return cut();
    }

    let payload: &[u8] = take(len - NLA_HDRLEN).parse_next(input)?;

    let padding = nla_align(len) - len;
    if input.len() >= padding {
        let _: &[u8] = take(padding).parse_next(input)?;
    } else {
        *input = &[];
    }

    Ok((attr_type & NLA_TYPE_MASK, payload))
}

/// Parse all attributes from remaining input.
///
/// Stops quietly at the first attribute that does not fit; the remainder is
/// consumed so callers using `Parser::parse` see a complete parse.
pub fn parse_attrs<'a>(input: &mut &'a [u8]) -> PResult<Vec<(u16, &'a [u8])>> {
    let mut attrs = Vec::new();
    while input.len() >= NLA_HDRLEN {
        match parse_attr(input) {
            Ok(attr) => attrs.push(attr),
            Err(_) => break,
        }
    }
    *input = &[];
    Ok(attrs)
}

/// Parse an IP address, letting the value length pick the family.
pub fn parse_ip_addr(data: &[u8]) -> Result<IpAddr> {
    match data.len() {
        4 => {
            let arr: [u8; 4] = [data[0], data[1], data[2], data[3]];
            Ok(IpAddr::V4(Ipv4Addr::from(arr)))
        }
        16 => {
            let mut arr = [0u8; 16];
            arr.copy_from_slice(data);
            Ok(IpAddr::V6(Ipv6Addr::from(arr)))
        }
        n => Err(Error::InvalidAttribute(format!(
            "address of {} bytes is neither IPv4 nor IPv6",
            n
        ))),
    }
}

/// Parse a string from a fixed-size buffer (null-terminated).
pub fn parse_string_from_bytes(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Format a hardware address as colon-separated hex.
pub fn format_hw_addr(addr: &[u8]) -> String {
    addr.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
