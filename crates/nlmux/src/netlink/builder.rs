//! Incremental encoder for one netlink frame.
//!
//! The header is reserved up front and its length field is patched in
//! [`MessageBuilder::finish`]. Each append starts on a 4-byte boundary; the
//! last one is left unpadded so the length field is the encoded size.

use std::net::IpAddr;

use bytes::{BufMut, BytesMut};
use zerocopy::{Immutable, IntoBytes};

use super::attr::{NlAttr, nla_align};
use super::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align};

/// Offset of `nlmsg_seq` inside the header.
const SEQ_OFFSET: usize = 8;
/// Offset of `nlmsg_pid` inside the header.
const PID_OFFSET: usize = 12;

/// Builder for one netlink frame: header, fixed kernel struct, attributes.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    buf: BytesMut,
}

impl MessageBuilder {
    /// Start a frame of `msg_type` with `flags`; sequence and port are 0.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(NlMsgHdr::new(msg_type, flags).as_bytes());
        buf.resize(NLMSG_HDRLEN, 0);
        Self { buf }
    }

    /// Bytes written so far, header included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True while nothing follows the header.
    pub fn is_empty(&self) -> bool {
        self.buf.len() == NLMSG_HDRLEN
    }

    fn pad(&mut self, aligned: usize) {
        self.buf.resize(aligned, 0);
    }

    /// Append raw payload bytes at the next frame-aligned offset.
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.pad(nlmsg_align(self.buf.len()));
        self.buf.put_slice(data);
    }

    /// Append a fixed-size kernel header (`ifinfomsg`, `ifaddrmsg`, ...).
    pub fn append<T: IntoBytes + Immutable>(&mut self, data: &T) {
        self.append_bytes(data.as_bytes());
    }

    /// Append one TLV attribute at the next attribute-aligned offset.
    pub fn append_attr(&mut self, attr_type: u16, data: &[u8]) {
        self.pad(nla_align(self.buf.len()));
        self.buf.put_slice(NlAttr::new(attr_type, data.len()).as_bytes());
        self.buf.put_slice(data);
    }

    /// Append a native-endian u32 attribute.
    pub fn append_attr_u32(&mut self, attr_type: u16, value: u32) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    /// Append a NUL-terminated string attribute.
    pub fn append_attr_str(&mut self, attr_type: u16, value: &str) {
        self.pad(nla_align(self.buf.len()));
        self.buf.put_slice(NlAttr::new(attr_type, value.len() + 1).as_bytes());
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
    }

    /// Append an address attribute: 4 octets for IPv4, 16 for IPv6, network
    /// order.
    pub fn append_attr_ip(&mut self, attr_type: u16, address: &IpAddr) {
        match address {
            IpAddr::V4(v4) => self.append_attr(attr_type, &v4.octets()),
            IpAddr::V6(v6) => self.append_attr(attr_type, &v6.octets()),
        }
    }

    /// Stamp the sequence number.
    pub fn set_seq(&mut self, seq: u32) {
        self.buf[SEQ_OFFSET..SEQ_OFFSET + 4].copy_from_slice(&seq.to_ne_bytes());
    }

    /// Stamp the port ID.
    pub fn set_pid(&mut self, pid: u32) {
        self.buf[PID_OFFSET..PID_OFFSET + 4].copy_from_slice(&pid.to_ne_bytes());
    }

    /// Patch the length field and return the encoded frame, without
    /// trailing padding.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[..4].copy_from_slice(&len.to_ne_bytes());
        self.buf.to_vec()
    }

    /// Bytes written so far, length field not yet patched.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;
    use crate::netlink::attr::{AttrIter, NLA_HDRLEN};
    use crate::netlink::message::NLM_F_REQUEST;

    #[test]
    fn test_header_only() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        assert!(builder.is_empty());
        builder.set_seq(42);
        let msg = builder.finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN);

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_len as usize, NLMSG_HDRLEN);
        assert_eq!(header.nlmsg_type, 16);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
        assert_eq!(header.nlmsg_seq, 42);
    }

    #[test]
    fn test_u32_attribute() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.append_attr_u32(1, 0x12345678);
        let msg = builder.finish();

        assert_eq!(msg.len(), NLMSG_HDRLEN + NLA_HDRLEN + 4);
    }

    #[test]
    fn test_string_attribute_is_padded() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.append_attr_str(3, "lo");
        builder.append_attr_u32(4, 65536);
        let msg = builder.finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN + 8 + 8);

        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN..]).collect();
        assert_eq!(attrs[0], (3, &b"lo\0"[..]));
        assert_eq!(attrs[1].0, 4);
    }

    #[test]
    fn test_length_excludes_trailing_padding() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.append_bytes(&[1, 2, 3]);
        builder.append_bytes(&[4, 5]);
        let msg = builder.finish();

        assert_eq!(msg.len(), NLMSG_HDRLEN + 4 + 2);
        assert_eq!(NlMsgHdr::from_bytes(&msg).unwrap().nlmsg_len as usize, msg.len());
        assert_eq!(&msg[NLMSG_HDRLEN..], &[1, 2, 3, 0, 4, 5]);
    }

    #[test]
    fn test_ip_attribute_length_follows_family() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.append_attr_ip(1, &"192.0.2.1".parse().unwrap());
        builder.append_attr_ip(2, &IpAddr::V6(Ipv6Addr::LOCALHOST));
        let msg = builder.finish();

        let attrs: Vec<_> = AttrIter::new(&msg[NLMSG_HDRLEN..]).collect();
        assert_eq!(attrs[0], (1, &[192, 0, 2, 1][..]));
        assert_eq!(attrs[1].1.len(), 16);
        assert_eq!(attrs[1].1[15], 1);
    }
}
