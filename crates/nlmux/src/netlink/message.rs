//! Netlink message header, framing and the encode/decode contract.
//!
//! Encoding is a pure function of the request and an explicit sequence
//! number: [`serialize`] never allocates sequence numbers itself. The
//! [`SequenceAllocator`](super::SequenceAllocator) owned by the transport
//! does that.

use bytes::Bytes;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::attr::AttrIter;
use super::builder::MessageBuilder;
use crate::error::{Error, Result};

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netlink message header (mirrors struct nlmsghdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: u32,
    /// Message type.
    pub nlmsg_type: u16,
    /// Additional flags.
    pub nlmsg_flags: u16,
    /// Sequence number.
    pub nlmsg_seq: u32,
    /// Sending process port ID.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// Create a new message header.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        }
    }

    /// Get the payload length (total length minus header).
    pub fn payload_len(&self) -> usize {
        (self.nlmsg_len as usize).saturating_sub(NLMSG_HDRLEN)
    }

    /// Check if this is an error message.
    pub fn is_error(&self) -> bool {
        self.nlmsg_type == NlMsgType::ERROR
    }

    /// Check if this is a done message.
    pub fn is_done(&self) -> bool {
        self.nlmsg_type == NlMsgType::DONE
    }

    /// Check if this is a no-op message.
    pub fn is_noop(&self) -> bool {
        self.nlmsg_type == NlMsgType::NOOP
    }

    /// Check if this message has the multi flag.
    pub fn is_multi(&self) -> bool {
        self.nlmsg_flags & NLM_F_MULTI != 0
    }

    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Standard netlink message types.
pub struct NlMsgType;

impl NlMsgType {
    /// No operation, message must be discarded.
    pub const NOOP: u16 = 1;
    /// Error message or ACK.
    pub const ERROR: u16 = 2;
    /// End of multipart message.
    pub const DONE: u16 = 3;
    /// Data lost, request resend.
    pub const OVERRUN: u16 = 4;

    // Link messages
    pub const RTM_NEWLINK: u16 = 16;
    pub const RTM_DELLINK: u16 = 17;
    pub const RTM_GETLINK: u16 = 18;
    pub const RTM_SETLINK: u16 = 19;

    // Address messages
    pub const RTM_NEWADDR: u16 = 20;
    pub const RTM_DELADDR: u16 = 21;
    pub const RTM_GETADDR: u16 = 22;

    // Route messages
    pub const RTM_NEWROUTE: u16 = 24;
    pub const RTM_DELROUTE: u16 = 25;
    pub const RTM_GETROUTE: u16 = 26;
}

/// Netlink message flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;
pub const NLM_F_DUMP_INTR: u16 = 0x10;

// Modifiers to GET request
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_ATOMIC: u16 = 0x400;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW request
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

/// Outcome of scanning the next frame in a receive buffer.
#[derive(Debug)]
pub(crate) enum Frame<'a> {
    /// One complete frame, and the aligned number of bytes it occupies.
    Complete {
        header: &'a NlMsgHdr,
        payload: &'a [u8],
        consumed: usize,
    },
    /// Not enough bytes yet for the frame announced by the header.
    Partial,
    /// A header whose length field cannot be valid.
    Malformed,
}

/// Look at the frame starting at the beginning of `data`.
pub(crate) fn next_frame(data: &[u8]) -> Frame<'_> {
    let Ok(header) = NlMsgHdr::from_bytes(data) else {
        return Frame::Partial;
    };
    let msg_len = header.nlmsg_len as usize;
    if msg_len < NLMSG_HDRLEN {
        return Frame::Malformed;
    }
    if msg_len > data.len() {
        return Frame::Partial;
    }
    Frame::Complete {
        header,
        payload: &data[NLMSG_HDRLEN..msg_len],
        consumed: nlmsg_align(msg_len).min(data.len()),
    }
}

/// Netlink error message payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct NlMsgError {
    /// Error code (negative errno or 0 for ACK).
    pub error: i32,
    /// Original message header that caused the error.
    pub msg: NlMsgHdr,
}

impl NlMsgError {
    /// Parse error message from payload.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }

    /// Check if this is an ACK (no error).
    pub fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// Get attributes after the error message (extended ACK).
    pub fn attrs<'a>(&self, payload: &'a [u8]) -> AttrIter<'a> {
        let offset = std::mem::size_of::<Self>();
        if payload.len() > offset {
            AttrIter::new(&payload[offset..])
        } else {
            AttrIter::new(&[])
        }
    }
}

/// An outbound message: knows its header fields and how to encode its payload.
pub trait Request: Send + Sync {
    /// Message type (`RTM_*`, `NLMSG_NOOP`, ...).
    fn msg_type(&self) -> u16;

    /// Header flags (OR of `NLM_F_*`).
    fn flags(&self) -> u16;

    /// Append the payload after the header.
    fn write_payload(&self, builder: &mut MessageBuilder) -> Result<()>;
}

/// An inbound message decoder.
///
/// Fed every frame that belongs to it, in arrival order. An `Err` discards the
/// frame; it does not abort the exchange.
pub trait Response: Send {
    /// Decode one frame.
    fn on_message(&mut self, header: &NlMsgHdr, payload: &[u8]) -> Result<()>;
}

/// Encode `request` with sequence number `seq` into the start of `buf`.
///
/// Returns the number of bytes written; the header length field carries the
/// same value. Padding up to the next frame is the caller's business.
pub fn serialize<R: Request + ?Sized>(request: &R, seq: u32, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < NLMSG_HDRLEN {
        return Err(Error::Truncated {
            expected: NLMSG_HDRLEN,
            actual: buf.len(),
        });
    }
    let frame = encode(request, seq)?;
    if frame.len() > buf.len() {
        return Err(Error::Truncated {
            expected: frame.len(),
            actual: buf.len(),
        });
    }
    buf[..frame.len()].copy_from_slice(&frame);
    Ok(frame.len())
}

/// Encode `request` with sequence number `seq` into a fresh buffer.
pub fn encode<R: Request + ?Sized>(request: &R, seq: u32) -> Result<Vec<u8>> {
    let mut builder = MessageBuilder::new(request.msg_type(), request.flags());
    request.write_payload(&mut builder)?;
    builder.set_seq(seq);
    builder.set_pid(0);
    Ok(builder.finish())
}

/// Decode every complete frame of `buf` into `response`.
///
/// Returns the number of bytes fully consumed, or 0 when not even one frame
/// is complete. A malformed header discards the rest of the buffer.
pub fn deserialize<R: Response + ?Sized>(response: &mut R, buf: &[u8]) -> usize {
    let mut offset = 0;
    while offset < buf.len() {
        match next_frame(&buf[offset..]) {
            Frame::Complete {
                header,
                payload,
                consumed,
            } => {
                if let Err(e) = response.on_message(header, payload) {
                    tracing::debug!(seq = header.nlmsg_seq, error = %e, "discarding frame");
                }
                offset += consumed;
            }
            Frame::Partial => break,
            Frame::Malformed => {
                tracing::warn!(offset, "malformed netlink header, discarding buffer");
                return buf.len();
            }
        }
    }
    offset
}

/// Generic netlink message value: header fields plus raw payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub msg_type: u16,
    /// Header flags.
    pub flags: u16,
    /// Sequence number of the last decoded frame (0 until decoded).
    pub seq: u32,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Create a message with an empty payload.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            msg_type,
            flags,
            seq: 0,
            payload: Bytes::new(),
        }
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// A `NLMSG_NOOP` request.
    pub fn noop() -> Self {
        Self::new(NlMsgType::NOOP, NLM_F_REQUEST)
    }

    /// Check whether the last decoded frame was a kernel error report.
    pub fn is_error(&self) -> bool {
        self.msg_type == NlMsgType::ERROR
    }

    /// The errno carried by an error frame (0 for an ACK).
    pub fn error_code(&self) -> Option<i32> {
        if !self.is_error() {
            return None;
        }
        NlMsgError::from_bytes(&self.payload).ok().map(|e| e.error)
    }
}

impl Request for Message {
    fn msg_type(&self) -> u16 {
        self.msg_type
    }

    fn flags(&self) -> u16 {
        self.flags
    }

    fn write_payload(&self, builder: &mut MessageBuilder) -> Result<()> {
        builder.append_bytes(&self.payload);
        Ok(())
    }
}

impl Response for Message {
    fn on_message(&mut self, header: &NlMsgHdr, payload: &[u8]) -> Result<()> {
        self.seq = header.nlmsg_seq;
        self.flags = header.nlmsg_flags;
        self.payload = Bytes::copy_from_slice(payload);
        if header.is_error() {
            self.msg_type = NlMsgType::ERROR;
            NlMsgError::from_bytes(payload)?;
        } else {
            self.msg_type = header.nlmsg_type;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert_eq!(NLMSG_HDRLEN, 16);
        assert_eq!(nlmsg_align(17), 20);
        assert_eq!(nlmsg_align(20), 20);
    }

    #[test]
    fn test_serialize_writes_header() {
        let msg = Message::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP)
            .with_payload(vec![0u8; 16]);
        let mut buf = [0u8; 64];
        let n = serialize(&msg, 77, &mut buf).unwrap();
        assert_eq!(n, 32);

        let header = NlMsgHdr::from_bytes(&buf).unwrap();
        assert_eq!(header.nlmsg_len, 32);
        assert_eq!(header.nlmsg_type, NlMsgType::RTM_GETLINK);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(header.nlmsg_seq, 77);
        assert_eq!(header.nlmsg_pid, 0);
    }

    #[test]
    fn test_serialize_rejects_small_buffer() {
        let mut tiny = [0u8; 8];
        assert!(matches!(
            serialize(&Message::noop(), 1, &mut tiny),
            Err(Error::Truncated { expected: 16, .. })
        ));

        let big = Message::noop().with_payload(vec![1u8; 64]);
        let mut buf = [0u8; 32];
        assert!(serialize(&big, 1, &mut buf).is_err());
    }

    #[test]
    fn test_message_roundtrip() {
        let original = Message::new(NlMsgType::RTM_NEWADDR, NLM_F_REQUEST | NLM_F_ACK)
            .with_payload(vec![2, 24, 0, 0, 3, 0, 0, 0]);
        let mut buf = [0u8; 64];
        let n = serialize(&original, 9, &mut buf).unwrap();

        let mut decoded = Message::default();
        assert_eq!(deserialize(&mut decoded, &buf[..n]), n);
        assert_eq!(decoded.msg_type, original.msg_type);
        assert_eq!(decoded.flags, original.flags);
        assert_eq!(decoded.payload, original.payload);
        assert_eq!(decoded.seq, 9);
    }

    #[test]
    fn test_unaligned_payload_roundtrip() {
        let original = Message::new(NlMsgType::RTM_NEWADDR, NLM_F_REQUEST).with_payload(vec![1, 2, 3]);
        let mut buf = [0u8; 64];
        let n = serialize(&original, 5, &mut buf).unwrap();
        assert_eq!(n, NLMSG_HDRLEN + 3);
        assert_eq!(NlMsgHdr::from_bytes(&buf).unwrap().nlmsg_len as usize, n);

        let mut decoded = Message::default();
        assert_eq!(deserialize(&mut decoded, &buf[..n]), n);
        assert_eq!(decoded.payload, original.payload);
        assert_eq!(decoded.seq, 5);
    }

    #[test]
    fn test_deserialize_batched_and_partial() {
        let a = encode(&Message::noop().with_payload(vec![1, 2, 3]), 1).unwrap();
        let b = encode(&Message::noop(), 2).unwrap();

        // Frames sit at aligned offsets on the wire.
        let mut buf = a.clone();
        buf.resize(nlmsg_align(a.len()), 0);
        buf.extend_from_slice(&b);
        // Half of a third frame.
        buf.extend_from_slice(&b[..8]);

        struct Count(Vec<u32>);
        impl Response for Count {
            fn on_message(&mut self, h: &NlMsgHdr, _: &[u8]) -> Result<()> {
                self.0.push(h.nlmsg_seq);
                Ok(())
            }
        }

        let mut count = Count(Vec::new());
        let consumed = deserialize(&mut count, &buf);
        assert_eq!(consumed, nlmsg_align(a.len()) + b.len());
        assert_eq!(count.0, vec![1, 2]);

        assert_eq!(deserialize(&mut count, &b[..10]), 0);
    }

    #[test]
    fn test_deserialize_malformed_discards() {
        let mut buf = encode(&Message::noop(), 1).unwrap();
        buf[0..4].copy_from_slice(&4u32.to_ne_bytes());
        let mut msg = Message::default();
        assert_eq!(deserialize(&mut msg, &buf), buf.len());
        assert_eq!(msg.msg_type, 0);
    }

    #[test]
    fn test_error_frame_marks_message() {
        let mut payload = (-19i32).to_ne_bytes().to_vec();
        payload.extend_from_slice(NlMsgHdr::new(NlMsgType::RTM_GETLINK, 0).as_bytes());
        let reply = Message::new(NlMsgType::ERROR, 0).with_payload(payload);
        let frame = encode(&reply, 5).unwrap();

        let mut msg = Message::default();
        deserialize(&mut msg, &frame);
        assert!(msg.is_error());
        assert_eq!(msg.error_code(), Some(-19));
    }
}
