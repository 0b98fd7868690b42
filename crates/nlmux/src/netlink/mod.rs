//! Netlink framing, typed kernel messages and the request correlator.
//!
//! # Quick Start
//!
//! ```ignore
//! use nlmux::config::{ReactorConfig, TransportConfig};
//! use nlmux::netlink::{Message, NLM_F_DUMP, NLM_F_REQUEST, NlMsgType, Transport};
//! use nlmux::reactor::Reactor;
//!
//! let reactor = Reactor::new(ReactorConfig::default())?;
//! let transport = Transport::open(&reactor.handle(), &TransportConfig::default())?;
//!
//! let request = Message::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST | NLM_F_DUMP)
//!     .with_payload(vec![0u8; 16]);
//! let last = transport.call(&request, Message::default())?;
//! ```
//!
//! Typed decoding of reply payloads goes through [`parse::FromNetlink`]:
//!
//! ```ignore
//! use nlmux::netlink::messages::LinkMessage;
//! use nlmux::netlink::parse::FromNetlink;
//!
//! let link = LinkMessage::from_bytes(payload)?;
//! println!("{}: {:?}", link.ifindex(), link.name);
//! ```

pub mod attr;
mod builder;
mod message;
pub mod messages;
pub mod parse;
mod sequence;
pub mod socket;
mod transport;
pub mod types;

pub use attr::AttrIter;
pub use builder::MessageBuilder;
pub use message::{
    Message, NLM_F_ACK, NLM_F_APPEND, NLM_F_ATOMIC, NLM_F_CREATE, NLM_F_DUMP,
    NLM_F_DUMP_INTR, NLM_F_ECHO, NLM_F_EXCL, NLM_F_MATCH, NLM_F_MULTI, NLM_F_REPLACE,
    NLM_F_REQUEST, NLM_F_ROOT, NLMSG_ALIGNTO, NLMSG_HDRLEN, NlMsgError, NlMsgHdr, NlMsgType,
    Request, Response, deserialize, encode, nlmsg_align, serialize,
};
pub use sequence::SequenceAllocator;
pub use socket::Protocol;
pub use transport::{NotificationHandler, Transport};
