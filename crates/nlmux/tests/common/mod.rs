//! Common test utilities.
//!
//! Provides `FakeKernel`, the far end of a `UnixDatagram` pair that reads
//! the transport's requests and answers with scripted netlink frames.

#![allow(dead_code)]

use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::time::Duration;

use nlmux::Result;
use nlmux::config::{ReactorConfig, TransportConfig};
use nlmux::netlink::types::addr::{IfAddrMsg, ifa};
use nlmux::netlink::types::link::{IfInfoMsg, ifla, iff};
use nlmux::netlink::{MessageBuilder, NLM_F_MULTI, NLMSG_HDRLEN, NlMsgHdr, NlMsgType, Transport};
use nlmux::reactor::Reactor;

/// Upper bound for any blocking step in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Route library logs to the test harness (`RUST_LOG=nlmux=trace`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One request as the kernel would see it.
#[derive(Debug, Clone)]
pub struct Received {
    pub header: NlMsgHdr,
    pub payload: Vec<u8>,
}

impl Received {
    pub fn seq(&self) -> u32 {
        self.header.nlmsg_seq
    }
}

/// Scripted peer of a transport.
pub struct FakeKernel {
    socket: UnixDatagram,
}

impl FakeKernel {
    /// Block until the next request datagram arrives.
    pub fn recv(&self) -> Result<Received> {
        let mut buf = vec![0u8; 65536];
        let n = self.socket.recv(&mut buf)?;
        let header = *NlMsgHdr::from_bytes(&buf[..n])?;
        let end = (header.nlmsg_len as usize).min(n);
        Ok(Received {
            header,
            payload: buf[NLMSG_HDRLEN..end].to_vec(),
        })
    }

    /// Send raw bytes as one datagram.
    pub fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send(datagram)?;
        Ok(())
    }

    /// Send one frame.
    pub fn reply(&self, msg_type: u16, flags: u16, seq: u32, payload: &[u8]) -> Result<()> {
        self.send(&frame(msg_type, flags, seq, payload))
    }

    /// Acknowledge `seq`.
    pub fn ack(&self, seq: u32) -> Result<()> {
        self.error(seq, 0)
    }

    /// Report `errno` (negative) for `seq`.
    pub fn error(&self, seq: u32, errno: i32) -> Result<()> {
        let mut payload = errno.to_ne_bytes().to_vec();
        payload.extend_from_slice(NlMsgHdr::new(0, 0).as_bytes());
        self.reply(NlMsgType::ERROR, 0, seq, &payload)
    }

    /// End the dump for `seq`.
    pub fn done(&self, seq: u32) -> Result<()> {
        self.reply(NlMsgType::DONE, NLM_F_MULTI, seq, &0i32.to_ne_bytes())
    }
}

/// Encode one frame with an explicit sequence number.
pub fn frame(msg_type: u16, flags: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut builder = MessageBuilder::new(msg_type, flags);
    builder.append_bytes(payload);
    builder.set_seq(seq);
    builder.finish()
}

/// `RTM_NEWLINK` payload for an interface that is up.
pub fn link_payload(index: i32, name: &str, mac: [u8; 6]) -> Vec<u8> {
    let mut header = IfInfoMsg::new().with_index(index);
    header.ifi_flags = iff::UP | iff::RUNNING;
    let mut builder = MessageBuilder::new(0, 0);
    builder.append(&header);
    builder.append_attr_str(ifla::IFNAME, name);
    builder.append_attr(ifla::ADDRESS, &mac);
    builder.append_attr_u32(ifla::MTU, 1500);
    builder.finish()[NLMSG_HDRLEN..].to_vec()
}

/// `RTM_NEWADDR` payload with local == address.
pub fn addr_payload(family: u8, index: u32, prefix: u8, address: &[u8]) -> Vec<u8> {
    let mut builder = MessageBuilder::new(0, 0);
    builder.append(&IfAddrMsg::new().with_family(family).with_prefixlen(prefix).with_index(index));
    builder.append_attr(ifa::ADDRESS, address);
    builder.append_attr(ifa::LOCAL, address);
    builder.finish()[NLMSG_HDRLEN..].to_vec()
}

/// A reactor, a transport over a socket pair, and the scripted far end.
pub fn setup(config: &TransportConfig) -> Result<(Reactor, Arc<Transport>, FakeKernel)> {
    init_tracing();
    let reactor = Reactor::new(ReactorConfig::default())?;
    let (local, remote) = UnixDatagram::pair()?;
    remote.set_read_timeout(Some(WAIT))?;
    let transport = Transport::with_link(&reactor.handle(), local, config)?;
    Ok((reactor, Arc::new(transport), FakeKernel { socket: remote }))
}
