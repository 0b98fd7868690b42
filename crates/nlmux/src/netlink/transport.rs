//! Request/response correlation over a reactor-driven netlink endpoint.
//!
//! Callers block in [`Transport::exchange`] while the reactor thread writes
//! their frames and routes replies back by sequence number. Any number of
//! callers may be in flight at once; replies may interleave freely.
//!
//! ```ignore
//! use nlmux::config::{ReactorConfig, TransportConfig};
//! use nlmux::netlink::{Message, Transport};
//! use nlmux::reactor::Reactor;
//!
//! let reactor = Reactor::new(ReactorConfig::default())?;
//! let transport = Transport::open(&reactor.handle(), &TransportConfig::default())?;
//! transport.post(&Message::noop(), None)?;
//! ```

use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::attr::get;
use super::message::{Frame, NlMsgError, NlMsgHdr, Request, Response, encode, next_frame, nlmsg_align};
use super::sequence::SequenceAllocator;
use super::socket;
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::reactor::{Channel, Control, Endpoint, EndpointState, Link, ReactorHandle, lock};

/// Callback for frames that match no in-flight request.
///
/// Runs on the reactor thread. It must not block and must not call back into
/// the transport.
pub type NotificationHandler = Box<dyn FnMut(&NlMsgHdr, &[u8]) + Send>;

type Decoder = Arc<Mutex<dyn Response>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingState {
    /// Encoded, waiting for the send path.
    Loaded,
    /// Written to the link, waiting for replies.
    Sent,
    /// Completed with an error.
    Failed,
    /// Completed successfully.
    Processed,
}

struct Pending {
    frame: Vec<u8>,
    response: Option<Decoder>,
    state: PendingState,
    done: SyncSender<Result<()>>,
}

impl Pending {
    fn complete(&mut self, result: Result<()>) {
        self.state = if result.is_ok() {
            PendingState::Processed
        } else {
            PendingState::Failed
        };
        // Capacity 1 and a single completion per entry; a full or closed
        // channel means the caller already gave up.
        self.done.try_send(result).ok();
    }

    fn is_complete(&self) -> bool {
        matches!(self.state, PendingState::Failed | PendingState::Processed)
    }
}

#[derive(Default)]
struct Shared {
    table: Mutex<BTreeMap<u32, Pending>>,
    notify: Mutex<Option<NotificationHandler>>,
}

impl Shared {
    /// Route one inbound frame to its pending request.
    ///
    /// Returns false when no request in the SENT state owns the sequence.
    fn dispatch(&self, header: &NlMsgHdr, payload: &[u8]) -> bool {
        let seq = header.nlmsg_seq;
        if seq == 0 {
            return false;
        }

        let mut table = lock(&self.table);
        let Some(pending) = table.get_mut(&seq) else {
            return false;
        };
        if pending.state != PendingState::Sent {
            return false;
        }

        if header.is_done() {
            let result = match get::i32_ne(payload) {
                Ok(errno) if errno < 0 => Err(Error::from_errno(errno)),
                _ => Ok(()),
            };
            tracing::trace!(seq, ok = result.is_ok(), "dump complete");
            pending.complete(result);
            return true;
        }

        if let Some(decoder) = &pending.response
            && let Err(error) = lock(decoder).on_message(header, payload)
        {
            tracing::debug!(seq, msg_type = header.nlmsg_type, %error, "reply frame not decoded");
        }

        if header.is_error() {
            let result = match NlMsgError::from_bytes(payload) {
                Ok(err) if err.is_ack() => Ok(()),
                Ok(err) => Err(Error::from_errno(err.error)),
                Err(e) => Err(e),
            };
            tracing::trace!(seq, ok = result.is_ok(), "error frame");
            pending.complete(result);
        } else if !header.is_multi() {
            pending.complete(Ok(()));
        }
        true
    }

    fn notify(&self, header: &NlMsgHdr, payload: &[u8]) {
        match lock(&self.notify).as_mut() {
            Some(handler) => handler(header, payload),
            None => tracing::trace!(
                seq = header.nlmsg_seq,
                msg_type = header.nlmsg_type,
                "unmatched frame dropped"
            ),
        }
    }

    fn fail_all(&self) {
        let mut table = lock(&self.table);
        for (seq, pending) in table.iter_mut().filter(|(_, p)| !p.is_complete()) {
            tracing::debug!(seq = *seq, "failing request, endpoint gone");
            pending.complete(Err(Error::EndpointClosed));
        }
    }
}

/// Endpoint owner: the send and receive paths of the correlator.
struct Correlator {
    shared: Arc<Shared>,
}

impl Channel for Correlator {
    fn send_data(&mut self, buf: &mut [u8]) -> usize {
        let mut table = lock(&self.shared.table);
        let Some((seq, pending)) = table
            .iter_mut()
            .find(|(_, p)| p.state == PendingState::Loaded)
        else {
            return 0;
        };

        let len = pending.frame.len();
        if len > buf.len() {
            pending.complete(Err(Error::Truncated {
                expected: len,
                actual: buf.len(),
            }));
            return 0;
        }
        buf[..len].copy_from_slice(&pending.frame);
        let aligned = nlmsg_align(len).min(buf.len());
        buf[len..aligned].fill(0);

        pending.state = PendingState::Sent;
        if pending.response.is_none() {
            pending.complete(Ok(()));
        }
        tracing::trace!(seq = *seq, len = aligned, "frame sent");
        aligned
    }

    fn receive_data(&mut self, data: &[u8]) -> usize {
        let mut offset = 0;
        while offset < data.len() {
            match next_frame(&data[offset..]) {
                Frame::Complete {
                    header,
                    payload,
                    consumed,
                } => {
                    if !self.shared.dispatch(header, payload) {
                        self.shared.notify(header, payload);
                    }
                    offset += consumed;
                }
                // Frames never span datagrams; the rest of this one is lost.
                Frame::Partial => {
                    tracing::warn!(offset, len = data.len(), "truncated netlink frame, discarding datagram");
                    return data.len();
                }
                Frame::Malformed => {
                    tracing::warn!(offset, "malformed netlink header, discarding datagram");
                    return data.len();
                }
            }
        }
        offset
    }

    fn state_change(&mut self, state: EndpointState) {
        if state.contains(EndpointState::EXCEPTION) || !state.contains(EndpointState::OPEN) {
            self.shared.fail_all();
        }
    }
}

/// Blocking request/response API over one netlink endpoint.
pub struct Transport {
    shared: Arc<Shared>,
    endpoint: Arc<dyn Control>,
    sequences: SequenceAllocator,
    timeout: Option<Duration>,
    send_capacity: usize,
}

impl Transport {
    /// Open a kernel netlink socket for `config.protocol`, join
    /// `config.groups` and register it with `reactor`.
    pub fn open(reactor: &ReactorHandle, config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        let socket = socket::open(config.protocol, &config.groups)?;
        Self::with_link(reactor, socket, config)
    }

    /// Run the transport over any datagram link.
    pub fn with_link<L: Link + 'static>(reactor: &ReactorHandle, link: L, config: &TransportConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::default());
        let correlator = Correlator {
            shared: shared.clone(),
        };
        let endpoint = Endpoint::open(reactor, link, correlator, &config.endpoint)?;
        Ok(Self {
            shared,
            endpoint,
            sequences: SequenceAllocator::new(),
            timeout: config.timeout,
            send_capacity: config.endpoint.send_capacity,
        })
    }

    /// Send `request` and wait for its reply, decoded into `response`.
    ///
    /// Every frame carrying the request's sequence number is fed to
    /// `response` until the exchange completes: on an ACK, on a DONE for
    /// multi-part dumps, or on the first single-part data frame. A kernel
    /// error report becomes [`Error::Kernel`]. `timeout` of `None` waits
    /// forever.
    pub fn exchange<R: Response + 'static>(
        &self,
        request: &dyn Request,
        response: R,
        timeout: Option<Duration>,
    ) -> Result<R> {
        let response = Arc::new(Mutex::new(response));
        let decoder: Decoder = response.clone();
        self.submit(request, Some(decoder), timeout)?;

        let response = Arc::try_unwrap(response)
            .map_err(|_| Error::InvalidMessage("reply decoder still shared".into()))?;
        Ok(response.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    /// [`exchange`](Self::exchange) with the configured default deadline.
    pub fn call<R: Response + 'static>(&self, request: &dyn Request, response: R) -> Result<R> {
        self.exchange(request, response, self.timeout)
    }

    /// Send `request` without waiting for a reply.
    ///
    /// Returns once the frame has been written to the link. Replies, if the
    /// kernel sends any, reach the notification handler.
    pub fn post(&self, request: &dyn Request, timeout: Option<Duration>) -> Result<()> {
        self.submit(request, None, timeout)
    }

    fn submit(&self, request: &dyn Request, response: Option<Decoder>, timeout: Option<Duration>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::EndpointClosed);
        }

        let (done, completion) = mpsc::sync_channel(1);
        let seq = {
            let mut table = lock(&self.shared.table);
            let seq = self.sequences.allocate(|s| table.contains_key(&s));
            let frame = encode(request, seq)?;
            if frame.len() > self.send_capacity {
                return Err(Error::Truncated {
                    expected: frame.len(),
                    actual: self.send_capacity,
                });
            }
            table.insert(
                seq,
                Pending {
                    frame,
                    response,
                    state: PendingState::Loaded,
                    done,
                },
            );
            seq
        };
        tracing::trace!(seq, msg_type = request.msg_type(), "request queued");

        if !self.endpoint.trigger() {
            self.remove(seq);
            return Err(Error::EndpointClosed);
        }

        let outcome = match timeout {
            Some(timeout) => completion.recv_timeout(timeout),
            None => completion.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        self.remove(seq);

        match outcome {
            Ok(result) => result,
            // Completed between the deadline and the removal.
            Err(RecvTimeoutError::Timeout) => completion.try_recv().unwrap_or_else(|_| {
                tracing::debug!(seq, "request timed out");
                Err(Error::Timeout { seq })
            }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::EndpointClosed),
        }
    }

    fn remove(&self, seq: u32) {
        let entry = lock(&self.shared.table).remove(&seq);
        drop(entry);
    }

    /// Install the handler for frames no request claims: multicast
    /// notifications and replies that arrive after their caller gave up.
    pub fn set_notification_handler(&self, handler: impl FnMut(&NlMsgHdr, &[u8]) + Send + 'static) {
        *lock(&self.shared.notify) = Some(Box::new(handler));
    }

    /// Remove the notification handler; unmatched frames are dropped.
    pub fn clear_notification_handler(&self) {
        lock(&self.shared.notify).take();
    }

    /// Number of requests currently in the pending table.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.table).len()
    }

    /// The deadline used by [`call`](Self::call).
    pub fn default_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Check if the endpoint is open and healthy.
    pub fn is_open(&self) -> bool {
        let state = self.endpoint.state();
        state.contains(EndpointState::OPEN) && !state.contains(EndpointState::EXCEPTION)
    }

    /// Unregister the endpoint; in-flight callers fail with
    /// [`Error::EndpointClosed`]. Idempotent.
    ///
    /// Must not be called from a notification handler.
    pub fn close(&self) {
        self.endpoint.close();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.endpoint.state())
            .field("in_flight", &self.in_flight())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixDatagram;

    use super::*;
    use crate::config::ReactorConfig;
    use crate::netlink::message::{Message, NLM_F_ACK, NLM_F_MULTI, NLM_F_REQUEST, NlMsgType};
    use crate::reactor::Reactor;

    fn frame(msg_type: u16, flags: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
        encode(&Message::new(msg_type, flags).with_payload(payload.to_vec()), seq).unwrap()
    }

    fn read_seq(peer: &UnixDatagram) -> u32 {
        let mut buf = [0u8; 512];
        let n = peer.recv(&mut buf).unwrap();
        NlMsgHdr::from_bytes(&buf[..n]).unwrap().nlmsg_seq
    }

    fn setup() -> (Reactor, Transport, UnixDatagram) {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, peer) = UnixDatagram::pair().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let transport = Transport::with_link(&reactor.handle(), local, &TransportConfig::default()).unwrap();
        (reactor, transport, peer)
    }

    #[test]
    fn test_ack_completes_exchange() {
        let (_reactor, transport, peer) = setup();
        let server = std::thread::spawn(move || {
            let seq = read_seq(&peer);
            let mut ack = 0i32.to_ne_bytes().to_vec();
            ack.extend_from_slice(NlMsgHdr::new(NlMsgType::RTM_NEWADDR, 0).as_bytes());
            peer.send(&frame(NlMsgType::ERROR, 0, seq, &ack)).unwrap();
        });

        let request = Message::new(NlMsgType::RTM_NEWADDR, NLM_F_REQUEST | NLM_F_ACK);
        let reply = transport
            .exchange(&request, Message::default(), Some(Duration::from_secs(5)))
            .unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.error_code(), Some(0));
        assert_eq!(transport.in_flight(), 0);
        server.join().unwrap();
    }

    #[test]
    fn test_done_with_errno_fails() {
        let (_reactor, transport, peer) = setup();
        let server = std::thread::spawn(move || {
            let seq = read_seq(&peer);
            peer.send(&frame(NlMsgType::DONE, NLM_F_MULTI, seq, &(-1i32).to_ne_bytes()))
                .unwrap();
        });

        let request = Message::new(NlMsgType::RTM_GETLINK, NLM_F_REQUEST);
        let err = transport
            .exchange(&request, Message::default(), Some(Duration::from_secs(5)))
            .unwrap_err();
        assert!(err.is_permission_denied());
        server.join().unwrap();
    }

    #[test]
    fn test_oversized_request_rejected() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, _peer) = UnixDatagram::pair().unwrap();
        let config = TransportConfig::default()
            .endpoint(crate::config::EndpointConfig::default().send_capacity(32));
        let transport = Transport::with_link(&reactor.handle(), local, &config).unwrap();

        let big = Message::noop().with_payload(vec![0u8; 64]);
        assert!(matches!(
            transport.post(&big, Some(Duration::from_secs(1))),
            Err(Error::Truncated { .. })
        ));
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn test_closed_transport_rejects_requests() {
        let (reactor, transport, _peer) = setup();
        transport.close();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.post(&Message::noop(), None),
            Err(Error::EndpointClosed)
        ));
        assert!(reactor.is_empty());
    }
}
