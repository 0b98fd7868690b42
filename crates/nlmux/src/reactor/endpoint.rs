//! Buffered endpoint driven by the reactor.
//!
//! An [`Endpoint`] couples a non-blocking [`Link`] (the OS handle) with a
//! [`Channel`] (the owner's protocol logic). The reactor calls the read and
//! write paths; the channel callbacks therefore always run on the reactor
//! thread, with the endpoint's I/O lock held.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use super::{Dispatch, EndpointId, Interest, ReactorHandle, lock};
use crate::config::EndpointConfig;
use crate::error::Result;

bitflags! {
    /// Endpoint state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EndpointState: u8 {
        /// Registered with the reactor.
        const OPEN = 0x01;
        /// Received bytes are buffered that the owner has not consumed.
        const READ = 0x02;
        /// Buffered outbound bytes wait for the link to become writable.
        const WRITE = 0x04;
        /// The owner asked for a send-path run.
        const WRITE_REQUESTED = 0x08;
        /// A hard I/O error occurred; terminal until `close()`.
        const EXCEPTION = 0x10;
    }
}

/// Owner side of an endpoint.
///
/// Invoked only from the reactor thread. Implementations must not call
/// [`Endpoint::close`] from inside these callbacks.
pub trait Channel: Send {
    /// Fill `buf` with the next outbound chunk; 0 means nothing to send.
    fn send_data(&mut self, buf: &mut [u8]) -> usize;

    /// Consume a prefix of the buffered inbound bytes; returns its length.
    fn receive_data(&mut self, data: &[u8]) -> usize;

    /// The endpoint state changed (hard error or close).
    fn state_change(&mut self, _state: EndpointState) {}
}

/// I/O semantics of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Byte stream; a zero-length read means the peer shut down.
    Stream,
    /// Message oriented; a zero-length read is an empty datagram.
    Datagram,
    /// Character device; a zero-length read means nothing is pending.
    Serial,
}

/// OS handle an endpoint performs I/O on.
pub trait Link: AsRawFd + Send {
    /// Read available bytes without blocking.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as much of `buf` as the OS accepts without blocking.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Stream, datagram or serial semantics.
    fn kind(&self) -> LinkKind;

    /// Put the handle into non-blocking mode.
    fn prepare(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Type-erased owner controls for an open endpoint.
pub trait Control: Send + Sync {
    /// Ask the reactor to run the send path soon.
    fn trigger(&self) -> bool;

    /// Unregister synchronously and mark closed.
    fn close(&self);

    /// Current state bits.
    fn state(&self) -> EndpointState;
}

struct EndpointIo<C, L> {
    link: L,
    channel: C,
    tx: Box<[u8]>,
    tx_offset: usize,
    tx_len: usize,
    rx: Box<[u8]>,
    rx_len: usize,
}

/// A link plus its buffers and owner, registered with a reactor while open.
pub struct Endpoint<C, L> {
    state: AtomicU8,
    fd: RawFd,
    kind: LinkKind,
    io: Mutex<EndpointIo<C, L>>,
    reactor: ReactorHandle,
    id: Mutex<Option<EndpointId>>,
}

impl<C, L> Endpoint<C, L>
where
    C: Channel + 'static,
    L: Link + 'static,
{
    /// Allocate the buffers and register with `reactor`.
    pub fn open(reactor: &ReactorHandle, mut link: L, channel: C, config: &EndpointConfig) -> Result<Arc<Self>> {
        config.validate()?;
        link.prepare()?;

        let fd = link.as_raw_fd();
        let kind = link.kind();
        let endpoint = Arc::new(Self {
            state: AtomicU8::new(EndpointState::OPEN.bits()),
            fd,
            kind,
            io: Mutex::new(EndpointIo {
                link,
                channel,
                tx: vec![0u8; config.send_capacity].into_boxed_slice(),
                tx_offset: 0,
                tx_len: 0,
                rx: vec![0u8; config.receive_capacity].into_boxed_slice(),
                rx_len: 0,
            }),
            reactor: reactor.clone(),
            id: Mutex::new(None),
        });

        let entry: Arc<dyn Dispatch> = endpoint.clone();
        let id = reactor.register(entry)?;
        *lock(&endpoint.id) = Some(id);

        tracing::debug!(fd, ?kind, "endpoint open");
        Ok(endpoint)
    }
}

impl<C: Channel, L: Link> Endpoint<C, L> {
    /// Current state bits.
    pub fn state(&self) -> EndpointState {
        EndpointState::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    /// Check if the endpoint is open and healthy.
    pub fn is_open(&self) -> bool {
        let state = self.state();
        state.contains(EndpointState::OPEN) && !state.contains(EndpointState::EXCEPTION)
    }

    /// Ask the reactor to run the send path.
    ///
    /// Returns false when the endpoint is closed or failed.
    pub fn trigger(&self) -> bool {
        let state = self.state();
        if !state.contains(EndpointState::OPEN) || state.contains(EndpointState::EXCEPTION) {
            return false;
        }
        let prev = self.set(EndpointState::WRITE_REQUESTED);
        if !prev.intersects(EndpointState::WRITE_REQUESTED | EndpointState::WRITE) {
            self.reactor.wake();
        }
        true
    }

    /// Unregister from the reactor, then notify the owner. Idempotent.
    ///
    /// Must not be called from inside a [`Channel`] callback.
    pub fn close(&self) {
        let prev = self.clear(EndpointState::OPEN);
        if !prev.contains(EndpointState::OPEN) {
            return;
        }

        let id = lock(&self.id).take();
        if let Some(id) = id {
            self.reactor.unregister(id);
        }

        let state = self.state();
        lock(&self.io).channel.state_change(state);
        tracing::debug!(fd = self.fd, "endpoint closed");
    }

    /// Run `f` against the owner with the I/O lock held.
    pub fn with_channel<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut lock(&self.io).channel)
    }

    fn set(&self, bits: EndpointState) -> EndpointState {
        EndpointState::from_bits_truncate(self.state.fetch_or(bits.bits(), Ordering::AcqRel))
    }

    fn clear(&self, bits: EndpointState) -> EndpointState {
        EndpointState::from_bits_truncate(self.state.fetch_and(!bits.bits(), Ordering::AcqRel))
    }

    fn fail(&self, io: &mut EndpointIo<C, L>, error: io::Error) {
        self.set(EndpointState::EXCEPTION);
        self.clear(EndpointState::WRITE | EndpointState::WRITE_REQUESTED);
        tracing::error!(fd = self.fd, %error, "endpoint failed");
        io.channel.state_change(self.state());
    }

    /// Offer buffered bytes until the owner stops consuming.
    fn deliver(io: &mut EndpointIo<C, L>) {
        while io.rx_len > 0 {
            let consumed = io.channel.receive_data(&io.rx[..io.rx_len]).min(io.rx_len);
            if consumed == 0 {
                break;
            }
            io.rx.copy_within(consumed..io.rx_len, 0);
            io.rx_len -= consumed;
        }
    }

    fn read_path(&self) {
        let mut guard = lock(&self.io);
        let io = &mut *guard;

        loop {
            if io.rx_len == io.rx.len() {
                tracing::warn!(
                    fd = self.fd,
                    bytes = io.rx_len,
                    "receive buffer full and not consumed, discarding"
                );
                io.rx_len = 0;
            }

            let read = match io.link.read(&mut io.rx[io.rx_len..]) {
                Ok(0) if self.kind == LinkKind::Stream => {
                    let error = io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the connection");
                    self.fail(io, error);
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                Err(e) => {
                    self.fail(io, e);
                    break;
                }
            };
            io.rx_len += read;
            tracing::trace!(fd = self.fd, read, buffered = io.rx_len, "read");

            Self::deliver(io);

            if read == 0 {
                break;
            }
        }

        if io.rx_len > 0 {
            self.set(EndpointState::READ);
        } else {
            self.clear(EndpointState::READ);
        }
    }

    fn write_path(&self) {
        self.clear(EndpointState::WRITE_REQUESTED);
        let mut guard = lock(&self.io);
        let io = &mut *guard;

        loop {
            if io.tx_offset == io.tx_len {
                io.tx_offset = 0;
                io.tx_len = io.channel.send_data(&mut io.tx).min(io.tx.len());
                if io.tx_len == 0 {
                    self.clear(EndpointState::WRITE);
                    break;
                }
            }

            match io.link.write(&io.tx[io.tx_offset..io.tx_len]) {
                Ok(0) => {
                    self.set(EndpointState::WRITE);
                    break;
                }
                Ok(n) => {
                    tracing::trace!(fd = self.fd, written = n, "write");
                    io.tx_offset += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.set(EndpointState::WRITE);
                    break;
                }
                Err(e) => {
                    self.fail(io, e);
                    break;
                }
            }
        }
    }
}

impl<C: Channel, L: Link> Dispatch for Endpoint<C, L> {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn interest(&self) -> Option<Interest> {
        let state = self.state();
        if !state.contains(EndpointState::OPEN) || state.contains(EndpointState::EXCEPTION) {
            return None;
        }
        let mut interest = Interest::READABLE;
        if state.intersects(EndpointState::WRITE | EndpointState::WRITE_REQUESTED) {
            interest |= Interest::WRITABLE;
        }
        Some(interest)
    }

    fn on_readable(&self) {
        self.read_path();
    }

    fn on_writable(&self) {
        self.write_path();
    }

    fn on_shutdown(&self) {
        let prev = self.clear(EndpointState::OPEN);
        if !prev.contains(EndpointState::OPEN) {
            return;
        }
        lock(&self.id).take();

        let state = self.state();
        lock(&self.io).channel.state_change(state);
        tracing::debug!(fd = self.fd, "endpoint released by reactor shutdown");
    }
}

impl<C: Channel, L: Link> Control for Endpoint<C, L> {
    fn trigger(&self) -> bool {
        Endpoint::trigger(self)
    }

    fn close(&self) {
        Endpoint::close(self)
    }

    fn state(&self) -> EndpointState {
        Endpoint::state(self)
    }
}

impl<C, L> std::fmt::Debug for Endpoint<C, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("fd", &self.fd)
            .field("kind", &self.kind)
            .field(
                "state",
                &EndpointState::from_bits_truncate(self.state.load(Ordering::Relaxed)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::{UnixDatagram, UnixStream};
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::config::ReactorConfig;
    use crate::reactor::Reactor;

    /// Echo channel: queues replies for everything it consumes.
    struct Echo {
        outbound: Vec<u8>,
        seen: mpsc::Sender<Vec<u8>>,
        states: mpsc::Sender<EndpointState>,
        /// Consume only frames of exactly this size (0 = anything).
        frame: usize,
    }

    impl Channel for Echo {
        fn send_data(&mut self, buf: &mut [u8]) -> usize {
            let n = self.outbound.len().min(buf.len());
            buf[..n].copy_from_slice(&self.outbound[..n]);
            self.outbound.drain(..n);
            n
        }

        fn receive_data(&mut self, data: &[u8]) -> usize {
            let n = if self.frame == 0 {
                data.len()
            } else if data.len() >= self.frame {
                self.frame
            } else {
                0
            };
            if n > 0 {
                self.seen.send(data[..n].to_vec()).ok();
            }
            n
        }

        fn state_change(&mut self, state: EndpointState) {
            self.states.send(state).ok();
        }
    }

    fn echo(frame: usize) -> (Echo, mpsc::Receiver<Vec<u8>>, mpsc::Receiver<EndpointState>) {
        let (seen, seen_rx) = mpsc::channel();
        let (states, states_rx) = mpsc::channel();
        (
            Echo {
                outbound: Vec::new(),
                seen,
                states,
                frame,
            },
            seen_rx,
            states_rx,
        )
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_trigger_sends_owner_data() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, peer) = UnixDatagram::pair().unwrap();
        let (channel, _seen, _states) = echo(0);
        let endpoint = Endpoint::open(&reactor.handle(), local, channel, &EndpointConfig::default()).unwrap();

        endpoint.with_channel(|c| c.outbound.extend_from_slice(b"hello"));
        assert!(endpoint.trigger());

        peer.set_read_timeout(Some(WAIT)).unwrap();
        let mut buf = [0u8; 16];
        let n = peer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        endpoint.close();
        assert!(!endpoint.trigger());
        assert!(reactor.is_empty());
    }

    #[test]
    fn test_stream_reassembles_frames() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, mut peer) = UnixStream::pair().unwrap();
        let (channel, seen, _states) = echo(4);
        let endpoint = Endpoint::open(&reactor.handle(), local, channel, &EndpointConfig::default()).unwrap();

        use std::io::Write;
        peer.write_all(b"ab").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        peer.write_all(b"cdefgh").unwrap();

        assert_eq!(seen.recv_timeout(WAIT).unwrap(), b"abcd");
        assert_eq!(seen.recv_timeout(WAIT).unwrap(), b"efgh");
        endpoint.close();
    }

    #[test]
    fn test_peer_shutdown_raises_exception() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, peer) = UnixStream::pair().unwrap();
        let (channel, _seen, states) = echo(0);
        let endpoint = Endpoint::open(&reactor.handle(), local, channel, &EndpointConfig::default()).unwrap();

        drop(peer);
        let state = states.recv_timeout(WAIT).unwrap();
        assert!(state.contains(EndpointState::EXCEPTION));
        assert!(!endpoint.is_open());
        assert!(!endpoint.trigger());

        // Parked, still registered until closed.
        assert_eq!(reactor.len(), 1);
        endpoint.close();
        assert!(reactor.is_empty());
        let closed = states.recv_timeout(WAIT).unwrap();
        assert!(!closed.contains(EndpointState::OPEN));
    }

    #[test]
    fn test_reactor_shutdown_closes_endpoint() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, _peer) = UnixDatagram::pair().unwrap();
        let (channel, _seen, states) = echo(0);
        let endpoint = Endpoint::open(&reactor.handle(), local, channel, &EndpointConfig::default()).unwrap();
        assert!(endpoint.is_open());

        drop(reactor);
        let state = states.recv_timeout(WAIT).unwrap();
        assert!(!state.contains(EndpointState::OPEN));
        assert!(!endpoint.is_open());
        assert!(!endpoint.trigger());

        // Already released; close does not notify twice.
        endpoint.close();
        assert!(states.try_recv().is_err());
    }

    #[test]
    fn test_full_buffer_wraps() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, mut peer) = UnixStream::pair().unwrap();
        // Never consumes anything shorter than 16 bytes; buffer holds 8.
        let (channel, seen, _states) = echo(16);
        let config = EndpointConfig::default().receive_capacity(8);
        let endpoint = Endpoint::open(&reactor.handle(), local, channel, &config).unwrap();

        use std::io::Write;
        peer.write_all(&[1u8; 12]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(seen.try_recv().is_err());
        assert!(endpoint.is_open());
        endpoint.close();
    }

    #[test]
    fn test_open_rejects_bad_config() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let (local, _peer) = UnixDatagram::pair().unwrap();
        let (channel, _seen, _states) = echo(0);
        let config = EndpointConfig::default().send_capacity(0);
        assert!(Endpoint::open(&reactor.handle(), local, channel, &config).is_err());
        assert!(reactor.is_empty());
    }
}
