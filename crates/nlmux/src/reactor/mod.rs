//! Single-threaded I/O reactor.
//!
//! One worker thread per [`Reactor`] multiplexes every registered endpoint
//! with `poll(2)`. Slot 0 of the wait-set is the reactor's own wake handle.
//!
//! # Example
//!
//! ```ignore
//! use nlmux::config::{EndpointConfig, ReactorConfig};
//! use nlmux::reactor::{Endpoint, Reactor};
//!
//! let reactor = Reactor::new(ReactorConfig::default())?;
//! let endpoint = Endpoint::open(&reactor.handle(), stream, channel, &EndpointConfig::default())?;
//! endpoint.trigger();
//! // ...
//! endpoint.close();
//! ```
//!
//! Teardown order: close every endpoint, then drop the `Reactor` (which
//! joins the worker thread).

mod arena;
pub mod endpoint;
mod poller;

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{JoinHandle, ThreadId};

use bitflags::bitflags;

pub use arena::EndpointId;
pub use endpoint::{Channel, Control, Endpoint, EndpointState, Link, LinkKind};

use self::arena::Arena;
use self::poller::Waker;
use crate::config::ReactorConfig;
use crate::error::{Error, Result};

bitflags! {
    /// Readiness an endpoint wants to be told about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READABLE = 0x1;
        const WRITABLE = 0x2;
    }
}

impl Interest {
    fn poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.contains(Interest::READABLE) {
            events |= libc::POLLIN;
        }
        if self.contains(Interest::WRITABLE) {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// What the reactor needs from a registered object.
///
/// All methods except [`on_shutdown`](Dispatch::on_shutdown) are invoked on
/// the reactor thread only.
pub trait Dispatch: Send + Sync {
    /// Descriptor to poll.
    fn raw_fd(&self) -> RawFd;

    /// Current interest; `None` parks the endpoint (kept registered, never
    /// reported ready).
    fn interest(&self) -> Option<Interest>;

    /// The descriptor is readable, hung up or in error.
    fn on_readable(&self);

    /// The descriptor is writable.
    fn on_writable(&self);

    /// The reactor stopped while the object was still registered.
    ///
    /// Runs on the thread that shut the reactor down, after the worker has
    /// exited.
    fn on_shutdown(&self) {}
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

struct Admin {
    arena: Arena,
    /// The worker is between its first and last callback of an iteration.
    busy: bool,
    /// Completed iterations.
    epoch: u64,
    thread: Option<JoinHandle<()>>,
}

struct Inner {
    config: ReactorConfig,
    waker: Box<dyn Waker>,
    admin: Mutex<Admin>,
    settled: Condvar,
    shutdown: AtomicBool,
    thread_id: OnceLock<ThreadId>,
}

impl Inner {
    fn is_live(&self, id: EndpointId) -> bool {
        lock(&self.admin).arena.is_live(id)
    }
}

/// Cloneable capability to register with, and wake, a reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    inner: Arc<Inner>,
}

impl ReactorHandle {
    /// Add an endpoint to the wait-set.
    ///
    /// Starts the worker thread on first use, otherwise wakes it so the next
    /// iteration polls the new endpoint. Registering the same object twice is
    /// a programming error.
    pub fn register(&self, entry: Arc<dyn Dispatch>) -> Result<EndpointId> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::ReactorShutdown);
        }

        let mut admin = lock(&self.inner.admin);
        // Shutdown drains the arena under this lock.
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::ReactorShutdown);
        }
        if admin.arena.contains(&entry) {
            debug_assert!(false, "endpoint registered twice");
            return Err(Error::AlreadyRegistered);
        }

        let fd = entry.raw_fd();
        let id = admin.arena.insert(entry);

        if admin.thread.is_none() {
            let inner = self.inner.clone();
            let spawned = std::thread::Builder::new()
                .name(self.inner.config.effective_thread_name())
                .spawn(move || run(inner));
            match spawned {
                Ok(handle) => {
                    let _ = self.inner.thread_id.set(handle.thread().id());
                    admin.thread = Some(handle);
                }
                Err(e) => {
                    admin.arena.remove(id);
                    let dropped = admin.arena.purge();
                    drop(admin);
                    drop(dropped);
                    return Err(e.into());
                }
            }
        } else {
            self.inner.waker.wake();
        }

        tracing::debug!(fd, slot = id.index(), "endpoint registered");
        Ok(id)
    }

    /// Remove an endpoint from the wait-set.
    ///
    /// Does not return until the reactor will no longer call into the
    /// endpoint. Called from the reactor thread itself it returns at once,
    /// since no further callback for it can start. Unknown or stale ids are
    /// ignored.
    pub fn unregister(&self, id: EndpointId) {
        let mut admin = lock(&self.inner.admin);
        if !admin.arena.remove(id) {
            return;
        }
        tracing::debug!(slot = id.index(), "endpoint unregistered");

        let dropped = if admin.busy {
            Vec::new()
        } else {
            admin.arena.purge()
        };

        if admin.busy && !self.is_reactor_thread() {
            self.inner.waker.wake();
            let epoch = admin.epoch;
            while admin.busy && admin.epoch == epoch {
                admin = match self.inner.settled.wait(admin) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        } else {
            self.inner.waker.wake();
        }

        drop(admin);
        drop(dropped);
    }

    /// Make a blocked wait return immediately.
    pub fn wake(&self) {
        self.inner.waker.wake();
    }

    /// Number of live endpoints.
    pub fn len(&self) -> usize {
        lock(&self.inner.admin).arena.len()
    }

    /// Check if no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completed loop iterations since the worker started.
    pub fn iterations(&self) -> u64 {
        lock(&self.inner.admin).epoch
    }

    /// Check if the caller is running on the reactor thread.
    pub fn is_reactor_thread(&self) -> bool {
        self.inner.thread_id.get() == Some(&std::thread::current().id())
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.waker.wake();

        let (thread, entries) = {
            let mut admin = lock(&self.inner.admin);
            (admin.thread.take(), admin.arena.drain())
        };
        self.inner.settled.notify_all();

        let mut stopped = true;
        if let Some(thread) = thread {
            if thread.thread().id() == std::thread::current().id() {
                stopped = false;
            } else if thread.join().is_err() {
                tracing::error!("reactor thread panicked");
            }
        }

        // From inside a callback the caller still holds an endpoint lock.
        if stopped {
            for entry in &entries {
                entry.on_shutdown();
            }
        }
        tracing::debug!(released = entries.len(), "reactor shut down");
        drop(entries);
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("family", &self.inner.config.family)
            .field("endpoints", &self.len())
            .finish()
    }
}

/// Owner of a reactor and its worker thread.
///
/// Dropping it stops and joins the thread; handles held elsewhere then fail
/// to register with [`Error::ReactorShutdown`].
#[derive(Debug)]
pub struct Reactor {
    handle: ReactorHandle,
}

impl Reactor {
    /// Create a reactor. The worker thread starts with the first endpoint.
    pub fn new(config: ReactorConfig) -> Result<Self> {
        config.validate()?;
        let waker = poller::waker()?;
        let inner = Inner {
            config,
            waker,
            admin: Mutex::new(Admin {
                arena: Arena::default(),
                busy: false,
                epoch: 0,
                thread: None,
            }),
            settled: Condvar::new(),
            shutdown: AtomicBool::new(false),
            thread_id: OnceLock::new(),
        };
        Ok(Self {
            handle: ReactorHandle {
                inner: Arc::new(inner),
            },
        })
    }

    /// Handle for endpoints and transports.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Stop the worker and release every remaining endpoint.
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

impl std::ops::Deref for Reactor {
    type Target = ReactorHandle;

    fn deref(&self) -> &ReactorHandle {
        &self.handle
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

fn run(inner: Arc<Inner>) {
    let increment = inner.config.slot_increment;
    let mut capacity = 0;
    let mut fds: Vec<libc::pollfd> = Vec::new();
    let mut targets: Vec<(EndpointId, Arc<dyn Dispatch>)> = Vec::new();

    tracing::debug!(family = ?inner.config.family, "reactor thread started");

    while !inner.shutdown.load(Ordering::Acquire) {
        fds.clear();
        targets.clear();
        {
            let admin = lock(&inner.admin);
            let wanted = admin.arena.len() + 1;
            if wanted > capacity {
                capacity = wanted.div_ceil(increment) * increment;
                fds.reserve_exact(capacity);
                tracing::trace!(slots = capacity, "wait-set grown");
            }

            fds.push(libc::pollfd {
                fd: inner.waker.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            for (id, entry) in admin.arena.live_entries() {
                let (fd, events) = match entry.interest() {
                    Some(interest) => (entry.raw_fd(), interest.poll_events()),
                    None => (-1, 0),
                };
                fds.push(libc::pollfd {
                    fd,
                    events,
                    revents: 0,
                });
                targets.push((id, entry.clone()));
            }
        }

        let timeout = if targets.is_empty() {
            None
        } else {
            inner.config.poll_timeout
        };

        if let Err(e) = poller::wait(&mut fds, timeout) {
            tracing::warn!(error = %e, "wait failed, treating as idle");
            fds.iter_mut().for_each(|p| p.revents = 0);
        }

        if fds[0].revents != 0 {
            inner.waker.drain();
        }

        lock(&inner.admin).busy = true;
        for (slot, (id, entry)) in targets.iter().enumerate() {
            let revents = fds[slot + 1].revents;
            if revents == 0 {
                continue;
            }
            if revents & READ_EVENTS != 0 && inner.is_live(*id) {
                entry.on_readable();
            }
            if revents & libc::POLLOUT != 0 && inner.is_live(*id) {
                entry.on_writable();
            }
        }
        targets.clear();

        let dropped = {
            let mut admin = lock(&inner.admin);
            admin.busy = false;
            admin.epoch += 1;
            admin.arena.purge()
        };
        inner.settled.notify_all();
        drop(dropped);
    }

    tracing::debug!("reactor thread stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;

    /// Readable-forever endpoint that counts callbacks.
    struct Counter {
        fd: std::os::unix::net::UnixDatagram,
        _peer: std::os::unix::net::UnixDatagram,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Counter {
        fn new(delay: Duration) -> Arc<Self> {
            let (fd, peer) = std::os::unix::net::UnixDatagram::pair().unwrap();
            peer.send(b"x").unwrap();
            Arc::new(Self {
                fd,
                _peer: peer,
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    impl Dispatch for Counter {
        fn raw_fd(&self) -> RawFd {
            use std::os::fd::AsRawFd;
            self.fd.as_raw_fd()
        }

        fn interest(&self) -> Option<Interest> {
            Some(Interest::READABLE)
        }

        fn on_readable(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
        }

        fn on_writable(&self) {}
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_idle_reactor_blocks() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let counter = Counter::new(Duration::ZERO);
        let id = reactor.register(counter.clone()).unwrap();
        wait_for(|| counter.calls.load(Ordering::SeqCst) > 0);
        reactor.unregister(id);
        assert!(reactor.is_empty());

        // With nothing registered the loop must sit in its wait.
        let before = reactor.iterations();
        std::thread::sleep(Duration::from_millis(100));
        assert!(reactor.iterations() <= before + 2);

        // A registration wakes it promptly.
        let again = Counter::new(Duration::ZERO);
        let started = Instant::now();
        let id = reactor.register(again.clone()).unwrap();
        wait_for(|| again.calls.load(Ordering::SeqCst) > 0);
        assert!(started.elapsed() < Duration::from_secs(1));
        reactor.unregister(id);
    }

    #[test]
    fn test_unregister_is_synchronous() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let counter = Counter::new(Duration::from_millis(20));
        let id = reactor.register(counter.clone()).unwrap();
        wait_for(|| counter.calls.load(Ordering::SeqCst) > 0);

        reactor.unregister(id);
        let after = counter.calls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.calls.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_wait_set_grows_past_increment() {
        let reactor = Reactor::new(ReactorConfig::default().slot_increment(2)).unwrap();
        let counters: Vec<_> = (0..5).map(|_| Counter::new(Duration::ZERO)).collect();
        let ids: Vec<_> = counters
            .iter()
            .map(|p| reactor.register(p.clone()).unwrap())
            .collect();
        assert_eq!(reactor.len(), 5);
        wait_for(|| counters.iter().all(|p| p.calls.load(Ordering::SeqCst) > 0));
        for id in ids {
            reactor.unregister(id);
        }
        assert!(reactor.is_empty());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "registered twice"))]
    fn test_double_register() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let counter = Counter::new(Duration::ZERO);
        reactor.register(counter.clone()).unwrap();
        assert!(matches!(
            reactor.register(counter),
            Err(Error::AlreadyRegistered)
        ));
    }

    #[test]
    fn test_register_after_shutdown() {
        let reactor = Reactor::new(ReactorConfig::default()).unwrap();
        let handle = reactor.handle();
        drop(reactor);
        assert!(matches!(
            handle.register(Counter::new(Duration::ZERO)),
            Err(Error::ReactorShutdown)
        ));
    }
}
