//! Wait-for-readiness primitive plus the reactor's own wake handle.
//!
//! - On Linux: eventfd for the wake slot, `poll(2)` for the wait.
//! - On other Unix: a non-blocking self-pipe for the wake slot.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Wake handle occupying slot 0 of the wait-set.
pub(crate) trait Waker: Send + Sync {
    /// Descriptor that polls readable once `wake` has been called.
    fn as_raw_fd(&self) -> RawFd;

    /// Make a blocked `wait` return.
    fn wake(&self);

    /// Reset the readable state after a wake was observed.
    fn drain(&self);
}

/// Create the wake handle for this platform.
pub(crate) fn waker() -> io::Result<Box<dyn Waker>> {
    platform::create().map(|w| Box::new(w) as Box<dyn Waker>)
}

/// Block until at least one descriptor in `fds` is ready or `timeout` expires.
///
/// `None` waits indefinitely. Interrupted waits are retried.
pub(crate) fn wait(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    let timeout_ms: libc::c_int = timeout
        .map(|d| d.as_millis().try_into().unwrap_or(libc::c_int::MAX))
        .unwrap_or(-1);

    loop {
        // SAFETY: fds is a live, exclusively borrowed slice of pollfd structs.
        let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if res >= 0 {
            return Ok(res as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }
}

fn write_token(fd: RawFd, payload: &[u8]) {
    loop {
        // SAFETY: payload is a live stack buffer of the given length.
        let ret = unsafe { libc::write(fd, payload.as_ptr().cast(), payload.len()) };
        if ret >= 0 {
            return;
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            // Already signalled.
            io::ErrorKind::WouldBlock => return,
            _ => {
                tracing::debug!(fd, error = %err, "wake write failed");
                return;
            }
        }
    }
}

fn drain_fd(fd: RawFd, scratch: &mut [u8]) {
    loop {
        // SAFETY: scratch is a live stack buffer of the given length.
        let ret = unsafe { libc::read(fd, scratch.as_mut_ptr().cast(), scratch.len()) };
        if ret > 0 && (ret as usize) == scratch.len() {
            // A pipe may hold more tokens.
            continue;
        }
        if ret >= 0 {
            return;
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return,
            _ => {
                tracing::debug!(fd, error = %err, "wake drain failed");
                return;
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use super::{Waker, drain_fd, write_token};

    pub(super) struct EventFd(OwnedFd);

    pub(super) fn create() -> io::Result<EventFd> {
        // SAFETY: eventfd is invoked with valid flags and no shared state.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by eventfd and is owned by nobody else.
        Ok(EventFd(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    impl Waker for EventFd {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }

        fn wake(&self) {
            write_token(self.0.as_raw_fd(), &1u64.to_ne_bytes());
        }

        fn drain(&self) {
            // One 8-byte read resets the counter.
            let mut payload = [0u8; 8];
            drain_fd(self.0.as_raw_fd(), &mut payload);
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use super::{Waker, drain_fd, write_token};

    pub(super) struct SelfPipe {
        read: OwnedFd,
        write: OwnedFd,
    }

    fn set_flags(fd: RawFd) -> io::Result<()> {
        // SAFETY: fcntl on a descriptor we own, with valid commands.
        unsafe {
            let fl = libc::fcntl(fd, libc::F_GETFL);
            if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub(super) fn create() -> io::Result<SelfPipe> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe writes.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: both descriptors were just created and are owned by nobody else.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_flags(read.as_raw_fd())?;
        set_flags(write.as_raw_fd())?;
        Ok(SelfPipe { read, write })
    }

    impl Waker for SelfPipe {
        fn as_raw_fd(&self) -> RawFd {
            self.read.as_raw_fd()
        }

        fn wake(&self) {
            write_token(self.write.as_raw_fd(), &[1u8]);
        }

        fn drain(&self) {
            let mut scratch = [0u8; 64];
            drain_fd(self.read.as_raw_fd(), &mut scratch);
        }
    }
}
