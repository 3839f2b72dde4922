//! Thin wrapper over the epoll readiness set.
//!
//! Registrations are always edge-triggered and watch for peer hangup;
//! connection fds additionally carry the one-shot flag, which is the
//! mutual-exclusion token between the event loop and whichever worker
//! currently holds the connection.

use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};
use tracing::trace;

/// Readiness direction for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Read,
    Write,
}

impl Interest {
    #[inline]
    fn bits(self) -> u32 {
        match self {
            Interest::Read => libc::EPOLLIN as u32,
            Interest::Write => libc::EPOLLOUT as u32,
        }
    }
}

/// Owned epoll instance. All mutation goes through the event loop except
/// [`rearm`](Epoll::rearm), which workers invoke after finishing a
/// one-shot-held connection.
#[derive(Debug)]
pub(crate) struct Epoll {
    fd: OwnedFd,
}

const BASE_EVENTS: u32 = (libc::EPOLLRDHUP | libc::EPOLLET) as u32;

impl Epoll {
    pub(crate) fn new() -> io::Result<Self> {
        // Safety: epoll_create1 returns a fresh fd or -1.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        // Safety: fd is a valid, owned descriptor.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    #[inline]
    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Registers `fd` and switches it to non-blocking mode. Connection
    /// fds pass `one_shot = true`; the listener and the signal pipe stay
    /// permanently armed.
    pub(crate) fn add(&self, fd: RawFd, interest: Interest, one_shot: bool) -> io::Result<()> {
        let mut events = interest.bits() | BASE_EVENTS;
        if one_shot {
            events |= libc::EPOLLONESHOT as u32;
        }
        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        // Safety: event points to a valid struct for the duration of the call.
        if unsafe { libc::epoll_ctl(self.raw(), libc::EPOLL_CTL_ADD, fd, &mut event) } == -1 {
            return Err(io::Error::last_os_error());
        }
        set_non_blocking(fd)
    }

    /// Re-arms a one-shot registration for its next event.
    ///
    /// Failures are swallowed: a worker may race the event loop closing the
    /// fd, and a vanished registration simply means there is nothing left
    /// to re-arm.
    pub(crate) fn rearm(&self, fd: RawFd, interest: Interest) {
        let mut event = libc::epoll_event {
            events: interest.bits() | BASE_EVENTS | libc::EPOLLONESHOT as u32,
            u64: fd as u64,
        };
        // Safety: as in `add`.
        if unsafe { libc::epoll_ctl(self.raw(), libc::EPOLL_CTL_MOD, fd, &mut event) } == -1 {
            trace!(fd, "rearm on vanished fd ignored");
        }
    }

    /// Drops `fd` from the readiness set. Safe to call on fds that were
    /// never (or are no longer) registered.
    pub(crate) fn delete(&self, fd: RawFd) {
        // Safety: a null event pointer is accepted for EPOLL_CTL_DEL.
        unsafe {
            libc::epoll_ctl(self.raw(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Blocks until at least one event or a signal arrives; fills `events`
    /// from the front and returns the count.
    pub(crate) fn wait(&self, events: &mut [libc::epoll_event]) -> io::Result<usize> {
        // Safety: the buffer is valid for `events.len()` entries.
        let count = unsafe {
            libc::epoll_wait(
                self.raw(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                -1,
            )
        };
        if count == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(count as usize)
    }
}

fn set_non_blocking(fd: RawFd) -> io::Result<()> {
    // Safety: plain fcntl on a caller-supplied fd.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
