//! Signal delivery into the event loop.
//!
//! Handlers must stay async-signal-safe, so they do exactly one thing:
//! forward the signal number as a single byte into a non-blocking socket
//! pair. The event loop reads the other end like any other fd and reacts
//! outside signal context.

use socket2::{Domain, Socket, Type};
use std::{
    io,
    mem,
    os::fd::{AsRawFd, RawFd},
    ptr,
    sync::atomic::{AtomicI32, Ordering},
};

/// Write end of the self-pipe, shared with the signal handlers.
static PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// Forwards `sig` into the self-pipe. Runs in signal context: only the
/// atomic load, `send`, and errno juggling are permitted here.
extern "C" fn forward_signal(sig: libc::c_int) {
    let fd = PIPE_WRITE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let byte = sig as u8;
    // Safety: send on a valid non-blocking fd with a one-byte stack buffer.
    unsafe {
        let saved_errno = *libc::__errno_location();
        libc::send(fd, &byte as *const u8 as *const libc::c_void, 1, 0);
        *libc::__errno_location() = saved_errno;
    }
}

/// Connected socket pair carrying signal numbers, one byte each.
#[derive(Debug)]
pub(crate) struct SignalPipe {
    read: Socket,
    _write: Socket,
}

impl SignalPipe {
    /// Creates the pair, makes both ends non-blocking, and publishes the
    /// write end to the handlers.
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = Socket::pair(Domain::UNIX, Type::STREAM, None)?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        PIPE_WRITE_FD.store(write.as_raw_fd(), Ordering::Relaxed);
        Ok(Self {
            read,
            _write: write,
        })
    }

    #[inline]
    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Drains up to `buf.len()` pending signal bytes; returns how many.
    pub(crate) fn drain(&self, buf: &mut [u8]) -> usize {
        // Safety: recv into a caller-owned buffer on a valid fd.
        let n = unsafe {
            libc::recv(
                self.read_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n <= 0 {
            return 0;
        }
        n as usize
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        PIPE_WRITE_FD.store(-1, Ordering::Relaxed);
    }
}

/// Installs the process-wide signal dispositions: `SIGPIPE` ignored,
/// `SIGALRM` and `SIGTERM` forwarded into the pipe. `SA_RESTART` keeps
/// unrelated syscalls from failing spuriously (`epoll_wait` is exempt and
/// still returns `EINTR`, which the event loop expects).
pub(crate) fn install_handlers() -> io::Result<()> {
    set_disposition(libc::SIGPIPE, libc::SIG_IGN)?;
    set_disposition(libc::SIGALRM, forward_signal as libc::sighandler_t)?;
    set_disposition(libc::SIGTERM, forward_signal as libc::sighandler_t)?;
    Ok(())
}

/// Schedules the next `SIGALRM` in `secs` seconds. One `alarm` call fires
/// once; the reaper re-arms after every tick.
pub(crate) fn schedule_alarm(secs: u64) {
    // Safety: alarm has no failure mode of interest here.
    unsafe {
        libc::alarm(secs as libc::c_uint);
    }
}

fn set_disposition(sig: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    // Safety: a zeroed sigaction is a valid starting point; sigfillset and
    // sigaction write only into it.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = libc::SA_RESTART;
        libc::sigfillset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, ptr::null_mut()) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
