//! Server tuning knobs and compile-time buffer sizes.
//!
//! Defaults mirror a small static-file deployment: 64 Ki connection slots,
//! four workers, a 10 000-entry request queue, and a 5-second reaper period.
//! Buffer sizes are fixed at compile time so every connection has a known,
//! constant memory footprint.

use crate::errors::ServerError;
use std::path::PathBuf;

/// Per-connection read buffer, sized for a request line plus typical headers.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Per-connection write buffer; holds the status line and headers only
/// (bodies are either canned phrases or a mapped file region).
pub const WRITE_BUFFER_SIZE: usize = 2048;

/// Upper bound on a resolved filesystem path. Longer resolutions are
/// rejected with `400 Bad Request` rather than truncated.
pub const MAX_PATH_LEN: usize = 200;

/// Runtime limits for a [`Server`](crate::Server).
///
/// All fields are public; construct with struct-update syntax from
/// [`Limits::default()`] and validate through
/// [`Server::builder()`](crate::Server::builder).
///
/// # Examples
/// ```
/// use scatter_web::limits::Limits;
///
/// let limits = Limits {
///     worker_threads: 8,
///     ..Limits::default()
/// };
/// assert!(limits.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum number of simultaneously connected clients (default: `65536`).
    ///
    /// Connections accepted beyond this cap are closed immediately.
    pub max_connections: usize,

    /// Maximum readiness events drained per `epoll_wait` call
    /// (default: `10000`).
    pub max_events: usize,

    /// Base reaper period in seconds (default: `5`).
    ///
    /// The idle deadline for a connection is `3 * timeslot`; a connection
    /// that stays silent that long is closed on a subsequent tick.
    pub timeslot: u64,

    /// Number of worker threads draining the request queue (default: `4`).
    ///
    /// Must be non-zero.
    pub worker_threads: usize,

    /// Upper bound on queued, not-yet-processed requests (default: `10000`).
    ///
    /// When the queue is full, new requests are dropped silently and the
    /// connection stays open. Must be non-zero.
    pub max_queued_requests: usize,

    /// Filesystem prefix under which URL paths are resolved
    /// (default: `./resources`).
    pub doc_root: PathBuf,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_connections: 65536,
            max_events: 10000,
            timeslot: 5,
            worker_threads: 4,
            max_queued_requests: 10000,
            doc_root: PathBuf::from("./resources"),
        }
    }
}

impl Limits {
    /// Checks that every field is inside its legal range.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be > 0"));
        }
        if self.max_queued_requests == 0 {
            return Err(ServerError::Config("max_queued_requests must be > 0"));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be > 0"));
        }
        if self.max_events == 0 {
            return Err(ServerError::Config("max_events must be > 0"));
        }
        if self.timeslot == 0 {
            return Err(ServerError::Config("timeslot must be > 0"));
        }
        Ok(())
    }

    /// Idle deadline applied to every connection, in seconds.
    #[inline(always)]
    pub fn idle_deadline(&self) -> u64 {
        3 * self.timeslot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Limits::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let limits = Limits {
            worker_threads: 0,
            ..Limits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn zero_queue_rejected() {
        let limits = Limits {
            max_queued_requests: 0,
            ..Limits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn idle_deadline_is_three_timeslots() {
        let limits = Limits {
            timeslot: 7,
            ..Limits::default()
        };
        assert_eq!(limits.idle_deadline(), 21);
    }
}
