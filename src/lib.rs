//! scatter_web - edge-triggered, thread-pooled HTTP/1.1 static file server
//!
//! A single-process server built directly on epoll: one I/O thread owns
//! every readiness registration, a fixed pool of workers drives the
//! per-connection HTTP state machines, and responses combine a header
//! buffer with a memory-mapped file region in one scatter-gather write.
//!
//! # Architecture
//!
//! - **Event loop** - accepts, dispatches read/write/hangup events, and
//!   owns all epoll mutations. Connection fds are armed one-shot, so a
//!   connection is touched by at most one thread at a time without any
//!   per-request locking protocol.
//! - **Worker pool** - a bounded FIFO of connection handles drained by a
//!   fixed number of threads; workers parse requests, resolve files, and
//!   assemble responses, then ask the loop to re-arm for writing.
//! - **Reaper** - a sorted timer list sweeps idle connections; `SIGALRM`
//!   reaches the loop as a byte on a self-pipe, keeping signal handlers
//!   async-signal-safe.
//! - **Zero-copy bodies** - a successful `GET` maps the target file
//!   read-only and `writev` sends headers and file bytes in one syscall.
//!
//! # Quick Start
//!
//! ```no_run
//! use scatter_web::{Server, limits::Limits};
//!
//! fn main() -> Result<(), scatter_web::ServerError> {
//!     let mut server = Server::builder()
//!         .port(8080)
//!         .limits(Limits {
//!             doc_root: "/srv/www".into(),
//!             worker_threads: 4,
//!             ..Limits::default()
//!         })
//!         .build()?;
//!     server.run()
//! }
//! ```
//!
//! The wire surface is deliberately narrow: `GET` over HTTP/1.1, keep-alive
//! reuse on one connection, `text/html` for every body. Everything else is
//! answered with the appropriate 4xx/5xx status.
pub(crate) mod http {
    pub(crate) mod file;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod epoll;
    pub(crate) mod event_loop;
    pub(crate) mod pool;
    pub(crate) mod signal;
    pub(crate) mod timer;
}
pub(crate) mod sync;

pub mod errors;
pub mod limits;

pub use crate::{
    errors::ServerError,
    http::types::{HttpCode, Method},
    server::event_loop::{Server, ServerBuilder},
};
