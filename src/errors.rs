use std::io;
use thiserror::Error;

/// Failures that abort server startup or teardown.
///
/// Per-request failures never surface here; they are answered on the wire
/// with the appropriate status code and, where required, a closed
/// connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(&'static str),

    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to create epoll instance: {0}")]
    Epoll(#[source] io::Error),

    #[error("failed to create signal pipe: {0}")]
    SignalPipe(#[source] io::Error),

    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("worker pool failed to start: {0}")]
    Pool(#[source] io::Error),

    #[error("event loop failure: {0}")]
    EventLoop(#[source] io::Error),
}
