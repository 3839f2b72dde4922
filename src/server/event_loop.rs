//! The event loop: accepting, dispatching readiness events, and reaping.
//!
//! A single thread owns every registration. New sockets are armed for
//! read readiness with the one-shot flag; complete reads are handed to the
//! worker pool; writes and closes happen back on this thread. Signals
//! arrive as bytes on the self-pipe, and a `SIGALRM` byte schedules a
//! timer-list sweep after the current event batch.

use crate::{
    errors::ServerError,
    limits::Limits,
    server::{
        connection::{ConnHandle, Connection},
        epoll::{Epoll, Interest},
        pool::WorkerPool,
        signal::{install_handlers, schedule_alarm, SignalPipe},
        timer::{TimerHandle, TimerList},
    },
};
use socket2::{Domain, Socket, Type};
use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    os::fd::{AsRawFd, RawFd},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info, trace, warn};

/// An HTTP/1.1 static-file server bound to one TCP port.
///
/// # Examples
///
/// ```no_run
/// use scatter_web::{Server, limits::Limits};
///
/// fn main() -> Result<(), scatter_web::ServerError> {
///     let mut server = Server::builder()
///         .port(8080)
///         .limits(Limits {
///             doc_root: "/srv/www".into(),
///             ..Limits::default()
///         })
///         .build()?;
///     server.run()
/// }
/// ```
pub struct Server {
    listener: Socket,
    local_addr: SocketAddr,
    epoll: Arc<Epoll>,
    pipe: SignalPipe,
    pool: WorkerPool<ConnHandle>,
    limits: Limits,
    doc_root: Arc<PathBuf>,

    connections: HashMap<RawFd, Arc<Mutex<Connection>>>,
    timers: TimerList,
    timer_of: HashMap<RawFd, TimerHandle>,

    timeout: bool,
    stop: bool,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            port: 0,
            limits: Limits::default(),
        }
    }

    /// The address the listener is actually bound to. Useful with port 0.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the event loop until `SIGTERM`.
    ///
    /// Blocks the calling thread. On clean shutdown the listener and the
    /// signal pipe are closed and every live connection is dropped.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "listening");
        schedule_alarm(self.limits.timeslot);

        let mut events =
            vec![libc::epoll_event { events: 0, u64: 0 }; self.limits.max_events];

        while !self.stop {
            let count = match self.epoll.wait(&mut events) {
                Ok(count) => count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(%err, "epoll wait failed");
                    return Err(ServerError::EventLoop(err));
                }
            };

            for event in &events[..count] {
                self.dispatch(event.u64 as RawFd, event.events);
            }

            // Timer work runs after the batch; I/O has priority over the
            // reaper.
            if self.timeout {
                self.tick();
                schedule_alarm(self.limits.timeslot);
                self.timeout = false;
            }
        }

        info!("shutting down");
        self.shutdown();
        Ok(())
    }

    fn dispatch(&mut self, fd: RawFd, mask: u32) {
        if fd == self.listener.as_raw_fd() {
            self.accept_pending();
        } else if mask & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0 {
            debug!(fd, "peer hangup");
            self.close_connection(fd);
        } else if fd == self.pipe.read_fd() && mask & libc::EPOLLIN as u32 != 0 {
            self.drain_signals();
        } else if mask & libc::EPOLLIN as u32 != 0 {
            self.handle_readable(fd);
        } else if mask & libc::EPOLLOUT as u32 != 0 {
            self.handle_writable(fd);
        }
    }

    /// Accepts until the backlog is empty. Each new socket gets a
    /// connection slot, a one-shot read registration, and an idle timer.
    fn accept_pending(&mut self) {
        loop {
            let (socket, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            };

            if self.connections.len() >= self.limits.max_connections {
                // At capacity: refuse by dropping the socket.
                warn!("connection limit reached, refusing client");
                continue;
            }

            let fd = socket.as_raw_fd();
            let peer = addr.as_socket();
            let conn = Connection::new(socket, peer, self.doc_root.clone(), self.epoll.clone());
            if let Err(err) = self.epoll.add(fd, Interest::Read, true) {
                warn!(fd, %err, "failed to register accepted socket");
                continue;
            }
            self.connections.insert(fd, Arc::new(Mutex::new(conn)));

            let deadline = now_secs() + self.limits.idle_deadline();
            let handle = self.timers.add(fd, deadline);
            self.timer_of.insert(fd, handle);

            debug!(fd, peer = ?peer, live = self.connections.len(), "accepted");
        }
    }

    /// Reads each pending signal byte: `SIGALRM` requests a tick,
    /// `SIGTERM` requests shutdown.
    fn drain_signals(&mut self) {
        let mut buf = [0u8; 1024];
        let count = self.pipe.drain(&mut buf);
        for &sig in &buf[..count] {
            match sig as libc::c_int {
                libc::SIGALRM => self.timeout = true,
                libc::SIGTERM => self.stop = true,
                other => trace!(signal = other, "ignoring unexpected signal byte"),
            }
        }
    }

    fn handle_readable(&mut self, fd: RawFd) {
        let Some(conn) = self.connections.get(&fd) else {
            return;
        };

        let drained = conn.lock().unwrap_or_else(|e| e.into_inner()).read();
        if !drained {
            // Peer close or read error; timer and registration go together.
            self.close_connection(fd);
            return;
        }

        if !self.pool.append(ConnHandle(conn.clone())) {
            // Queue saturated: forget the request, keep the connection.
            warn!(fd, "worker queue full, dropping request");
            conn.lock().unwrap_or_else(|e| e.into_inner()).drop_request();
        }

        // The client is alive; push its reaping deadline out.
        if let Some(&handle) = self.timer_of.get(&fd) {
            self.timers
                .adjust(handle, now_secs() + self.limits.idle_deadline());
        }
    }

    fn handle_writable(&mut self, fd: RawFd) {
        let Some(conn) = self.connections.get(&fd) else {
            return;
        };
        let keep = conn.lock().unwrap_or_else(|e| e.into_inner()).write();
        if !keep {
            self.close_connection(fd);
        }
    }

    /// Sweeps the timer list, closing every connection whose deadline has
    /// passed.
    fn tick(&mut self) {
        let now = now_secs();
        let mut expired = Vec::new();
        self.timers.tick(now, |fd| expired.push(fd));

        for fd in expired {
            debug!(fd, "idle deadline reached");
            self.close_connection(fd);
        }
    }

    /// Tears a connection down: timer, registration, map slot. The socket
    /// closes when the last worker handle drops.
    fn close_connection(&mut self, fd: RawFd) {
        if let Some(handle) = self.timer_of.remove(&fd) {
            self.timers.remove(handle);
        }
        if let Some(conn) = self.connections.remove(&fd) {
            conn.lock().unwrap_or_else(|e| e.into_inner()).close();
            debug!(fd, live = self.connections.len(), "connection closed");
        }
    }

    fn shutdown(&mut self) {
        let fds: Vec<RawFd> = self.connections.keys().copied().collect();
        for fd in fds {
            self.close_connection(fd);
        }
        self.epoll.delete(self.listener.as_raw_fd());
        self.epoll.delete(self.pipe.read_fd());
        self.pool.shutdown();
    }
}

/// Wall-clock seconds; the timer domain needs nothing finer.
fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    port: u16,
    limits: Limits,
}

impl ServerBuilder {
    /// TCP port to bind. Port `0` picks an ephemeral port; read it back
    /// with [`Server::local_addr`].
    #[inline]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Replaces the default [`Limits`].
    #[inline]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Validates the configuration, binds the listener, installs signal
    /// handlers, and starts the worker pool.
    pub fn build(self) -> Result<Server, ServerError> {
        self.limits.validate()?;

        install_handlers().map_err(ServerError::SignalHandler)?;

        let listener = bind_listener(self.port).map_err(ServerError::Bind)?;
        let local_addr = listener
            .local_addr()
            .map_err(ServerError::Bind)?
            .as_socket()
            .ok_or_else(|| {
                ServerError::Bind(io::Error::new(io::ErrorKind::Other, "non-inet listener"))
            })?;

        let epoll = Arc::new(Epoll::new().map_err(ServerError::Epoll)?);
        let pipe = SignalPipe::new().map_err(ServerError::SignalPipe)?;
        let pool = WorkerPool::new(self.limits.worker_threads, self.limits.max_queued_requests)?;

        epoll
            .add(listener.as_raw_fd(), Interest::Read, false)
            .map_err(ServerError::Epoll)?;
        epoll
            .add(pipe.read_fd(), Interest::Read, false)
            .map_err(ServerError::Epoll)?;

        let doc_root = Arc::new(self.limits.doc_root.clone());
        Ok(Server {
            listener,
            local_addr,
            epoll,
            pipe,
            pool,
            doc_root,
            limits: self.limits,
            connections: HashMap::new(),
            timers: TimerList::new(),
            timer_of: HashMap::new(),
            timeout: false,
            stop: false,
        })
    }
}

fn bind_listener(port: u16) -> io::Result<Socket> {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    listener.set_reuse_address(true)?;
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    listener.bind(&addr.into())?;
    listener.listen(1024)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}
