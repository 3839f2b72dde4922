//! Per-connection state and lifecycle.
//!
//! Each accepted socket gets one `Connection` driving the request parser,
//! file resolution, and the response writer. The event loop performs the
//! non-blocking reads and writes; workers run [`Connection::process`]
//! between them. One-shot arming guarantees that at most one of the two
//! ever holds the connection, and re-arming flips the fd between read and
//! write readiness.

use crate::{
    http::{
        file::resolve,
        request::Parser,
        response::{Response, WriteOutcome},
        types::HttpCode,
    },
    server::{
        epoll::{Epoll, Interest},
        pool::Work,
    },
};
use socket2::Socket;
use std::{
    io,
    net::SocketAddr,
    os::fd::{AsRawFd, RawFd},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{debug, trace};

pub(crate) struct Connection {
    socket: Socket,
    peer: Option<SocketAddr>,
    parser: Parser,
    response: Response,
    doc_root: Arc<PathBuf>,
    epoll: Arc<Epoll>,
    /// Set when response assembly overflowed; the next write event closes
    /// the connection from the event loop.
    abort: bool,
    closed: bool,
}

impl Connection {
    pub(crate) fn new(
        socket: Socket,
        peer: Option<SocketAddr>,
        doc_root: Arc<PathBuf>,
        epoll: Arc<Epoll>,
    ) -> Self {
        Self {
            socket,
            peer,
            parser: Parser::new(),
            response: Response::new(),
            doc_root,
            epoll,
            abort: false,
            closed: false,
        }
    }

    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Drains the socket into the read buffer until the kernel has nothing
    /// more (`EAGAIN`). Returns `false` on peer close, on a read error, or
    /// when the buffer was already full on entry; all of these mean the
    /// connection is done.
    ///
    /// Called at most once per edge-triggered read event.
    pub(crate) fn read(&mut self) -> bool {
        if self.parser.is_full() {
            return false;
        }

        loop {
            let spare = self.parser.spare();
            // Safety: recv writes at most spare.len() bytes into spare.
            let received = unsafe {
                libc::recv(
                    self.socket.as_raw_fd(),
                    spare.as_mut_ptr() as *mut libc::c_void,
                    spare.len(),
                    0,
                )
            };
            match received {
                -1 => {
                    let err = io::Error::last_os_error();
                    return err.kind() == io::ErrorKind::WouldBlock;
                }
                0 => return false,
                n => self.parser.advance(n as usize),
            }
        }
    }

    /// Runs the parser over everything read so far and, on a complete
    /// request, resolves the target and assembles the response.
    ///
    /// Executed on a worker thread while the fd is disarmed; the only
    /// side effect visible outside the connection is the re-arm request.
    pub(crate) fn process(&mut self) {
        if self.closed {
            return;
        }

        let mut code = self.parser.parse();
        if code == HttpCode::NoRequest {
            // Incomplete request; resume reading.
            self.epoll.rearm(self.fd(), Interest::Read);
            return;
        }

        let file = match code {
            HttpCode::GetRequest => match resolve(&self.doc_root, self.parser.path()) {
                Ok(map) => {
                    code = HttpCode::FileRequest;
                    Some(map)
                }
                Err(disposition) => {
                    code = disposition;
                    None
                }
            },
            _ => None,
        };
        trace!(
            fd = self.fd(),
            ?code,
            path = self.parser.path(),
            host = ?self.parser.host().map(String::from_utf8_lossy),
            "request processed"
        );

        if !self
            .response
            .assemble(code, self.parser.request.keep_alive, file)
        {
            // Overflow means a miswired canned response; have the event
            // loop close us on the write event.
            debug!(fd = self.fd(), "response assembly overflow");
            self.abort = true;
        }
        self.epoll.rearm(self.fd(), Interest::Write);
    }

    /// Pushes response bytes out. Returns `false` when the event loop
    /// should close the connection: write error, assembly abort, or a
    /// completed response without keep-alive.
    pub(crate) fn write(&mut self) -> bool {
        if self.closed || self.abort {
            return false;
        }

        if self.response.remaining() == 0 {
            // Spurious write readiness with nothing pending; go back to
            // waiting for a request.
            self.init_for_next();
            self.epoll.rearm(self.fd(), Interest::Read);
            return true;
        }

        match self.response.write(self.fd()) {
            WriteOutcome::Done => {
                if self.parser.request.keep_alive {
                    self.init_for_next();
                    self.epoll.rearm(self.fd(), Interest::Read);
                    true
                } else {
                    false
                }
            }
            WriteOutcome::Again => {
                self.epoll.rearm(self.fd(), Interest::Write);
                true
            }
            WriteOutcome::Error => false,
        }
    }

    /// Discards a fully read request when the worker queue is saturated.
    /// The connection stays registered for read readiness.
    pub(crate) fn drop_request(&mut self) {
        self.parser.init();
        self.epoll.rearm(self.fd(), Interest::Read);
    }

    /// Removes the fd from the readiness set and marks the connection
    /// dead. The socket itself closes when the last handle drops.
    pub(crate) fn close(&mut self) {
        if !self.closed {
            self.epoll.delete(self.fd());
            self.closed = true;
            debug!(fd = self.fd(), peer = ?self.peer, "deregistered");
        }
    }

    fn init_for_next(&mut self) {
        self.parser.init();
        self.response.init();
    }
}

/// Queue entry handed to the worker pool.
///
/// The mutex is uncontended by construction: while a handle sits in the
/// queue or in a worker, the fd is disarmed, so the event loop will not
/// touch the same connection.
#[derive(Clone)]
pub(crate) struct ConnHandle(pub(crate) Arc<Mutex<Connection>>);

impl Work for ConnHandle {
    fn process(&self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).process();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read as _, Write as _};
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::fs::PermissionsExt;

    /// A real TCP pair plus a live epoll instance; the connection is never
    /// registered, which also exercises the silent-rearm guard.
    fn connected(doc_root: &std::path::Path) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, peer) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let conn = Connection::new(
            Socket::from(accepted),
            Some(peer),
            Arc::new(doc_root.to_path_buf()),
            Arc::new(Epoll::new().unwrap()),
        );
        (conn, client)
    }

    fn fixture_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        fs::write(&path, b"hello world\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        dir
    }

    fn read_response(client: &mut TcpStream) -> Vec<u8> {
        let mut out = Vec::new();
        client.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn serves_file_end_to_end() {
        let root = fixture_root();
        let (mut conn, mut client) = connected(root.path());

        client
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        assert!(conn.read());
        conn.process();
        // No keep-alive: write reports the connection is finished.
        assert!(!conn.write());
        drop(conn);

        let response = read_response(&mut client);
        let expected = b"HTTP/1.1 200 OK\r\n\
            Content-Length: 12\r\n\
            Content-Type: text/html\r\n\
            Connection: close\r\n\r\n\
            hello world\n";
        assert_eq!(response, expected);
    }

    #[test]
    fn missing_file_yields_404() {
        let root = fixture_root();
        let (mut conn, mut client) = connected(root.path());

        client.write_all(b"GET /missing HTTP/1.1\r\n\r\n").unwrap();
        assert!(conn.read());
        conn.process();
        assert!(!conn.write());
        drop(conn);

        let response = read_response(&mut client);
        assert!(response.starts_with(b"HTTP/1.1 404 Not Found\r\nContent-Length: 49\r\n"));
        assert!(response.ends_with(b"The requested file was not found on this server.\n"));
    }

    #[test]
    fn keep_alive_serves_sequential_requests() {
        let root = fixture_root();
        let (mut conn, mut client) = connected(root.path());

        for _ in 0..3 {
            client
                .write_all(
                    b"GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
                )
                .unwrap();
            assert!(conn.read());
            conn.process();
            // Keep-alive: the connection survives the response.
            assert!(conn.write());

            let mut response = Vec::new();
            let mut buf = [0u8; 512];
            while !response.ends_with(b"hello world\n") {
                let n = client.read(&mut buf).unwrap();
                assert!(n > 0, "peer closed mid-response");
                response.extend_from_slice(&buf[..n]);
            }
            assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
            assert!(std::str::from_utf8(&response)
                .unwrap()
                .contains("Connection: keep-alive\r\n"));
        }
    }

    #[test]
    fn partial_request_keeps_reading() {
        let root = fixture_root();
        let (mut conn, mut client) = connected(root.path());

        client.write_all(b"GET /index.html HT").unwrap();
        assert!(conn.read());
        conn.process();
        // Nothing assembled yet.
        assert_eq!(conn.response.remaining(), 0);

        client.write_all(b"TP/1.1\r\n\r\n").unwrap();
        assert!(conn.read());
        conn.process();
        assert!(!conn.write());
        drop(conn);

        assert!(read_response(&mut client).starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn peer_close_fails_read() {
        let root = fixture_root();
        let (mut conn, client) = connected(root.path());
        drop(client);
        assert!(!conn.read());
    }

    #[test]
    fn dropped_request_resets_parser() {
        let root = fixture_root();
        let (mut conn, mut client) = connected(root.path());

        client.write_all(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();
        assert!(conn.read());
        conn.drop_request();

        // The buffer was cleared: a fresh request parses from scratch.
        client
            .write_all(b"GET /index.html HTTP/1.1\r\n\r\n")
            .unwrap();
        assert!(conn.read());
        conn.process();
        assert!(!conn.write());
        drop(conn);
        assert!(read_response(&mut client).starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn closed_connection_refuses_work() {
        let root = fixture_root();
        let (mut conn, _client) = connected(root.path());
        conn.close();
        conn.process();
        assert!(!conn.write());
    }
}
