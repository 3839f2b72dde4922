//! Response assembly and the scatter-gather write path.
//!
//! Status line and headers are rendered into a fixed buffer; the body is
//! either a canned phrase appended to the same buffer or a mapped file
//! region. One `writev` call sends from both regions, and the pair of
//! slices is re-derived from the sent-byte counter before every syscall.

use crate::{
    http::{file::FileMap, types::HttpCode},
    limits::WRITE_BUFFER_SIZE,
};
use std::{fmt, fmt::Write as _, io, os::fd::RawFd};

/// What the write path wants the event loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// Everything was sent and the mapping released.
    Done,
    /// The socket buffer filled up; re-arm for write readiness.
    Again,
    /// An unrecoverable write error; close the connection.
    Error,
}

/// One in-flight HTTP response: header buffer, optional file body, and
/// send progress.
pub(crate) struct Response {
    buf: [u8; WRITE_BUFFER_SIZE],
    write_idx: usize,
    bytes_sent: usize,
    bytes_to_send: usize,
    file: Option<FileMap>,
}

impl Response {
    pub(crate) fn new() -> Self {
        Self {
            buf: [0; WRITE_BUFFER_SIZE],
            write_idx: 0,
            bytes_sent: 0,
            bytes_to_send: 0,
            file: None,
        }
    }

    /// Discards any assembled response and releases the mapping.
    pub(crate) fn init(&mut self) {
        self.write_idx = 0;
        self.bytes_sent = 0;
        self.bytes_to_send = 0;
        self.file = None;
    }

    /// Renders the response for `code`. For [`HttpCode::FileRequest`] the
    /// body is `file`; every other code carries its canned phrase inside
    /// the header buffer. Returns `false` when the buffer overflows, which
    /// indicates a configuration bug (canned bodies are small).
    pub(crate) fn assemble(
        &mut self,
        code: HttpCode,
        keep_alive: bool,
        file: Option<FileMap>,
    ) -> bool {
        self.init();

        let assembled = match code {
            HttpCode::FileRequest => {
                let body_len = file.as_ref().map_or(0, FileMap::len);
                self.status_line(code) && self.common_headers(body_len, keep_alive)
            }
            HttpCode::BadRequest
            | HttpCode::NoResource
            | HttpCode::ForbiddenRequest
            | HttpCode::InternalError => {
                let body = code.canned_body();
                self.status_line(code)
                    && self.common_headers(body.len(), keep_alive)
                    && self.push_bytes(body)
            }
            // NoRequest / GetRequest never reach the assembler.
            _ => false,
        };
        if !assembled {
            return false;
        }

        self.file = match code {
            HttpCode::FileRequest => file,
            _ => None,
        };
        self.bytes_to_send = self.write_idx + self.file.as_ref().map_or(0, FileMap::len);
        true
    }

    /// Repeats scatter-gather writes until the response is fully sent or
    /// the socket pushes back.
    pub(crate) fn write(&mut self, fd: RawFd) -> WriteOutcome {
        loop {
            if self.remaining() == 0 {
                self.file = None;
                return WriteOutcome::Done;
            }

            let ([first, second], count) = self.io_slices();
            let iov = [
                libc::iovec {
                    iov_base: first.as_ptr() as *mut libc::c_void,
                    iov_len: first.len(),
                },
                libc::iovec {
                    iov_base: second.as_ptr() as *mut libc::c_void,
                    iov_len: second.len(),
                },
            ];

            // Safety: both iovecs reference buffers owned by self that
            // outlive the call.
            let sent = unsafe { libc::writev(fd, iov.as_ptr(), count as libc::c_int) };
            if sent < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    return WriteOutcome::Again;
                }
                self.file = None;
                return WriteOutcome::Error;
            }
            self.bytes_sent += sent as usize;
        }
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.bytes_to_send - self.bytes_sent
    }

    /// The unsent portions of the header buffer and the file region.
    ///
    /// While header bytes remain, slot 0 slides through the buffer and
    /// slot 1 covers the whole file; once the headers are out, slot 0
    /// collapses and slot 1 slides through the mapping.
    fn io_slices(&self) -> ([&[u8]; 2], usize) {
        let file = self.file.as_ref().map_or(&[][..], |f| f.as_slice());

        if self.bytes_sent < self.write_idx {
            let header = &self.buf[self.bytes_sent..self.write_idx];
            if file.is_empty() {
                ([header, &[]], 1)
            } else {
                ([header, file], 2)
            }
        } else {
            ([&self.buf[self.write_idx..self.write_idx], &file[self.bytes_sent - self.write_idx..]], 1)
        }
    }

    /// Rendered status line and headers (plus any canned body).
    #[cfg(test)]
    pub(crate) fn assembled(&self) -> &[u8] {
        &self.buf[..self.write_idx]
    }

    // Buffer appends. Every helper reports overflow as `false`.

    fn status_line(&mut self, code: HttpCode) -> bool {
        let (status, reason) = code.status();
        write!(self, "HTTP/1.1 {status} {reason}\r\n").is_ok()
    }

    fn common_headers(&mut self, content_len: usize, keep_alive: bool) -> bool {
        let connection = if keep_alive { "keep-alive" } else { "close" };
        write!(
            self,
            "Content-Length: {content_len}\r\nContent-Type: text/html\r\nConnection: {connection}\r\n\r\n"
        )
        .is_ok()
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.write_idx + bytes.len() > WRITE_BUFFER_SIZE {
            return false;
        }
        self.buf[self.write_idx..self.write_idx + bytes.len()].copy_from_slice(bytes);
        self.write_idx += bytes.len();
        true
    }
}

impl fmt::Write for Response {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.push_bytes(s.as_bytes()) {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("write_idx", &self.write_idx)
            .field("bytes_sent", &self.bytes_sent)
            .field("bytes_to_send", &self.bytes_to_send)
            .field("file", &self.file.as_ref().map(FileMap::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::file::resolve;
    use std::io::Read;
    use std::os::fd::AsRawFd;
    use std::{fs, os::unix::fs::PermissionsExt};

    #[test]
    fn not_found_matches_wire_image() {
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::NoResource, false, None));

        let expected = b"HTTP/1.1 404 Not Found\r\n\
            Content-Length: 49\r\n\
            Content-Type: text/html\r\n\
            Connection: close\r\n\r\n\
            The requested file was not found on this server.\n";
        assert_eq!(resp.assembled(), &expected[..]);
        assert_eq!(resp.bytes_to_send, expected.len());
    }

    #[test]
    fn bad_request_matches_wire_image() {
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::BadRequest, false, None));

        let expected = b"HTTP/1.1 400 Bad Request\r\n\
            Content-Length: 68\r\n\
            Content-Type: text/html\r\n\
            Connection: close\r\n\r\n\
            Your request has bad syntax or is inherently impossible to satisfy.\n";
        assert_eq!(resp.assembled(), &expected[..]);
    }

    #[test]
    fn forbidden_and_internal_assemble() {
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::ForbiddenRequest, false, None));
        assert!(resp.assembled().starts_with(b"HTTP/1.1 403 Forbidden\r\n"));

        assert!(resp.assemble(HttpCode::InternalError, false, None));
        assert!(resp.assembled().starts_with(b"HTTP/1.1 500 Internal Error\r\n"));
    }

    #[test]
    fn keep_alive_header_follows_flag() {
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::NoResource, true, None));
        let text = std::str::from_utf8(resp.assembled()).unwrap();
        assert!(text.contains("Connection: keep-alive\r\n"));
    }

    fn mapped_fixture(contents: &[u8]) -> (tempfile::TempDir, FileMap) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, contents).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let map = resolve(dir.path(), "/f").unwrap();
        (dir, map)
    }

    #[test]
    fn file_request_splits_headers_and_body() {
        let (_dir, map) = mapped_fixture(b"hello world\n");
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::FileRequest, false, Some(map)));

        let expected_head = b"HTTP/1.1 200 OK\r\n\
            Content-Length: 12\r\n\
            Content-Type: text/html\r\n\
            Connection: close\r\n\r\n";
        assert_eq!(resp.assembled(), &expected_head[..]);
        assert_eq!(resp.bytes_to_send, expected_head.len() + 12);

        let ([head, body], count) = resp.io_slices();
        assert_eq!(count, 2);
        assert_eq!(head, &expected_head[..]);
        assert_eq!(body, b"hello world\n");
    }

    #[test]
    fn io_slices_slide_with_progress() {
        let (_dir, map) = mapped_fixture(b"0123456789");
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::FileRequest, false, Some(map)));
        let head_len = resp.write_idx;

        // Mid-header: slot 0 slides, slot 1 still covers the whole file.
        resp.bytes_sent = 5;
        let ([head, body], count) = resp.io_slices();
        assert_eq!(count, 2);
        assert_eq!(head.len(), head_len - 5);
        assert_eq!(body.len(), 10);

        // Headers done: slot 0 collapses, slot 1 slides into the mapping.
        resp.bytes_sent = head_len + 3;
        let ([head, body], count) = resp.io_slices();
        assert_eq!(count, 1);
        assert!(head.is_empty());
        assert_eq!(body, b"3456789");
        assert_eq!(resp.remaining(), 7);
    }

    #[test]
    fn empty_file_sends_headers_only() {
        let (_dir, map) = mapped_fixture(b"");
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::FileRequest, false, Some(map)));
        assert_eq!(resp.bytes_to_send, resp.write_idx);

        let (_, count) = resp.io_slices();
        assert_eq!(count, 1);
    }

    #[test]
    fn writev_round_trip_over_socketpair() {
        let (tx, mut rx) = std::os::unix::net::UnixStream::pair().unwrap();
        tx.set_nonblocking(true).unwrap();

        let (_dir, map) = mapped_fixture(b"file payload");
        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::FileRequest, true, Some(map)));
        let total = resp.bytes_to_send;

        assert_eq!(resp.write(tx.as_raw_fd()), WriteOutcome::Done);
        assert_eq!(resp.remaining(), 0);

        let mut received = vec![0u8; total];
        rx.read_exact(&mut received).unwrap();
        assert!(received.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(received.ends_with(b"file payload"));
    }

    #[test]
    fn write_reports_again_on_full_socket() {
        let (tx, _rx) = std::os::unix::net::UnixStream::pair().unwrap();
        tx.set_nonblocking(true).unwrap();

        // Keep assembling-and-writing until the kernel buffer fills.
        let mut saw_again = false;
        for _ in 0..10_000 {
            let mut resp = Response::new();
            assert!(resp.assemble(HttpCode::BadRequest, true, None));
            match resp.write(tx.as_raw_fd()) {
                WriteOutcome::Done => continue,
                WriteOutcome::Again => {
                    saw_again = true;
                    break;
                }
                WriteOutcome::Error => panic!("unexpected write error"),
            }
        }
        assert!(saw_again);
    }

    #[test]
    fn write_reports_error_on_closed_peer() {
        let (tx, rx) = std::os::unix::net::UnixStream::pair().unwrap();
        tx.set_nonblocking(true).unwrap();
        drop(rx);

        let mut resp = Response::new();
        assert!(resp.assemble(HttpCode::BadRequest, false, None));
        // The first write may succeed into the buffer; a follow-up hits
        // EPIPE once the peer is gone.
        let mut outcome = resp.write(tx.as_raw_fd());
        if outcome != WriteOutcome::Error {
            assert!(resp.assemble(HttpCode::BadRequest, false, None));
            outcome = resp.write(tx.as_raw_fd());
        }
        assert_eq!(outcome, WriteOutcome::Error);
    }
}
