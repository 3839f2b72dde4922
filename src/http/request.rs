//! Incremental HTTP/1.1 request parser.
//!
//! A two-level state machine over a fixed read buffer: an inner tokenizer
//! that finds CRLF-terminated lines and an outer driver that walks the
//! request line, then headers, then an optional body. The parser never
//! copies request data; the request line and `Host` value are kept as
//! ranges into the buffer.
//!
//! Cursor discipline: `start_line <= checked <= filled <= READ_BUFFER_SIZE`
//! at every step. `checked` trails the tokenizer, `start_line` marks the
//! line being assembled, `filled` marks how much of the buffer the socket
//! has populated.

use crate::{
    http::types::{slice_to_usize, trim_ows, CheckState, HttpCode, LineStatus, Method},
    limits::READ_BUFFER_SIZE,
};
use memchr::memchr2;
use std::ops::Range;

/// Parsed request fields, valid until the next [`Parser::init`].
#[derive(Debug, Default)]
pub(crate) struct Request {
    pub(crate) method: Method,
    path: Range<usize>,
    host: Range<usize>,
    pub(crate) content_length: usize,
    pub(crate) keep_alive: bool,
}

/// Streaming request parser bound to one connection's read buffer.
pub(crate) struct Parser {
    buf: [u8; READ_BUFFER_SIZE],
    filled: usize,
    checked: usize,
    start_line: usize,
    /// End of the most recent complete line (exclusive, before its CR).
    line_end: usize,
    state: CheckState,
    pub(crate) request: Request,
}

impl Parser {
    pub(crate) fn new() -> Self {
        Self {
            buf: [0; READ_BUFFER_SIZE],
            filled: 0,
            checked: 0,
            start_line: 0,
            line_end: 0,
            state: CheckState::RequestLine,
            request: Request::default(),
        }
    }

    /// Resets every cursor and request field for the next request on a
    /// kept-alive connection.
    pub(crate) fn init(&mut self) {
        self.filled = 0;
        self.checked = 0;
        self.start_line = 0;
        self.line_end = 0;
        self.state = CheckState::RequestLine;
        self.request = Request::default();
    }

    /// Unfilled tail of the read buffer, for the socket to write into.
    #[inline]
    pub(crate) fn spare(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Records `n` freshly received bytes.
    #[inline]
    pub(crate) fn advance(&mut self, n: usize) {
        self.filled += n;
        debug_assert!(self.filled <= READ_BUFFER_SIZE);
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.filled >= READ_BUFFER_SIZE
    }

    /// Requested URL path. Validated as UTF-8 during request-line parsing.
    #[inline]
    pub(crate) fn path(&self) -> &str {
        std::str::from_utf8(&self.buf[self.path_range()]).unwrap_or("")
    }

    /// `Host` header value, if one was sent.
    #[inline]
    pub(crate) fn host(&self) -> Option<&[u8]> {
        let range = self.request.host.clone();
        (!range.is_empty()).then(|| &self.buf[range])
    }

    #[inline]
    fn path_range(&self) -> Range<usize> {
        self.request.path.clone()
    }

    /// Drives the state machine over everything received so far.
    ///
    /// `NoRequest` means the request is still incomplete; `GetRequest`
    /// means a full request is ready for resolution; anything else is the
    /// error disposition for the response assembler.
    pub(crate) fn parse(&mut self) -> HttpCode {
        loop {
            if self.state == CheckState::Content {
                // Body bytes are only counted, never interpreted.
                if self.filled >= self.checked + self.request.content_length {
                    return HttpCode::GetRequest;
                }
                return HttpCode::NoRequest;
            }

            let line = match self.parse_line() {
                LineStatus::Ok => {
                    let line = self.start_line..self.line_end;
                    self.start_line = self.checked;
                    line
                }
                LineStatus::Open => return HttpCode::NoRequest,
                LineStatus::Bad => return HttpCode::BadRequest,
            };

            let code = match self.state {
                CheckState::RequestLine => self.parse_request_line(line),
                CheckState::Headers => self.parse_headers(line),
                // The driver handles Content above; reaching it here means
                // the machine lost track of itself.
                CheckState::Content => return HttpCode::InternalError,
            };
            if code != HttpCode::NoRequest {
                return code;
            }
        }
    }

    /// Scans `checked..filled` for the next CRLF.
    ///
    /// On `Ok`, `line_end` marks the byte before the CR and `checked` has
    /// advanced past the LF. On `Open`, `checked` rests either at a
    /// trailing CR (so a split `\r\n` is re-examined whole) or at `filled`.
    fn parse_line(&mut self) -> LineStatus {
        match memchr2(b'\r', b'\n', &self.buf[self.checked..self.filled]) {
            None => {
                self.checked = self.filled;
                LineStatus::Open
            }
            Some(offset) => {
                let pos = self.checked + offset;
                if self.buf[pos] == b'\n' {
                    // A naked LF: any CR belonging to it would have been
                    // found by an earlier scan and left under `checked`.
                    return LineStatus::Bad;
                }
                if pos + 1 == self.filled {
                    self.checked = pos;
                    return LineStatus::Open;
                }
                if self.buf[pos + 1] == b'\n' {
                    self.line_end = pos;
                    self.checked = pos + 2;
                    return LineStatus::Ok;
                }
                LineStatus::Bad
            }
        }
    }

    /// `GET /path HTTP/1.1`: method, URL, version, in that order, single
    /// space or tab separators.
    fn parse_request_line(&mut self, line: Range<usize>) -> HttpCode {
        let (method, rest) = match split_once_blank(&self.buf[line.clone()]) {
            Some(parts) => parts,
            None => return HttpCode::BadRequest,
        };
        if Method::from_token(method).is_none() {
            return HttpCode::BadRequest;
        }
        self.request.method = Method::Get;

        let (url_len, version_at) = match split_once_blank(rest) {
            Some((url, _)) => (url.len(), url.len() + 1),
            None => return HttpCode::BadRequest,
        };
        let url_start = line.start + (method.len() + 1);
        let version_start = url_start + version_at;
        if !self.buf[version_start..line.end].eq_ignore_ascii_case(b"HTTP/1.1") {
            return HttpCode::BadRequest;
        }

        let mut url = url_start..url_start + url_len;

        // Absolute form: strip `http://authority` down to the path.
        let url_bytes = &self.buf[url.clone()];
        if url_bytes.len() >= 7 && url_bytes[..7].eq_ignore_ascii_case(b"http://") {
            match memchr::memchr(b'/', &url_bytes[7..]) {
                Some(slash) => url.start += 7 + slash,
                None => return HttpCode::BadRequest,
            }
        }

        if self.buf.get(url.start) != Some(&b'/') {
            return HttpCode::BadRequest;
        }
        if simdutf8::basic::from_utf8(&self.buf[url.clone()]).is_err() {
            return HttpCode::BadRequest;
        }

        self.request.path = url;
        self.state = CheckState::Headers;
        HttpCode::NoRequest
    }

    /// One header line, or the blank line that ends the header block.
    fn parse_headers(&mut self, line: Range<usize>) -> HttpCode {
        if line.is_empty() {
            if self.request.content_length > 0 {
                self.state = CheckState::Content;
                return HttpCode::NoRequest;
            }
            return HttpCode::GetRequest;
        }

        let Some(colon) = memchr::memchr(b':', &self.buf[line.clone()]) else {
            // Field lines without a colon are skipped, like any other
            // unrecognized header.
            return HttpCode::NoRequest;
        };
        let name_end = line.start + colon;
        let value = {
            let raw = name_end + 1..line.end;
            let trimmed = trim_ows(&self.buf[raw.clone()]);
            raw.end - trimmed.len()..raw.end
        };
        let name = &self.buf[line.start..name_end];

        if name.eq_ignore_ascii_case(b"Connection")
            || name.eq_ignore_ascii_case(b"Proxy-Connection")
        {
            if self.buf[value].eq_ignore_ascii_case(b"keep-alive") {
                self.request.keep_alive = true;
            }
        } else if name.eq_ignore_ascii_case(b"Content-Length") {
            self.request.content_length = slice_to_usize(&self.buf[value]).unwrap_or(0);
        } else if name.eq_ignore_ascii_case(b"Host") {
            self.request.host = value;
        }

        HttpCode::NoRequest
    }
}

#[cfg(test)]
impl Parser {
    fn invariants_hold(&self) -> bool {
        self.start_line <= self.checked
            && self.checked <= self.filled
            && self.filled <= READ_BUFFER_SIZE
    }
}

/// Splits at the first space or tab; the delimiter is consumed.
#[inline]
fn split_once_blank(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = memchr2(b' ', b'\t', bytes)?;
    Some((&bytes[..pos], &bytes[pos + 1..]))
}
