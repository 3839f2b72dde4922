//! Core protocol types shared by the parser and the response assembler.

/// HTTP request methods the parser recognizes.
///
/// This server is GET-only; every other method is answered with
/// `400 Bad Request` during request-line parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
}

impl Method {
    /// Case-insensitive method match on the raw request-line token.
    #[inline]
    pub(crate) fn from_token(token: &[u8]) -> Option<Self> {
        token.eq_ignore_ascii_case(b"GET").then_some(Method::Get)
    }
}

/// Outcome of driving the request state machine or resolving the target
/// file. `NoRequest` means "keep reading"; everything else selects a
/// response (or a close) in the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// The request is incomplete; more bytes are required.
    NoRequest,
    /// A full, well-formed request was parsed.
    GetRequest,
    /// Malformed syntax, unsupported method/version, or an unservable
    /// target (directory, unopenable, unmappable, over-long path).
    BadRequest,
    /// The resolved file does not exist.
    NoResource,
    /// The resolved file exists but is not world-readable.
    ForbiddenRequest,
    /// The resolved file was mapped and is ready to send.
    FileRequest,
    /// The parser reached a state it has no transition for.
    InternalError,
}

impl HttpCode {
    /// Numeric status and reason phrase for codes that produce a response.
    #[inline]
    pub(crate) const fn status(self) -> (u16, &'static str) {
        match self {
            HttpCode::FileRequest => (200, "OK"),
            HttpCode::BadRequest => (400, "Bad Request"),
            HttpCode::ForbiddenRequest => (403, "Forbidden"),
            HttpCode::NoResource => (404, "Not Found"),
            _ => (500, "Internal Error"),
        }
    }

    /// Canned body for error responses. The 200 body is the mapped file.
    #[inline]
    pub(crate) const fn canned_body(self) -> &'static [u8] {
        match self {
            HttpCode::BadRequest => {
                b"Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            HttpCode::ForbiddenRequest => {
                b"You do not have permission to get file from this server.\n"
            }
            HttpCode::NoResource => b"The requested file was not found on this server.\n",
            _ => b"There was an unusual problem serving the requested file.\n",
        }
    }
}

/// Result of scanning the read buffer for one CRLF-terminated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineStatus {
    /// A complete line was found and the cursor advanced past its CRLF.
    Ok,
    /// The buffer ends mid-line; more bytes are required.
    Open,
    /// A bare CR or naked LF makes the line unrecoverable.
    Bad,
}

/// Position of the request state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CheckState {
    #[default]
    RequestLine,
    Headers,
    Content,
}

/// Strict decimal parse with overflow checking; `None` on any non-digit.
#[inline]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }
    Some(result)
}

/// Strips leading spaces and tabs from a header value.
#[inline]
pub(crate) fn trim_ows(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(bytes.len());
    &bytes[start..]
}
