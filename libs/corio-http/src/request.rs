//! Request reader and parser, per spec.md §4.7.

use crate::connection::Connection;
use corio_error::{Error, HttpStatus, Result};

/// Hard cap on an accumulated request head, per spec.md §4.7 ("a hard cap
/// of 4096 bytes prevents unbounded growth").
pub const MAX_REQUEST_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

/// A header map that preserves the original casing of each name, per
/// spec.md §4.7, while still looking names up case-insensitively.
#[derive(Debug, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn push(&mut self, name: String, value: String) {
        self.0.push((name, value));
    }
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub headers: Headers,
}

impl Request {
    pub fn wants_close(&self) -> bool {
        self.headers
            .get("Connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }
}

/// Accumulates bytes from a [`Connection`] until a full request head has
/// arrived, then parses it. One instance is reused across the pipelined
/// requests of a single keep-alive connection.
pub struct RequestReader {
    buf: Vec<u8>,
}

impl RequestReader {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Read and parse the next request head on `conn`.
    ///
    /// Per spec.md §4.7, an `EAGAIN` before the `\r\n\r\n` terminator is
    /// observed is surfaced as [`Error::UncompletedRequest`] so the caller
    /// can re-await; here that translates to simply looping, since
    /// `Connection::recv` already suspends on the reactor internally.
    pub async fn read_request(&mut self, conn: &Connection) -> Result<Request> {
        loop {
            if let Some(end) = find_terminator(&self.buf) {
                let head = self.buf[..end].to_vec();
                // Anything after the terminator belongs to a pipelined
                // request; this collaborator serves only body-less
                // methods, so pipelined bytes are kept for the next call.
                self.buf.drain(..end + 4);
                return parse_request(&head);
            }
            if self.buf.len() >= MAX_REQUEST_BYTES {
                return Err(Error::http(HttpStatus::BadRequest));
            }

            let mut chunk = [0u8; 1024];
            let n = conn.recv(&mut chunk).await?;
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Default for RequestReader {
    fn default() -> Self {
        Self::new()
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_request(head: &[u8]) -> Result<Request> {
    let text = std::str::from_utf8(head).map_err(|_| Error::http(HttpStatus::BadRequest))?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| Error::http(HttpStatus::BadRequest))?;

    let mut parts = request_line.split(' ');
    let method_str = parts.next().ok_or_else(|| Error::http(HttpStatus::BadRequest))?;
    let target = parts.next().ok_or_else(|| Error::http(HttpStatus::BadRequest))?;
    let version = parts.next().ok_or_else(|| Error::http(HttpStatus::BadRequest))?;
    if parts.next().is_some() {
        return Err(Error::http(HttpStatus::BadRequest));
    }

    if version != "HTTP/1.1" {
        return Err(Error::http(HttpStatus::HttpVersionNotSupported));
    }

    let method = match method_str {
        "GET" => Method::Get,
        "HEAD" => Method::Head,
        // A real HTTP method we simply don't implement.
        "POST" | "PUT" | "DELETE" | "PATCH" | "OPTIONS" | "CONNECT" | "TRACE" => {
            return Err(Error::http(HttpStatus::NotImplemented));
        }
        // Not a recognized method token at all — malformed request line.
        _ => return Err(Error::http(HttpStatus::BadRequest)),
    };

    let mut headers = Headers::default();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::http(HttpStatus::BadRequest))?;
        headers.push(name.trim().to_string(), value.trim().to_string());
    }

    Ok(Request {
        method,
        target: target.to_string(),
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let req = parse_request(b"GET /index.html HTTP/1.1\r\nHost: x\r\nAccept: */*").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.target, "/index.html");
        assert_eq!(req.headers.get("host"), Some("x"));
        assert_eq!(req.headers.get("Accept"), Some("*/*"));
    }

    #[test]
    fn rejects_unsupported_method() {
        let err = parse_request(b"POST / HTTP/1.1\r\n").unwrap_err();
        assert_eq!(err.http_status(), Some(HttpStatus::NotImplemented));
    }

    #[test]
    fn rejects_malformed_method_token() {
        let err = parse_request(b"GIT / HTTP/1.1\r\n").unwrap_err();
        assert_eq!(err.http_status(), Some(HttpStatus::BadRequest));
    }

    #[test]
    fn rejects_bad_version() {
        let err = parse_request(b"GET / HTTP/1.0\r\n").unwrap_err();
        assert_eq!(err.http_status(), Some(HttpStatus::HttpVersionNotSupported));
    }

    #[test]
    fn rejects_malformed_header() {
        let err = parse_request(b"GET / HTTP/1.1\r\nbroken-header\r\n").unwrap_err();
        assert_eq!(err.http_status(), Some(HttpStatus::BadRequest));
    }

    #[test]
    fn connection_close_is_case_insensitive() {
        let req = parse_request(b"GET / HTTP/1.1\r\nConnection: Close\r\n").unwrap();
        assert!(req.wants_close());
    }
}
