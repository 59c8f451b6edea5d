//! Response builder, per spec.md §4.7 and the wire format in §6.

use crate::cache::{CacheEntry, FileCache};
use crate::request::{Method, Request};
use corio_error::{Error, HttpStatus, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Response {
    pub status: HttpStatus,
    /// The resolved entity, `None` for any non-2xx status. Present for
    /// `HEAD` too — per spec.md §6 and §8 scenario 2, a `HEAD` response
    /// carries the same `Content-Length`/`Content-Type` as the matching
    /// `GET` would, only the body bytes are omitted on the wire.
    entry: Option<Arc<CacheEntry>>,
    /// Whether to write the entity's bytes after the headers. `false`
    /// for `HEAD`, `true` for `GET`.
    write_body: bool,
    content_type: Option<String>,
}

impl Response {
    pub(crate) fn error(status: HttpStatus) -> Self {
        Self {
            status,
            entry: None,
            write_body: false,
            content_type: None,
        }
    }

    fn content_length(&self) -> usize {
        self.entry.as_ref().map_or(0, |b| b.bytes().len())
    }

    /// Render the full response (status line, headers, body) onto the
    /// wire, per spec.md §6: `<version> <status> <reason>\r\n`, headers,
    /// blank line, then body.
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.content_length());
        out.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.code(),
                self.status.reason()
            )
            .as_bytes(),
        );
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.content_length()).as_bytes());
        if let Some(content_type) = &self.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        if self.write_body {
            if let Some(entry) = &self.entry {
                out.extend_from_slice(entry.bytes());
            }
        }
        out
    }
}

/// Resolves request targets under a fixed, already-canonicalized web
/// root and serves them from a shared [`FileCache`].
pub struct ResponseBuilder {
    root: PathBuf,
    cache: Arc<FileCache>,
}

impl ResponseBuilder {
    /// `root` must already be canonicalized (the `server` binary does
    /// this once at startup and fails fast if the path doesn't exist).
    #[must_use]
    pub fn new(root: PathBuf, cache: Arc<FileCache>) -> Self {
        Self { root, cache }
    }

    #[must_use]
    pub fn build(&self, request: &Request) -> Response {
        match self.try_build(request) {
            Ok(response) => response,
            Err(err) => match err.http_status() {
                Some(status) => Response::error(status),
                None => Response::error(HttpStatus::InternalServerError),
            },
        }
    }

    fn try_build(&self, request: &Request) -> Result<Response> {
        let path = self.resolve_path(&request.target)?;
        let entry = self.cache.get_or_insert(&path)?;

        if let Some(accept) = request.headers.get("Accept") {
            if !accept_matches(accept, entry.mime.essence_str()) {
                // spec.md's status set has no 406; a non-matching Accept
                // is treated like a missing resource (see DESIGN.md).
                return Err(Error::http(HttpStatus::NotFound));
            }
        }

        let write_body = match request.method {
            Method::Head => false,
            Method::Get => true,
        };

        Ok(Response {
            status: HttpStatus::Ok,
            content_type: Some(entry.mime.essence_str().to_string()),
            entry: Some(entry),
            write_body,
        })
    }

    /// Resolve `target` under the web root, rejecting anything that
    /// canonicalizes outside it — spec.md §4.7's "MUST NOT escape the
    /// root". A directory (whether `target` ended in `/` or not) resolves
    /// to its `index.html`, per spec.md §8's boundary behaviors.
    fn resolve_path(&self, target: &str) -> Result<PathBuf> {
        let relative = target.split('?').next().unwrap_or(target);
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return self.resolve_path("/index.html");
        }

        let candidate = self.root.join(relative);
        let canonical = candidate
            .canonicalize()
            .map_err(|_| Error::http(HttpStatus::NotFound))?;
        if !canonical.starts_with(&self.root) {
            return Err(Error::http(HttpStatus::NotFound));
        }
        if canonical.is_dir() {
            return Ok(canonical.join("index.html"));
        }
        Ok(canonical)
    }
}

fn accept_matches(accept: &str, mime: &str) -> bool {
    let (mime_type, _) = mime.split_once('/').unwrap_or((mime, ""));
    accept.split(',').any(|entry| {
        let candidate = entry.split(';').next().unwrap_or(entry).trim();
        candidate == "*/*"
            || candidate == mime
            || candidate
                .split_once('/')
                .is_some_and(|(t, s)| t == mime_type && s == "*")
    })
}

#[must_use]
pub fn canonicalize_root(root: &Path) -> std::io::Result<PathBuf> {
    root.canonicalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_wildcard_matches_anything() {
        assert!(accept_matches("*/*", "text/plain"));
        assert!(accept_matches("text/*, application/json", "text/html"));
        assert!(accept_matches("text/html", "text/html"));
        assert!(!accept_matches("application/json", "text/html"));
    }

    #[test]
    fn response_without_body_has_zero_length() {
        let response = Response::error(HttpStatus::NotFound);
        assert_eq!(response.content_length(), 0);
        let rendered = String::from_utf8(response.render()).unwrap();
        assert!(rendered.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(rendered.contains("Content-Length: 0\r\n"));
    }

    fn temp_root(tag: &str) -> PathBuf {
        let mut root = std::env::temp_dir();
        root.push(format!("corio-http-response-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn request(method: Method, target: &str) -> Request {
        Request {
            method,
            target: target.to_string(),
            headers: crate::request::Headers::default(),
        }
    }

    #[test]
    fn head_response_carries_entity_length_but_no_body() {
        let root = temp_root("head");
        std::fs::write(root.join("hello.txt"), b"hi").unwrap();
        let builder = ResponseBuilder::new(root.canonicalize().unwrap(), Arc::new(FileCache::new(4)));

        let response = builder.build(&request(Method::Head, "/hello.txt"));
        assert_eq!(response.content_length(), 2);
        let rendered = String::from_utf8(response.render()).unwrap();
        assert!(rendered.contains("Content-Length: 2\r\n"));
        assert!(rendered.ends_with("\r\n\r\n"));
    }

    #[test]
    fn directory_target_with_trailing_slash_resolves_index() {
        let root = temp_root("dir-slash");
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("docs").join("index.html"), b"<html>docs</html>").unwrap();
        let builder = ResponseBuilder::new(root.canonicalize().unwrap(), Arc::new(FileCache::new(4)));

        let response = builder.build(&request(Method::Get, "/docs/"));
        assert_eq!(response.status, HttpStatus::Ok);
        let rendered = String::from_utf8(response.render()).unwrap();
        assert!(rendered.ends_with("<html>docs</html>"));
    }
}
