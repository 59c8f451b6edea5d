//! The composable error-code value shared by every layer of the runtime.
//!
//! Every awaiter returns a typed `Result<T, Error>`. `Error` carries a
//! [`Category`] plus enough information to recover the original code, so
//! that recoverable conditions (`EAGAIN`, `SQE_BUSY`, `UNCOMPLETED_REQUEST`)
//! can be matched by callers without downcasting.

use std::fmt;
use std::io;

/// Which subsystem produced an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// A raw `errno` from a syscall.
    Posix,
    /// Stream-termination signals promoted to typed errors.
    Socket,
    /// HTTP parser/builder outcomes.
    Http,
    /// `io_uring` submission-queue backpressure.
    Uring,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Posix => "posix",
            Category::Socket => "socket",
            Category::Http => "http",
            Category::Uring => "uring",
        };
        f.write_str(s)
    }
}

/// An HTTP response status as produced by the response builder.
///
/// Only the statuses the collaborator actually emits (spec.md §6) are
/// represented; this is not a general-purpose status registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok,
    BadRequest,
    NotFound,
    LengthRequired,
    InternalServerError,
    NotImplemented,
    HttpVersionNotSupported,
}

impl HttpStatus {
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            HttpStatus::Ok => 200,
            HttpStatus::BadRequest => 400,
            HttpStatus::NotFound => 404,
            HttpStatus::LengthRequired => 411,
            HttpStatus::InternalServerError => 500,
            HttpStatus::NotImplemented => 501,
            HttpStatus::HttpVersionNotSupported => 505,
        }
    }

    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            HttpStatus::Ok => "OK",
            HttpStatus::BadRequest => "Bad Request",
            HttpStatus::NotFound => "Not Found",
            HttpStatus::LengthRequired => "Length Required",
            HttpStatus::InternalServerError => "Internal Server Error",
            HttpStatus::NotImplemented => "Not Implemented",
            HttpStatus::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }
}

/// The shared error type threaded through every awaiter in the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A raw POSIX `errno`, e.g. from `epoll_ctl`, `recv`, `send`, `accept`.
    #[error("posix error: {0}")]
    Posix(#[from] io::Error),

    /// `recv` returned zero bytes; the peer closed its write half.
    #[error("end of stream")]
    Eof,

    /// An operation was attempted on a socket that has already been closed.
    #[error("socket is closed")]
    ClosedSocket,

    /// `would_block` is returned instead of blocking so the caller can
    /// register interest and suspend; recoverable by re-awaiting.
    #[error("operation would block")]
    WouldBlock,

    /// No SQE was available for submission; recoverable by yielding to the
    /// scheduler and retrying.
    #[error("submission queue is busy")]
    SqeBusy,

    /// HTTP parser/builder outcome that maps directly onto a response status.
    #[error("http error: {status:?}")]
    Http { status: HttpStatus },

    /// The request reader has not yet observed `\r\n\r\n`; recoverable by
    /// awaiting more data.
    #[error("request incomplete")]
    UncompletedRequest,
}

impl Error {
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Error::Posix(_) => Category::Posix,
            Error::Eof | Error::ClosedSocket | Error::WouldBlock => Category::Socket,
            Error::SqeBusy => Category::Uring,
            Error::Http { .. } | Error::UncompletedRequest => Category::Http,
        }
    }

    /// `true` for errors a caller is expected to recover from by re-awaiting
    /// or retrying, per spec.md §7's propagation policy.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::WouldBlock | Error::SqeBusy | Error::UncompletedRequest
        ) || self.raw_os_error() == Some(libc_eagain())
    }

    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Posix(e) => e.raw_os_error(),
            _ => None,
        }
    }

    #[must_use]
    pub fn http(status: HttpStatus) -> Self {
        Error::Http { status }
    }

    #[must_use]
    pub fn http_status(&self) -> Option<HttpStatus> {
        match self {
            Error::Http { status } => Some(*status),
            _ => None,
        }
    }

    /// Translate a negative `-errno` value as returned by an `io_uring` CQE
    /// into an [`Error`].
    #[must_use]
    pub fn from_cqe_result(result: i32) -> Self {
        debug_assert!(result < 0);
        io::Error::from_raw_os_error(-result).into()
    }
}

fn libc_eagain() -> i32 {
    // EAGAIN and EWOULDBLOCK are the same value on Linux.
    11
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_recoverable() {
        assert!(Error::WouldBlock.is_recoverable());
        assert!(Error::SqeBusy.is_recoverable());
        assert!(Error::UncompletedRequest.is_recoverable());
        assert!(!Error::Eof.is_recoverable());
    }

    #[test]
    fn category_mapping() {
        assert_eq!(Error::Eof.category(), Category::Socket);
        assert_eq!(Error::SqeBusy.category(), Category::Uring);
        assert_eq!(
            Error::http(HttpStatus::NotFound).category(),
            Category::Http
        );
    }

    #[test]
    fn cqe_result_translates_errno() {
        let err = Error::from_cqe_result(-11);
        assert_eq!(err.raw_os_error(), Some(11));
    }
}
