//! The Linux I/O reactor, per spec.md §4.3-§4.6: two interchangeable
//! backends (readiness-based `epoll`, completion-based `io_uring`) plus
//! the socket primitives built on each.
//!
//! Callers pick a backend at startup (the `server` binary exposes this as
//! a CLI flag) and build the matching listener/stream types from
//! [`socket`]; both backends are driven by spawning their respective
//! `run` task onto the [`corio_runtime::Executor`] before accepting any
//! connections.

pub mod epoll;
pub mod socket;
pub mod uring;

pub use epoll::EpollReactor;
pub use socket::{AsyncListener, AsyncStream, ReadinessListener, ReadinessStream};
pub use uring::UringReactor;

/// Which reactor backend to use, selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Epoll,
    Uring,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "epoll" => Ok(Backend::Epoll),
            "io_uring" | "uring" => Ok(Backend::Uring),
            other => Err(format!("unknown reactor backend: {other}")),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Epoll => f.write_str("epoll"),
            Backend::Uring => f.write_str("io_uring"),
        }
    }
}
