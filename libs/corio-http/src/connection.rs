//! A backend-erased connected socket, so the rest of this crate doesn't
//! need to care whether the server was started with the `epoll` or
//! `io_uring` reactor backend.

use corio_error::Result;
use corio_reactor::{AsyncStream, ReadinessStream};

pub enum Connection {
    Readiness(ReadinessStream),
    Async(AsyncStream),
}

impl Connection {
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Connection::Readiness(s) => s.recv(buf).await,
            Connection::Async(s) => s.recv(buf).await,
        }
    }

    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        match self {
            Connection::Readiness(s) => s.send(buf).await,
            Connection::Async(s) => s.send(buf).await,
        }
    }

    /// Send all of `buf`, looping over partial writes.
    pub async fn send_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.send(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }
}
