//! Socket primitives, per spec.md §4.6: two flavors, readiness-based
//! (`epoll`) and completion-based (`io_uring`). Both are RAII wrappers —
//! closing the descriptor on drop — per spec.md §5.

use crate::epoll::{EpollReactor, Interest};
use crate::uring::UringReactor;
use corio_error::{Error, Result};
use corio_runtime::Executor;
use std::future::Future;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(Error::Posix(std::io::Error::last_os_error()));
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(Error::Posix(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Suspend until `fd` is readable, re-arming an existing registration.
/// Callers must have already registered `fd` once via [`RegisterRead`];
/// `epoll_ctl(ADD, ...)` on an already-registered fd fails with `EEXIST`,
/// so first use and subsequent re-arms go through different kernel calls.
struct Readable {
    reactor: Arc<EpollReactor>,
    fd: RawFd,
    armed: bool,
}

impl Future for Readable {
    type Output = Result<()>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.armed {
            return Poll::Ready(Ok(()));
        }
        self.armed = true;
        match self.reactor.modify(self.fd, Interest::Readable, cx.waker().clone()) {
            Ok(()) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl Readable {
    fn new(reactor: Arc<EpollReactor>, fd: RawFd) -> Self {
        Self { reactor, fd, armed: false }
    }
}

/// Suspend until `fd` is writable, registering one-shot interest.
struct Writable {
    reactor: Arc<EpollReactor>,
    fd: RawFd,
    armed: bool,
}

impl Writable {
    fn new(reactor: Arc<EpollReactor>, fd: RawFd) -> Self {
        Self { reactor, fd, armed: false }
    }
}

impl Future for Writable {
    type Output = Result<()>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.armed {
            return Poll::Ready(Ok(()));
        }
        self.armed = true;
        match self.reactor.modify(self.fd, Interest::Writable, cx.waker().clone()) {
            Ok(()) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

/// A readiness-based, `epoll`-backed listening socket.
pub struct ReadinessListener {
    std: StdTcpListener,
    reactor: Arc<EpollReactor>,
    registered: std::sync::atomic::AtomicBool,
}

impl ReadinessListener {
    pub fn bind(addr: SocketAddr, reactor: Arc<EpollReactor>) -> Result<Self> {
        let std = StdTcpListener::bind(addr).map_err(Error::Posix)?;
        set_nonblocking(std.as_raw_fd())?;
        Ok(Self {
            std,
            reactor,
            registered: std::sync::atomic::AtomicBool::new(false),
        })
    }

    async fn wait_readable(&self) -> Result<()> {
        let fd = self.std.as_raw_fd();
        let first = !self
            .registered
            .swap(true, std::sync::atomic::Ordering::AcqRel);
        if first {
            RegisterRead { reactor: self.reactor.clone(), fd, armed: false }.await
        } else {
            Readable::new(self.reactor.clone(), fd).await
        }
    }

    /// The address this listener is bound to (useful when binding to
    /// port 0 and discovering the OS-assigned port, e.g. in tests).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.std
            .local_addr()
            .expect("a bound listener always has a local address")
    }

    /// Accept one connection, suspending on the reactor while none is
    /// pending.
    pub async fn accept(&self) -> Result<ReadinessStream> {
        loop {
            match self.std.accept() {
                Ok((stream, _addr)) => {
                    set_nonblocking(stream.as_raw_fd())?;
                    return Ok(ReadinessStream::new(stream, self.reactor.clone()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait_readable().await?;
                }
                Err(e) => return Err(Error::Posix(e)),
            }
        }
    }

    /// Loop `accept` until `EAGAIN`, spawning `handler` for each client —
    /// spec.md §4.6's `accept_all` helper coroutine. Exits once `executor`
    /// is stopping, so this long-lived task doesn't keep the executor's
    /// queues non-empty forever during shutdown.
    pub async fn accept_all<F, Fut>(&self, executor: &Arc<Executor>, handler: F)
    where
        F: Fn(ReadinessStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        while !executor.is_stopping() {
            loop {
                match self.std.accept() {
                    Ok((stream, _addr)) => {
                        if let Err(err) = set_nonblocking(stream.as_raw_fd()) {
                            tracing::warn!(%err, "failed to set accepted socket non-blocking");
                            continue;
                        }
                        let stream = ReadinessStream::new(stream, self.reactor.clone());
                        let handler = handler.clone();
                        executor
                            .spawn(async move { handler(stream).await })
                            .detach();
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                        break;
                    }
                }
            }
            if let Err(err) = self.wait_readable().await {
                tracing::warn!(%err, "listener readiness wait failed");
                corio_runtime::yield_now().await;
            }
        }
    }
}

/// First-time registration (`EPOLL_CTL_ADD`); everything after the first
/// wait re-arms via `modify` (`EPOLL_CTL_MOD`), since `epoll_ctl(ADD, ...)`
/// on an already-registered fd fails with `EEXIST`.
struct RegisterRead {
    reactor: Arc<EpollReactor>,
    fd: RawFd,
    armed: bool,
}

impl Future for RegisterRead {
    type Output = Result<()>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.armed {
            return Poll::Ready(Ok(()));
        }
        self.armed = true;
        match self.reactor.add(self.fd, Interest::Readable, cx.waker().clone()) {
            Ok(()) => Poll::Pending,
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl Drop for ReadinessListener {
    fn drop(&mut self) {
        let _ = self.reactor.remove(self.std.as_raw_fd());
    }
}

/// A readiness-based, `epoll`-backed connected socket.
pub struct ReadinessStream {
    std: StdTcpStream,
    reactor: Arc<EpollReactor>,
    read_registered: std::sync::atomic::AtomicBool,
    write_registered: std::sync::atomic::AtomicBool,
}

impl ReadinessStream {
    fn new(std: StdTcpStream, reactor: Arc<EpollReactor>) -> Self {
        Self {
            std,
            reactor,
            read_registered: std::sync::atomic::AtomicBool::new(false),
            write_registered: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Non-blocking recv; returns [`Error::Eof`] on a zero-byte read, per
    /// spec.md §4.6.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match (&self.std).read(buf) {
                Ok(0) => return Err(Error::Eof),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait_readable().await?;
                }
                Err(e) => return Err(Error::Posix(e)),
            }
        }
    }

    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        loop {
            match (&self.std).write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.wait_writable().await?;
                }
                Err(e) => return Err(Error::Posix(e)),
            }
        }
    }

    async fn wait_readable(&self) -> Result<()> {
        let fd = self.std.as_raw_fd();
        let first = !self
            .read_registered
            .swap(true, std::sync::atomic::Ordering::AcqRel);
        if first {
            RegisterRead { reactor: self.reactor.clone(), fd, armed: false }.await
        } else {
            Readable::new(self.reactor.clone(), fd).await
        }
    }

    async fn wait_writable(&self) -> Result<()> {
        let fd = self.std.as_raw_fd();
        self.write_registered
            .store(true, std::sync::atomic::Ordering::Release);
        Writable::new(self.reactor.clone(), fd).await
    }
}

impl Drop for ReadinessStream {
    fn drop(&mut self) {
        let _ = self.reactor.remove(self.std.as_raw_fd());
    }
}

/// A completion-based, `io_uring`-backed connected socket.
pub struct AsyncStream {
    std: StdTcpStream,
    reactor: Arc<UringReactor>,
}

impl AsyncStream {
    fn from_raw_fd(fd: RawFd, reactor: Arc<UringReactor>) -> Self {
        Self {
            std: unsafe { StdTcpStream::from_raw_fd(fd) },
            reactor,
        }
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        RecvFuture {
            reactor: self.reactor.clone(),
            fd: self.std.as_raw_fd(),
            buf,
            slot: None,
        }
        .await
    }

    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        SendFuture {
            reactor: self.reactor.clone(),
            fd: self.std.as_raw_fd(),
            buf,
            slot: None,
        }
        .await
    }
}

struct RecvFuture<'a> {
    reactor: Arc<UringReactor>,
    fd: RawFd,
    buf: &'a mut [u8],
    slot: Option<crate::uring::ResultSlot>,
}

impl Future for RecvFuture<'_> {
    type Output = Result<usize>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<usize>> {
        let this = self.get_mut();
        match &this.slot {
            None => match this
                .reactor
                .prep_recv(this.fd, &mut *this.buf, cx.waker().clone())
            {
                Ok(slot) => {
                    this.slot = Some(slot);
                    Poll::Pending
                }
                Err(e) => Poll::Ready(Err(e)),
            },
            Some(slot) => match slot.lock().unwrap().take() {
                Some(n) if n >= 0 => {
                    if n == 0 {
                        Poll::Ready(Err(Error::Eof))
                    } else {
                        Poll::Ready(Ok(n as usize))
                    }
                }
                Some(n) => Poll::Ready(Err(Error::from_cqe_result(n))),
                None => Poll::Pending,
            },
        }
    }
}

struct SendFuture<'a> {
    reactor: Arc<UringReactor>,
    fd: RawFd,
    buf: &'a [u8],
    slot: Option<crate::uring::ResultSlot>,
}

impl Future for SendFuture<'_> {
    type Output = Result<usize>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<usize>> {
        let this = self.get_mut();
        match &this.slot {
            None => match this.reactor.prep_send(this.fd, this.buf, cx.waker().clone()) {
                Ok(slot) => {
                    this.slot = Some(slot);
                    Poll::Pending
                }
                Err(e) => Poll::Ready(Err(e)),
            },
            Some(slot) => match slot.lock().unwrap().take() {
                Some(n) if n >= 0 => Poll::Ready(Ok(n as usize)),
                Some(n) => Poll::Ready(Err(Error::from_cqe_result(n))),
                None => Poll::Pending,
            },
        }
    }
}

/// A completion-based, `io_uring`-backed listening socket.
pub struct AsyncListener {
    std: StdTcpListener,
    reactor: Arc<UringReactor>,
}

impl AsyncListener {
    pub fn bind(addr: SocketAddr, reactor: Arc<UringReactor>) -> Result<Self> {
        let std = StdTcpListener::bind(addr).map_err(Error::Posix)?;
        Ok(Self { std, reactor })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.std
            .local_addr()
            .expect("a bound listener always has a local address")
    }

    /// Submit a multishot accept, spawning `handler` once per accepted
    /// client for as long as this listener and the reactor's completion
    /// task keep running.
    pub fn accept_all<F, Fut>(&self, executor: Arc<Executor>, handler: F) -> Result<()>
    where
        F: Fn(AsyncStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let reactor = self.reactor.clone();
        let fd = self.std.as_raw_fd();
        self.reactor.prep_multishot_accept(fd, move |client_fd| {
            let stream = AsyncStream::from_raw_fd(client_fd, reactor.clone());
            executor.spawn(handler(stream)).detach();
        })
    }
}
