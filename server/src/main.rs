//! `corio-server`: the HTTP/1.1 static-file collaborator from spec.md §6,
//! wiring the runtime core (`corio-runtime`), a reactor backend
//! (`corio-reactor`), and the HTTP layer (`corio-http`) together.
//!
//! CLI parsing follows the teacher's convention of `clap` derive plus
//! `env` fallbacks; `anyhow` is reserved for this startup path only, per
//! SPEC_FULL.md's ambient-stack section — everything below the `main`
//! boundary returns `corio_error::Result`.

use anyhow::Context;
use clap::Parser;
use corio_http::{Connection, FileCache, ResponseBuilder};
use corio_reactor::{AsyncListener, Backend, EpollReactor, ReadinessListener, UringReactor};
use corio_runtime::Executor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// `server <port> <web-root>`, per spec.md §6's CLI surface, extended
/// with the ambient flags a real deployment needs (backend choice,
/// worker count, cache size, log verbosity).
#[derive(Parser, Debug)]
#[command(name = "corio-server", about = "A small async HTTP/1.1 static file server")]
struct Cli {
    /// TCP port to listen on.
    port: u16,

    /// Directory to serve files from.
    web_root: PathBuf,

    /// Reactor backend: `epoll` (readiness-based) or `io_uring`
    /// (completion-based).
    #[arg(long, env = "CORIO_BACKEND", default_value_t = Backend::Epoll)]
    backend: Backend,

    /// Number of worker threads; defaults to `hardware_concurrency - 1`
    /// (minimum 1), per spec.md §4.2.
    #[arg(long, env = "CORIO_WORKERS", default_value_t = default_workers())]
    workers: usize,

    /// Maximum number of mmap'd files held by the file cache.
    #[arg(long, env = "CORIO_CACHE_CAPACITY", default_value_t = 1024)]
    cache_capacity: usize,

    /// `tracing-subscriber` `EnvFilter` directive, e.g. `debug` or
    /// `corio_runtime=trace,corio_http=info`.
    #[arg(long, env = "CORIO_LOG", default_value = "info")]
    log: String,
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log))
        .init();

    let root = corio_http::response::canonicalize_root(&cli.web_root)
        .with_context(|| format!("web root {:?} does not exist", cli.web_root))?;

    install_signal_handlers();

    let executor = Executor::new(cli.workers);
    let cache = Arc::new(FileCache::new(cli.cache_capacity));
    let builder = Arc::new(ResponseBuilder::new(root, cache));
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));

    tracing::info!(
        port = cli.port,
        backend = %cli.backend,
        workers = cli.workers,
        "starting corio-server"
    );

    match cli.backend {
        Backend::Epoll => run_epoll(&executor, addr, builder)?,
        Backend::Uring => run_uring(&executor, addr, builder)?,
    }

    let workers: Vec<_> = (0..executor.num_workers())
        .map(|id| {
            let worker = executor.worker(id);
            thread::Builder::new()
                .name(format!("corio-worker-{id}"))
                .spawn(move || worker.run())
                .expect("failed to spawn worker thread")
        })
        .collect();

    {
        let executor = executor.clone();
        thread::spawn(move || {
            while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(200));
            }
            tracing::info!("shutdown requested, stopping executor");
            executor.stop();
        });
    }

    // The calling thread becomes the reaper, per spec.md §4.2.
    executor.enter();

    for worker in workers {
        let _ = worker.join();
    }

    tracing::info!("corio-server exited cleanly");
    Ok(())
}

fn run_epoll(
    executor: &Arc<Executor>,
    addr: SocketAddr,
    builder: Arc<ResponseBuilder>,
) -> anyhow::Result<()> {
    let reactor = EpollReactor::new().context("failed to create epoll instance")?;
    executor.spawn(reactor.clone().run(executor.clone())).detach();

    let listener =
        ReadinessListener::bind(addr, reactor).context("failed to bind listening socket")?;
    let listener = Arc::new(listener);
    let executor_for_accept = executor.clone();
    executor
        .spawn(async move {
            listener
                .accept_all(&executor_for_accept, move |stream| {
                    let builder = builder.clone();
                    async move {
                        corio_http::serve_connection(Connection::Readiness(stream), builder).await;
                    }
                })
                .await;
        })
        .detach();
    Ok(())
}

fn run_uring(
    executor: &Arc<Executor>,
    addr: SocketAddr,
    builder: Arc<ResponseBuilder>,
) -> anyhow::Result<()> {
    let reactor = UringReactor::new().context("failed to create io_uring instance")?;
    executor.spawn(reactor.clone().run(executor.clone())).detach();

    let listener =
        AsyncListener::bind(addr, reactor).context("failed to bind listening socket")?;
    listener
        .accept_all(executor.clone(), move |stream| {
            let builder = builder.clone();
            async move {
                corio_http::serve_connection(Connection::Async(stream), builder).await;
            }
        })
        .context("failed to submit multishot accept")?;
    // `listener` must outlive the multishot submission; leak it for the
    // process lifetime rather than thread it through every shutdown path.
    std::mem::forget(listener);
    Ok(())
}
