//! End-to-end scenarios from spec.md §8, driven against the real
//! `epoll`-backed stack (runtime + reactor + http) with a blocking
//! `std::net::TcpStream` playing the client, the way a teacher-style
//! integration test exercises a server binary without reimplementing it
//! as a unit test.

use corio_http::{Connection, FileCache, ResponseBuilder};
use corio_reactor::{EpollReactor, ReadinessListener};
use corio_runtime::Executor;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct TestServer {
    addr: SocketAddr,
    executor: Arc<Executor>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(web_root: &PathBuf) -> Self {
        let executor = Executor::new(2);
        let reactor = EpollReactor::new().unwrap();
        executor
            .spawn(reactor.clone().run(executor.clone()))
            .detach();

        let listener = ReadinessListener::bind("127.0.0.1:0".parse().unwrap(), reactor).unwrap();
        let addr = listener.local_addr();
        let listener = Arc::new(listener);

        let cache = Arc::new(FileCache::new(16));
        let builder = Arc::new(ResponseBuilder::new(web_root.canonicalize().unwrap(), cache));

        let exec_for_accept = executor.clone();
        executor
            .spawn(async move {
                listener
                    .accept_all(&exec_for_accept, move |stream| {
                        let builder = builder.clone();
                        async move {
                            corio_http::serve_connection(Connection::Readiness(stream), builder)
                                .await;
                        }
                    })
                    .await;
            })
            .detach();

        let workers = (0..executor.num_workers())
            .map(|id| {
                let worker = executor.worker(id);
                thread::spawn(move || worker.run())
            })
            .collect();

        // Give the worker threads a moment to start ticking the accept loop.
        thread::sleep(Duration::from_millis(50));

        Self {
            addr,
            executor,
            workers,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.executor.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn write_fixture(dir: &std::path::Path, name: &str, contents: &[u8]) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn temp_web_root(tag: &str) -> PathBuf {
    let mut root = std::env::temp_dir();
    root.push(format!("corio-e2e-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();
    root
}

fn send_request(addr: SocketAddr, request: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    (stream, String::from_utf8_lossy(&buf[..n]).into_owned())
}

#[test]
fn keep_alive_get_returns_body_and_stays_open() {
    let root = temp_web_root("keepalive");
    write_fixture(&root, "hello.txt", b"hi");
    let server = TestServer::start(&root);

    let (mut stream, response) = send_request(
        server.addr,
        "GET /hello.txt HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 2\r\n"));
    assert!(response.ends_with("hi"));

    // Connection should still be open: a second pipelined request on the
    // same socket must also succeed.
    stream
        .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n")
        .unwrap();
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).unwrap();
    let second = String::from_utf8_lossy(&buf[..n]);
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn head_suppresses_body() {
    let root = temp_web_root("head");
    write_fixture(&root, "hello.txt", b"hi");
    let server = TestServer::start(&root);

    let (_stream, response) = send_request(
        server.addr,
        "HEAD /hello.txt HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 2\r\n"));
    assert!(response.ends_with("\r\n\r\n"));
}

#[test]
fn malformed_method_is_bad_request_and_closes() {
    let root = temp_web_root("badreq");
    let server = TestServer::start(&root);

    let (mut stream, response) = send_request(server.addr, "GIT / HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Content-Length: 0\r\n"));

    // The server closes after a bad request; a further read observes EOF.
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn missing_file_is_not_found() {
    let root = temp_web_root("notfound");
    let server = TestServer::start(&root);

    let (_stream, response) = send_request(
        server.addr,
        "GET /does-not-exist.txt HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[test]
fn directory_root_resolves_to_index() {
    let root = temp_web_root("index");
    write_fixture(&root, "index.html", b"<html>hi</html>");
    let server = TestServer::start(&root);

    let (_stream, response) =
        send_request(server.addr, "GET / HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("<html>hi</html>"));
}

#[test]
fn path_cannot_escape_web_root() {
    let root = temp_web_root("escape");
    write_fixture(&root, "inside.txt", b"safe");
    let server = TestServer::start(&root);

    let (_stream, response) = send_request(
        server.addr,
        "GET /../../../../etc/passwd HTTP/1.1\r\nHost: x\r\nAccept: */*\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
}
