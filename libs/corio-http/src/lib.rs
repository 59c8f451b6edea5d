//! The HTTP/1.1 static-file server, specified only as a consumer of the
//! runtime core (spec.md §4.7): request reader, parser, response builder,
//! and an mmap-backed file cache.

pub mod cache;
pub mod connection;
pub mod request;
pub mod response;

pub use cache::FileCache;
pub use connection::Connection;
pub use request::{Headers, Method, Request, RequestReader};
pub use response::ResponseBuilder;

/// Serve one connection to completion: read a request, build and write a
/// response, and repeat until the client asks to close or a transport
/// error ends the loop — spec.md §6's keep-alive contract.
pub async fn serve_connection(conn: Connection, builder: std::sync::Arc<ResponseBuilder>) {
    let mut reader = RequestReader::new();
    loop {
        let request = match reader.read_request(&conn).await {
            Ok(request) => request,
            Err(err) => {
                if let Some(status) = err.http_status() {
                    let response = response::Response::error(status);
                    let _ = conn.send_all(&response.render()).await;
                }
                return;
            }
        };

        let close = request.wants_close();
        let response = builder.build(&request);
        if conn.send_all(&response.render()).await.is_err() {
            return;
        }
        if close {
            return;
        }
    }
}
