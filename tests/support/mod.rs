//! A minimal HTTP/2 server for integration tests, dispatching on `:path`
//! per spec.md §8's scenario table: `/ok` → 200 immediately, `/crash` →
//! simulated server exception (`RST_STREAM`), `/silence` → never responds,
//! `/sleep/N` → 200 after N seconds, anything else → 404.
//!
//! Built directly on `h2::server` rather than a mock HTTP library, since
//! none of the fake-server crates in the retrieval pack speak HTTP/2 at the
//! frame level this suite needs (`/crash`'s `RST_STREAM`, `/silence`'s
//! indefinite non-response); grounded in `carllerche-h2/src/server.rs` and
//! `carllerche-h2/examples/akamai.rs`'s handshake/request shape (updated to
//! the current `h2` server API).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use tokio::net::{TcpListener, TcpStream};

/// A running fake server; dropping it stops accepting new connections (the
/// listener task is aborted).
pub struct FakeServer {
    pub addr: SocketAddr,
    accept_task: tokio::task::JoinHandle<()>,
    flaky_failures_remaining: Arc<AtomicU32>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl FakeServer {
    /// Binds a loopback listener and starts accepting HTTP/2 connections,
    /// each served on its own task.
    pub async fn start() -> Self {
        Self::start_with_flaky_failures(0).await
    }

    /// As [`FakeServer::start`], but `/flaky` responds 503 with a zero-second
    /// `Retry-After` for the first `failures` requests it sees (server-wide,
    /// across any connection), then 200 forever after — for exercising
    /// [`crate::retry::FcmServerErrorPolicy`]'s retry-with-backoff path.
    pub async fn start_with_flaky_failures(failures: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener has a local address");
        let flaky_failures_remaining = Arc::new(AtomicU32::new(failures));

        let remaining = flaky_failures_remaining.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(serve_connection(socket, remaining.clone()));
            }
        });

        Self { addr, accept_task, flaky_failures_remaining }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Requests still needed before `/flaky` starts answering 200.
    pub fn flaky_failures_remaining(&self) -> u32 {
        self.flaky_failures_remaining.load(Ordering::SeqCst)
    }
}

async fn serve_connection(socket: TcpStream, flaky_failures_remaining: Arc<AtomicU32>) {
    let mut connection = match h2::server::handshake(socket).await {
        Ok(c) => c,
        Err(_) => return,
    };

    while let Some(result) = connection.accept().await {
        let (request, respond) = match result {
            Ok(pair) => pair,
            Err(_) => continue,
        };
        tokio::spawn(handle_request(request, respond, flaky_failures_remaining.clone()));
    }
}

async fn handle_request(
    request: Request<h2::RecvStream>,
    mut respond: h2::server::SendResponse<Bytes>,
    flaky_failures_remaining: Arc<AtomicU32>,
) {
    let path = request.uri().path().to_string();

    if path == "/silence" {
        // Never respond. The connection stays open; the caller's own
        // per-stream response timeout is what ends this.
        std::future::pending::<()>().await;
        return;
    }

    if path == "/crash" {
        let _ = respond.send_reset(h2::Reason::INTERNAL_ERROR);
        return;
    }

    if let Some(rest) = path.strip_prefix("/sleep/") {
        if let Ok(seconds) = rest.parse::<u64>() {
            tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
        }
        respond_ok(&mut respond, Bytes::new());
        return;
    }

    if path == "/flaky" {
        let still_failing = flaky_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None })
            .is_ok();
        if still_failing {
            let response = Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .header(http::header::RETRY_AFTER, "0")
                .body(())
                .expect("valid 503 response");
            if let Ok(mut send) = respond.send_response(response, false) {
                let _ = send.send_data(Bytes::new(), true);
            }
        } else {
            respond_ok(&mut respond, Bytes::from_static(b"ok"));
        }
        return;
    }

    if path == "/ok" {
        respond_ok(&mut respond, Bytes::from_static(b"ok"));
        return;
    }

    let response = Response::builder().status(StatusCode::NOT_FOUND).body(()).expect("valid 404 response");
    if let Ok(mut send) = respond.send_response(response, false) {
        let _ = send.send_data(Bytes::new(), true);
    }
}

fn respond_ok(respond: &mut h2::server::SendResponse<Bytes>, body: Bytes) {
    let response = Response::builder().status(StatusCode::OK).body(()).expect("valid 200 response");
    if let Ok(mut send) = respond.send_response(response, false) {
        let _ = send.send_data(body, true);
    }
}
