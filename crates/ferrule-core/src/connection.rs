//! Per-connection handler
//!
//! One instance owns one accepted stream and serves exactly one request:
//!
//! ```text
//! AwaitingData -> Assembling -> Dispatching -> Responding -> Closed
//! ```
//!
//! The stream is read while the router runs, so a peer that hangs up
//! mid-dispatch cancels the in-flight handler. Parse failures are answered
//! with 400 without reaching the router; socket failures go to the activity
//! sink and never escape the connection task.

use crate::activity::{ActivityEvent, ActivitySink};
use crate::assembler::MessageAssembler;
use crate::codec;
use crate::router::Router;
use crate::{Request, Response};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace, warn};

/// Initial read buffer capacity per connection
const INITIAL_BUF_SIZE: usize = 4096;

const REJECT_DRAIN: std::time::Duration = std::time::Duration::from_secs(1);

/// Shared, read-only state handed to every connection
pub struct ConnectionContext {
    pub router: Router,
    pub sink: Option<Arc<dyn ActivitySink>>,
    pub service_name: Arc<str>,
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingData,
    Assembling,
    Dispatching,
    Responding,
    Closed,
}

/// What the request looked like, captured before the router takes ownership
struct RequestSummary {
    method: crate::Method,
    path: String,
    client_address: Option<String>,
    request_id: Option<String>,
    user_agent: Option<String>,
}

impl RequestSummary {
    fn of(req: &Request) -> Self {
        Self {
            method: req.method,
            path: req.path.clone(),
            client_address: req.client_address(),
            request_id: req.header("x-request-id").map(str::to_string),
            user_agent: req.header("user-agent").map(str::to_string),
        }
    }
}

pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    assembler: MessageAssembler,
    state: ConnectionState,
    ctx: Arc<ConnectionContext>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: Option<SocketAddr>, ctx: Arc<ConnectionContext>) -> Self {
        Self {
            stream,
            peer,
            assembler: MessageAssembler::with_capacity(INITIAL_BUF_SIZE)
                .limit(ctx.max_message_bytes),
            state: ConnectionState::AwaitingData,
            ctx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(peer = ?self.peer, from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    /// Serve one request and close. Never fails: errors are reported, not returned.
    pub async fn run(mut self) -> ConnectionState {
        if let Err(e) = self.serve().await {
            debug!(peer = ?self.peer, error = %e, "connection closed with error");
            if let Some(sink) = &self.ctx.sink {
                sink.transport_error(self.peer, &e);
            }
        }
        let _ = self.stream.shutdown().await;
        self.assembler.clear();
        self.transition(ConnectionState::Closed);
        self.state
    }

    async fn serve(&mut self) -> io::Result<()> {
        let Some((message, started)) = self.receive().await? else {
            return Ok(());
        };

        let mut req = match codec::parse_request(&message) {
            Ok(req) => req,
            Err(e) => {
                warn!(peer = ?self.peer, error = %e, "bad request, sending 400");
                let res = Response::bad_request(&format!("Bad Request: {e}"));
                return self.respond(&res).await;
            }
        };
        req.peer = self.peer;

        let summary = RequestSummary::of(&req);
        debug!(
            peer = ?self.peer,
            method = %summary.method,
            path = %summary.path,
            "dispatching request"
        );

        let Some(res) = self.dispatch(req).await? else {
            return Ok(());
        };

        self.respond(&res).await?;
        self.record(summary, &res, started);
        Ok(())
    }

    /// Read until one whole message is buffered. `None` means the peer left
    /// cleanly before sending anything, or the message was too large.
    async fn receive(&mut self) -> io::Result<Option<(bytes::Bytes, Instant)>> {
        let mut first_byte = None;

        loop {
            let n = self.stream.read_buf(self.assembler.buffer_mut()).await?;
            if n == 0 {
                if self.assembler.buffered_len() == 0 {
                    debug!(peer = ?self.peer, "connection closed by peer");
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed before the message was complete",
                ));
            }
            let started = *first_byte.get_or_insert_with(Instant::now);
            if self.state == ConnectionState::AwaitingData {
                self.transition(ConnectionState::Assembling);
            }

            match self.assembler.try_extract() {
                Ok(Some(message)) => return Ok(Some((message, started))),
                Ok(None) => {}
                Err(e) => {
                    warn!(peer = ?self.peer, error = %e, "message too large, sending 413");
                    self.respond(&Response::payload_too_large()).await?;
                    return Ok(None);
                }
            }
        }
    }

    /// Run the router in its own task while watching the socket.
    ///
    /// `None` means the peer went away and the handler was cancelled.
    async fn dispatch(&mut self, req: Request) -> io::Result<Option<Response>> {
        self.transition(ConnectionState::Dispatching);

        let router = self.ctx.router.clone();
        let mut task = tokio::spawn(async move { router.route(req).await });
        let mut probe = [0u8; 512];

        loop {
            tokio::select! {
                joined = &mut task => {
                    return Ok(Some(match joined {
                        Ok(res) => res,
                        Err(e) => {
                            error!(peer = ?self.peer, error = %e, "request handler panicked");
                            Response::internal_error()
                        }
                    }));
                }
                read = self.stream.read(&mut probe) => {
                    match read {
                        // No pipelining: extra bytes are dropped
                        Ok(n) if n > 0 => continue,
                        Ok(_) => {
                            task.abort();
                            debug!(peer = ?self.peer, "peer closed during dispatch; handler cancelled");
                            return Ok(None);
                        }
                        Err(e) => {
                            task.abort();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn respond(&mut self, res: &Response) -> io::Result<()> {
        self.transition(ConnectionState::Responding);
        let wire = codec::serialize_response(res);
        self.stream.write_all(&wire).await?;
        self.stream.flush().await
    }

    fn record(&self, summary: RequestSummary, res: &Response, started: Instant) {
        let Some(sink) = &self.ctx.sink else {
            return;
        };
        sink.record(&ActivityEvent {
            service_name: self.ctx.service_name.to_string(),
            timestamp: SystemTime::now(),
            method: summary.method,
            path: summary.path,
            status: res.status.clone(),
            client_address: summary.client_address,
            request_id: summary.request_id,
            user_agent: summary.user_agent,
            duration: Some(started.elapsed()),
        });
    }
}

/// Write a canned response on a connection that will not be served, then close.
///
/// Whatever the peer sent is drained (bounded by `REJECT_DRAIN`) so closing does
/// not turn into a reset that discards the response.
pub async fn reject<S>(mut stream: S, res: &Response) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&codec::serialize_response(res)).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    let mut sink = [0u8; 1024];
    let _ = tokio::time::timeout(REJECT_DRAIN, async {
        while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
    })
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{get, post};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::io::duplex;

    fn context(routes: Vec<crate::Route>, sink: Option<Arc<dyn ActivitySink>>) -> Arc<ConnectionContext> {
        Arc::new(ConnectionContext {
            router: Router::new(routes),
            sink,
            service_name: Arc::from("test"),
            max_message_bytes: 64,
        })
    }

    fn echo_routes() -> Vec<crate::Route> {
        vec![post("/echo", |req, _| async move {
            Response::text(format!("echo: {}", req.body_text()))
        })]
    }

    async fn exchange(ctx: Arc<ConnectionContext>, chunks: &[&[u8]]) -> (String, ConnectionState) {
        let (mut client, server) = duplex(1024);
        let conn = tokio::spawn(Connection::new(server, None, ctx).run());

        for chunk in chunks {
            client.write_all(chunk).await.unwrap();
            tokio::task::yield_now().await;
        }

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let state = conn.await.unwrap();
        (String::from_utf8(out).unwrap(), state)
    }

    #[tokio::test]
    async fn test_fragmented_request_is_served() {
        let (out, state) = exchange(
            context(echo_routes(), None),
            &[b"POST /ec", b"ho\r\nContent-Len", b"gth: 5\r\n\r\nhe", b"llo"],
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("\r\n\r\necho: hello\n"));
        assert_eq!(state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_parse_failure_skips_router() {
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        let routes = vec![get("/", move |_, _| {
            *counter.lock() += 1;
            async { Response::text("root") }
        })];

        let (out, _) = exchange(context(routes, None), &[b"BREW / HTTP/1.1\r\n\r\n"]).await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(out.contains("Invalid HTTP method: BREW"));
        assert_eq!(*hits.lock(), 0);
    }

    #[tokio::test]
    async fn test_oversized_message_gets_413() {
        let big = vec![b'a'; 100];
        let (out, _) = exchange(context(echo_routes(), None), &[b"POST /echo\r\nX-Pad: ", &big]).await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_gets_413_without_body() {
        let (out, state) = exchange(
            context(echo_routes(), None),
            &[b"POST /echo\r\nContent-Length: 18446744073709551615\r\n\r\nabc"],
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert_eq!(state, ConnectionState::Closed);

        let (out, _) = exchange(
            context(echo_routes(), None),
            &[b"POST /echo\r\nContent-Length: 65\r\n\r\n"],
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_500() {
        let routes = vec![get("/boom", |req, _| async move {
            if req.path == "/boom" {
                panic!("kaboom");
            }
            Response::ok()
        })];
        let (out, _) = exchange(context(routes, None), &[b"GET /boom\r\n\r\n"]).await;
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(!out.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_activity_event_recorded() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let sink: Arc<dyn ActivitySink> = Arc::new(move |e: &ActivityEvent| seen.lock().push(e.clone()));

        let (_, _) = exchange(
            context(echo_routes(), Some(sink)),
            &[b"GET /missing\r\nUser-Agent: probe\r\nX-Forwarded-For: 10.9.8.7\r\n\r\n"],
        )
        .await;

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status.code, 404);
        assert_eq!(events[0].path, "/missing");
        assert_eq!(events[0].user_agent.as_deref(), Some("probe"));
        assert_eq!(events[0].client_address.as_deref(), Some("10.9.8.7"));
        assert_eq!(events[0].service_name, "test");
    }

    #[tokio::test]
    async fn test_peer_close_cancels_dispatch() {
        let finished = Arc::new(Mutex::new(false));
        let flag = finished.clone();
        let routes = vec![get("/slow", move |_, _| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                *flag.lock() = true;
                Response::text("late")
            }
        })];

        let (mut client, server) = duplex(1024);
        let conn = tokio::spawn(Connection::new(server, None, context(routes, None)).run());
        client.write_all(b"GET /slow\r\n\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(client);

        let state = tokio::time::timeout(Duration::from_secs(5), conn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, ConnectionState::Closed);
        assert!(!*finished.lock());
    }

    #[tokio::test]
    async fn test_eof_mid_message_reports_transport_error() {
        struct Errors(Mutex<Vec<io::ErrorKind>>);
        impl ActivitySink for Errors {
            fn record(&self, _event: &ActivityEvent) {}
            fn transport_error(&self, _peer: Option<SocketAddr>, error: &io::Error) {
                self.0.lock().push(error.kind());
            }
        }

        let errors = Arc::new(Errors(Mutex::new(Vec::new())));
        let (mut client, server) = duplex(1024);
        let conn = tokio::spawn(
            Connection::new(server, None, context(echo_routes(), Some(errors.clone()))).run(),
        );
        client.write_all(b"POST /echo\r\nContent-Length: 10\r\n\r\nabc").await.unwrap();
        drop(client);

        assert_eq!(conn.await.unwrap(), ConnectionState::Closed);
        assert_eq!(*errors.0.lock(), vec![io::ErrorKind::UnexpectedEof]);
    }

    #[tokio::test]
    async fn test_reject_writes_and_closes() {
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(async move {
            reject(server, &Response::service_unavailable("Server at capacity")).await
        });
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        drop(client);
        task.await.unwrap().unwrap();
        assert!(out.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(out.contains("Server at capacity"));
    }
}
