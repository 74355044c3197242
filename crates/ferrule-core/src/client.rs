//! Outbound HTTP client
//!
//! Each call connects, writes one request, reads one response and closes.
//! The exchange runs in its own task and reports into a shared slot; the
//! caller polls that slot and cancels the task when the deadline passes.

use crate::assembler::MessageAssembler;
use crate::codec;
use crate::config::ClientConfig;
use crate::{Error, Headers, Method, Request, Response, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

#[cfg(feature = "tls")]
use crate::tls::PinnedTls;

/// Credentials attached to an outbound request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestAuth {
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// Arbitrary header name and value
    Custom(String, String),
}

impl RequestAuth {
    fn apply(&self, headers: &mut Headers) {
        match self {
            RequestAuth::None => {}
            RequestAuth::Bearer(token) => headers.set("Authorization", format!("Bearer {token}")),
            RequestAuth::Custom(name, value) => headers.set(name.clone(), value.clone()),
        }
    }
}

type Slot = Arc<Mutex<Option<Result<Response>>>>;

#[derive(Debug, Clone)]
pub struct HttpClient {
    config: ClientConfig,
    #[cfg(feature = "tls")]
    tls: Option<PinnedTls>,
}

impl HttpClient {
    /// Build a client; loads pinned TLS material when the config asks for it
    pub fn new(config: ClientConfig) -> Result<Self> {
        #[cfg(feature = "tls")]
        let tls = config
            .tls
            .as_ref()
            .map(|tls| PinnedTls::from_config(tls, &config.host))
            .transpose()?;

        #[cfg(not(feature = "tls"))]
        if config.tls.is_some() {
            return Err(Error::InvalidConfig(
                "TLS requested but the `tls` feature is disabled".to_string(),
            ));
        }

        Ok(Self {
            config,
            #[cfg(feature = "tls")]
            tls,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get(&self, path: &str, auth: RequestAuth) -> Result<Response> {
        self.send(Method::Get, path, Headers::new(), Bytes::new(), auth).await
    }

    pub async fn delete(&self, path: &str, auth: RequestAuth) -> Result<Response> {
        self.send(Method::Delete, path, Headers::new(), Bytes::new(), auth).await
    }

    pub async fn post(&self, path: &str, body: impl Into<Bytes>, auth: RequestAuth) -> Result<Response> {
        self.send(Method::Post, path, Headers::new(), body.into(), auth).await
    }

    pub async fn put(&self, path: &str, body: impl Into<Bytes>, auth: RequestAuth) -> Result<Response> {
        self.send(Method::Put, path, Headers::new(), body.into(), auth).await
    }

    pub async fn patch(&self, path: &str, body: impl Into<Bytes>, auth: RequestAuth) -> Result<Response> {
        self.send(Method::Patch, path, Headers::new(), body.into(), auth).await
    }

    /// Send one request and wait for its response or the configured timeout
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        headers: Headers,
        body: Bytes,
        auth: RequestAuth,
    ) -> Result<Response> {
        let mut req = Request::new(method, path);
        req.headers = headers;
        auth.apply(&mut req.headers);
        req.body = body;

        let wire = codec::serialize_request(&req, &self.config.authority());
        let slot: Slot = Arc::new(Mutex::new(None));

        let task = {
            let client = self.clone();
            let slot = slot.clone();
            tokio::spawn(async move {
                let result = client.exchange(wire).await;
                *slot.lock() = Some(result);
            })
        };

        let deadline = Instant::now() + self.config.timeout;
        loop {
            let finished = task.is_finished();
            if let Some(result) = slot.lock().take() {
                return result;
            }
            if finished {
                // Task ended without reporting: it panicked
                return Err(Error::Internal("client task ended without a result".to_string()));
            }
            if Instant::now() >= deadline {
                task.abort();
                tracing::debug!(%method, path, timeout = ?self.config.timeout, "request timed out");
                return Err(Error::Timeout(self.config.timeout));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn exchange(&self, wire: Bytes) -> Result<Response> {
        let authority = self.config.authority();
        let tcp = TcpStream::connect(&authority)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{authority}: {e}")))?;
        let _ = tcp.set_nodelay(true);

        #[cfg(feature = "tls")]
        if let Some(tls) = &self.tls {
            let stream = tls
                .connector
                .connect(tls.server_name.clone(), tcp)
                .await
                .map_err(|e| Error::Tls(format!("handshake with {authority} failed: {e}")))?;
            return transfer(stream, &wire, self.config.max_message_bytes).await;
        }

        transfer(tcp, &wire, self.config.max_message_bytes).await
    }
}

/// Write the request, then read until a whole response is buffered or the
/// server closes.
///
/// The write side is left open: the server treats a half-close as the peer
/// going away.
async fn transfer<S>(mut stream: S, wire: &[u8], max_message_bytes: usize) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(wire).await?;
    stream.flush().await?;

    let mut assembler = MessageAssembler::new().limit(max_message_bytes);
    let message = loop {
        let n = stream.read_buf(assembler.buffer_mut()).await?;
        if let Some(message) = assembler.try_extract()? {
            break message;
        }
        if n == 0 {
            if assembler.buffered_len() == 0 {
                return Err(Error::ConnectionFailed(
                    "connection closed without a response".to_string(),
                ));
            }
            break assembler.buffer_mut().split().freeze();
        }
    };

    let _ = stream.shutdown().await;
    Ok(codec::parse_response(&message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// One-shot server that answers with `reply` after `delay`
    async fn canned_server(reply: &'static [u8], delay: Duration) -> (u16, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);
            tokio::time::sleep(delay).await;
            let _ = stream.write_all(reply).await;
            let _ = stream.shutdown().await;
            buf
        });
        (port, handle)
    }

    #[test]
    fn test_auth_headers() {
        let mut headers = Headers::new();
        RequestAuth::Bearer("t0k".to_string()).apply(&mut headers);
        assert_eq!(headers.get("authorization"), Some("Bearer t0k"));

        RequestAuth::Custom("X-Api-Key".to_string(), "k".to_string()).apply(&mut headers);
        assert_eq!(headers.get("x-api-key"), Some("k"));

        let before = headers.len();
        RequestAuth::None.apply(&mut headers);
        assert_eq!(headers.len(), before);
    }

    #[tokio::test]
    async fn test_send_parses_response() {
        let (port, server) = canned_server(
            b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\nX-Id: 7\r\n\r\nok\n",
            Duration::ZERO,
        )
        .await;
        let client = HttpClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();

        let res = client
            .post("/items", "payload", RequestAuth::Bearer("abc".to_string()))
            .await
            .unwrap();
        assert_eq!(res.status.code, 201);
        assert_eq!(res.header("x-id"), Some("7"));
        assert_eq!(res.body.as_ref(), b"ok");

        let sent = String::from_utf8(server.await.unwrap()).unwrap();
        assert!(sent.starts_with("POST /items\r\n"));
        assert!(sent.contains(&format!("Host: 127.0.0.1:{port}\r\n")));
        assert!(sent.contains("Authorization: Bearer abc\r\n"));
        assert!(sent.ends_with("\r\n\r\npayload"));
    }

    #[tokio::test]
    async fn test_timeout_cancels_exchange() {
        let (port, _server) = canned_server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
            Duration::from_secs(5),
        )
        .await;
        let client = HttpClient::new(
            ClientConfig::new("127.0.0.1", port).timeout(Duration::from_millis(100)),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let result = client.get("/slow", RequestAuth::None).await;
        assert!(matches!(result, Err(Error::Timeout(t)) if t == Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_oversized_response_is_rejected() {
        let (port, _server) = canned_server(
            b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nab",
            Duration::ZERO,
        )
        .await;
        let mut config = ClientConfig::new("127.0.0.1", port);
        config.max_message_bytes = 64;
        let client = HttpClient::new(config).unwrap();

        let result = client.get("/", RequestAuth::None).await;
        assert!(matches!(
            result,
            Err(Error::Parse(crate::ParseError::TooLarge(64)))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();
        let result = client.get("/", RequestAuth::None).await;
        assert!(matches!(result, Err(Error::ConnectionFailed(_))));
    }
}
