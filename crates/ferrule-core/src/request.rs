//! HTTP Request types

use crate::headers::Headers;
use crate::method::Method;
use bytes::Bytes;
use std::net::SocketAddr;

/// HTTP Request, immutable once parsed
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path, "/"-rooted
    pub path: String,
    /// Request headers
    pub headers: Headers,
    /// Request body
    pub body: Bytes,
    /// Socket peer, filled in by the connection handler
    pub peer: Option<SocketAddr>,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            body: Bytes::new(),
            peer: None,
        }
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header("authorization")
    }

    /// Token from `Authorization: Bearer <token>`, prefix matched case-insensitively
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.authorization()?.trim();
        let prefix = value.get(..7)?;
        if !prefix.eq_ignore_ascii_case("bearer ") {
            return None;
        }
        let token = value[7..].trim();
        (!token.is_empty()).then_some(token)
    }

    /// Get body as text (lossy UTF-8)
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Best-effort client IP from reverse-proxy headers.
    ///
    /// Order: left-most `X-Forwarded-For` entry, then `X-Real-IP`, then the
    /// first `for=` parameter of `Forwarded`. Returns the bare address with
    /// quotes, IPv6 brackets and an IPv4 port suffix removed.
    pub fn client_ip(&self) -> Option<String> {
        if let Some(first) = self
            .header("x-forwarded-for")
            .and_then(|xff| xff.split(',').next())
        {
            if let Some(ip) = clean_ip_token(first) {
                return Some(ip);
            }
        }

        if let Some(ip) = self.header("x-real-ip").and_then(clean_ip_token) {
            return Some(ip);
        }

        self.header("forwarded")
            .and_then(forwarded_for)
            .and_then(clean_ip_token)
    }

    /// Every sanitized entry of `X-Forwarded-For`
    pub fn client_ip_chain(&self) -> Vec<String> {
        self.header("x-forwarded-for")
            .map(|xff| xff.split(',').filter_map(clean_ip_token).collect())
            .unwrap_or_default()
    }

    /// Address reported to activity sinks: proxy headers first, then the socket peer
    pub fn client_address(&self) -> Option<String> {
        self.client_ip()
            .or_else(|| self.peer.map(|addr| addr.ip().to_string()))
    }
}

fn forwarded_for(header: &str) -> Option<&str> {
    header
        .split(',')
        .flat_map(|entry| entry.split(';'))
        .map(str::trim)
        .find(|kv| kv.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("for=")))
        .map(|kv| kv[4..].trim())
}

fn clean_ip_token(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s = &s[1..s.len() - 1];
    }

    // [::1] or [::1]:8080
    if let Some(rest) = s.strip_prefix('[') {
        let inner = &rest[..rest.find(']')?];
        return (!inner.is_empty()).then(|| inner.to_string());
    }

    // Strip ":port" only for IPv4-looking tokens
    if s.matches(':').count() == 1 {
        let host = s.split(':').next().unwrap_or_default();
        return (!host.is_empty()).then(|| host.to_string());
    }

    Some(s.to_string())
}

/// Builder for constructing requests
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Create a new builder
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request: Request::new(method, path),
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.set(name, value);
        self
    }

    /// Set body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn peer(mut self, peer: SocketAddr) -> Self {
        self.request.peer = Some(peer);
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}
