//! HTTP Response types

use crate::headers::Headers;
use crate::status::Status;
use bytes::Bytes;
use serde::Serialize;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";

/// HTTP Response
///
/// Headers and body stay mutable so middleware can decorate a response on
/// the way out. `Content-Length` and the default `Content-Type` are only
/// settled at serialization time.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status code and reason
    pub status: Status,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
}

impl Response {
    /// Create a new response
    pub fn new(status: Status) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Create a 200 OK response
    pub fn ok() -> Self {
        Self::new(Status::OK)
    }

    /// Create a text response
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::with_text(Status::OK, body)
    }

    /// Text response with an explicit status
    pub fn with_text(status: Status, body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", TEXT_PLAIN)
            .body(body)
            .build()
    }

    /// Create a JSON response; a value that fails to serialize yields a 500
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => ResponseBuilder::new(Status::OK)
                .header("Content-Type", APPLICATION_JSON)
                .body(body)
                .build(),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize JSON response");
                Self::internal_error()
            }
        }
    }

    pub fn no_content() -> Self {
        Self::new(Status::NO_CONTENT)
    }

    /// Create a 400 Bad Request response
    pub fn bad_request(message: &str) -> Self {
        Self::with_text(Status::BAD_REQUEST, message.to_string())
    }

    /// 401 with `WWW-Authenticate: Bearer realm="<realm>"`
    pub fn unauthorized_realm(message: &str, realm: &str) -> Self {
        ResponseBuilder::new(Status::UNAUTHORIZED)
            .header("Content-Type", TEXT_PLAIN)
            .header("WWW-Authenticate", format!("Bearer realm=\"{realm}\""))
            .body(message.to_string())
            .build()
    }

    /// 401 with `WWW-Authenticate: Bearer error="<error>"`
    pub fn unauthorized_error(message: &str, error: &str) -> Self {
        ResponseBuilder::new(Status::UNAUTHORIZED)
            .header("Content-Type", TEXT_PLAIN)
            .header("WWW-Authenticate", format!("Bearer error=\"{error}\""))
            .body(message.to_string())
            .build()
    }

    /// Create a 404 Not Found response
    pub fn not_found(message: &str) -> Self {
        Self::with_text(Status::NOT_FOUND, message.to_string())
    }

    pub fn method_not_allowed(message: &str) -> Self {
        Self::with_text(Status::METHOD_NOT_ALLOWED, message.to_string())
    }

    /// 429 carrying `Retry-After` (whole seconds, rounded up) and the limit
    pub fn too_many_requests(message: &str, retry_after_secs: u64, limit: usize) -> Self {
        ResponseBuilder::new(Status::TOO_MANY_REQUESTS)
            .header("Content-Type", TEXT_PLAIN)
            .header("Retry-After", retry_after_secs.to_string())
            .header("X-RateLimit-Limit", limit.to_string())
            .body(message.to_string())
            .build()
    }

    /// Create a 500 with the generic body; causes never reach the wire
    pub fn internal_error() -> Self {
        Self::with_text(Status::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }

    pub fn service_unavailable(message: &str) -> Self {
        Self::with_text(Status::SERVICE_UNAVAILABLE, message.to_string())
    }

    pub fn payload_too_large() -> Self {
        Self::with_text(Status::PAYLOAD_TOO_LARGE, "Payload Too Large")
    }

    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get content-type header
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get body as string (if UTF-8)
    pub fn body_string(&self) -> Option<String> {
        std::str::from_utf8(&self.body).ok().map(|s| s.to_string())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::ok()
    }
}

/// Builder for constructing responses
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Create a new builder
    pub fn new(status: Status) -> Self {
        Self {
            response: Response::new(status),
        }
    }

    /// Set status
    pub fn status(mut self, status: Status) -> Self {
        self.response.status = status;
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.set(name, value);
        self
    }

    /// Set body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.response.body = body.into();
        self
    }

    /// Build the response
    pub fn build(self) -> Response {
        self.response
    }
}
