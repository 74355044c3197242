//! HTTP/1.1 message codec
//!
//! Parses complete messages (as sliced out by the assembler) into
//! [`Request`]/[`Response`] values and serializes them back to wire bytes.
//! Only `Content-Length` framing is understood.

use crate::error::ParseError;
use crate::headers::Headers;
use crate::method::Method;
use crate::request::Request;
use crate::response::{Response, TEXT_PLAIN};
use crate::status::{Status, StatusRegistry};
use bytes::{BufMut, Bytes, BytesMut};

pub const CRLF: &[u8] = b"\r\n";
pub const CRLFCRLF: &[u8] = b"\r\n\r\n";

/// Offset of the first CRLFCRLF at or after `from`
#[inline]
pub fn find_header_end(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + CRLFCRLF.len() {
        return None;
    }
    buf[from..]
        .windows(CRLFCRLF.len())
        .position(|w| w == CRLFCRLF)
        .map(|pos| pos + from)
}

/// Split a message into its header block (text) and body bytes
fn split_message(message: &Bytes) -> Result<(String, Bytes), ParseError> {
    let end = find_header_end(message, 0).ok_or(ParseError::UnterminatedHeaders)?;
    let head = String::from_utf8_lossy(&message[..end]).into_owned();
    let body = message.slice(end + CRLFCRLF.len()..);
    Ok((head, body))
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
        headers.set(name.trim(), value.trim());
    }
    Ok(headers)
}

/// Parse a complete request message
pub fn parse_request(message: &Bytes) -> Result<Request, ParseError> {
    let (head, body) = split_message(message)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method, path),
        _ => return Err(ParseError::InvalidRequestLine(request_line.to_string())),
    };
    let method = Method::parse(method.as_bytes())
        .ok_or_else(|| ParseError::InvalidMethod(method.to_string()))?;

    let headers = parse_header_lines(lines)?;

    Ok(Request {
        method,
        path: path.to_string(),
        headers,
        body,
        peer: None,
    })
}

/// Parse a complete response message, resolving reasons through the global registry
pub fn parse_response(message: &Bytes) -> Result<Response, ParseError> {
    parse_response_with(message, StatusRegistry::global())
}

/// Parse a complete response message.
///
/// Custom registry entries take precedence over the wire reason; an empty
/// wire reason falls back to the standard table. The body is bounded by
/// `Content-Length` when present.
pub fn parse_response_with(
    message: &Bytes,
    registry: &StatusRegistry,
) -> Result<Response, ParseError> {
    let (head, mut body) = split_message(message)?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let code = parts
        .next()
        .and_then(|c| c.trim().parse::<u16>().ok())
        .ok_or_else(|| ParseError::InvalidStatusLine(status_line.to_string()))?;
    let reason = parts.next().map(str::trim).unwrap_or_default();

    let status = if registry.has_custom(code) || reason.is_empty() {
        registry.resolve(code)
    } else {
        Status::new(code, reason.to_string())
    };

    let headers = parse_header_lines(lines)?;

    if let Some(len) = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        if len < body.len() {
            body.truncate(len);
        }
    }

    Ok(Response {
        status,
        headers,
        body,
    })
}

/// Serialize a response.
///
/// `Content-Length` is recomputed from the body and `Content-Type` defaults
/// to plain text. One `\n` follows the body and is not counted.
pub fn serialize_response(response: &Response) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + response.body.len());

    buf.put_slice(b"HTTP/1.1 ");
    buf.put_slice(response.status.code.to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(response.status.reason.as_bytes());
    buf.put_slice(CRLF);

    for (name, value) in response.headers.iter() {
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        put_header(&mut buf, name, value);
    }
    if !response.headers.contains("content-type") {
        put_header(&mut buf, "Content-Type", TEXT_PLAIN);
    }
    put_header(&mut buf, "Content-Length", &response.body.len().to_string());

    buf.put_slice(CRLF);
    buf.put_slice(&response.body);
    buf.put_u8(b'\n');

    buf.freeze()
}

/// Serialize an outbound request with the given `Host`
pub fn serialize_request(request: &Request, host: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + request.body.len());

    buf.put_slice(request.method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(request.path.as_bytes());
    buf.put_slice(CRLF);

    put_header(&mut buf, "Host", host);
    if !request.body.is_empty() {
        put_header(&mut buf, "Content-Length", &request.body.len().to_string());
    }
    for (name, value) in request.headers.iter() {
        if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        put_header(&mut buf, name, value);
    }

    buf.put_slice(CRLF);
    buf.put_slice(&request.body);

    buf.freeze()
}

#[inline]
fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseBuilder;
    use std::collections::HashSet;

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_parse_request() {
        let req = parse_request(&bytes(
            "POST /echo HTTP/1.1\r\nHost: x\r\ncontent-length: 5\r\nX-Trace:  a:b \r\n\r\nhello",
        ))
        .unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/echo");
        assert_eq!(req.header("Content-Length"), Some("5"));
        assert_eq!(req.header("x-trace"), Some("a:b"));
        assert_eq!(&req.body[..], b"hello");
    }

    #[test]
    fn test_parse_request_without_version() {
        let req = parse_request(&bytes("GET /ping\r\n\r\n")).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/ping");
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_request_failures() {
        assert_eq!(
            parse_request(&bytes("GET / HTTP/1.1\r\nHost: x\r\n")).unwrap_err(),
            ParseError::UnterminatedHeaders
        );
        assert!(matches!(
            parse_request(&bytes("BREW /pot\r\n\r\n")).unwrap_err(),
            ParseError::InvalidMethod(m) if m == "BREW"
        ));
        assert!(matches!(
            parse_request(&bytes("GET\r\n\r\n")).unwrap_err(),
            ParseError::InvalidRequestLine(_)
        ));
        assert!(matches!(
            parse_request(&bytes("GET / HTTP/1.1\r\nno colon here\r\n\r\n")).unwrap_err(),
            ParseError::MalformedHeader(_)
        ));
    }

    #[test]
    fn test_serialize_response_normalizes_headers() {
        let res = ResponseBuilder::new(Status::OK)
            .header("content-length", "999")
            .header("X-Custom", "value")
            .body("Hello")
            .build();

        let wire = serialize_response(&res);
        let s = std::str::from_utf8(&wire).unwrap();

        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("X-Custom: value\r\n"));
        assert!(s.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(!s.contains("999"));
        assert!(s.ends_with("\r\n\r\nHello\n"));
    }

    #[test]
    fn test_serialize_keeps_handler_content_type() {
        let res = ResponseBuilder::new(Status::OK)
            .header("Content-Type", "text/html")
            .build();
        let wire = serialize_response(&res);
        let s = std::str::from_utf8(&wire).unwrap();
        assert!(s.contains("Content-Type: text/html\r\n"));
        assert!(!s.contains("text/plain"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    fn header_set(res: &Response) -> HashSet<(String, String)> {
        res.headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_response_survives_reparse() {
        let original = ResponseBuilder::new(Status::new(299, "Odd But Fine"))
            .header("X-A", "1")
            .header("Content-Type", "application/json")
            .body(r#"{"a":1}"#)
            .build();

        let first = serialize_response(&original);
        let parsed = parse_response_with(&first, &StatusRegistry::new()).unwrap();
        let second = serialize_response(&parsed);

        let a = parse_response_with(&first, &StatusRegistry::new()).unwrap();
        let b = parse_response_with(&second, &StatusRegistry::new()).unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.status.reason, "Odd But Fine");
        assert_eq!(header_set(&a), header_set(&b));
        assert_eq!(a.body, b.body);
        assert_eq!(&b.body[..], br#"{"a":1}"#);
    }

    #[test]
    fn test_parse_response_uses_registry() {
        let registry = StatusRegistry::new();
        registry.register(299, "Registered");
        let res = parse_response_with(&bytes("HTTP/1.1 299 Whatever\r\n\r\n"), &registry).unwrap();
        assert_eq!(res.status.reason, "Registered");

        let res = parse_response_with(&bytes("HTTP/1.1 404\r\n\r\n"), &registry).unwrap();
        assert_eq!(res.status, Status::NOT_FOUND);

        assert!(matches!(
            parse_response_with(&bytes("HTTP/1.1 abc\r\n\r\n"), &registry).unwrap_err(),
            ParseError::InvalidStatusLine(_)
        ));
    }

    #[test]
    fn test_serialize_request() {
        let req = crate::request::RequestBuilder::new(Method::Post, "/echo")
            .header("Host", "ignored")
            .header("Authorization", "Bearer t")
            .body("hi")
            .build();
        let wire = serialize_request(&req, "localhost:9090");
        let s = std::str::from_utf8(&wire).unwrap();
        assert!(s.starts_with("POST /echo\r\nHost: localhost:9090\r\nContent-Length: 2\r\n"));
        assert!(s.contains("Authorization: Bearer t\r\n"));
        assert!(!s.contains("ignored"));
        assert!(s.ends_with("\r\n\r\nhi"));

        let parsed = parse_request(&wire).unwrap();
        assert_eq!(parsed.path, "/echo");
        assert_eq!(&parsed.body[..], b"hi");
    }
}
