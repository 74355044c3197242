//! HTTP Method enum
//!
//! The request line is matched byte-wise; anything outside the nine
//! standard verbs is a parse failure.

use crate::{Error, Result};
use serde::Serialize;

/// HTTP Method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl Method {
    /// Every verb the codec accepts
    pub const ALL: [Method; 9] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Patch,
        Method::Head,
        Method::Options,
        Method::Connect,
        Method::Trace,
    ];

    /// Parse method from bytes - exact, case-sensitive match
    #[inline]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        // Fast path: check first byte
        match bytes.first()? {
            b'G' if bytes == b"GET" => Some(Method::Get),
            b'P' => match bytes {
                b"POST" => Some(Method::Post),
                b"PUT" => Some(Method::Put),
                b"PATCH" => Some(Method::Patch),
                _ => None,
            },
            b'D' if bytes == b"DELETE" => Some(Method::Delete),
            b'H' if bytes == b"HEAD" => Some(Method::Head),
            b'O' if bytes == b"OPTIONS" => Some(Method::Options),
            b'C' if bytes == b"CONNECT" => Some(Method::Connect),
            b'T' if bytes == b"TRACE" => Some(Method::Trace),
            _ => None,
        }
    }

    /// Parse from string (case-insensitive)
    pub fn from_name(s: &str) -> Result<Self> {
        Self::parse(s.to_ascii_uppercase().as_bytes())
            .ok_or_else(|| Error::InvalidMethod(s.to_string()))
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_bytes() {
        assert_eq!(Method::parse(b"GET"), Some(Method::Get));
        assert_eq!(Method::parse(b"POST"), Some(Method::Post));
        assert_eq!(Method::parse(b"PUT"), Some(Method::Put));
        assert_eq!(Method::parse(b"DELETE"), Some(Method::Delete));
        assert_eq!(Method::parse(b"PATCH"), Some(Method::Patch));
        assert_eq!(Method::parse(b"HEAD"), Some(Method::Head));
        assert_eq!(Method::parse(b"OPTIONS"), Some(Method::Options));
        assert_eq!(Method::parse(b"CONNECT"), Some(Method::Connect));
        assert_eq!(Method::parse(b"TRACE"), Some(Method::Trace));
        assert_eq!(Method::parse(b"INVALID"), None);
        assert_eq!(Method::parse(b"get"), None);
        assert_eq!(Method::parse(b""), None);
    }

    #[test]
    fn test_method_from_name() {
        assert_eq!(Method::from_name("GET").unwrap(), Method::Get);
        assert_eq!(Method::from_name("post").unwrap(), Method::Post);
        assert!(Method::from_name("BREW").is_err());
        assert_eq!("options".parse::<Method>().unwrap(), Method::Options);
    }

    #[test]
    fn test_method_display_matches_wire() {
        for method in Method::ALL {
            assert_eq!(Method::parse(method.to_string().as_bytes()), Some(method));
        }
    }
}
