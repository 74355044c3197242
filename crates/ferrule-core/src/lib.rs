//! ferrule-core: HTTP/1.1 engine on raw stream sockets
//!
//! Messages are framed by hand from arbitrarily fragmented reads, routed
//! through per-route middleware, and answered on a connection that closes
//! after one exchange.
//!
//! ## Features
//! - `tls` - Pinned-CA TLS for the outbound client via rustls

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod activity;
pub mod assembler;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod headers;
pub mod method;
pub mod middleware;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod status;

#[cfg(feature = "tls")]
pub mod tls;

// Re-exports
pub use error::{Error, ParseError, Result};
pub use headers::Headers;
pub use method::Method;
pub use request::{Request, RequestBuilder};
pub use response::{Response, ResponseBuilder};
pub use status::{Status, StatusFamily, StatusRegistry};

pub use router::{
    delete, get, group, head, join_path, options, patch, post, put, standard_routes, Route,
    RouteList, Router,
};

// Middleware re-exports
pub use middleware::{
    AllowedOrigin, BearerAuth, BearerAuthority, BearerAuthorityAuth, Cors, CorsConfig,
    KeyedRateLimit, Middleware, Next, RateLimit,
};

pub use activity::{ActivityEvent, ActivityLog, ActivitySelection, ActivitySink};
pub use client::{HttpClient, RequestAuth};
pub use config::{ClientConfig, ClientTlsConfig, LogLevel, ServerConfig};
pub use server::Engine;

#[cfg(feature = "tls")]
pub use tls::{load_certs, load_private_key, PemDirectoryProvider, TlsMaterialProvider};
