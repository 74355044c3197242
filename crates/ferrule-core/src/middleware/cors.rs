//! CORS (Cross-Origin Resource Sharing) middleware
//!
//! Answers preflights itself and stamps CORS headers onto every other
//! response whose `Origin` is allowed.

use super::{Middleware, Next};
use crate::router::Router;
use crate::{Method, Request, Response};
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Which request origins the policy accepts
#[derive(Clone)]
pub enum AllowedOrigin {
    /// Any origin; `*` unless credentials are allowed, then the origin is echoed
    Any,
    /// Exactly one origin
    Only(String),
    /// A fixed set of origins
    Whitelist(HashSet<String>),
    /// Arbitrary predicate over the origin
    Matcher(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl AllowedOrigin {
    pub fn whitelist<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllowedOrigin::Whitelist(origins.into_iter().map(Into::into).collect())
    }

    pub fn matcher(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        AllowedOrigin::Matcher(Arc::new(f))
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` if not allowed
    pub fn resolve(&self, origin: &str, allow_credentials: bool) -> Option<String> {
        match self {
            AllowedOrigin::Any if allow_credentials => Some(origin.to_string()),
            AllowedOrigin::Any => Some("*".to_string()),
            AllowedOrigin::Only(allowed) => (origin == allowed).then(|| allowed.clone()),
            AllowedOrigin::Whitelist(set) => set.contains(origin).then(|| origin.to_string()),
            AllowedOrigin::Matcher(allows) => allows(origin).then(|| origin.to_string()),
        }
    }
}

impl fmt::Debug for AllowedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowedOrigin::Any => f.write_str("Any"),
            AllowedOrigin::Only(o) => f.debug_tuple("Only").field(o).finish(),
            AllowedOrigin::Whitelist(set) => f.debug_tuple("Whitelist").field(set).finish(),
            AllowedOrigin::Matcher(_) => f.write_str("Matcher(..)"),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origin: AllowedOrigin,
    pub allow_credentials: bool,
    pub methods: Vec<Method>,
    pub headers: Vec<String>,
    pub expose_headers: Vec<String>,
    /// Max age (seconds); `None` omits the header
    pub max_age: Option<u32>,
}

impl CorsConfig {
    pub fn new(allowed_origin: AllowedOrigin) -> Self {
        Self {
            allowed_origin,
            allow_credentials: false,
            methods: vec![Method::Get, Method::Post, Method::Options],
            headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            expose_headers: Vec::new(),
            max_age: Some(600),
        }
    }

    pub fn allow_credentials(mut self) -> Self {
        self.allow_credentials = true;
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn headers<S: Into<String>>(mut self, headers: impl IntoIterator<Item = S>) -> Self {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn expose_header(mut self, header: impl Into<String>) -> Self {
        self.expose_headers.push(header.into());
        self
    }

    pub fn max_age(mut self, seconds: Option<u32>) -> Self {
        self.max_age = seconds;
        self
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self::new(AllowedOrigin::Any)
    }
}

/// CORS middleware
#[derive(Debug, Clone)]
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Any origin, default methods and headers
    pub fn permissive() -> Self {
        Self::new(CorsConfig::default())
    }

    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    fn allowed_origin(&self, req: &Request) -> Option<String> {
        let origin = req.header("origin")?;
        self.config
            .allowed_origin
            .resolve(origin, self.config.allow_credentials)
    }

    /// Response for a CORS preflight, or `None` if the request is not one
    pub fn preflight(&self, req: &Request) -> Option<Response> {
        if req.method != Method::Options
            || !req.headers.contains("origin")
            || !req.headers.contains("access-control-request-method")
        {
            return None;
        }

        let mut res = Response::no_content();
        let Some(origin) = self.allowed_origin(req) else {
            return Some(res);
        };

        res.headers.set("Access-Control-Allow-Origin", origin);
        vary_on_origin(&mut res);
        res.headers.set(
            "Access-Control-Allow-Methods",
            self.config
                .methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        );
        if !self.config.headers.is_empty() {
            res.headers
                .set("Access-Control-Allow-Headers", self.config.headers.join(", "));
        }
        if let Some(max_age) = self.config.max_age {
            res.headers.set("Access-Control-Max-Age", max_age.to_string());
        }
        if self.config.allow_credentials {
            res.headers.set("Access-Control-Allow-Credentials", "true");
        }
        Some(res)
    }

    /// Stamp CORS headers onto a non-preflight response
    pub fn apply(&self, req: &Request, res: &mut Response) {
        self.stamp(self.allowed_origin(req), res);
    }

    fn stamp(&self, origin: Option<String>, res: &mut Response) {
        let Some(origin) = origin else {
            return;
        };

        res.headers.set("Access-Control-Allow-Origin", origin);
        vary_on_origin(res);
        if self.config.allow_credentials {
            res.headers.set("Access-Control-Allow-Credentials", "true");
        }
        if !self.config.expose_headers.is_empty() {
            res.headers.set(
                "Access-Control-Expose-Headers",
                self.config.expose_headers.join(", "),
            );
        }
    }
}

/// Add `Origin` to `Vary`, keeping whatever the handler already listed
fn vary_on_origin(res: &mut Response) {
    let merged = match res.headers.get("vary") {
        Some(existing)
            if existing
                .split(',')
                .any(|v| v.trim() == "*" || v.trim().eq_ignore_ascii_case("origin")) =>
        {
            return
        }
        Some(existing) if !existing.trim().is_empty() => format!("{}, Origin", existing.trim()),
        _ => "Origin".to_string(),
    };
    res.headers.set("Vary", merged);
}

impl Middleware for Cors {
    fn name(&self) -> &str {
        "cors"
    }

    fn handle<'a>(
        &'a self,
        req: Request,
        router: &'a Router,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if let Some(res) = self.preflight(&req) {
                return res;
            }

            let origin = self.allowed_origin(&req);
            let mut res = next.run(req, router).await;
            self.stamp(origin, &mut res);
            res
        })
    }
}
