//! Bearer-token authentication middleware
//!
//! Failures short-circuit with a 401. The `WWW-Authenticate` parameter
//! depends on the failure: `realm="…"` when no usable credential was
//! presented (or the server has no key), `error="invalid_token"` when a
//! presented token is rejected.

use super::{Middleware, Next};
use crate::config::ServerConfig;
use crate::router::Router;
use crate::{Error, Request, Response, Result};
use futures_util::future::BoxFuture;
use std::collections::HashSet;

pub const DEFAULT_REALM: &str = "api";
const INVALID_TOKEN: &str = "invalid_token";

/// Why a request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The server has no key to compare against
    Misconfigured,
    /// No bearer token in the request
    Missing,
    /// Token is not recognised
    Invalid,
    /// Token was explicitly invalidated
    Expired,
}

impl AuthFailure {
    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::Misconfigured => "Server misconfigured: key has not been set.",
            AuthFailure::Missing => "Missing or invalid Authorization header.",
            AuthFailure::Invalid => "Invalid API token",
            AuthFailure::Expired => "Expired token",
        }
    }

    pub fn response(&self, realm: &str) -> Response {
        match self {
            AuthFailure::Misconfigured | AuthFailure::Missing => {
                Response::unauthorized_realm(self.message(), realm)
            }
            AuthFailure::Invalid | AuthFailure::Expired => {
                Response::unauthorized_error(self.message(), INVALID_TOKEN)
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Single shared API key
#[derive(Debug, Clone)]
pub struct BearerAuth {
    expected: Option<String>,
    realm: String,
}

impl BearerAuth {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            expected: Some(key.into()),
            realm: DEFAULT_REALM.to_string(),
        }
    }

    /// Key read from an environment variable. An unset variable is not an
    /// error here: every request is answered with the misconfigured 401.
    pub fn from_env(var: &str) -> Self {
        let expected = std::env::var(var).ok().filter(|k| !k.is_empty());
        if expected.is_none() {
            tracing::warn!(var, "bearer key is not set; protected routes will reject all requests");
        }
        Self {
            expected,
            realm: DEFAULT_REALM.to_string(),
        }
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn authenticate(&self, provided: Option<&str>) -> std::result::Result<(), AuthFailure> {
        let expected = self.expected.as_deref().ok_or(AuthFailure::Misconfigured)?;
        let provided = provided.ok_or(AuthFailure::Missing)?;
        if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AuthFailure::Invalid)
        }
    }
}

impl Middleware for BearerAuth {
    fn name(&self) -> &str {
        "bearer-auth"
    }

    fn handle<'a>(
        &'a self,
        req: Request,
        router: &'a Router,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.authenticate(req.bearer_token()) {
                Ok(()) => next.run(req, router).await,
                Err(failure) => {
                    tracing::debug!(path = %req.path, ?failure, "bearer auth rejected request");
                    failure.response(&self.realm)
                }
            }
        })
    }
}

/// Sets of accepted and revoked tokens
#[derive(Debug, Clone)]
pub struct BearerAuthority {
    authorized: HashSet<String>,
    invalidated: HashSet<String>,
}

impl BearerAuthority {
    /// Fails with [`Error::Misconfigured`] when no token is authorized
    pub fn new<A, I, S>(authorized: A, invalidated: I) -> Result<Self>
    where
        A: IntoIterator<Item = S>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let authorized: HashSet<String> = authorized.into_iter().map(Into::into).collect();
        if authorized.is_empty() {
            return Err(Error::Misconfigured(
                "bearer authority has no authorized tokens".to_string(),
            ));
        }
        Ok(Self {
            authorized,
            invalidated: invalidated.into_iter().map(Into::into).collect(),
        })
    }

    /// Tokens read from the named environment variables; any unset variable is an error
    pub fn from_env_vars(authorized: &[&str], invalidated: &[&str]) -> Result<Self> {
        let read = |vars: &[&str]| -> Result<Vec<String>> {
            vars.iter()
                .map(|var| {
                    std::env::var(var).map_err(|_| {
                        Error::Misconfigured(format!("environment variable {var} is not set"))
                    })
                })
                .collect()
        };
        Self::new(read(authorized)?, read(invalidated)?)
    }

    /// Authority seeded with `<APP>_API_KEY` for the configured service name,
    /// plus any extra authorized variables
    pub fn from_config(
        config: &ServerConfig,
        authorized: &[&str],
        invalidated: &[&str],
    ) -> Result<Self> {
        let symbol = config.api_key_symbol()?;
        let mut vars = vec![symbol.as_str()];
        vars.extend_from_slice(authorized);
        Self::from_env_vars(&vars, invalidated)
    }

    pub fn check(&self, token: &str) -> std::result::Result<(), AuthFailure> {
        if self.invalidated.contains(token) {
            return Err(AuthFailure::Expired);
        }
        if !self.authorized.contains(token) {
            return Err(AuthFailure::Invalid);
        }
        Ok(())
    }
}

/// Middleware backed by a [`BearerAuthority`]
#[derive(Debug, Clone)]
pub struct BearerAuthorityAuth {
    authority: BearerAuthority,
    realm: String,
}

impl BearerAuthorityAuth {
    pub fn new(authority: BearerAuthority) -> Self {
        Self {
            authority,
            realm: DEFAULT_REALM.to_string(),
        }
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn authenticate(&self, provided: Option<&str>) -> std::result::Result<(), AuthFailure> {
        self.authority.check(provided.ok_or(AuthFailure::Missing)?)
    }
}

impl Middleware for BearerAuthorityAuth {
    fn name(&self) -> &str {
        "bearer-authority-auth"
    }

    fn handle<'a>(
        &'a self,
        req: Request,
        router: &'a Router,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.authenticate(req.bearer_token()) {
                Ok(()) => next.run(req, router).await,
                Err(failure) => failure.response(&self.realm),
            }
        })
    }
}
