//! Declarative router
//!
//! Routes are built once and never mutated: every combinator consumes a
//! route (or route list) and hands back a new one. Resolution order is:
//!
//! 1. exact `(method, path)`
//! 2. `OPTIONS` riding any route at the path that allows it
//! 3. `HEAD` riding a `GET` route at the path that allows it (body cleared)
//! 4. `405` when the path is known, else `404`

use crate::middleware::{Middleware, Next};
use crate::{Method, Request, Response};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Type-erased async route handler
pub type Handler = Arc<dyn Fn(Request, Router) -> BoxFuture<'static, Response> + Send + Sync>;

/// A `(method, path)` binding plus its middleware and synthetic methods
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub path: String,
    handler: Handler,
    middleware: Vec<Arc<dyn Middleware>>,
    synthetic: BTreeSet<Method>,
}

impl Route {
    pub fn new<F, Fut>(method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Request, Router) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self {
            method,
            path: join_path(&[path]),
            handler: Arc::new(move |req: Request, router: Router| -> BoxFuture<'static, Response> {
                Box::pin(handler(req, router))
            }),
            middleware: Vec::new(),
            synthetic: BTreeSet::new(),
        }
    }

    /// Route whose handler may fail; errors are logged and answered with a generic 500
    pub fn fallible<F, Fut, E>(method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(Request, Router) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(method, path, move |req, router| {
            let handler = handler.clone();
            async move {
                let method = req.method;
                let path = req.path.clone();
                match handler(req, router).await {
                    Ok(res) => res,
                    Err(err) => {
                        tracing::error!(%method, %path, error = %err, "handler failed");
                        Response::internal_error()
                    }
                }
            }
        })
    }

    /// Append a middleware; earlier entries wrap later ones
    pub fn with_middleware(self, middleware: impl Middleware + 'static) -> Self {
        self.with_shared_middleware(Arc::new(middleware))
    }

    pub fn with_shared_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Let extra methods ride this route without a dedicated handler
    pub fn allow(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.synthetic.extend(methods);
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.path = join_path(&[prefix, &self.path]);
        self
    }

    pub fn allows(&self, method: Method) -> bool {
        self.synthetic.contains(&method)
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middleware", &self.middleware_names())
            .field("synthetic", &self.synthetic)
            .finish()
    }
}

/// Join path segments into a "/"-rooted path; empty input yields "/"
pub fn join_path(segments: &[&str]) -> String {
    let joined = segments
        .iter()
        .flat_map(|s| s.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

macro_rules! verb {
    ($($name:ident => $method:expr),+ $(,)?) => {
        $(
            pub fn $name<F, Fut>(path: &str, handler: F) -> Route
            where
                F: Fn(Request, Router) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Response> + Send + 'static,
            {
                Route::new($method, path, handler)
            }
        )+
    };
}

verb! {
    get => Method::Get,
    post => Method::Post,
    put => Method::Put,
    patch => Method::Patch,
    delete => Method::Delete,
    head => Method::Head,
    options => Method::Options,
}

/// Mount routes under a prefix
pub fn group(prefix: &str, routes: Vec<Route>) -> Vec<Route> {
    routes.with_prefix(prefix)
}

/// Combinators over a list of routes
pub trait RouteList: Sized {
    fn with_prefix(self, prefix: &str) -> Self;

    /// Attach one middleware instance to every route in the list
    fn with_middleware(self, middleware: impl Middleware + 'static) -> Self;

    fn allow(self, methods: impl IntoIterator<Item = Method> + Clone) -> Self;
}

impl RouteList for Vec<Route> {
    fn with_prefix(self, prefix: &str) -> Self {
        self.into_iter().map(|r| r.with_prefix(prefix)).collect()
    }

    fn with_middleware(self, middleware: impl Middleware + 'static) -> Self {
        let shared: Arc<dyn Middleware> = Arc::new(middleware);
        self.into_iter()
            .map(|r| r.with_shared_middleware(shared.clone()))
            .collect()
    }

    fn allow(self, methods: impl IntoIterator<Item = Method> + Clone) -> Self {
        self.into_iter().map(|r| r.allow(methods.clone())).collect()
    }
}

/// Route table; cheap to clone
#[derive(Clone, Debug)]
pub struct Router {
    routes: Arc<[Route]>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: routes.into(),
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolve and run a request through its route's middleware chain
    pub async fn route(&self, req: Request) -> Response {
        if let Some(route) = self.find(|r| r.method == req.method && r.path == req.path) {
            return self.run(route, req).await;
        }

        if req.method == Method::Options {
            if let Some(route) = self.find(|r| r.path == req.path && r.allows(Method::Options)) {
                return self.run(route, req).await;
            }
        }

        if req.method == Method::Head {
            if let Some(route) = self.find(|r| {
                r.method == Method::Get && r.path == req.path && r.allows(Method::Head)
            }) {
                let mut res = self.run(route, req).await;
                res.body.clear();
                return res;
            }
        }

        self.fallback(&req)
    }

    fn find(&self, pred: impl Fn(&Route) -> bool) -> Option<&Route> {
        self.routes.iter().find(|r| pred(r))
    }

    fn fallback(&self, req: &Request) -> Response {
        if self.routes.iter().any(|r| r.path == req.path) {
            Response::method_not_allowed(&format!(
                "Method {} not allowed for {}",
                req.method, req.path
            ))
        } else {
            Response::not_found(&format!("No route for {} {}", req.method, req.path))
        }
    }

    async fn run(&self, route: &Route, req: Request) -> Response {
        Next::new(&route.middleware, &route.handler)
            .run(req, self)
            .await
    }

    pub fn list_routes(&self) -> RouteListing {
        let routes: Vec<RouteSummary> = self
            .routes
            .iter()
            .map(|r| RouteSummary {
                method: r.method,
                path: r.path.clone(),
            })
            .collect();
        RouteListing {
            count: routes.len(),
            routes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummary {
    pub method: Method,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteListing {
    pub count: usize,
    pub routes: Vec<RouteSummary>,
}

/// Routes most servers want mounted
pub mod standard_routes {
    use super::*;

    /// `GET /routes` answering with the router's route table as JSON
    pub fn list_routes() -> Route {
        get("routes", |_, router| async move {
            Response::json(&router.list_routes())
        })
    }
}
