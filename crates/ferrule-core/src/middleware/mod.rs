//! Middleware pipeline
//!
//! Each route carries an ordered middleware list. At dispatch time the list
//! is walked front to back: the first entry is the outermost layer and the
//! handler sits in the middle. A middleware that returns without calling
//! [`Next::run`] short-circuits everything inside it.

pub mod auth;
pub mod cors;
pub mod rate_limit;

pub use auth::{AuthFailure, BearerAuth, BearerAuthority, BearerAuthorityAuth};
pub use cors::{AllowedOrigin, Cors, CorsConfig};
pub use rate_limit::{KeyedRateLimit, RateLimit, RateLimitDecision, RateLimiter, KeyedRateLimiter};

use crate::router::{Handler, Router};
use crate::{Request, Response};
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Middleware trait - wraps the rest of the chain
pub trait Middleware: Send + Sync {
    /// Short identifier used in logs and route dumps
    fn name(&self) -> &str;

    /// Handle a request; call `next.run(req, router)` to continue inward
    fn handle<'a>(
        &'a self,
        req: Request,
        router: &'a Router,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// The remaining chain: inner middleware followed by the route handler.
///
/// Consumed by [`Next::run`], so it can be invoked at most once.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    handler: &'a Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a [Arc<dyn Middleware>], handler: &'a Handler) -> Self {
        Self {
            middleware,
            handler,
        }
    }

    /// Run the rest of the chain
    pub fn run(self, req: Request, router: &'a Router) -> BoxFuture<'a, Response> {
        match self.middleware.split_first() {
            Some((outer, inner)) => outer.handle(req, router, Next::new(inner, self.handler)),
            None => (self.handler)(req, router.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{get, RouteList};
    use crate::{Method, RequestBuilder};
    use parking_lot::Mutex;

    /// Records entry and exit into a shared trace
    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Trace {
        fn name(&self) -> &str {
            self.label
        }

        fn handle<'a>(
            &'a self,
            req: Request,
            router: &'a Router,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:in", self.label));
                let res = next.run(req, router).await;
                self.log.lock().push(format!("{}:out", self.label));
                res
            })
        }
    }

    struct Block;

    impl Middleware for Block {
        fn name(&self) -> &str {
            "block"
        }

        fn handle<'a>(
            &'a self,
            _req: Request,
            _router: &'a Router,
            _next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async { Response::with_text(crate::Status::FORBIDDEN, "blocked") })
        }
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = log.clone();
        let route = get("/x", move |_, _| {
            let log = handler_log.clone();
            async move {
                log.lock().push("handler".to_string());
                Response::text("ok")
            }
        })
        .with_middleware(Trace { label: "a", log: log.clone() })
        .with_middleware(Trace { label: "b", log: log.clone() });

        let router = Router::new(vec![route]);
        let res = router.route(RequestBuilder::new(Method::Get, "/x").build()).await;

        assert_eq!(res.status.code, 200);
        assert_eq!(
            *log.lock(),
            vec!["a:in", "b:in", "handler", "b:out", "a:out"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_layers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = log.clone();
        let routes = vec![get("/x", move |_, _| {
            let log = handler_log.clone();
            async move {
                log.lock().push("handler".to_string());
                Response::text("ok")
            }
        })]
        .with_middleware(Trace { label: "outer", log: log.clone() })
        .with_middleware(Block)
        .with_middleware(Trace { label: "inner", log: log.clone() });

        let router = Router::new(routes);
        let res = router.route(RequestBuilder::new(Method::Get, "/x").build()).await;

        assert_eq!(res.status.code, 403);
        assert_eq!(*log.lock(), vec!["outer:in", "outer:out"]);
    }
}
