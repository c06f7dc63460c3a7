//! Chain-of-responsibility middleware.
//!
//! A middleware receives the request and the next responder in the chain. It
//! may change the request before passing it on, short-circuit without
//! calling `next`, or transform the response once it is available.
//!
//! [`compose`] folds a list of middleware around a terminal responder from
//! the right, so the first middleware in the list is the outermost wrapper:
//! it sees the request first and the response last.
//!
//! # Example
//!
//! ```
//! use alice_runtime::middleware::{compose, middleware_fn};
//! use alice_runtime::responder::responder_fn;
//! use alice_runtime::{HttpError, Request};
//! use http::{HeaderValue, header::USER_AGENT};
//!
//! let agent = middleware_fn(|request: Request, next| {
//!     next.respond(request.with_header(USER_AGENT, HeaderValue::from_static("alice")))
//! });
//! let terminal = responder_fn(|_request| Err(HttpError::Cancelled));
//!
//! let responder = compose(&[agent], terminal);
//! assert!(responder.respond(Request::get("https://example.com")?).is_err());
//! # Ok::<(), HttpError>(())
//! ```

use crate::error::HttpError;
use crate::matcher::RequestMatcher;
use crate::request::Request;
use crate::responder::{Responder, ResponseFuture, SharedResponder};
use std::sync::Arc;

/// Wraps the rest of the chain.
pub trait Middleware: Send + Sync {
    /// Handle `request`, usually by delegating to `next`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be passed on at all.
    fn respond(&self, request: Request, next: SharedResponder)
    -> Result<ResponseFuture, HttpError>;
}

impl<F> Middleware for F
where
    F: Fn(Request, SharedResponder) -> Result<ResponseFuture, HttpError> + Send + Sync,
{
    fn respond(
        &self,
        request: Request,
        next: SharedResponder,
    ) -> Result<ResponseFuture, HttpError> {
        self(request, next)
    }
}

/// Shared handle to a middleware, as stored in client and task lists.
pub type SharedMiddleware = Arc<dyn Middleware>;

/// Wrap a closure as a shared middleware.
pub fn middleware_fn<F>(respond: F) -> SharedMiddleware
where
    F: Fn(Request, SharedResponder) -> Result<ResponseFuture, HttpError> + Send + Sync + 'static,
{
    Arc::new(respond)
}

struct Chained {
    middleware: SharedMiddleware,
    next: SharedResponder,
}

impl Responder for Chained {
    fn respond(&self, request: Request) -> Result<ResponseFuture, HttpError> {
        self.middleware.respond(request, Arc::clone(&self.next))
    }
}

/// Turn `middleware` into a responder that forwards to `next`.
#[must_use]
pub fn chain(middleware: SharedMiddleware, next: SharedResponder) -> SharedResponder {
    Arc::new(Chained { middleware, next })
}

/// Fold `middlewares` around `terminal`, first element outermost.
#[must_use]
pub fn compose(middlewares: &[SharedMiddleware], terminal: SharedResponder) -> SharedResponder {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| chain(Arc::clone(middleware), next))
}

/// Runs the wrapped middleware only for requests the matcher accepts;
/// everything else goes straight to `next`, untouched.
pub struct Conditional {
    matcher: RequestMatcher,
    middleware: SharedMiddleware,
}

impl Conditional {
    /// Guard `middleware` with `matcher`.
    #[must_use]
    pub fn new(matcher: RequestMatcher, middleware: SharedMiddleware) -> Self {
        Self {
            matcher,
            middleware,
        }
    }
}

impl Middleware for Conditional {
    fn respond(
        &self,
        request: Request,
        next: SharedResponder,
    ) -> Result<ResponseFuture, HttpError> {
        if self.matcher.matches(&request) {
            self.middleware.respond(request, next)
        } else {
            next.respond(request)
        }
    }
}

/// Guard `middleware` with `matcher`.
#[must_use]
pub fn when(middleware: SharedMiddleware, matcher: RequestMatcher) -> SharedMiddleware {
    Arc::new(Conditional::new(matcher, middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::responder::responder_fn;
    use crate::response::{Response, ResponseBody, ResponseHead, TaskMetrics};
    use alice_core::{Lock, Promise};
    use http::StatusCode;

    type Trace = Arc<Lock<Vec<String>>>;

    fn tracing_middleware(name: &'static str, trace: &Trace) -> SharedMiddleware {
        let trace = Arc::clone(trace);
        middleware_fn(move |request, next| {
            trace.with_lock(|t| t.push(format!("{name} in")));
            let trace = Arc::clone(&trace);
            Ok(next.respond(request)?.map(move |response| {
                trace.with_lock(|t| t.push(format!("{name} out")));
                response
            }))
        })
    }

    fn ok_response(request: &Request) -> Response {
        Response::new(
            ResponseHead::new(request.url.clone(), StatusCode::OK),
            ResponseBody::None,
            TaskMetrics::default(),
        )
    }

    #[test]
    fn test_outer_middleware_sees_request_first_and_response_last() {
        let trace: Trace = Arc::default();
        let terminal_trace = Arc::clone(&trace);
        let terminal = responder_fn(move |request| {
            terminal_trace.with_lock(|t| t.push("terminal".into()));
            Ok(alice_core::Future::succeeded(ok_response(&request)))
        });

        let responder = compose(
            &[tracing_middleware("m1", &trace), tracing_middleware("m2", &trace)],
            terminal,
        );
        let future = responder
            .respond(Request::get("https://example.com").unwrap())
            .unwrap();

        assert!(future.is_completed());
        assert_eq!(
            trace.with_lock(|t| t.clone()),
            vec!["m1 in", "m2 in", "terminal", "m2 out", "m1 out"]
        );
    }

    #[test]
    fn test_ordering_holds_for_late_completion() {
        let trace: Trace = Arc::default();
        let pending = Promise::<Response, HttpError>::new();
        let future = pending.future();
        let terminal = responder_fn(move |_| Ok(future.clone()));

        let responder = compose(
            &[tracing_middleware("m1", &trace), tracing_middleware("m2", &trace)],
            terminal,
        );
        let request = Request::get("https://example.com").unwrap();
        let response = responder.respond(request.clone()).unwrap();
        assert!(response.is_pending());

        pending.succeed(ok_response(&request));
        assert!(response.is_completed());
        assert_eq!(
            trace.with_lock(|t| t.clone()),
            vec!["m1 in", "m2 in", "m2 out", "m1 out"]
        );
    }

    #[test]
    fn test_short_circuit_skips_terminal() {
        let reached = Arc::new(Lock::new(false));
        let flag = Arc::clone(&reached);
        let terminal = responder_fn(move |request| {
            flag.with_lock(|f| *f = true);
            Ok(alice_core::Future::succeeded(ok_response(&request)))
        });
        let deny = middleware_fn(|_request, _next| Ok(alice_core::Future::failed(HttpError::Cancelled)));

        let future = compose(&[deny], terminal)
            .respond(Request::get("https://example.com").unwrap())
            .unwrap();

        assert!(future.failure().unwrap().is_cancelled());
        assert!(!reached.with_lock(|f| *f));
    }

    #[test]
    fn test_empty_chain_is_terminal() {
        let terminal = responder_fn(|request| Ok(alice_core::Future::succeeded(ok_response(&request))));
        let future = compose(&[], terminal)
            .respond(Request::get("https://example.com").unwrap())
            .unwrap();
        assert_eq!(future.success().unwrap().status(), StatusCode::OK);
    }
}
