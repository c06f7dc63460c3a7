//! The "request in, future of response out" capability.

use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use alice_core::Future;
use std::sync::Arc;

/// Future of a response, failing with [`HttpError`].
pub type ResponseFuture = Future<Response, HttpError>;

/// Turns a request into a future response.
///
/// The synchronous `Err` path is for failures detected before any
/// asynchronous work starts (a malformed request, a missing upload body).
/// Everything after that is reported through the returned future.
pub trait Responder: Send + Sync {
    /// Respond to `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be dispatched at all.
    fn respond(&self, request: Request) -> Result<ResponseFuture, HttpError>;
}

impl<F> Responder for F
where
    F: Fn(Request) -> Result<ResponseFuture, HttpError> + Send + Sync,
{
    fn respond(&self, request: Request) -> Result<ResponseFuture, HttpError> {
        self(request)
    }
}

/// Shared handle to a responder, as passed along the middleware chain.
pub type SharedResponder = Arc<dyn Responder>;

/// Wrap a closure as a shared responder.
pub fn responder_fn<F>(respond: F) -> SharedResponder
where
    F: Fn(Request) -> Result<ResponseFuture, HttpError> + Send + Sync + 'static,
{
    Arc::new(respond)
}
