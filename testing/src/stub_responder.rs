//! A terminal [`Responder`] that answers every request with the same
//! response and remembers what it was asked.
//!
//! Pair it with [`compose`](alice_runtime::compose) to exercise middleware
//! without a client, or with
//! [`MockTransport::serve_with`](crate::MockTransport::serve_with) to run
//! whole tasks in memory.

use alice_core::{Future, Lock};
use alice_runtime::{
    HttpError, Request, Responder, Response, ResponseBody, ResponseFuture, ResponseHead,
};
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use std::sync::Arc;

/// Canned responder.
pub struct StubResponder {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    requests: Lock<Vec<Request>>,
}

impl StubResponder {
    /// Answer with `status` and `body`.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self::build(status, HeaderMap::new(), body.into()))
    }

    /// Answer with `value` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Json`] if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Result<Arc<Self>, HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Arc::new(Self::build(status, headers, serde_json::to_vec(value)?)))
    }

    /// Answer with `status`, `body` and one extra header.
    #[must_use]
    pub fn with_header(
        status: StatusCode,
        body: impl Into<Vec<u8>>,
        name: HeaderName,
        value: HeaderValue,
    ) -> Arc<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        Arc::new(Self::build(status, headers, body.into()))
    }

    const fn build(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            requests: Lock::new(Vec::new()),
        }
    }

    /// Requests received so far, as they reached the end of the chain.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests.with_lock(|r| r.clone())
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.with_lock(|r| r.len())
    }

    /// The most recent request.
    #[must_use]
    pub fn last_request(&self) -> Option<Request> {
        self.requests.with_lock(|r| r.last().cloned())
    }
}

impl Responder for StubResponder {
    fn respond(&self, request: Request) -> Result<ResponseFuture, HttpError> {
        let mut head = ResponseHead::new(request.url.clone(), self.status);
        head.headers.clone_from(&self.headers);
        self.requests.with_lock(|r| r.push(request));

        Ok(Future::succeeded(Response::new(
            head,
            ResponseBody::Data(self.body.clone()),
            crate::helpers::test_metrics(0),
        )))
    }
}
