//! In-memory [`Transport`] for driving tasks from tests.
//!
//! `MockTransport` never touches the network. It hands out sequential
//! handles, records every call, and exposes the [`SessionDelegate`] so a
//! test can deliver transfer events in any order, including the late and
//! duplicate ones a real transport produces under races.
//!
//! Decision callbacks return an [`alice_core::Future`] of the answer, so
//! tests can inspect it when handlers run inline or wait for it when they
//! run on another scheduler.
//!
//! With [`MockTransport::serve_with`], the mock answers every transfer from
//! a responder instead, turning the client into a full in-memory pipeline.

use alice_core::{Future, Inline, Lock, Promise, Scheduler};
use alice_runtime::{
    CachedResponse, Challenge, ChallengeDisposition, Client, ClientConfig, Decide,
    DelayedRequestDisposition, HttpError, Request, Responder, Response, ResponseBody, ResponseDisposition, ResponseHead,
    SessionDelegate, SharedResponder, TaskKind, TaskMetrics, Transport, TransportError,
    TransportHandle,
};
use http::{StatusCode, header::CONTENT_LENGTH};
use std::collections::HashSet;
use std::convert::Infallible;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One recorded call to [`Transport::dispatch`].
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Handle handed back to the task
    pub handle: TransportHandle,
    /// Request as it left the middleware chain
    pub request: Request,
    /// Requested transfer kind
    pub kind: TaskKind,
}

#[derive(Default)]
struct Journal {
    dispatched: Vec<Dispatch>,
    resumed: Vec<TransportHandle>,
    suspended: Vec<TransportHandle>,
    cancelled: Vec<TransportHandle>,
    served: HashSet<TransportHandle>,
    fail_next: Option<HttpError>,
    resume_data: Option<Vec<u8>>,
    responder: Option<SharedResponder>,
}

struct MockInner {
    delegate: SessionDelegate,
    next_handle: AtomicU64,
    journal: Lock<Journal>,
}

/// Scripted transport. Clones share the same journal.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// Create a transport reporting to `delegate`.
    #[must_use]
    pub fn new(delegate: SessionDelegate) -> Self {
        Self {
            inner: Arc::new(MockInner {
                delegate,
                next_handle: AtomicU64::new(1),
                journal: Lock::new(Journal::default()),
            }),
        }
    }

    /// A client wired to a fresh mock whose middleware chains run inline.
    #[must_use]
    pub fn client(config: ClientConfig) -> (Client, Self) {
        Self::client_with_scheduler(config, Inline)
    }

    /// A client wired to a fresh mock, running chains on `scheduler`.
    ///
    /// # Panics
    ///
    /// Panics if the client does not call its transport factory, which
    /// `Client::with_scheduler` always does.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn client_with_scheduler(
        config: ClientConfig,
        scheduler: impl Scheduler + 'static,
    ) -> (Client, Self) {
        let mut mock = None;
        let client = Client::with_scheduler(config, scheduler, |delegate| {
            let transport = Self::new(delegate);
            mock = Some(transport.clone());
            transport
        });
        (client, mock.expect("transport factory runs during construction"))
    }

    /// Answer every transfer from `responder` as soon as it is resumed.
    pub fn serve_with(&self, responder: SharedResponder) -> &Self {
        self.inner.journal.with_lock(|j| j.responder = Some(responder));
        self
    }

    /// Make the next `dispatch` fail synchronously with `error`.
    pub fn fail_next_dispatch(&self, error: HttpError) -> &Self {
        self.inner.journal.with_lock(|j| j.fail_next = Some(error));
        self
    }

    /// Token returned by `cancel_producing_resume_data`.
    pub fn set_resume_data(&self, data: Vec<u8>) -> &Self {
        self.inner.journal.with_lock(|j| j.resume_data = Some(data));
        self
    }

    /// The delegate transfer events go to.
    #[must_use]
    pub fn delegate(&self) -> &SessionDelegate {
        &self.inner.delegate
    }

    /// Every dispatch so far, in order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<Dispatch> {
        self.inner.journal.with_lock(|j| j.dispatched.clone())
    }

    /// Number of dispatches so far.
    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.inner.journal.with_lock(|j| j.dispatched.len())
    }

    /// Handle of the most recent dispatch.
    #[must_use]
    pub fn last_handle(&self) -> Option<TransportHandle> {
        self.inner
            .journal
            .with_lock(|j| j.dispatched.last().map(|d| d.handle))
    }

    /// Handles passed to `resume`, in order.
    #[must_use]
    pub fn resumed(&self) -> Vec<TransportHandle> {
        self.inner.journal.with_lock(|j| j.resumed.clone())
    }

    /// Handles passed to `suspend`, in order.
    #[must_use]
    pub fn suspended(&self) -> Vec<TransportHandle> {
        self.inner.journal.with_lock(|j| j.suspended.clone())
    }

    /// Handles passed to `cancel`, in order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<TransportHandle> {
        self.inner.journal.with_lock(|j| j.cancelled.clone())
    }

    fn next_handle(&self) -> TransportHandle {
        TransportHandle::new(self.inner.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Deliver the response head and return the task's disposition.
    pub fn receive_response(
        &self,
        handle: TransportHandle,
        head: ResponseHead,
    ) -> Future<ResponseDisposition, Infallible> {
        ask(|decide| self.inner.delegate.did_receive_response(handle, head, decide))
    }

    /// Deliver a body chunk.
    pub fn receive_data(&self, handle: TransportHandle, chunk: &[u8]) {
        self.inner.delegate.did_receive_data(handle, chunk);
    }

    /// Deliver a redirect and return the request the task wants sent next.
    pub fn redirect(
        &self,
        handle: TransportHandle,
        response: ResponseHead,
        proposed: Request,
    ) -> Future<Option<Request>, Infallible> {
        ask(|decide| {
            self.inner
                .delegate
                .will_perform_redirect(handle, response, proposed, decide);
        })
    }

    /// Deliver an authentication challenge.
    pub fn challenge(
        &self,
        handle: TransportHandle,
        challenge: Challenge,
    ) -> Future<ChallengeDisposition, Infallible> {
        ask(|decide| self.inner.delegate.did_receive_challenge(handle, challenge, decide))
    }

    /// Announce the postponed start of a transfer.
    pub fn begin_delayed(&self, handle: TransportHandle) -> Future<DelayedRequestDisposition, Infallible> {
        ask(|decide| self.inner.delegate.will_begin_delayed_request(handle, decide))
    }

    /// Report that the transport is gone for good.
    pub fn invalidate(&self, error: Option<TransportError>) {
        self.inner.delegate.did_become_invalid(error);
    }

    /// Ask whether the response may be cached.
    pub fn will_cache(
        &self,
        handle: TransportHandle,
        proposed: CachedResponse,
    ) -> Future<Option<CachedResponse>, Infallible> {
        ask(|decide| self.inner.delegate.will_cache_response(handle, proposed, decide))
    }

    /// Ask for a fresh copy of the request body and read it fully.
    #[must_use]
    pub fn body_stream(&self, handle: TransportHandle) -> Option<Vec<u8>> {
        let body = Arc::new(Lock::new(None));
        let slot = Arc::clone(&body);
        self.inner.delegate.need_new_body_stream(
            handle,
            Box::new(move |stream| {
                let bytes = stream.and_then(|mut stream| {
                    let mut bytes = Vec::new();
                    stream.read_to_end(&mut bytes).ok().map(|_| bytes)
                });
                slot.with_lock(|b| *b = bytes);
            }),
        );
        body.with_lock(Option::take)
    }

    /// Report upload progress.
    pub fn send_body_data(&self, handle: TransportHandle, total_sent: i64, total_expected: i64) {
        self.inner
            .delegate
            .did_send_body_data(handle, total_sent, total_expected);
    }

    /// Report download progress.
    pub fn write_data(&self, handle: TransportHandle, total_written: i64, total_expected: i64) {
        self.inner
            .delegate
            .did_write_data(handle, total_written, total_expected);
    }

    /// Report a resumed download.
    pub fn resume_at_offset(&self, handle: TransportHandle, offset: i64, expected_total: i64) {
        self.inner
            .delegate
            .did_resume_at_offset(handle, offset, expected_total);
    }

    /// Turn a data transfer into a download and return the new handle.
    pub fn become_download(&self, handle: TransportHandle) -> TransportHandle {
        let download = self.next_handle();
        self.inner.delegate.did_become_download(handle, download);
        download
    }

    /// Report a finished download written to `location`.
    pub fn finish_download(&self, handle: TransportHandle, location: &Path) {
        self.inner.delegate.did_finish_downloading(handle, location);
    }

    /// Report transport-collected metrics.
    pub fn collect_metrics(&self, handle: TransportHandle, metrics: TaskMetrics) {
        self.inner
            .delegate
            .did_finish_collecting_metrics(handle, metrics);
    }

    /// Report completion.
    pub fn complete(&self, handle: TransportHandle, error: Option<TransportError>) {
        self.inner.delegate.did_complete(handle, error);
    }

    /// Report a failed transfer.
    pub fn fail(&self, handle: TransportHandle, error: TransportError) {
        self.complete(handle, Some(error));
    }

    /// Deliver a complete in-memory response: head, body, completion.
    pub fn respond(&self, handle: TransportHandle, status: StatusCode, body: &[u8]) {
        let url = self
            .inner
            .journal
            .with_lock(|j| {
                j.dispatched
                    .iter()
                    .find(|d| d.handle == handle)
                    .map(|d| d.request.url.clone())
            })
            .unwrap_or_else(|| http::Uri::from_static("http://localhost/"));
        let head = ResponseHead::new(url, status)
            .with_header(CONTENT_LENGTH, http::HeaderValue::from(body.len()));
        let response = Response::new(head, ResponseBody::Data(body.to_vec()), TaskMetrics::default());
        self.replay(handle, &response);
    }

    /// Deliver `response` as the outcome of `handle`.
    ///
    /// File bodies are reported through `did_finish_downloading`.
    pub fn replay(&self, handle: TransportHandle, response: &Response) {
        // The disposition is not awaited: a stub transfer always continues.
        let _ = self.receive_response(handle, response.head.clone());
        match &response.body {
            ResponseBody::None => {},
            ResponseBody::Data(bytes) => self.receive_data(handle, bytes),
            ResponseBody::File(path) => self.finish_download(handle, path),
        }
        if response.metrics != TaskMetrics::default() {
            self.collect_metrics(handle, response.metrics);
        }
        self.complete(handle, None);
    }

    fn serve(&self, handle: TransportHandle) {
        let job = self.inner.journal.with_lock(|j| {
            let responder = j.responder.clone()?;
            if !j.served.insert(handle) {
                return None;
            }
            let request = j.dispatched.iter().find(|d| d.handle == handle)?.request.clone();
            Some((responder, request))
        });
        let Some((responder, request)) = job else {
            return;
        };

        match responder.respond(request) {
            Ok(future) => {
                let mock = self.clone();
                future.when_complete(move |result| match result {
                    Ok(response) => mock.replay(handle, response),
                    Err(error) => mock.fail(handle, TransportError::Other(error.to_string())),
                });
            },
            Err(error) => self.fail(handle, TransportError::Other(error.to_string())),
        }
    }
}

impl Transport for MockTransport {
    fn dispatch(&self, request: &Request, kind: TaskKind) -> Result<TransportHandle, HttpError> {
        let handle = self.next_handle();
        self.inner.journal.with_lock(|j| {
            if let Some(error) = j.fail_next.take() {
                return Err(error);
            }
            j.dispatched.push(Dispatch {
                handle,
                request: request.clone(),
                kind,
            });
            Ok(handle)
        })
    }

    fn resume(&self, handle: TransportHandle) {
        self.inner.journal.with_lock(|j| j.resumed.push(handle));
        self.serve(handle);
    }

    fn suspend(&self, handle: TransportHandle) {
        self.inner.journal.with_lock(|j| j.suspended.push(handle));
    }

    fn cancel(&self, handle: TransportHandle) {
        self.inner.journal.with_lock(|j| j.cancelled.push(handle));
    }

    fn cancel_producing_resume_data(
        &self,
        handle: TransportHandle,
    ) -> Future<Option<Vec<u8>>, Infallible> {
        let data = self.inner.journal.with_lock(|j| {
            j.cancelled.push(handle);
            j.resume_data.clone()
        });
        Future::succeeded(data)
    }
}

/// Run a decision callback and expose its answer as a future.
fn ask<T>(deliver: impl FnOnce(Decide<T>)) -> Future<T, Infallible>
where
    T: Send + Sync + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    deliver(Box::new(move |answer| {
        promise.succeed(answer);
    }));
    future
}
