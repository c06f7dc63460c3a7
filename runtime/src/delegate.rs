//! Routes transport events to the task that owns the transfer.
//!
//! A transport keeps the [`SessionDelegate`] it was handed at client
//! construction and calls it from whatever threads it runs on. Events for
//! handles the client does not know, because the task already completed or
//! the client is gone, are dropped. Decision callbacks for such handles are
//! answered with the most conservative choice so the transport never waits
//! on an answer that will not come.

use crate::client::ClientInner;
use crate::error::TransportError;
use crate::request::Request;
use crate::response::{ResponseHead, TaskMetrics};
use crate::task::TaskInner;
use crate::transport::{
    CachedResponse, Challenge, ChallengeDisposition, Decide, DelayedRequestDisposition,
    ResponseDisposition, TransportHandle,
};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Weak};

/// Transport-facing callback surface of a [`Client`](crate::Client).
#[derive(Clone)]
pub struct SessionDelegate {
    client: Weak<ClientInner>,
}

impl SessionDelegate {
    pub(crate) const fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }

    fn task(&self, handle: TransportHandle) -> Option<Arc<TaskInner>> {
        let task = self
            .client
            .upgrade()
            .and_then(|client| client.lookup(handle));
        if task.is_none() {
            tracing::trace!(handle = %handle, "No task registered for transport handle");
        }
        task.map(|task| Arc::clone(task.inner()))
    }

    /// The transport postponed the start of a transfer and is about to
    /// begin it now.
    pub fn will_begin_delayed_request(
        &self,
        handle: TransportHandle,
        decide: Decide<DelayedRequestDisposition>,
    ) {
        match self.task(handle) {
            Some(task) => task.will_begin_delayed_request(decide),
            None => decide(DelayedRequestDisposition::Cancel),
        }
    }

    /// The transfer is about to follow a redirect. Answer with the request
    /// to send next, or `None` to stop at the redirect response.
    pub fn will_perform_redirect(
        &self,
        handle: TransportHandle,
        response: ResponseHead,
        proposed: Request,
        decide: Decide<Option<Request>>,
    ) {
        match self.task(handle) {
            Some(task) => task.will_redirect(response, proposed, decide),
            None => decide(None),
        }
    }

    /// The server asked for authentication.
    pub fn did_receive_challenge(
        &self,
        handle: TransportHandle,
        challenge: Challenge,
        decide: Decide<ChallengeDisposition>,
    ) {
        match self.task(handle) {
            Some(task) => task.did_receive_challenge(challenge, decide),
            None => decide(ChallengeDisposition::CancelAuthenticationChallenge),
        }
    }

    /// The transport needs a fresh copy of the request body, after a
    /// redirect or an authentication retry.
    pub fn need_new_body_stream(
        &self,
        handle: TransportHandle,
        decide: Decide<Option<Box<dyn Read + Send>>>,
    ) {
        match self.task(handle) {
            Some(task) => task.need_new_body_stream(decide),
            None => decide(None),
        }
    }

    /// Upload progress.
    pub fn did_send_body_data(&self, handle: TransportHandle, total_sent: i64, total_expected: i64) {
        if let Some(task) = self.task(handle) {
            task.did_send_body_data(total_sent, total_expected);
        }
    }

    /// The response head arrived. Must be delivered before a successful
    /// completion.
    pub fn did_receive_response(
        &self,
        handle: TransportHandle,
        head: ResponseHead,
        decide: Decide<ResponseDisposition>,
    ) {
        match self.task(handle) {
            Some(task) => task.did_receive_response(head, decide),
            None => decide(ResponseDisposition::Cancel),
        }
    }

    /// A chunk of an in-memory response body.
    pub fn did_receive_data(&self, handle: TransportHandle, chunk: &[u8]) {
        if let Some(task) = self.task(handle) {
            task.did_receive_data(chunk);
        }
    }

    /// The transport proposes to cache the response. Answer with the entry
    /// to store, or `None` to skip caching.
    pub fn will_cache_response(
        &self,
        handle: TransportHandle,
        proposed: CachedResponse,
        decide: Decide<Option<CachedResponse>>,
    ) {
        match self.task(handle) {
            Some(task) => task.will_cache_response(proposed, decide),
            None => decide(None),
        }
    }

    /// A data transfer continues as a download under a new handle. Later
    /// events for the transfer use `download`.
    pub fn did_become_download(&self, handle: TransportHandle, download: TransportHandle) {
        if let Some(task) = self.task(handle) {
            task.did_become_download(handle, download);
        }
    }

    /// Download progress.
    pub fn did_write_data(&self, handle: TransportHandle, total_written: i64, total_expected: i64) {
        if let Some(task) = self.task(handle) {
            task.did_write_data(total_written, total_expected);
        }
    }

    /// A resumed download picked up at `offset`.
    pub fn did_resume_at_offset(&self, handle: TransportHandle, offset: i64, expected_total: i64) {
        if let Some(task) = self.task(handle) {
            task.did_resume_at_offset(offset, expected_total);
        }
    }

    /// The download body is complete at `location`. The task moves the file
    /// before this call returns; the transport may delete `location`
    /// afterwards.
    pub fn did_finish_downloading(&self, handle: TransportHandle, location: &Path) {
        if let Some(task) = self.task(handle) {
            task.did_finish_downloading(location);
        }
    }

    /// Transfer metrics gathered by the transport.
    pub fn did_finish_collecting_metrics(&self, handle: TransportHandle, metrics: TaskMetrics) {
        if let Some(task) = self.task(handle) {
            task.did_finish_collecting_metrics(metrics);
        }
    }

    /// The transport can no longer deliver events for any transfer. Every
    /// outstanding task fails and the client accepts no new transfers.
    pub fn did_become_invalid(&self, error: Option<TransportError>) {
        match self.client.upgrade() {
            Some(client) => client.invalidate(error),
            None => tracing::trace!("Transport invalidated after its client was dropped"),
        }
    }

    /// Terminal event: the transfer is over, successfully when `error` is
    /// `None`.
    pub fn did_complete(&self, handle: TransportHandle, error: Option<TransportError>) {
        if let Some(task) = self.task(handle) {
            task.did_complete(handle, error);
        }
    }
}

impl fmt::Debug for SessionDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDelegate")
            .field("client_alive", &(self.client.strong_count() > 0))
            .finish()
    }
}
