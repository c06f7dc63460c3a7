//! Per-request lifecycle.
//!
//! A [`Task`] owns one request from submission to its single outcome. It
//! moves through
//!
//! ```text
//! Initialized -> ProcessingRequest -> Loading -> ProcessingResponse -> Finished
//! ```
//!
//! - `start()` composes the client and task middleware around the session
//!   responder and runs the chain on the client's work scheduler.
//! - The session responder dispatches to the transport, registers the
//!   handle with the client and resumes the transfer.
//! - Transport callbacks arrive through the [`SessionDelegate`] and are
//!   absorbed here. Once a task is `Finished`, intermediate callbacks are
//!   ignored.
//! - `did_complete` resolves the session promise. The middleware chain's
//!   result is then piped into the task's response promise.
//!
//! Task bookkeeping and client bookkeeping use separate locks and no code
//! path holds both. User callbacks, transport calls and promise completion
//! all happen outside the task lock.
//!
//! [`SessionDelegate`]: crate::SessionDelegate

use crate::client::ClientInner;
use crate::error::{HttpError, TransportError};
use crate::handlers::{
    CacheHandler, ChallengeHandler, Handler, Handlers, ProgressObserver, Redirect,
    RedirectHandler, ResponseHandler,
};
use crate::matcher::RequestMatcher;
use crate::metrics::TaskLifecycleMetrics;
use crate::middleware::{SharedMiddleware, compose, when};
use crate::progress::Progress;
use crate::request::Request;
use crate::responder::{Responder, ResponseFuture, SharedResponder};
use crate::response::{Response, ResponseBody, ResponseHead, TaskMetrics};
use crate::transport::{
    CachedResponse, Challenge, ChallengeDisposition, Decide, DelayedRequestDisposition,
    ResponseDisposition, TaskKind, TransportHandle,
};
use alice_core::{Bag, BagToken, Future, Lock, Promise, Scheduler, panic_message};
use chrono::{DateTime, Utc};
use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle phase of a task. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskState {
    /// Created, not started
    Initialized,
    /// Running the middleware chain
    ProcessingRequest,
    /// Transfer registered with the transport
    Loading,
    /// Transport reported completion, outcome being assembled
    ProcessingResponse,
    /// Outcome delivered or task cancelled; absorbs late callbacks
    Finished,
}

struct Bookkeeping {
    state: TaskState,
    kind: TaskKind,
    destination: Option<PathBuf>,
    middlewares: Bag<SharedMiddleware>,
    handlers: Handlers,
    upload_observer: Option<ProgressObserver>,
    download_observer: Option<ProgressObserver>,
    upload_progress: Progress,
    download_progress: Progress,
    started: bool,
    dispatched: bool,
    cancelled: bool,
    handle: Option<TransportHandle>,
    sent_request: Option<Request>,
    transfer_started_at: Option<DateTime<Utc>>,
    head: Option<ResponseHead>,
    data: Option<Vec<u8>>,
    file: Option<PathBuf>,
    persist_error: Option<HttpError>,
    metrics: Option<TaskMetrics>,
    redirect_count: u32,
    bytes_sent: u64,
}

impl Bookkeeping {
    fn new(kind: TaskKind, destination: Option<PathBuf>) -> Self {
        Self {
            state: TaskState::Initialized,
            kind,
            destination,
            middlewares: Bag::new(),
            handlers: Handlers::default(),
            upload_observer: None,
            download_observer: None,
            upload_progress: Progress::default(),
            download_progress: Progress::default(),
            started: false,
            dispatched: false,
            cancelled: false,
            handle: None,
            sent_request: None,
            transfer_started_at: None,
            head: None,
            data: None,
            file: None,
            persist_error: None,
            metrics: None,
            redirect_count: 0,
            bytes_sent: 0,
        }
    }

    fn accepts_events(&self) -> bool {
        self.state != TaskState::Finished
    }

    fn bytes_received(&self) -> u64 {
        match &self.data {
            Some(data) => data.len() as u64,
            None => u64::try_from(self.download_progress.completed).unwrap_or(0),
        }
    }

    fn synthesize_metrics(&self) -> TaskMetrics {
        let finished_at = Utc::now();
        TaskMetrics {
            started_at: self.transfer_started_at.unwrap_or(finished_at),
            finished_at,
            redirect_count: self.redirect_count,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received(),
        }
    }
}

pub(crate) struct TaskInner {
    id: TaskId,
    client: Arc<ClientInner>,
    request: Request,
    book: Lock<Bookkeeping>,
    promise: Promise<Response, HttpError>,
    session: Promise<Response, HttpError>,
}

/// Handle to one request's lifecycle. Clones share the same task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub(crate) fn new(
        client: Arc<ClientInner>,
        request: Request,
        kind: TaskKind,
        destination: Option<PathBuf>,
    ) -> Self {
        let inner = Arc::new(TaskInner {
            id: TaskId::next(),
            client,
            request,
            book: Lock::new(Bookkeeping::new(kind, destination)),
            promise: Promise::new(),
            session: Promise::new(),
        });

        let weak = Arc::downgrade(&inner);
        inner.promise.future().when_complete(move |result| {
            if let Some(task) = weak.upgrade() {
                task.finish(result);
            }
        });

        Self { inner }
    }

    /// Identifier used in log events.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The request as submitted, before any middleware ran.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.book.with_lock(|b| b.state)
    }

    /// Current transfer kind; a data task may turn into a download.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.inner.book.with_lock(|b| b.kind)
    }

    /// Whether `start()` has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.book.with_lock(|b| b.started)
    }

    /// Whether the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.book.with_lock(|b| b.cancelled)
    }

    /// Transport handle, once the transfer exists.
    #[must_use]
    pub fn handle(&self) -> Option<TransportHandle> {
        self.inner.book.with_lock(|b| b.handle)
    }

    /// The single outcome of this task.
    #[must_use]
    pub fn response(&self) -> ResponseFuture {
        self.inner.promise.future()
    }

    /// Last reported upload progress.
    #[must_use]
    pub fn upload_progress(&self) -> Progress {
        self.inner.book.with_lock(|b| b.upload_progress)
    }

    /// Last reported download progress.
    #[must_use]
    pub fn download_progress(&self) -> Progress {
        self.inner.book.with_lock(|b| b.download_progress)
    }

    /// Add a middleware that runs after the client's. Has no effect on a
    /// task that already started.
    pub fn use_middleware(&self, middleware: SharedMiddleware) -> BagToken {
        self.inner.book.with_lock(|b| b.middlewares.append(middleware))
    }

    /// Add a middleware that only runs for requests `matcher` accepts.
    pub fn use_when(&self, middleware: SharedMiddleware, matcher: RequestMatcher) -> BagToken {
        self.use_middleware(when(middleware, matcher))
    }

    /// Remove a middleware added with [`Task::use_middleware`].
    pub fn remove_middleware(&self, token: BagToken) -> Option<SharedMiddleware> {
        self.inner.book.with_lock(|b| b.middlewares.remove_value(token))
    }

    /// Task-local middleware, in order.
    #[must_use]
    pub fn middlewares(&self) -> Vec<SharedMiddleware> {
        self.inner.book.with_lock(|b| b.middlewares.iter().cloned().collect())
    }

    /// Where a download is moved once the transport finishes writing it.
    pub fn set_destination(&self, destination: impl Into<PathBuf>) -> &Self {
        let destination = destination.into();
        self.inner.book.with_lock(|b| b.destination = Some(destination));
        self
    }

    /// Observe upload progress on `scheduler`.
    pub fn on_upload_progress(
        &self,
        scheduler: impl Scheduler + 'static,
        observer: impl Fn(Progress) + Send + Sync + 'static,
    ) -> &Self {
        let observer = Handler::new(scheduler, observer);
        self.inner.book.with_lock(|b| b.upload_observer = Some(observer));
        self
    }

    /// Observe download progress on `scheduler`.
    pub fn on_download_progress(
        &self,
        scheduler: impl Scheduler + 'static,
        observer: impl Fn(Progress) + Send + Sync + 'static,
    ) -> &Self {
        let observer = Handler::new(scheduler, observer);
        self.inner.book.with_lock(|b| b.download_observer = Some(observer));
        self
    }

    /// Decide redirects for this task.
    pub fn on_redirect(&self, handler: RedirectHandler) -> &Self {
        self.inner.book.with_lock(|b| b.handlers.redirect = Some(handler));
        self
    }

    /// Answer authentication challenges for this task.
    pub fn on_challenge(&self, handler: ChallengeHandler) -> &Self {
        self.inner.book.with_lock(|b| b.handlers.challenge = Some(handler));
        self
    }

    /// Decide what happens when the response head arrives.
    pub fn on_response(&self, handler: ResponseHandler) -> &Self {
        self.inner.book.with_lock(|b| b.handlers.response = Some(handler));
        self
    }

    /// Vet responses before the transport caches them.
    pub fn on_will_cache(&self, handler: CacheHandler) -> &Self {
        self.inner.book.with_lock(|b| b.handlers.cache = Some(handler));
        self
    }

    /// Run the middleware chain and dispatch. Only the first call has an
    /// effect.
    pub fn start(&self) -> &Self {
        let task_middlewares = self.inner.book.with_lock(|b| {
            (b.state == TaskState::Initialized).then(|| {
                self.inner.transition(b, TaskState::ProcessingRequest);
                b.started = true;
                b.middlewares.iter().cloned().collect::<Vec<_>>()
            })
        });
        let Some(task_middlewares) = task_middlewares else {
            tracing::trace!(task = %self.inner.id, "Task already started");
            return self;
        };

        TaskLifecycleMetrics::record_started();
        tracing::debug!(
            task = %self.inner.id,
            method = %self.inner.request.method,
            url = %self.inner.request.url,
            "Starting task"
        );

        let mut middlewares = self.inner.client.middlewares();
        middlewares.extend(task_middlewares);
        let task = Arc::clone(&self.inner);
        self.inner
            .client
            .scheduler
            .schedule(Box::new(move || task.run(&middlewares)));
        self
    }

    /// Pause the transfer.
    pub fn suspend(&self) {
        if let Some(handle) = self.handle() {
            self.inner.client.transport.suspend(handle);
        }
    }

    /// Continue a suspended transfer.
    pub fn resume(&self) {
        if let Some(handle) = self.handle() {
            self.inner.client.transport.resume(handle);
        }
    }

    /// Ask the transport to abort.
    ///
    /// The response future then fails with a cancellation error once the
    /// transport reports completion. A task that has no transfer yet fails
    /// right away. If the transport never reports back, the future stays
    /// pending.
    pub fn cancel(&self) {
        match self.inner.mark_cancelled() {
            Cancellation::AlreadyResolved => {},
            Cancellation::Transfer(handle) => self.inner.client.transport.cancel(handle),
            Cancellation::NoTransfer => {
                self.inner.promise.fail(HttpError::Cancelled);
            },
        }
    }

    /// Cancel a download, producing a token a later request can resume
    /// from with [`Request::with_resume_data`].
    #[must_use]
    pub fn cancel_producing_resume_data(&self) -> Future<Option<Vec<u8>>, Infallible> {
        match self.inner.mark_cancelled() {
            Cancellation::AlreadyResolved => Future::succeeded(None),
            Cancellation::Transfer(handle) => self
                .inner
                .client
                .transport
                .cancel_producing_resume_data(handle),
            Cancellation::NoTransfer => {
                self.inner.promise.fail(HttpError::Cancelled);
                Future::succeeded(None)
            },
        }
    }

    pub(crate) fn inner(&self) -> &Arc<TaskInner> {
        &self.inner
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("url", &self.inner.request.url)
            .finish_non_exhaustive()
    }
}

enum Cancellation {
    AlreadyResolved,
    Transfer(TransportHandle),
    NoTransfer,
}

/// The end of every middleware chain: hands the request to the transport.
struct SessionResponder {
    task: Arc<TaskInner>,
}

impl Responder for SessionResponder {
    fn respond(&self, request: Request) -> Result<ResponseFuture, HttpError> {
        self.task.dispatch(request)
    }
}

impl TaskInner {
    fn transition(&self, book: &mut Bookkeeping, to: TaskState) {
        if book.state < to {
            tracing::debug!(task = %self.id, from = ?book.state, to = ?to, "Task state changed");
            book.state = to;
        }
    }

    fn handlers(&self) -> Handlers {
        let own = self.book.with_lock(|b| b.handlers.clone());
        own.or(&self.client.handlers())
    }

    fn mark_cancelled(&self) -> Cancellation {
        if self.promise.is_completed() {
            return Cancellation::AlreadyResolved;
        }
        let handle = self.book.with_lock(|b| {
            b.cancelled = true;
            self.transition(b, TaskState::Finished);
            b.handle
        });
        tracing::debug!(task = %self.id, handle = ?handle, "Cancelling task");
        handle.map_or(Cancellation::NoTransfer, Cancellation::Transfer)
    }

    fn run(self: &Arc<Self>, middlewares: &[SharedMiddleware]) {
        let terminal: SharedResponder = Arc::new(SessionResponder {
            task: Arc::clone(self),
        });
        let mut request = self.request.clone();
        self.client.config.apply_default_headers(&mut request.headers);

        let responder = compose(middlewares, terminal);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| responder.respond(request)))
            .unwrap_or_else(|payload| {
                Err(HttpError::InvariantViolated(format!(
                    "middleware panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match outcome {
            Ok(future) => {
                let promise = self.promise.clone();
                let task = Arc::downgrade(self);
                future.when_complete(move |result| {
                    let cancelled = task
                        .upgrade()
                        .is_some_and(|task| task.book.with_lock(|b| b.cancelled));
                    let cancellation_flavoured = matches!(result, Err(e) if e.is_cancelled());
                    if cancelled && !cancellation_flavoured {
                        promise.fail(HttpError::Cancelled);
                    } else {
                        promise.complete(result.clone());
                    }
                });
            },
            Err(error) => {
                tracing::warn!(task = %self.id, error = %error, "Middleware chain failed");
                self.abort_transfer();
                self.promise.fail(error);
            },
        }
    }

    /// Cancel a transfer the chain left running when it failed.
    fn abort_transfer(&self) {
        let handle = self.book.with_lock(|b| {
            if b.state != TaskState::Loading {
                return None;
            }
            self.transition(b, TaskState::Finished);
            b.handle
        });
        if let Some(handle) = handle {
            tracing::debug!(task = %self.id, handle = %handle, "Cancelling orphaned transfer");
            self.client.transport.cancel(handle);
        }
    }

    fn dispatch(self: &Arc<Self>, mut request: Request) -> Result<ResponseFuture, HttpError> {
        let kind = self.book.with_lock(|b| {
            if b.dispatched {
                return Err(HttpError::InvariantViolated(format!(
                    "{} reached the session responder twice",
                    self.id
                )));
            }
            if b.cancelled {
                return Err(HttpError::Cancelled);
            }
            b.dispatched = true;
            Ok(b.kind)
        })?;

        if kind == TaskKind::Upload && request.body.is_empty() {
            return Err(HttpError::MissingUploadBody);
        }
        if request.timeout.is_none() {
            request.timeout = self.client.config.request_timeout;
        }

        let handle = self.client.transport.dispatch(&request, kind)?;
        let cancelled = self.book.with_lock(|b| {
            b.handle = Some(handle);
            b.transfer_started_at = Some(Utc::now());
            b.sent_request = Some(request);
            if !b.cancelled {
                self.transition(b, TaskState::Loading);
            }
            b.cancelled
        });
        tracing::debug!(task = %self.id, handle = %handle, kind = ?kind, "Dispatched to transport");

        if !self.client.register(handle, Task {
            inner: Arc::clone(self),
        }) {
            self.client.transport.cancel(handle);
            self.book.with_lock(|b| {
                b.cancelled = true;
                self.transition(b, TaskState::Finished);
            });
            return Err(HttpError::Cancelled);
        }

        if cancelled {
            self.client.transport.cancel(handle);
        } else {
            self.client.transport.resume(handle);
        }
        Ok(self.session.future())
    }

    fn finish(&self, result: &Result<Response, HttpError>) {
        let started = self.book.with_lock(|b| {
            self.transition(b, TaskState::Finished);
            b.started
        });

        match result {
            Ok(response) => {
                tracing::debug!(task = %self.id, status = %response.status(), "Task succeeded");
                if started {
                    TaskLifecycleMetrics::record_succeeded(response.metrics.duration());
                }
            },
            Err(error) if error.is_cancelled() => {
                tracing::debug!(task = %self.id, "Task cancelled");
                if started {
                    TaskLifecycleMetrics::record_cancelled();
                }
            },
            Err(error) => {
                tracing::warn!(task = %self.id, error = %error, "Task failed");
                if started {
                    TaskLifecycleMetrics::record_failed();
                }
            },
        }
    }

    /// Fail without waiting for the transport, used when the client shuts
    /// down.
    pub(crate) fn abandon(&self) {
        let handle = self.book.with_lock(|b| {
            b.cancelled = true;
            self.transition(b, TaskState::Finished);
            b.handle
        });
        if let Some(handle) = handle {
            self.client.transport.cancel(handle);
        }
        self.session.fail(HttpError::Cancelled);
        self.promise.fail(HttpError::Cancelled);
    }

    /// Fail because the transport went away. Nothing is cancelled since
    /// the transport no longer accepts calls.
    pub(crate) fn invalidate(&self, error: HttpError) {
        self.book.with_lock(|b| self.transition(b, TaskState::Finished));
        self.session.fail(error.clone());
        self.promise.fail(error);
    }

    pub(crate) fn will_begin_delayed_request(&self, decide: Decide<DelayedRequestDisposition>) {
        if self.book.with_lock(|b| b.accepts_events()) {
            decide(DelayedRequestDisposition::ContinueLoading);
        } else {
            tracing::trace!(task = %self.id, "Cancelling delayed start of finished task");
            decide(DelayedRequestDisposition::Cancel);
        }
    }

    pub(crate) fn will_redirect(
        self: &Arc<Self>,
        response: ResponseHead,
        proposed: Request,
        decide: Decide<Option<Request>>,
    ) {
        let (live, count) = self.book.with_lock(|b| (b.accepts_events(), b.redirect_count));
        if !live {
            tracing::trace!(task = %self.id, "Ignoring redirect for finished task");
            decide(None);
            return;
        }

        let task = Arc::downgrade(self);
        let decide: Decide<Option<Request>> = Box::new(move |next| {
            if next.is_some() {
                if let Some(task) = task.upgrade() {
                    task.book.with_lock(|b| b.redirect_count += 1);
                }
            }
            decide(next);
        });

        match self.handlers().redirect {
            Some(handler) => handler.run(
                Redirect {
                    response,
                    proposed,
                    count,
                },
                decide,
            ),
            None => {
                let follow = self.client.config.allows_redirect(count);
                tracing::debug!(task = %self.id, follow, count, "Applying default redirect policy");
                decide(follow.then_some(proposed));
            },
        }
    }

    pub(crate) fn did_receive_challenge(
        &self,
        challenge: Challenge,
        decide: Decide<ChallengeDisposition>,
    ) {
        if !self.book.with_lock(|b| b.accepts_events()) {
            decide(ChallengeDisposition::CancelAuthenticationChallenge);
            return;
        }
        match self.handlers().challenge {
            Some(handler) => handler.run(challenge, decide),
            None => decide(ChallengeDisposition::PerformDefaultHandling),
        }
    }

    pub(crate) fn need_new_body_stream(&self, decide: Decide<Option<Box<dyn Read + Send>>>) {
        let body = self
            .book
            .with_lock(|b| b.sent_request.as_ref().map(|request| request.body.clone()));
        let stream = match body.map(|body| body.reader()) {
            Some(Ok(reader)) => reader,
            Some(Err(error)) => {
                tracing::warn!(task = %self.id, error = %error, "Cannot reopen request body");
                None
            },
            None => None,
        };
        decide(stream);
    }

    pub(crate) fn did_send_body_data(&self, total_sent: i64, total_expected: i64) {
        let update = self.book.with_lock(|b| {
            if !b.accepts_events() {
                return None;
            }
            b.upload_progress = Progress::new(total_expected, total_sent);
            b.bytes_sent = u64::try_from(total_sent).unwrap_or(0);
            Some((b.upload_progress, b.upload_observer.clone()))
        });
        if let Some((progress, Some(observer))) = update {
            observer.notify(progress);
        }
    }

    pub(crate) fn did_receive_response(
        &self,
        head: ResponseHead,
        decide: Decide<ResponseDisposition>,
    ) {
        let live = self.book.with_lock(|b| {
            if b.accepts_events() {
                b.head = Some(head.clone());
                b.download_progress.total =
                    head.expected_content_length().map_or(-1, |len| i64::try_from(len).unwrap_or(-1));
            }
            b.accepts_events()
        });
        if !live {
            decide(ResponseDisposition::Cancel);
            return;
        }
        match self.handlers().response {
            Some(handler) => handler.run(head, decide),
            None => decide(ResponseDisposition::Allow),
        }
    }

    pub(crate) fn did_receive_data(&self, chunk: &[u8]) {
        let update = self.book.with_lock(|b| {
            if !b.accepts_events() {
                return None;
            }
            let data = b.data.get_or_insert_with(Vec::new);
            data.extend_from_slice(chunk);
            let completed = i64::try_from(data.len()).unwrap_or(i64::MAX);
            b.download_progress = Progress::new(b.download_progress.total, completed);
            Some((b.download_progress, b.download_observer.clone()))
        });
        if let Some((progress, Some(observer))) = update {
            observer.notify(progress);
        }
    }

    pub(crate) fn will_cache_response(
        &self,
        proposed: CachedResponse,
        decide: Decide<Option<CachedResponse>>,
    ) {
        if !self.book.with_lock(|b| b.accepts_events()) {
            decide(None);
            return;
        }
        match self.handlers().cache {
            Some(handler) => handler.run(proposed, decide),
            None => decide(Some(proposed)),
        }
    }

    /// Hand-off of a data transfer to a download transfer. The task updates
    /// its own state first, then the client swaps the registry route.
    pub(crate) fn did_become_download(self: &Arc<Self>, old: TransportHandle, new: TransportHandle) {
        let progress = self.book.with_lock(|b| {
            b.kind = TaskKind::Download;
            b.handle = Some(new);
            let received = b.data.take().map_or(0, |data| data.len());
            b.download_progress = Progress::new(
                b.download_progress.total,
                i64::try_from(received).unwrap_or(i64::MAX),
            );
            b.download_progress
        });
        tracing::debug!(task = %self.id, old = %old, new = %new, completed = progress.completed, "Task became a download");
        self.client.transfer(old, new, Task {
            inner: Arc::clone(self),
        });
    }

    fn update_download_progress(&self, progress: Progress) {
        let observer = self.book.with_lock(|b| {
            if !b.accepts_events() {
                return None;
            }
            b.download_progress = progress;
            b.download_observer.clone()
        });
        if let Some(observer) = observer {
            observer.notify(progress);
        }
    }

    pub(crate) fn did_write_data(&self, total_written: i64, total_expected: i64) {
        self.update_download_progress(Progress::new(total_expected, total_written));
    }

    pub(crate) fn did_resume_at_offset(&self, offset: i64, expected_total: i64) {
        self.update_download_progress(Progress::new(expected_total, offset));
    }

    /// Persist the finished download. A finished task leaves `location` to
    /// the transport.
    pub(crate) fn did_finish_downloading(&self, location: &Path) {
        let target = self.book.with_lock(|b| {
            b.accepts_events().then(|| {
                persist_target(
                    b.destination.clone(),
                    self.client.config.download_dir.as_deref(),
                    location,
                    b.head.as_ref(),
                )
            })
        });
        let Some(target) = target else {
            tracing::trace!(task = %self.id, "Ignoring finished download for finished task");
            return;
        };

        let outcome = move_file(location, &target);
        if let Err(error) = &outcome {
            tracing::warn!(
                task = %self.id,
                from = %location.display(),
                to = %target.display(),
                error = %error,
                "Failed to persist download"
            );
        }
        self.book.with_lock(|b| match outcome {
            Ok(()) => b.file = Some(target),
            Err(error) => b.persist_error = Some(error.into()),
        });
    }

    pub(crate) fn did_finish_collecting_metrics(&self, metrics: TaskMetrics) {
        self.book.with_lock(|b| b.metrics = Some(metrics));
    }

    /// Terminal transport event. Runs even for a finished task so that a
    /// cancelled transfer still resolves and unregisters.
    pub(crate) fn did_complete(&self, handle: TransportHandle, error: Option<TransportError>) {
        let result = self.book.with_lock(|b| {
            self.transition(b, TaskState::ProcessingResponse);
            let metrics = b.metrics.take().unwrap_or_else(|| b.synthesize_metrics());

            match error {
                Some(error) => {
                    let error = HttpError::Session(error);
                    if b.cancelled && !error.is_cancelled() {
                        Err(HttpError::Cancelled)
                    } else {
                        Err(error)
                    }
                },
                None if b.cancelled => Err(HttpError::Cancelled),
                None => {
                    if let Some(error) = b.persist_error.take() {
                        return Err(error);
                    }
                    let Some(head) = b.head.take() else {
                        return Err(HttpError::InvariantViolated(format!(
                            "transport completed {handle} without a response"
                        )));
                    };
                    let body = match b.kind {
                        TaskKind::Download => b.file.take().map_or(ResponseBody::None, ResponseBody::File),
                        TaskKind::Data | TaskKind::Upload => {
                            b.data.take().map_or(ResponseBody::None, ResponseBody::Data)
                        },
                    };
                    Ok(Response::new(head, body, metrics))
                },
            }
        });

        if let Err(error) = &result {
            if error.is_invariant_violation() {
                tracing::warn!(task = %self.id, handle = %handle, error = %error, "Task bookkeeping broken");
            }
        }

        self.session.complete(result);
        self.client.unregister(handle, self.id);
    }
}

fn persist_target(
    destination: Option<PathBuf>,
    download_dir: Option<&Path>,
    location: &Path,
    head: Option<&ResponseHead>,
) -> PathBuf {
    if let Some(destination) = destination {
        return destination;
    }
    let unique = Uuid::new_v4().to_string();
    match download_dir {
        Some(dir) => {
            let name = head
                .and_then(ResponseHead::suggested_filename)
                .and_then(|name| Path::new(&name).file_name().map(ToOwned::to_owned))
                .map_or_else(|| unique.into(), PathBuf::from);
            dir.join(name)
        },
        None => location.with_file_name(unique),
    }
}

/// Move a file, copying when a plain rename crosses filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        },
    }
}
