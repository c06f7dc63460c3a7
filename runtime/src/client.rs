//! The client: shared middleware, the task registry and the transport.
//!
//! A [`Client`] is constructed explicitly around a [`Transport`]. The
//! transport receives a [`SessionDelegate`] during construction and reports
//! every transfer event through it. When the last clone of a client is
//! dropped, outstanding tasks are cancelled and fail with
//! [`HttpError::Cancelled`].
//!
//! # Example
//!
//! ```
//! use alice_runtime::{Client, ClientConfig, HttpError, Request, TaskKind, Transport, TransportHandle};
//! use alice_core::Inline;
//!
//! struct Offline;
//!
//! impl Transport for Offline {
//!     fn dispatch(&self, _: &Request, _: TaskKind) -> Result<TransportHandle, HttpError> {
//!         Err(HttpError::BadResponse("offline".into()))
//!     }
//!     fn resume(&self, _: TransportHandle) {}
//!     fn suspend(&self, _: TransportHandle) {}
//!     fn cancel(&self, _: TransportHandle) {}
//! }
//!
//! let client = Client::with_scheduler(ClientConfig::default(), Inline, |_delegate| Offline);
//! let task = client.get("https://example.com")?;
//!
//! assert!(matches!(task.response().failure(), Some(HttpError::BadResponse(_))));
//! # Ok::<(), HttpError>(())
//! ```

use crate::config::ClientConfig;
use crate::delegate::SessionDelegate;
use crate::error::{HttpError, TransportError};
use crate::handlers::{CacheHandler, ChallengeHandler, Handlers, RedirectHandler, ResponseHandler};
use crate::matcher::RequestMatcher;
use crate::middleware::{SharedMiddleware, when};
use crate::registry::TaskRegistry;
use crate::request::Request;
use crate::task::{Task, TaskId};
use crate::transport::{TaskKind, Transport, TransportHandle};
use alice_core::{Bag, BagToken, Future, Lock, Promise, Scheduler, SerialScheduler};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

struct ClientState {
    middlewares: Bag<SharedMiddleware>,
    registry: TaskRegistry<Task>,
    handlers: Handlers,
    closed: bool,
}

pub(crate) struct ClientInner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: ClientConfig,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    state: Lock<ClientState>,
}

impl ClientInner {
    pub(crate) fn middlewares(&self) -> Vec<SharedMiddleware> {
        self.state.with_lock(|s| s.middlewares.iter().cloned().collect())
    }

    pub(crate) fn handlers(&self) -> Handlers {
        self.state.with_lock(|s| s.handlers.clone())
    }

    /// Route `handle` to `task`. Returns `false` once the client is shutting
    /// down.
    pub(crate) fn register(&self, handle: TransportHandle, task: Task) -> bool {
        let id = task.id();
        let outcome = self.state.with_lock(|s| {
            if s.closed {
                return Err(());
            }
            Ok(s.registry.register(handle, task))
        });
        match outcome {
            Err(()) => {
                tracing::debug!(client = %self.config.name, task = %id, "Client closed, refusing registration");
                false
            },
            Ok(Some(previous)) if previous.id() != id => {
                tracing::warn!(
                    client = %self.config.name,
                    handle = %handle,
                    previous = %previous.id(),
                    task = %id,
                    "Transport reused a live handle"
                );
                true
            },
            Ok(_) => true,
        }
    }

    pub(crate) fn unregister(&self, handle: TransportHandle, id: TaskId) {
        let removed = self
            .state
            .with_lock(|s| s.registry.unregister(handle, |task| task.id() == id));
        if removed.is_none() {
            tracing::trace!(handle = %handle, task = %id, "Handle was not registered to task");
        }
    }

    pub(crate) fn transfer(&self, old: TransportHandle, new: TransportHandle, task: Task) {
        let id = task.id();
        self.state.with_lock(|s| {
            s.registry
                .transfer(old, new, task, |owner| owner.id() == id);
        });
    }

    pub(crate) fn lookup(&self, handle: TransportHandle) -> Option<Task> {
        self.state.with_lock(|s| s.registry.lookup(handle))
    }

    fn tasks(&self) -> Vec<Task> {
        self.state.with_lock(|s| s.registry.owners())
    }

    pub(crate) fn invalidate(&self, error: Option<TransportError>) {
        let tasks = self.state.with_lock(|s| {
            s.closed = true;
            s.registry.drain()
        });
        let error = HttpError::Session(
            error.unwrap_or_else(|| TransportError::Other("transport invalidated".into())),
        );
        tracing::warn!(
            client = %self.config.name,
            outstanding = tasks.len(),
            error = %error,
            "Transport invalidated, failing outstanding tasks"
        );
        for task in tasks {
            task.inner().invalidate(error.clone());
        }
    }

    fn shutdown(&self) {
        let tasks = self.state.with_lock(|s| {
            s.closed = true;
            s.registry.drain()
        });
        if !tasks.is_empty() {
            tracing::debug!(client = %self.config.name, outstanding = tasks.len(), "Client dropped, cancelling tasks");
        }
        for task in tasks {
            task.inner().abandon();
        }
    }
}

struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

/// Submits requests through a middleware chain to a [`Transport`].
///
/// Cloning is cheap and every clone shares middleware and tasks.
#[derive(Clone)]
pub struct Client {
    handle: Arc<ClientHandle>,
}

impl Client {
    /// Build a client whose tasks run their middleware chains on a
    /// dedicated worker thread named after `config.name`.
    ///
    /// `make_transport` receives the delegate the transport must report
    /// transfer events to.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Io`] if the worker thread cannot be spawned.
    pub fn new<T, M>(config: ClientConfig, make_transport: M) -> Result<Self, HttpError>
    where
        T: Transport + 'static,
        M: FnOnce(SessionDelegate) -> T,
    {
        let scheduler = SerialScheduler::new(format!("{}-work", config.name))?;
        Ok(Self::with_scheduler(config, scheduler, make_transport))
    }

    /// Build a client that runs middleware chains on `scheduler`.
    pub fn with_scheduler<T, M>(
        config: ClientConfig,
        scheduler: impl Scheduler + 'static,
        make_transport: M,
    ) -> Self
    where
        T: Transport + 'static,
        M: FnOnce(SessionDelegate) -> T,
    {
        tracing::debug!(client = %config.name, "Creating client");
        let inner = Arc::new_cyclic(|weak| ClientInner {
            transport: Arc::new(make_transport(SessionDelegate::new(weak.clone()))),
            config,
            scheduler: Arc::new(scheduler),
            state: Lock::new(ClientState {
                middlewares: Bag::new(),
                registry: TaskRegistry::new(),
                handlers: Handlers::default(),
                closed: false,
            }),
        });
        Self {
            handle: Arc::new(ClientHandle { inner }),
        }
    }

    fn inner(&self) -> &Arc<ClientInner> {
        &self.handle.inner
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner().config
    }

    /// Create a task without starting it, so task middleware and handlers
    /// can be attached first.
    #[must_use]
    pub fn prepare(&self, request: Request, kind: TaskKind) -> Task {
        Task::new(Arc::clone(self.inner()), request, kind, None)
    }

    /// Start a data task.
    #[must_use]
    pub fn request(&self, request: Request) -> Task {
        let task = self.prepare(request, TaskKind::Data);
        task.start();
        task
    }

    /// Start a `GET` data task.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUrl`] if `url` is not an absolute
    /// `http`/`https` URL.
    pub fn get(&self, url: &str) -> Result<Task, HttpError> {
        Ok(self.request(Request::get(url)?))
    }

    /// Start an upload task. A request without a body fails with
    /// [`HttpError::MissingUploadBody`].
    #[must_use]
    pub fn upload(&self, request: Request) -> Task {
        let task = self.prepare(request, TaskKind::Upload);
        task.start();
        task
    }

    /// Start a download task, moving the file to `destination` when done.
    #[must_use]
    pub fn download(&self, request: Request, destination: Option<PathBuf>) -> Task {
        let task = Task::new(
            Arc::clone(self.inner()),
            request,
            TaskKind::Download,
            destination,
        );
        task.start();
        task
    }

    /// Add a middleware for every task started from now on.
    pub fn use_middleware(&self, middleware: SharedMiddleware) -> BagToken {
        self.inner()
            .state
            .with_lock(|s| s.middlewares.append(middleware))
    }

    /// Add a middleware that only runs for requests `matcher` accepts.
    pub fn use_when(&self, middleware: SharedMiddleware, matcher: RequestMatcher) -> BagToken {
        self.use_middleware(when(middleware, matcher))
    }

    /// Remove a middleware added with [`Client::use_middleware`].
    pub fn remove_middleware(&self, token: BagToken) -> Option<SharedMiddleware> {
        self.inner()
            .state
            .with_lock(|s| s.middlewares.remove_value(token))
    }

    /// Client middleware, in order.
    #[must_use]
    pub fn middlewares(&self) -> Vec<SharedMiddleware> {
        self.inner().middlewares()
    }

    /// Default redirect handler for tasks without their own.
    pub fn on_redirect(&self, handler: RedirectHandler) -> &Self {
        self.inner()
            .state
            .with_lock(|s| s.handlers.redirect = Some(handler));
        self
    }

    /// Default challenge handler for tasks without their own.
    pub fn on_challenge(&self, handler: ChallengeHandler) -> &Self {
        self.inner()
            .state
            .with_lock(|s| s.handlers.challenge = Some(handler));
        self
    }

    /// Default response handler for tasks without their own.
    pub fn on_response(&self, handler: ResponseHandler) -> &Self {
        self.inner()
            .state
            .with_lock(|s| s.handlers.response = Some(handler));
        self
    }

    /// Default cache handler for tasks without their own.
    pub fn on_will_cache(&self, handler: CacheHandler) -> &Self {
        self.inner()
            .state
            .with_lock(|s| s.handlers.cache = Some(handler));
        self
    }

    /// Tasks that currently own a transfer.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.inner().tasks()
    }

    /// Tasks that currently own a transfer, collected on the client's work
    /// scheduler and delivered on `scheduler`.
    #[must_use]
    pub fn all_tasks(&self, scheduler: impl Scheduler + 'static) -> Future<Vec<Task>, Infallible> {
        let promise = Promise::new();
        let future = promise.future().yield_on(scheduler);
        let inner = Arc::clone(self.inner());
        self.inner().scheduler.schedule(Box::new(move || {
            promise.succeed(inner.tasks());
        }));
        future
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner().config.name)
            .field("tasks", &self.inner().state.with_lock(|s| s.registry.len()))
            .finish_non_exhaustive()
    }
}
