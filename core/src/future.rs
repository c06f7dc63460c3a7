//! Single-assignment asynchronous values.
//!
//! A [`Promise`] is the write side: the first call to [`Promise::succeed`] or
//! [`Promise::fail`] wins and every later call is discarded. A [`Future`] is
//! the read side: it can be inspected, observed, transformed, bridged onto a
//! [`Scheduler`], awaited from `async` code, or blocked on.
//!
//! # Observer guarantees
//!
//! - Every observer runs exactly once.
//! - Observers registered before completion run during the completing call,
//!   in registration order.
//! - Observers registered after completion run immediately, on the
//!   registering thread.
//! - Observers never run while the future's lock is held, so they may
//!   register more observers or complete other promises freely.
//!
//! # Example
//!
//! ```
//! use alice_core::Promise;
//!
//! let promise = Promise::<u32, String>::new();
//! let doubled = promise.future().map(|n| n * 2);
//!
//! promise.succeed(21);
//! promise.fail("too late".to_string());
//!
//! assert_eq!(doubled.inspect(), Some(&Ok(42)));
//! ```

use crate::{Bag, BagToken, Lock, Scheduler};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use smallvec::SmallVec;
use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::Duration;

type Observer<S, F> = Box<dyn FnOnce(&Result<S, F>) + Send + 'static>;

struct Shared<S, F> {
    result: OnceLock<Result<S, F>>,
    observers: Lock<Bag<Observer<S, F>>>,
}

impl<S, F> Shared<S, F> {
    fn pending() -> Self {
        Self {
            result: OnceLock::new(),
            observers: Lock::new(Bag::new()),
        }
    }

    fn completed(result: Result<S, F>) -> Self {
        Self {
            result: OnceLock::from(result),
            observers: Lock::new(Bag::new()),
        }
    }

    fn complete(&self, result: Result<S, F>) -> bool {
        // The slot is written under the observer lock so a concurrent
        // registration either lands in the bag or sees the result.
        let drained = self.observers.with_lock(|observers| {
            self.result.set(result).ok()?;
            Some(observers.drain().collect::<SmallVec<[Observer<S, F>; 2]>>())
        });

        let (Some(observers), Some(result)) = (drained, self.result.get()) else {
            return false;
        };
        for observer in observers {
            observer(result);
        }
        true
    }

    /// Returns the token of the queued observer, or `None` if it already ran.
    fn observe(&self, observer: Observer<S, F>) -> Option<BagToken> {
        let queued = self.observers.with_lock(|observers| {
            if self.result.get().is_some() {
                Err(observer)
            } else {
                Ok(observers.append(observer))
            }
        });

        match queued {
            Ok(token) => Some(token),
            Err(observer) => {
                if let Some(result) = self.result.get() {
                    observer(result);
                }
                None
            },
        }
    }

    /// Drop a queued observer that has not run yet.
    fn forget(&self, token: BagToken) {
        drop(self.observers.with_lock(|observers| observers.remove_value(token)));
    }
}

/// The write capability for a [`Future`].
///
/// Cloning a promise does not create a new future; all clones resolve the
/// same slot and the first resolution wins.
pub struct Promise<S, F> {
    shared: Arc<Shared<S, F>>,
}

impl<S, F> Promise<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    /// Create an unresolved promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::pending()),
        }
    }

    /// The read side of this promise.
    #[must_use]
    pub fn future(&self) -> Future<S, F> {
        Future {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Resolve with `result`. Returns `false` if the promise was already
    /// resolved, in which case `result` is dropped.
    pub fn complete(&self, result: Result<S, F>) -> bool {
        self.shared.complete(result)
    }

    /// Resolve with a success value.
    pub fn succeed(&self, value: S) -> bool {
        self.complete(Ok(value))
    }

    /// Resolve with a failure.
    pub fn fail(&self, error: F) -> bool {
        self.complete(Err(error))
    }

    /// Whether some resolution has already won.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.shared.result.get().is_some()
    }
}

impl<S, F> Clone for Promise<S, F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, F> Default for Promise<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S: fmt::Debug, F: fmt::Debug> fmt::Debug for Promise<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("result", &self.shared.result.get())
            .finish()
    }
}

/// A value of type `S`, or a failure of type `F`, that exists at most once.
pub struct Future<S, F> {
    shared: Arc<Shared<S, F>>,
}

impl<S, F> Future<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    /// A future that has already succeeded.
    #[must_use]
    pub fn succeeded(value: S) -> Self {
        Self {
            shared: Arc::new(Shared::completed(Ok(value))),
        }
    }

    /// A future that has already failed.
    #[must_use]
    pub fn failed(error: F) -> Self {
        Self {
            shared: Arc::new(Shared::completed(Err(error))),
        }
    }

    /// Whether no result is available yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.result.get().is_none()
    }

    /// Whether the result is available.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !self.is_pending()
    }

    /// The result, if available. Once `Some`, always the same value.
    #[must_use]
    pub fn inspect(&self) -> Option<&Result<S, F>> {
        self.shared.result.get()
    }

    /// The success value, if completed successfully.
    #[must_use]
    pub fn success(&self) -> Option<&S> {
        self.inspect().and_then(|result| result.as_ref().ok())
    }

    /// The failure, if completed with one.
    #[must_use]
    pub fn failure(&self) -> Option<&F> {
        self.inspect().and_then(|result| result.as_ref().err())
    }

    /// Run `observer` exactly once with the result.
    ///
    /// If the future is already complete the observer runs before this call
    /// returns; otherwise it runs on whichever thread completes the promise.
    pub fn when_complete(&self, observer: impl FnOnce(&Result<S, F>) + Send + 'static) {
        let _ = self.shared.observe(Box::new(observer));
    }

    /// Run `observer` with the success value, if there ever is one.
    pub fn when_succeed(&self, observer: impl FnOnce(&S) + Send + 'static) {
        self.when_complete(move |result| {
            if let Ok(value) = result {
                observer(value);
            }
        });
    }

    /// Run `observer` with the failure, if there ever is one.
    pub fn when_fail(&self, observer: impl FnOnce(&F) + Send + 'static) {
        self.when_complete(move |result| {
            if let Err(error) = result {
                observer(error);
            }
        });
    }

    /// Block the calling thread until completion or until `timeout` elapses.
    ///
    /// Must not be called from the context that would deliver the completion.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<&Result<S, F>> {
        self.block(Some(timeout));
        self.inspect()
    }

    fn block(&self, timeout: Option<Duration>) {
        if self.is_completed() {
            return;
        }
        let latch = Arc::new(Latch::default());
        let signal = Arc::clone(&latch);
        let Some(token) = self.shared.observe(Box::new(move |_| signal.open())) else {
            return;
        };
        latch.wait(timeout);
        if self.is_pending() {
            self.shared.forget(token);
        }
    }
}

impl<S, F> Future<S, F>
where
    S: Clone + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    /// Transform the success value. Failures pass through untouched and
    /// `transform` is never called for them.
    #[must_use]
    pub fn map<U>(&self, transform: impl FnOnce(S) -> U + Send + 'static) -> Future<U, F>
    where
        U: Send + Sync + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        self.when_complete(move |result| match result {
            Ok(value) => {
                promise.succeed(transform(value.clone()));
            },
            Err(error) => {
                promise.fail(error.clone());
            },
        });
        future
    }

    /// Transform the failure. Success values pass through untouched.
    #[must_use]
    pub fn map_err<G>(&self, transform: impl FnOnce(F) -> G + Send + 'static) -> Future<S, G>
    where
        G: Send + Sync + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        self.when_complete(move |result| match result {
            Ok(value) => {
                promise.succeed(value.clone());
            },
            Err(error) => {
                promise.fail(transform(error.clone()));
            },
        });
        future
    }

    /// Chain into the future produced by `transform`.
    #[must_use]
    pub fn flat_map<U>(
        &self,
        transform: impl FnOnce(S) -> Future<U, F> + Send + 'static,
    ) -> Future<U, F>
    where
        U: Clone + Send + Sync + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();
        self.when_complete(move |result| match result {
            Ok(value) => transform(value.clone()).pipe(&promise),
            Err(error) => {
                promise.fail(error.clone());
            },
        });
        future
    }

    /// Mutate the success value in place.
    #[must_use]
    pub fn with(&self, body: impl FnOnce(&mut S) + Send + 'static) -> Self {
        self.map(move |mut value| {
            body(&mut value);
            value
        })
    }

    /// Resolve `promise` with this future's result once it is available.
    pub fn pipe(&self, promise: &Promise<S, F>) {
        let promise = promise.clone();
        self.when_complete(move |result| {
            promise.complete(result.clone());
        });
    }

    /// A future whose completion happens on `scheduler`.
    ///
    /// Observers registered on the returned future before it completes run
    /// on the scheduler, not on whichever thread resolved the original.
    #[must_use]
    pub fn yield_on(&self, scheduler: impl Scheduler + 'static) -> Self {
        let promise = Promise::new();
        let future = promise.future();
        self.when_complete(move |result| {
            let result = result.clone();
            scheduler.schedule(Box::new(move || {
                promise.complete(result);
            }));
        });
        future
    }

    /// Block until completion and return the success value, if any.
    ///
    /// Must not be called from the context that would deliver the completion.
    #[must_use]
    pub fn wait(&self) -> Option<S> {
        self.block(None);
        self.success().cloned()
    }

    /// Block until completion and return the failure, if any.
    ///
    /// Must not be called from the context that would deliver the completion.
    #[must_use]
    pub fn wait_error(&self) -> Option<F> {
        self.block(None);
        self.failure().cloned()
    }
}

impl<S, F> Clone for Future<S, F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, F> From<Result<S, F>> for Future<S, F> {
    fn from(result: Result<S, F>) -> Self {
        Self {
            shared: Arc::new(Shared::completed(result)),
        }
    }
}

impl<S: fmt::Debug, F: fmt::Debug> fmt::Debug for Future<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("result", &self.shared.result.get())
            .finish()
    }
}

/// Awaiting a future whose promises were all dropped unresolved never
/// finishes.
impl<S, F> IntoFuture for Future<S, F>
where
    S: Clone + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    type Output = Result<S, F>;
    type IntoFuture = BoxFuture<'static, Result<S, F>>;

    fn into_future(self) -> Self::IntoFuture {
        let (sender, receiver) = oneshot::channel();
        self.when_complete(move |result| {
            let _ = sender.send(result.clone());
        });

        Box::pin(async move {
            match receiver.await {
                Ok(result) => result,
                Err(oneshot::Canceled) => futures::future::pending().await,
            }
        })
    }
}

#[derive(Default)]
struct Latch {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Latch {
    fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.condvar.notify_all();
    }

    fn wait(&self, timeout: Option<Duration>) {
        let guard = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        match timeout {
            None => {
                let _open = self
                    .condvar
                    .wait_while(guard, |open| !*open)
                    .unwrap_or_else(PoisonError::into_inner);
            },
            Some(timeout) => {
                let _open = self
                    .condvar
                    .wait_timeout_while(guard, timeout, |open| !*open)
                    .unwrap_or_else(PoisonError::into_inner);
            },
        }
    }
}
