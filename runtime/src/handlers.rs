//! User-supplied decision handlers and progress observers.
//!
//! Every handler is paired with the [`Scheduler`] it runs on, so user code
//! never executes on a transport thread. A task consults its own handlers
//! first, then its client's, then a built-in default.

use crate::progress::Progress;
use crate::request::Request;
use crate::response::ResponseHead;
use crate::transport::{
    CachedResponse, Challenge, ChallengeDisposition, Decide, ResponseDisposition,
};
use alice_core::Scheduler;
use std::fmt;
use std::sync::Arc;

/// A callback bound to the scheduler it must run on.
pub struct Handler<A, R> {
    scheduler: Arc<dyn Scheduler>,
    callback: Arc<dyn Fn(A) -> R + Send + Sync>,
}

impl<A, R> Handler<A, R>
where
    A: Send + 'static,
    R: 'static,
{
    /// Bind `callback` to `scheduler`.
    pub fn new(
        scheduler: impl Scheduler + 'static,
        callback: impl Fn(A) -> R + Send + Sync + 'static,
    ) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            callback: Arc::new(callback),
        }
    }

    /// Run the callback on its scheduler and pass the answer to `decide`.
    pub(crate) fn run(&self, argument: A, decide: Decide<R>) {
        let callback = Arc::clone(&self.callback);
        self.scheduler
            .schedule(Box::new(move || decide(callback(argument))));
    }
}

impl<A: Send + 'static> Handler<A, ()> {
    /// Run the callback on its scheduler without waiting for it.
    pub(crate) fn notify(&self, argument: A) {
        let callback = Arc::clone(&self.callback);
        self.scheduler.schedule(Box::new(move || callback(argument)));
    }
}

impl<A, R> Clone for Handler<A, R> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<A, R> fmt::Debug for Handler<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// A redirect the transport is about to follow.
#[derive(Debug, Clone)]
pub struct Redirect {
    /// The redirecting response
    pub response: ResponseHead,
    /// The request the transport proposes to send next
    pub proposed: Request,
    /// Redirects already followed by this task, not counting this one
    pub count: u32,
}

/// Decides whether to follow a redirect; `None` stops at the redirect
/// response.
pub type RedirectHandler = Handler<Redirect, Option<Request>>;
/// Answers authentication challenges.
pub type ChallengeHandler = Handler<Challenge, ChallengeDisposition>;
/// Decides what happens once the response head arrives.
pub type ResponseHandler = Handler<ResponseHead, ResponseDisposition>;
/// Vets a response before the transport caches it; `None` skips caching.
pub type CacheHandler = Handler<CachedResponse, Option<CachedResponse>>;
/// Observes upload or download progress.
pub type ProgressObserver = Handler<Progress, ()>;

/// The decision handlers of a task or a client.
#[derive(Debug, Clone, Default)]
pub struct Handlers {
    pub(crate) redirect: Option<RedirectHandler>,
    pub(crate) challenge: Option<ChallengeHandler>,
    pub(crate) response: Option<ResponseHandler>,
    pub(crate) cache: Option<CacheHandler>,
}

impl Handlers {
    /// Fill every unset handler from `fallback`.
    #[must_use]
    pub(crate) fn or(&self, fallback: &Self) -> Self {
        Self {
            redirect: self.redirect.clone().or_else(|| fallback.redirect.clone()),
            challenge: self.challenge.clone().or_else(|| fallback.challenge.clone()),
            response: self.response.clone().or_else(|| fallback.response.clone()),
            cache: self.cache.clone().or_else(|| fallback.cache.clone()),
        }
    }
}
