//! # Alice Runtime
//!
//! HTTP request pipeline and per-request task lifecycle built on
//! [`alice_core`] futures.
//!
//! ## Core Components
//!
//! - **Client**: shared middleware list, task registry and the injected
//!   transport
//! - **Middleware**: chain-of-responsibility wrappers around a terminal
//!   responder, optionally guarded by a request matcher
//! - **Task**: one request's state machine, from middleware chain through
//!   transport callbacks to exactly one response or failure
//! - **Transport**: the boundary to whatever performs network I/O; events
//!   come back through a [`SessionDelegate`]
//!
//! ## Example
//!
//! ```
//! use alice_core::{Future, Inline};
//! use alice_runtime::middleware::middleware_fn;
//! use alice_runtime::{Client, ClientConfig, HttpError, Request, RequestMatcher, TaskKind};
//! use alice_runtime::{Transport, TransportHandle};
//! use http::{HeaderValue, header::AUTHORIZATION};
//!
//! # struct Offline;
//! # impl Transport for Offline {
//! #     fn dispatch(&self, _: &Request, _: TaskKind) -> Result<TransportHandle, HttpError> {
//! #         Err(HttpError::BadResponse("offline".into()))
//! #     }
//! #     fn resume(&self, _: TransportHandle) {}
//! #     fn suspend(&self, _: TransportHandle) {}
//! #     fn cancel(&self, _: TransportHandle) {}
//! # }
//! let client = Client::with_scheduler(ClientConfig::default(), Inline, |_delegate| Offline);
//!
//! client.use_when(
//!     middleware_fn(|request: Request, next| {
//!         next.respond(request.with_header(AUTHORIZATION, HeaderValue::from_static("Bearer t")))
//!     }),
//!     RequestMatcher::path("users")?,
//! );
//!
//! let task = client.get("https://reqres.in/api/users?page=2")?;
//! let response: Future<_, HttpError> = task.response();
//! assert!(response.is_completed());
//! # Ok::<(), HttpError>(())
//! ```

/// The client and its shared bookkeeping
pub mod client;

/// Client configuration
pub mod config;

/// Transport callback routing
pub mod delegate;

/// Error types for requests, transports and tasks
pub mod error;

/// Decision handlers and progress observers
pub mod handlers;

/// Request predicates for conditional middleware
pub mod matcher;

/// Task lifecycle metrics
pub mod metrics;

/// Middleware chain composition
pub mod middleware;

/// Transfer progress
pub mod progress;

mod registry;

/// Outgoing requests
pub mod request;

/// Request-to-future-response capability
pub mod responder;

/// Incoming responses
pub mod response;

/// Per-request state machine
pub mod task;

/// The network I/O boundary
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use delegate::SessionDelegate;
pub use error::{HttpError, TransportError};
pub use handlers::{
    CacheHandler, ChallengeHandler, Handler, ProgressObserver, Redirect, RedirectHandler,
    ResponseHandler,
};
pub use matcher::{PathTemplate, RequestMatcher, StringMatch};
pub use middleware::{Conditional, Middleware, SharedMiddleware, compose};
pub use progress::Progress;
pub use request::{Body, Request};
pub use responder::{Responder, ResponseFuture, SharedResponder};
pub use response::{Response, ResponseBody, ResponseHead, TaskMetrics};
pub use task::{Task, TaskId, TaskState};
pub use transport::{
    CachedResponse, Challenge, ChallengeDisposition, Credential, Decide,
    DelayedRequestDisposition, ResponseDisposition, TaskKind, Transport, TransportHandle,
};
