//! The boundary to the component that performs network I/O.
//!
//! The runtime never opens a socket. It asks a [`Transport`] to create a
//! transfer for a request and learns about its progress through the
//! [`SessionDelegate`](crate::SessionDelegate) handed to the transport when
//! the client is built. Every callback is keyed by the [`TransportHandle`]
//! returned from [`Transport::dispatch`].
//!
//! A transport must deliver, per handle, any number of intermediate events
//! followed by exactly one
//! [`did_complete`](crate::SessionDelegate::did_complete).
//! Decision callbacks (redirects, challenges, response dispositions) are
//! answered through a [`Decide`] continuation that may be invoked from any
//! thread.

use crate::error::HttpError;
use crate::request::Request;
use crate::response::ResponseHead;
use alice_core::Future;
use std::convert::Infallible;
use std::fmt;

/// Opaque identifier the transport assigns to one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u64);

impl TransportHandle {
    /// Wrap a transport-specific identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the transport should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Collect the response body in memory
    Data,
    /// Send the request body, collect the response in memory
    Upload,
    /// Write the response body to a file
    Download,
}

/// Continuation a decision callback is answered through.
pub type Decide<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Credentials offered in answer to an authentication challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// User name
    pub user: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authentication challenge raised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Host that issued the challenge
    pub host: String,
    /// Authentication scheme, e.g. `Basic`
    pub scheme: String,
    /// Protection realm, if the server named one
    pub realm: Option<String>,
    /// How many times credentials were already rejected for this space
    pub previous_failure_count: u32,
}

/// Answer to a [`Challenge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeDisposition {
    /// Retry with these credentials
    UseCredential(Credential),
    /// Let the transport handle the challenge as if nobody intervened
    PerformDefaultHandling,
    /// Cancel the transfer
    CancelAuthenticationChallenge,
    /// Skip this protection space and try the next one
    RejectProtectionSpace,
}

/// Answer to a received response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    /// Continue loading the body
    Allow,
    /// Cancel the transfer
    Cancel,
    /// Continue, writing the body to a file instead of memory
    BecomeDownload,
}

/// Answer to a transfer whose start the transport postponed.
#[derive(Debug, Clone)]
pub enum DelayedRequestDisposition {
    /// Start with the original request
    ContinueLoading,
    /// Start with this request instead
    UseNewRequest(Request),
    /// Cancel the transfer
    Cancel,
}

/// A response the transport proposes to store in its cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Status line and headers
    pub head: ResponseHead,
    /// Response body
    pub data: Vec<u8>,
}

/// Network I/O capability injected into a [`Client`](crate::Client).
pub trait Transport: Send + Sync {
    /// Create a suspended transfer for `request`.
    ///
    /// No callback for the returned handle may be delivered before
    /// [`Transport::resume`] is called for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot represent the request.
    fn dispatch(&self, request: &Request, kind: TaskKind) -> Result<TransportHandle, HttpError>;

    /// Start or continue a transfer.
    fn resume(&self, handle: TransportHandle);

    /// Pause a transfer.
    fn suspend(&self, handle: TransportHandle);

    /// Abort a transfer. The transport still reports completion, normally
    /// with [`TransportError::Cancelled`](crate::TransportError::Cancelled).
    fn cancel(&self, handle: TransportHandle);

    /// Abort a download, producing a token a later request can resume from.
    ///
    /// Transports without resume support just cancel.
    fn cancel_producing_resume_data(
        &self,
        handle: TransportHandle,
    ) -> Future<Option<Vec<u8>>, Infallible> {
        self.cancel(handle);
        Future::succeeded(None)
    }
}
