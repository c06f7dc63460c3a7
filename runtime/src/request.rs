//! Outgoing request values.
//!
//! Requests are plain values: middleware receives one by value, may change
//! it, and passes it on. Construction validates the URL synchronously so a
//! malformed request never reaches the asynchronous pipeline.

use crate::error::HttpError;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use serde::Serialize;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::time::Duration;

/// Payload of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    /// No payload
    #[default]
    Empty,
    /// In-memory bytes
    Bytes(Vec<u8>),
    /// Contents of a file, read by the transport
    File(PathBuf),
}

impl Body {
    /// Serialize `value` as a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Json`] if serialization fails.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HttpError> {
        Ok(Self::Bytes(serde_json::to_vec(value)?))
    }

    /// Whether there is no payload.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// The in-memory bytes, if the payload lives in memory.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Open a fresh reader over the payload, for transports that stream the
    /// body and ask for it again after a redirect or an auth retry.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Io`] if a file payload cannot be opened.
    pub fn reader(&self) -> Result<Option<Box<dyn Read + Send>>, HttpError> {
        Ok(match self {
            Self::Empty => None,
            Self::Bytes(bytes) => Some(Box::new(Cursor::new(bytes.clone()))),
            Self::File(path) => Some(Box::new(File::open(path)?)),
        })
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Bytes(text.as_bytes().to_vec())
    }
}

/// An HTTP request as it travels through the middleware chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Request method
    pub method: Method,
    /// Absolute URL, always with scheme and host
    pub url: Uri,
    /// Request headers
    pub headers: HeaderMap,
    /// Request payload
    pub body: Body,
    /// Per-request timeout; the client default applies when `None`
    pub timeout: Option<Duration>,
    /// Resume token from an earlier cancelled download
    pub resume_data: Option<Vec<u8>>,
}

impl Request {
    /// Build a request for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUrl`] if `url` does not parse or lacks an
    /// `http`/`https` scheme or a host.
    pub fn new(method: Method, url: &str) -> Result<Self, HttpError> {
        let uri = url
            .parse::<Uri>()
            .map_err(|e| HttpError::InvalidUrl(format!("{url}: {e}")))?;
        Self::from_uri(method, uri)
    }

    /// Build a request for an already parsed URI.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUrl`] if the URI lacks an `http`/`https`
    /// scheme or a host.
    pub fn from_uri(method: Method, url: Uri) -> Result<Self, HttpError> {
        validate(&url)?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
            timeout: None,
            resume_data: None,
        })
    }

    /// Shorthand for a `GET` request.
    ///
    /// # Errors
    ///
    /// See [`Request::new`].
    pub fn get(url: &str) -> Result<Self, HttpError> {
        Self::new(Method::GET, url)
    }

    /// Shorthand for a `POST` request carrying `body`.
    ///
    /// # Errors
    ///
    /// See [`Request::new`].
    pub fn post(url: &str, body: impl Into<Body>) -> Result<Self, HttpError> {
        Ok(Self::new(Method::POST, url)?.with_body(body))
    }

    /// Set a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a header from strings.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidHeader`] if either part is not a valid
    /// header token.
    pub fn try_with_header(self, name: &str, value: &str) -> Result<Self, HttpError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        Ok(self.with_header(name, value))
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Replace the payload with `value` encoded as JSON and set the content
    /// type.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Json`] if serialization fails.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, HttpError> {
        self.body = Body::json(value)?;
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a resume token from an earlier cancelled download.
    #[must_use]
    pub fn with_resume_data(mut self, resume_data: Vec<u8>) -> Self {
        self.resume_data = Some(resume_data);
        self
    }

    /// Host component of the URL.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.url.host()
    }

    /// Path component of the URL.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

fn validate(url: &Uri) -> Result<(), HttpError> {
    match url.scheme_str() {
        Some("http" | "https") => {},
        other => {
            return Err(HttpError::InvalidUrl(format!(
                "unsupported scheme {other:?} in {url}"
            )));
        },
    }
    match url.host() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(HttpError::InvalidUrl(format!("missing host in {url}"))),
    }
}
