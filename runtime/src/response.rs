//! Incoming response values and transfer metrics.

use crate::error::HttpError;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Status line and headers of a response, as reported by the transport
/// before the body arrives.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Final URL, after any redirects
    pub url: Uri,
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Create a head without headers.
    #[must_use]
    pub fn new(url: Uri, status: StatusCode) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
        }
    }

    /// Set a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Length announced by `Content-Length`, if present and numeric.
    #[must_use]
    pub fn expected_content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Media type from `Content-Type`, without parameters.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// File name suggested by `Content-Disposition`, falling back to the last
    /// URL path segment.
    #[must_use]
    pub fn suggested_filename(&self) -> Option<String> {
        let from_disposition = self
            .headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(';')
                    .map(str::trim)
                    .find_map(|part| part.strip_prefix("filename="))
                    .map(|name| name.trim_matches('"').to_string())
            });

        from_disposition.or_else(|| {
            self.url
                .path()
                .rsplit('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        })
    }
}

/// Payload of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseBody {
    /// No payload was received
    #[default]
    None,
    /// Payload collected in memory by a data or upload task
    Data(Vec<u8>),
    /// Payload persisted to disk by a download task
    File(PathBuf),
}

/// Timing and volume of one task's transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskMetrics {
    /// When the transport handle was obtained
    pub started_at: DateTime<Utc>,
    /// When the transport reported completion
    pub finished_at: DateTime<Utc>,
    /// Redirects followed on the way to the final response
    pub redirect_count: u32,
    /// Body bytes sent
    pub bytes_sent: u64,
    /// Body bytes received
    pub bytes_received: u64,
}

impl TaskMetrics {
    /// Wall-clock time between start and finish.
    #[must_use]
    pub fn duration(&self) -> std::time::Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// A complete response, as delivered through a task's future.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status line and headers
    pub head: ResponseHead,
    /// Payload
    pub body: ResponseBody,
    /// Transfer metrics
    pub metrics: TaskMetrics,
}

impl Response {
    /// Assemble a response.
    #[must_use]
    pub const fn new(head: ResponseHead, body: ResponseBody, metrics: TaskMetrics) -> Self {
        Self {
            head,
            body,
            metrics,
        }
    }

    /// Response status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Mutable response headers, for middleware post-processing.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    /// Final URL.
    #[must_use]
    pub const fn url(&self) -> &Uri {
        &self.head.url
    }

    /// In-memory payload, if any.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Payload as owned bytes, reading it from disk for downloads.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::BadResponse`] when there is no payload and
    /// [`HttpError::Io`] when a downloaded file cannot be read.
    pub fn read_bytes(&self) -> Result<Vec<u8>, HttpError> {
        match &self.body {
            ResponseBody::Data(bytes) => Ok(bytes.clone()),
            ResponseBody::File(path) => Ok(std::fs::read(path)?),
            ResponseBody::None => Err(HttpError::BadResponse("response has no body".into())),
        }
    }

    /// Payload decoded as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::BadResponse`] if the payload is missing or not
    /// UTF-8.
    pub fn text(&self) -> Result<String, HttpError> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| HttpError::BadResponse(format!("body is not UTF-8: {e}")))
    }

    /// Payload decoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::BadResponse`] if the payload is missing and
    /// [`HttpError::Json`] if it does not decode into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.read_bytes()?)?)
    }
}
