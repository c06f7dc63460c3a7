//! Client configuration.
//!
//! # Default Values
//!
//! - `name`: `"alice"`
//! - `request_timeout`: none (the transport's own default applies)
//! - `follow_redirects`: `true`
//! - `max_redirects`: 10
//! - `download_dir`: none (downloads stay next to where the transport wrote
//!   them)
//! - `default_headers`: empty

use http::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by every task of a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Label for log events and the client's worker thread
    pub name: String,
    /// Timeout for requests that carry none of their own
    pub request_timeout: Option<Duration>,
    /// Whether redirects are followed when no handler decides
    pub follow_redirects: bool,
    /// Upper bound on followed redirects per task
    pub max_redirects: u32,
    /// Where downloads without an explicit destination are moved
    pub download_dir: Option<PathBuf>,
    /// Headers added to every request that does not already carry them
    pub default_headers: HeaderMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "alice".to_string(),
            request_timeout: None,
            follow_redirects: true,
            max_redirects: 10,
            download_dir: None,
            default_headers: HeaderMap::new(),
        }
    }
}

impl ClientConfig {
    /// Set the client label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the default request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Enable or disable following redirects by default.
    #[must_use]
    pub const fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Set the redirect limit.
    #[must_use]
    pub const fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    /// Set the directory downloads are moved into.
    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Add a default header.
    #[must_use]
    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Whether a redirect should be followed, given how many were followed
    /// already.
    #[must_use]
    pub const fn allows_redirect(&self, followed: u32) -> bool {
        self.follow_redirects && followed < self.max_redirects
    }

    /// Add every default header `headers` lacks.
    pub fn apply_default_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.default_headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
}
