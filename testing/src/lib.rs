//! # Alice Testing
//!
//! Testing utilities and helpers for the Alice HTTP runtime.
//!
//! This crate provides:
//! - [`MockTransport`]: an in-memory transport that records every call and
//!   lets a test script transfer events, or serve them from a responder
//! - [`StubResponder`]: a terminal responder returning a canned response
//! - Response builders and fixed timestamps for deterministic assertions
//! - [`init_tracing`] for readable test logs
//!
//! ## Example
//!
//! ```
//! use alice_runtime::{ClientConfig, ResponseHead, TaskState};
//! use alice_testing::MockTransport;
//! use http::StatusCode;
//!
//! let (client, transport) = MockTransport::client(ClientConfig::default());
//! let task = client.get("https://example.com/users/2")?;
//! let handle = transport.last_handle().expect("dispatched");
//!
//! transport.respond(handle, StatusCode::OK, br#"{"id":2}"#);
//!
//! assert_eq!(task.state(), TaskState::Finished);
//! assert_eq!(task.response().wait().expect("response").status(), StatusCode::OK);
//! # Ok::<(), alice_runtime::HttpError>(())
//! ```

/// Scripted in-memory transport
pub mod transport_mock;

/// Canned terminal responder
pub mod stub_responder;

/// Response builders and fixed values for tests.
pub mod helpers {
    use alice_runtime::{Response, ResponseBody, ResponseHead, TaskMetrics};
    use chrono::{DateTime, Utc};
    use http::header::CONTENT_TYPE;
    use http::{HeaderValue, StatusCode, Uri};
    use serde::Serialize;

    /// Fixed timestamp for deterministic metrics (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Metrics for a transfer that started at [`test_time`] and took
    /// `millis` milliseconds.
    #[must_use]
    pub fn test_metrics(millis: i64) -> TaskMetrics {
        TaskMetrics {
            started_at: test_time(),
            finished_at: test_time() + chrono::Duration::milliseconds(millis),
            ..TaskMetrics::default()
        }
    }

    /// An in-memory response for `url` with `status` and `body`.
    #[must_use]
    pub fn data_response(url: Uri, status: StatusCode, body: impl Into<Vec<u8>>) -> Response {
        Response::new(
            ResponseHead::new(url, status),
            ResponseBody::Data(body.into()),
            test_metrics(0),
        )
    }

    /// A JSON response for `url`.
    ///
    /// # Panics
    ///
    /// Panics if `value` cannot be serialized, which only happens for types
    /// with failing `Serialize` impls.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn json_response<T: Serialize + ?Sized>(url: Uri, status: StatusCode, value: &T) -> Response {
        let body = serde_json::to_vec(value).expect("test payload should serialize");
        let mut response = data_response(url, status, body);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// Install a fmt subscriber writing through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
/// Honors `RUST_LOG`, defaulting to `alice_runtime=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alice_runtime=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use helpers::{data_response, json_response, test_metrics, test_time};
pub use stub_responder::StubResponder;
pub use transport_mock::{Dispatch, MockTransport};
