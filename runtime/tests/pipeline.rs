//! Integration tests for the request pipeline: client and task middleware,
//! conditional middleware, and whole requests served in memory.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use alice_core::{Lock, SerialScheduler};
use alice_runtime::middleware::middleware_fn;
use alice_runtime::{
    ClientConfig, HttpError, Middleware, Request, RequestMatcher, Responder, ResponseFuture,
    SharedMiddleware, SharedResponder, TaskKind, TaskState,
};
use alice_testing::{MockTransport, StubResponder, init_tracing};
use http::header::{AUTHORIZATION, HeaderName, USER_AGENT};
use http::{HeaderValue, StatusCode};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Test Fixtures
// ============================================================================

const TIME_SPENT: HeaderName = HeaderName::from_static("time-spent");

/// Measures how long the rest of the chain took and reports it as a
/// response header.
struct TimeSpent;

impl Middleware for TimeSpent {
    fn respond(&self, request: Request, next: SharedResponder) -> Result<ResponseFuture, HttpError> {
        let started = Instant::now();
        let future = next.respond(request)?;
        Ok(future.map(move |mut response| {
            let micros = started.elapsed().as_micros().to_string();
            if let Ok(value) = HeaderValue::from_str(&micros) {
                response.headers_mut().insert(TIME_SPENT, value);
            }
            response
        }))
    }
}

fn bearer() -> SharedMiddleware {
    middleware_fn(|request: Request, next: SharedResponder| {
        next.respond(request.with_header(AUTHORIZATION, HeaderValue::from_static("Bearer secret")))
    })
}

/// Appends `label` to a shared journal on the way in and out.
fn tracer(label: &'static str, journal: &Arc<Lock<Vec<String>>>) -> SharedMiddleware {
    let journal = Arc::clone(journal);
    middleware_fn(move |request: Request, next: SharedResponder| {
        journal.with_lock(|j| j.push(format!("{label} in")));
        let journal = Arc::clone(&journal);
        Ok(next.respond(request)?.map(move |response| {
            journal.with_lock(|j| j.push(format!("{label} out")));
            response
        }))
    })
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn test_logging_and_conditional_auth_end_to_end() {
    init_tracing();
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let stub = StubResponder::json(StatusCode::OK, &serde_json::json!({ "id": 2 })).unwrap();
    transport.serve_with(stub.clone());

    client.use_middleware(Arc::new(TimeSpent));
    client.use_when(bearer(), RequestMatcher::path("users").unwrap());

    let task = client.get("https://reqres.in/api/users/2").unwrap();
    let response = task.response().wait().expect("task should succeed");

    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes(), Some(&br#"{"id":2}"#[..]));
    assert!(response.headers().contains_key(TIME_SPENT));
    assert_eq!(
        stub.last_request().unwrap().headers.get(AUTHORIZATION).unwrap(),
        "Bearer secret"
    );

    let task = client.get("https://reqres.in/api/unknown/2").unwrap();
    let response = task.response().wait().expect("task should succeed");

    assert!(response.headers().contains_key(TIME_SPENT));
    assert!(stub.last_request().unwrap().headers.get(AUTHORIZATION).is_none());
    assert_eq!(stub.call_count(), 2);
}

#[test]
fn test_served_on_worker_thread() {
    let scheduler = SerialScheduler::new("pipeline-test").unwrap();
    let (client, transport) = MockTransport::client_with_scheduler(ClientConfig::default(), scheduler);
    transport.serve_with(StubResponder::new(StatusCode::ACCEPTED, "queued"));

    let task = client.get("https://example.com/jobs").unwrap();
    let result = task
        .response()
        .wait_timeout(Duration::from_secs(5))
        .cloned()
        .expect("task should complete");

    assert_eq!(result.unwrap().text().unwrap(), "queued");
}

// ============================================================================
// Middleware ordering
// ============================================================================

#[test]
fn test_client_middleware_wraps_task_middleware() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    transport.serve_with(StubResponder::new(StatusCode::OK, "ok"));
    let journal = Arc::new(Lock::new(Vec::new()));

    client.use_middleware(tracer("client", &journal));
    let task = client.prepare(Request::get("https://example.com").unwrap(), TaskKind::Data);
    task.use_middleware(tracer("task", &journal));
    task.start();

    assert!(task.response().wait().is_some());
    assert_eq!(
        journal.with_lock(|j| j.clone()),
        vec!["client in", "task in", "task out", "client out"]
    );
}

#[test]
fn test_middleware_added_after_start_does_not_run() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let journal = Arc::new(Lock::new(Vec::new()));

    let task = client.get("https://example.com").unwrap();
    client.use_middleware(tracer("late", &journal));
    task.use_middleware(tracer("late task", &journal));
    transport.respond(transport.last_handle().unwrap(), StatusCode::OK, b"");

    assert!(task.response().wait().is_some());
    assert!(journal.with_lock(|j| j.is_empty()));
}

#[test]
fn test_removed_middleware_is_skipped() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    transport.serve_with(StubResponder::new(StatusCode::OK, "ok"));
    let journal = Arc::new(Lock::new(Vec::new()));

    let token = client.use_middleware(tracer("removed", &journal));
    assert!(client.remove_middleware(token).is_some());
    assert!(client.middlewares().is_empty());

    let task = client.get("https://example.com").unwrap();

    assert!(task.response().wait().is_some());
    assert!(journal.with_lock(|j| j.is_empty()));
}

#[test]
fn test_short_circuit_never_reaches_transport() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    client.use_when(
        middleware_fn(|_request: Request, _next: SharedResponder| {
            Err(HttpError::BadResponse("blocked".into()))
        }),
        RequestMatcher::host(r"^internal\.").unwrap(),
    );

    let blocked = client.get("https://internal.example.com/admin").unwrap();
    assert!(matches!(
        blocked.response().wait_error(),
        Some(HttpError::BadResponse(message)) if message == "blocked"
    ));
    assert_eq!(transport.dispatch_count(), 0);

    let _allowed = client.get("https://example.com/").unwrap();
    assert_eq!(transport.dispatch_count(), 1);
}

#[test]
fn test_default_headers_and_timeout_reach_transport() {
    let config = ClientConfig::default()
        .with_request_timeout(Duration::from_secs(30))
        .with_default_header(USER_AGENT, HeaderValue::from_static("alice-test"));
    let (client, transport) = MockTransport::client(config);

    let request = Request::get("https://example.com")
        .unwrap()
        .with_header(USER_AGENT, HeaderValue::from_static("custom"));
    let _custom = client.request(request);
    let _plain = client.get("https://example.com").unwrap();

    let dispatched = transport.dispatched();
    assert_eq!(dispatched[0].request.headers.get(USER_AGENT).unwrap(), "custom");
    assert_eq!(dispatched[1].request.headers.get(USER_AGENT).unwrap(), "alice-test");
    assert_eq!(dispatched[1].request.timeout, Some(Duration::from_secs(30)));
}

// ============================================================================
// Start
// ============================================================================

#[test]
fn test_concurrent_start_dispatches_once() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.prepare(Request::get("https://example.com").unwrap(), TaskKind::Data);
    let barrier = Arc::new(Barrier::new(8));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let task = task.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                task.start();
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(transport.dispatch_count(), 1);
    assert_eq!(transport.resumed().len(), 1);
    assert_eq!(task.state(), TaskState::Loading);
}

#[test]
fn test_calling_next_twice_is_invariant_violation() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    client.use_middleware(middleware_fn(|request: Request, next: SharedResponder| {
        let _first = next.respond(request.clone())?;
        next.respond(request)
    }));

    let task = client.get("https://example.com").unwrap();

    assert!(task.response().wait_error().unwrap().is_invariant_violation());
    assert_eq!(transport.dispatch_count(), 1);
    assert_eq!(transport.cancelled(), vec![transport.last_handle().unwrap()]);
    assert_eq!(task.state(), TaskState::Finished);
    assert!(!task.is_cancelled());
}

// ============================================================================
// Panicking middleware
// ============================================================================

#[test]
fn test_panicking_middleware_fails_task_and_keeps_worker_alive() {
    let scheduler = SerialScheduler::new("pipeline-panic").unwrap();
    let (client, transport) = MockTransport::client_with_scheduler(ClientConfig::default(), scheduler);
    transport.serve_with(StubResponder::new(StatusCode::OK, "healthy"));

    let token = client.use_middleware(middleware_fn(|_request: Request, _next: SharedResponder| {
        panic!("middleware bug")
    }));
    let broken = client.get("https://example.com/broken").unwrap();
    let error = broken
        .response()
        .wait_timeout(Duration::from_secs(5))
        .cloned()
        .expect("panicking task should resolve")
        .unwrap_err();
    assert!(error.is_invariant_violation());
    assert!(error.to_string().contains("middleware bug"));
    assert_eq!(transport.dispatch_count(), 0);

    assert!(client.remove_middleware(token).is_some());
    let healthy = client.get("https://example.com/healthy").unwrap();
    let response = healthy
        .response()
        .wait_timeout(Duration::from_secs(5))
        .cloned()
        .expect("follow-up task should resolve")
        .unwrap();
    assert_eq!(response.text().unwrap(), "healthy");
}

#[test]
fn test_panic_after_dispatch_cancels_transfer() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    client.use_middleware(middleware_fn(|request: Request, next: SharedResponder| {
        let _dispatched = next.respond(request)?;
        panic!("post-dispatch bug")
    }));

    let task = client.get("https://example.com").unwrap();

    assert!(task.response().wait_error().unwrap().is_invariant_violation());
    let handle = transport.last_handle().unwrap();
    assert_eq!(transport.cancelled(), vec![handle]);
    assert_eq!(task.state(), TaskState::Finished);
}
