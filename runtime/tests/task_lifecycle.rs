//! Integration tests for the task state machine driven by transport events:
//! cancellation, late callbacks, downloads, progress, decision handlers and
//! client shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use alice_core::{Inline, Lock};
use alice_runtime::{
    Challenge, ChallengeDisposition, ChallengeHandler, ClientConfig, Credential,
    DelayedRequestDisposition, Handler, HttpError, Progress, Redirect, RedirectHandler, Request, ResponseBody, ResponseDisposition,
    ResponseHandler, ResponseHead, TaskKind, TaskState, TransportError,
};
use alice_testing::{MockTransport, test_metrics};
use http::header::{CONTENT_LENGTH, LOCATION};
use http::{HeaderValue, StatusCode, Uri};
use std::fs;
use std::sync::Arc;

fn head(url: &str, status: StatusCode) -> ResponseHead {
    ResponseHead::new(url.parse::<Uri>().unwrap(), status)
}

fn challenge() -> Challenge {
    Challenge {
        host: "example.com".into(),
        scheme: "Basic".into(),
        realm: Some("api".into()),
        previous_failure_count: 0,
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_states_follow_transport_events() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.prepare(Request::get("https://example.com/a").unwrap(), TaskKind::Data);
    assert_eq!(task.state(), TaskState::Initialized);
    assert!(!task.is_started());

    task.start();
    let handle = transport.last_handle().unwrap();
    assert_eq!(task.state(), TaskState::Loading);
    assert_eq!(task.handle(), Some(handle));
    assert_eq!(transport.resumed(), vec![handle]);
    assert_eq!(client.tasks().len(), 1);

    let disposition = transport.receive_response(handle, head("https://example.com/a", StatusCode::OK));
    assert_eq!(disposition.wait(), Some(ResponseDisposition::Allow));
    transport.receive_data(handle, b"hel");
    transport.receive_data(handle, b"lo");
    assert!(task.response().is_pending());

    transport.collect_metrics(handle, test_metrics(120));
    transport.complete(handle, None);

    let response = task.response().wait().unwrap();
    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(response.text().unwrap(), "hello");
    assert_eq!(response.metrics.duration(), std::time::Duration::from_millis(120));
    assert!(client.tasks().is_empty());
}

#[test]
fn test_suspend_and_resume_reach_transport() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();
    let handle = task.handle().unwrap();

    task.suspend();
    task.resume();

    assert_eq!(transport.suspended(), vec![handle]);
    assert_eq!(transport.resumed(), vec![handle, handle]);
}

#[test]
fn test_dispatch_failure_fails_task() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    transport.fail_next_dispatch(HttpError::Session(TransportError::Connect("refused".into())));

    let task = client.get("https://example.com").unwrap();

    assert!(matches!(
        task.response().wait_error(),
        Some(HttpError::Session(TransportError::Connect(_)))
    ));
    assert_eq!(task.state(), TaskState::Finished);
    assert!(client.tasks().is_empty());
}

#[test]
fn test_transport_error_fails_task() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();

    transport.fail(task.handle().unwrap(), TransportError::TimedOut);

    assert!(matches!(
        task.response().wait_error(),
        Some(HttpError::Session(TransportError::TimedOut))
    ));
}

#[test]
fn test_completion_without_response_is_invariant_violation() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();

    transport.complete(task.handle().unwrap(), None);

    assert!(task.response().wait_error().unwrap().is_invariant_violation());
}

#[test]
fn test_upload_without_body_fails_before_dispatch() {
    let (client, transport) = MockTransport::client(ClientConfig::default());

    let task = client.upload(Request::get("https://example.com/upload").unwrap());

    assert!(matches!(task.response().wait_error(), Some(HttpError::MissingUploadBody)));
    assert_eq!(transport.dispatch_count(), 0);
}

#[test]
fn test_upload_body_stream_can_be_reopened() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.upload(Request::post("https://example.com/upload", "payload").unwrap());
    let handle = task.handle().unwrap();

    assert_eq!(transport.dispatched()[0].kind, TaskKind::Upload);
    assert_eq!(transport.body_stream(handle).as_deref(), Some(&b"payload"[..]));
    assert_eq!(transport.body_stream(handle).as_deref(), Some(&b"payload"[..]));
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_before_start_fails_immediately() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.prepare(Request::get("https://example.com").unwrap(), TaskKind::Data);

    task.cancel();
    task.start();

    assert!(matches!(task.response().failure(), Some(HttpError::Cancelled)));
    assert!(task.is_cancelled());
    assert_eq!(task.state(), TaskState::Finished);
    assert_eq!(transport.dispatch_count(), 0);
}

#[test]
fn test_cancel_in_flight_waits_for_transport() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();
    let handle = task.handle().unwrap();

    task.cancel();

    assert_eq!(transport.cancelled(), vec![handle]);
    assert_eq!(task.state(), TaskState::Finished);
    assert!(task.response().is_pending());

    // A transport that still delivers a success after cancel does not win.
    let disposition = transport.receive_response(handle, head("https://example.com", StatusCode::OK));
    assert_eq!(disposition.wait(), Some(ResponseDisposition::Cancel));
    transport.receive_data(handle, b"late");
    transport.complete(handle, None);

    assert!(matches!(task.response().failure(), Some(HttpError::Cancelled)));
    assert!(client.tasks().is_empty());
}

#[test]
fn test_cancel_keeps_transport_cancellation_error() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();
    let handle = task.handle().unwrap();

    task.cancel();
    transport.fail(handle, TransportError::Cancelled { resume_data: None });

    assert!(task.response().failure().unwrap().is_cancelled());
}

#[test]
fn test_cancel_after_completion_is_a_no_op() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();
    transport.respond(task.handle().unwrap(), StatusCode::OK, b"done");

    task.cancel();

    assert!(!task.is_cancelled());
    assert!(task.response().success().is_some());
    assert!(transport.cancelled().is_empty());
}

#[test]
fn test_cancel_producing_resume_data() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    transport.set_resume_data(vec![7, 7, 7]);
    let task = client.download(Request::get("https://example.com/big.iso").unwrap(), None);
    let handle = task.handle().unwrap();

    let token = task.cancel_producing_resume_data().wait().unwrap();
    transport.fail(handle, TransportError::Cancelled {
        resume_data: token.clone(),
    });

    assert_eq!(token, Some(vec![7, 7, 7]));
    let error = task.response().wait_error().unwrap();
    assert_eq!(error.resume_data(), Some(&[7, 7, 7][..]));

    let retry = client.download(
        Request::get("https://example.com/big.iso")
            .unwrap()
            .with_resume_data(token.unwrap()),
        None,
    );
    assert!(retry.handle().is_some());
    assert_eq!(transport.dispatched()[1].request.resume_data, Some(vec![7, 7, 7]));
}

// ============================================================================
// Late and misrouted callbacks
// ============================================================================

#[test]
fn test_callbacks_after_finish_are_ignored() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();
    let handle = task.handle().unwrap();
    transport.respond(handle, StatusCode::OK, b"first");

    transport.receive_data(handle, b"second");
    transport.complete(handle, Some(TransportError::TimedOut));
    let redirect = transport.redirect(
        handle,
        head("https://example.com", StatusCode::FOUND),
        Request::get("https://example.com/elsewhere").unwrap(),
    );

    assert_eq!(redirect.wait(), Some(None));
    assert_eq!(task.response().wait().unwrap().text().unwrap(), "first");
}

#[test]
fn test_delayed_start_continues_only_while_live() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let live = client.get("https://example.com/live").unwrap();
    let cancelled = client.get("https://example.com/cancelled").unwrap();
    cancelled.cancel();

    assert!(matches!(
        transport.begin_delayed(live.handle().unwrap()).wait(),
        Some(DelayedRequestDisposition::ContinueLoading)
    ));
    assert!(matches!(
        transport.begin_delayed(cancelled.handle().unwrap()).wait(),
        Some(DelayedRequestDisposition::Cancel)
    ));
}

#[test]
fn test_unknown_handle_is_dropped() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();

    let stranger = alice_runtime::TransportHandle::new(999);
    transport.receive_data(stranger, b"noise");
    transport.complete(stranger, None);

    assert!(task.response().is_pending());
    let challenge = transport.challenge(stranger, challenge());
    assert_eq!(
        challenge.wait(),
        Some(ChallengeDisposition::CancelAuthenticationChallenge)
    );
}

// ============================================================================
// Downloads
// ============================================================================

#[test]
fn test_download_moved_to_destination() {
    let dir = tempfile::tempdir().unwrap();
    let staged = dir.path().join("staged.tmp");
    let destination = dir.path().join("saved/report.pdf");
    fs::write(&staged, b"%PDF").unwrap();

    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.download(
        Request::get("https://example.com/report.pdf").unwrap(),
        Some(destination.clone()),
    );
    let handle = task.handle().unwrap();
    assert_eq!(transport.dispatched()[0].kind, TaskKind::Download);

    let _ = transport.receive_response(handle, head("https://example.com/report.pdf", StatusCode::OK));
    transport.write_data(handle, 4, 4);
    transport.finish_download(handle, &staged);
    transport.complete(handle, None);

    let response = task.response().wait().unwrap();
    assert_eq!(response.body, ResponseBody::File(destination.clone()));
    assert!(!staged.exists());
    assert_eq!(response.read_bytes().unwrap(), b"%PDF");
    assert_eq!(task.download_progress(), Progress::new(4, 4));
}

#[test]
fn test_download_uses_download_dir_and_suggested_name() {
    let dir = tempfile::tempdir().unwrap();
    let staged = dir.path().join("staged.tmp");
    fs::write(&staged, b"bytes").unwrap();
    let downloads = dir.path().join("downloads");

    let (client, transport) =
        MockTransport::client(ClientConfig::default().with_download_dir(&downloads));
    let task = client.download(Request::get("https://example.com/files/data.csv").unwrap(), None);
    let handle = task.handle().unwrap();

    let _ = transport.receive_response(handle, head("https://example.com/files/data.csv", StatusCode::OK));
    transport.finish_download(handle, &staged);
    transport.complete(handle, None);

    let response = task.response().wait().unwrap();
    assert_eq!(response.body, ResponseBody::File(downloads.join("data.csv")));
}

#[test]
fn test_failed_persist_fails_task() {
    let dir = tempfile::tempdir().unwrap();
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.download(
        Request::get("https://example.com/report.pdf").unwrap(),
        Some(dir.path().join("out.pdf")),
    );
    let handle = task.handle().unwrap();

    let _ = transport.receive_response(handle, head("https://example.com/report.pdf", StatusCode::OK));
    transport.finish_download(handle, &dir.path().join("missing.tmp"));
    transport.complete(handle, None);

    assert!(matches!(task.response().wait_error(), Some(HttpError::Io(_))));
}

#[test]
fn test_cancelled_download_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let staged = dir.path().join("staged.tmp");
    let destination = dir.path().join("report.pdf");
    fs::write(&staged, b"%PDF").unwrap();

    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.download(
        Request::get("https://example.com/report.pdf").unwrap(),
        Some(destination.clone()),
    );
    let handle = task.handle().unwrap();

    task.cancel();
    transport.finish_download(handle, &staged);
    transport.complete(handle, None);

    assert!(matches!(task.response().failure(), Some(HttpError::Cancelled)));
    assert!(staged.exists());
    assert!(!destination.exists());
}

#[test]
fn test_data_task_becomes_download() {
    let dir = tempfile::tempdir().unwrap();
    let staged = dir.path().join("staged.tmp");
    fs::write(&staged, b"0123456789").unwrap();

    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com/video.mp4").unwrap();
    task.set_destination(dir.path().join("video.mp4"));
    let data = task.handle().unwrap();

    let _ = transport.receive_response(
        data,
        head("https://example.com/video.mp4", StatusCode::OK)
            .with_header(CONTENT_LENGTH, HeaderValue::from_static("10")),
    );
    transport.receive_data(data, b"0123");
    let download = transport.become_download(data);

    assert_eq!(task.kind(), TaskKind::Download);
    assert_eq!(task.handle(), Some(download));
    assert_eq!(task.download_progress(), Progress::new(10, 4));
    assert_eq!(client.tasks().len(), 1);

    // The old handle no longer routes anywhere.
    transport.complete(data, Some(TransportError::TimedOut));
    assert!(task.response().is_pending());

    transport.write_data(download, 10, 10);
    transport.finish_download(download, &staged);
    transport.complete(download, None);

    let response = task.response().wait().unwrap();
    assert_eq!(response.body, ResponseBody::File(dir.path().join("video.mp4")));
    assert_eq!(response.read_bytes().unwrap(), b"0123456789");
    assert!(client.tasks().is_empty());
}

// ============================================================================
// Progress
// ============================================================================

#[test]
fn test_progress_observers_see_updates() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let uploads = Arc::new(Lock::new(Vec::new()));
    let downloads = Arc::new(Lock::new(Vec::new()));

    let task = client.prepare(
        Request::post("https://example.com/echo", "0123456789").unwrap(),
        TaskKind::Upload,
    );
    let sink = Arc::clone(&uploads);
    task.on_upload_progress(Inline, move |p| sink.with_lock(|u| u.push(p)));
    let sink = Arc::clone(&downloads);
    task.on_download_progress(Inline, move |p| sink.with_lock(|d| d.push(p)));
    task.start();
    let handle = task.handle().unwrap();

    transport.send_body_data(handle, 5, 10);
    transport.send_body_data(handle, 10, 10);
    let _ = transport.receive_response(
        handle,
        head("https://example.com/echo", StatusCode::OK)
            .with_header(CONTENT_LENGTH, HeaderValue::from_static("4")),
    );
    transport.receive_data(handle, b"ec");
    transport.receive_data(handle, b"ho");
    transport.complete(handle, None);

    assert_eq!(
        uploads.with_lock(|u| u.clone()),
        vec![Progress::new(10, 5), Progress::new(10, 10)]
    );
    assert_eq!(
        downloads.with_lock(|d| d.clone()),
        vec![Progress::new(4, 2), Progress::new(4, 4)]
    );
    assert!((task.upload_progress().fraction_completed() - 1.0).abs() < f64::EPSILON);
    assert_eq!(task.response().wait().unwrap().metrics.bytes_sent, 10);
}

// ============================================================================
// Decision handlers
// ============================================================================

#[test]
fn test_redirect_default_policy() {
    let (client, transport) = MockTransport::client(ClientConfig::default().with_max_redirects(1));
    let task = client.get("https://example.com/old").unwrap();
    let handle = task.handle().unwrap();
    let moved = head("https://example.com/old", StatusCode::MOVED_PERMANENTLY)
        .with_header(LOCATION, HeaderValue::from_static("/new"));
    let proposed = Request::get("https://example.com/new").unwrap();

    let first = transport.redirect(handle, moved.clone(), proposed.clone());
    let second = transport.redirect(handle, moved, proposed);

    assert_eq!(first.wait().unwrap().unwrap().path(), "/new");
    assert!(second.wait().unwrap().is_none());

    transport.respond(handle, StatusCode::OK, b"");
    assert_eq!(task.response().wait().unwrap().metrics.redirect_count, 1);
}

#[test]
fn test_redirects_disabled_by_config() {
    let (client, transport) =
        MockTransport::client(ClientConfig::default().with_follow_redirects(false));
    let task = client.get("https://example.com/old").unwrap();

    let next = transport.redirect(
        task.handle().unwrap(),
        head("https://example.com/old", StatusCode::FOUND),
        Request::get("https://example.com/new").unwrap(),
    );

    assert_eq!(next.wait(), Some(None));
}

#[test]
fn test_task_redirect_handler_rewrites_request() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.prepare(Request::get("https://example.com/old").unwrap(), TaskKind::Data);
    let handler: RedirectHandler = Handler::new(Inline, |redirect: Redirect| {
        Some(redirect.proposed.with_header(
            http::header::REFERER,
            HeaderValue::from_str(&redirect.response.url.to_string()).ok()?,
        ))
    });
    task.on_redirect(handler).start();

    let next = transport
        .redirect(
            task.handle().unwrap(),
            head("https://example.com/old", StatusCode::FOUND),
            Request::get("https://example.com/new").unwrap(),
        )
        .wait()
        .unwrap()
        .unwrap();

    assert_eq!(next.headers.get(http::header::REFERER).unwrap(), "https://example.com/old");
}

#[test]
fn test_challenge_handlers_task_over_client_over_default() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let plain = client.get("https://example.com/a").unwrap();
    assert_eq!(
        transport.challenge(plain.handle().unwrap(), challenge()).wait(),
        Some(ChallengeDisposition::PerformDefaultHandling)
    );

    let credential = Credential {
        user: "alice".into(),
        password: "secret".into(),
    };
    let answer = credential.clone();
    let client_handler: ChallengeHandler = Handler::new(Inline, move |_: Challenge| {
        ChallengeDisposition::UseCredential(answer.clone())
    });
    client.on_challenge(client_handler);

    let inherits = client.get("https://example.com/b").unwrap();
    assert_eq!(
        transport.challenge(inherits.handle().unwrap(), challenge()).wait(),
        Some(ChallengeDisposition::UseCredential(credential))
    );

    let own = client.prepare(Request::get("https://example.com/c").unwrap(), TaskKind::Data);
    own.on_challenge(Handler::new(Inline, |_: Challenge| {
        ChallengeDisposition::RejectProtectionSpace
    }))
    .start();
    assert_eq!(
        transport.challenge(own.handle().unwrap(), challenge()).wait(),
        Some(ChallengeDisposition::RejectProtectionSpace)
    );
}

#[test]
fn test_response_handler_decides_disposition() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let handler: ResponseHandler = Handler::new(Inline, |head: ResponseHead| {
        if head.status.is_success() {
            ResponseDisposition::Allow
        } else {
            ResponseDisposition::Cancel
        }
    });
    client.on_response(handler);
    let task = client.get("https://example.com").unwrap();

    let answer = transport.receive_response(
        task.handle().unwrap(),
        head("https://example.com", StatusCode::SERVICE_UNAVAILABLE),
    );

    assert_eq!(answer.wait(), Some(ResponseDisposition::Cancel));
}

#[test]
fn test_cache_handler_can_veto() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();
    let proposed = alice_runtime::CachedResponse {
        head: head("https://example.com", StatusCode::OK),
        data: b"cached".to_vec(),
    };

    let default = transport.will_cache(task.handle().unwrap(), proposed.clone());
    assert_eq!(default.wait().unwrap().unwrap().data, b"cached");

    task.on_will_cache(Handler::new(Inline, |_| None));
    let vetoed = transport.will_cache(task.handle().unwrap(), proposed);
    assert!(vetoed.wait().unwrap().is_none());
}

// ============================================================================
// Client
// ============================================================================

#[test]
fn test_all_tasks_lists_in_flight_tasks() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let a = client.get("https://example.com/a").unwrap();
    let b = client.get("https://example.com/b").unwrap();

    let mut ids: Vec<_> = client.all_tasks(Inline).wait().unwrap().iter().map(|t| t.id()).collect();
    ids.sort();
    assert_eq!(ids, {
        let mut expected = vec![a.id(), b.id()];
        expected.sort();
        expected
    });

    transport.respond(a.handle().unwrap(), StatusCode::OK, b"");
    let remaining = client.all_tasks(Inline).wait().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id(), b.id());
}

#[test]
fn test_invalidated_transport_fails_every_task() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let a = client.get("https://example.com/a").unwrap();
    let b = client.get("https://example.com/b").unwrap();

    transport.invalidate(Some(TransportError::Connect("session torn down".into())));

    for task in [&a, &b] {
        assert!(matches!(
            task.response().failure(),
            Some(HttpError::Session(TransportError::Connect(_)))
        ));
        assert_eq!(task.state(), TaskState::Finished);
    }
    assert!(client.tasks().is_empty());
    assert!(transport.cancelled().is_empty());

    let late = client.get("https://example.com/late").unwrap();
    assert!(matches!(late.response().failure(), Some(HttpError::Cancelled)));
    assert_eq!(transport.cancelled(), vec![transport.last_handle().unwrap()]);
}

#[test]
fn test_dropping_client_cancels_outstanding_tasks() {
    let (client, transport) = MockTransport::client(ClientConfig::default());
    let task = client.get("https://example.com").unwrap();
    let handle = task.handle().unwrap();
    let clone = client.clone();

    drop(client);
    assert!(task.response().is_pending());

    drop(clone);
    assert!(matches!(task.response().failure(), Some(HttpError::Cancelled)));
    assert_eq!(transport.cancelled(), vec![handle]);

    // Events for the abandoned transfer go nowhere.
    transport.complete(handle, None);
    assert!(matches!(task.response().failure(), Some(HttpError::Cancelled)));
}
