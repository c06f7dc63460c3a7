//! A [`Transport`] backed by `reqwest`, driving the session delegate from
//! tasks spawned on a tokio runtime.
//!
//! `reqwest` follows no redirects on its own here: every redirect and every
//! `401` challenge is put to the delegate, so the client's handlers decide.
//! Transfers cannot be paused, so `suspend` only logs.

use alice_core::Lock;
use alice_runtime::{
    Body, Challenge, ChallengeDisposition, Credential, Decide, HttpError, Request,
    ResponseDisposition, ResponseHead, SessionDelegate, TaskKind, Transport, TransportError,
    TransportHandle,
};
use http::header::{LOCATION, WWW_AUTHENTICATE};
use http::{Method, StatusCode, Uri};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Challenges answered with credentials before the transfer gives up.
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Build the `reqwest` client the transport needs: redirects stay with the
/// delegate.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

enum Slot {
    Parked { request: Request, kind: TaskKind },
    Running(JoinHandle<()>),
}

struct Shared {
    delegate: SessionDelegate,
    http: reqwest::Client,
    runtime: Handle,
    next_handle: AtomicU64,
    transfers: Lock<HashMap<TransportHandle, Slot>>,
}

impl Shared {
    fn next_handle(&self) -> TransportHandle {
        TransportHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
    shared: Arc<Shared>,
}

impl ReqwestTransport {
    /// Create a transport reporting to `delegate`, running transfers on
    /// `runtime`.
    pub fn new(delegate: SessionDelegate, http: reqwest::Client, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                delegate,
                http,
                runtime,
                next_handle: AtomicU64::new(1),
                transfers: Lock::new(HashMap::new()),
            }),
        }
    }
}

impl Transport for ReqwestTransport {
    fn dispatch(&self, request: &Request, kind: TaskKind) -> Result<TransportHandle, HttpError> {
        let handle = self.shared.next_handle();
        if request.resume_data.is_some() {
            tracing::debug!(handle = %handle, "Resume data ignored, restarting transfer");
        }
        self.shared.transfers.with_lock(|t| {
            t.insert(handle, Slot::Parked {
                request: request.clone(),
                kind,
            })
        });
        Ok(handle)
    }

    fn resume(&self, handle: TransportHandle) {
        let shared = Arc::clone(&self.shared);
        self.shared.transfers.with_lock(|t| match t.remove(&handle) {
            Some(Slot::Parked { request, kind }) => {
                let transfer = Transfer {
                    shared,
                    handle,
                    kind,
                };
                let join = self.shared.runtime.spawn(transfer.run(request));
                t.insert(handle, Slot::Running(join));
            },
            Some(running) => {
                t.insert(handle, running);
            },
            None => tracing::trace!(handle = %handle, "Resume for unknown transfer"),
        });
    }

    fn suspend(&self, handle: TransportHandle) {
        tracing::debug!(handle = %handle, "reqwest transfers cannot be paused, ignoring suspend");
    }

    fn cancel(&self, handle: TransportHandle) {
        let Some(slot) = self.shared.transfers.with_lock(|t| t.remove(&handle)) else {
            return;
        };
        if let Slot::Running(join) = slot {
            join.abort();
        }
        self.shared
            .delegate
            .did_complete(handle, Some(TransportError::Cancelled { resume_data: None }));
    }
}

/// One running transfer. The handle changes if the transfer becomes a
/// download.
struct Transfer {
    shared: Arc<Shared>,
    handle: TransportHandle,
    kind: TaskKind,
}

impl Transfer {
    async fn run(mut self, request: Request) {
        let outcome = self.perform(request).await;
        let removed = self.shared.transfers.with_lock(|t| t.remove(&self.handle));
        // Cancelled transfers were already reported by `cancel`.
        if removed.is_some() {
            self.shared.delegate.did_complete(self.handle, outcome.err());
        }
    }

    async fn perform(&mut self, mut request: Request) -> Result<(), TransportError> {
        let mut credential = None;
        let mut auth_failures = 0;

        let (response, head) = loop {
            let response = self.send(&request, credential.as_ref()).await?;
            let head = head_of(&response, &request);

            if head.status == StatusCode::UNAUTHORIZED && auth_failures < MAX_AUTH_ATTEMPTS {
                if let Some(challenge) = challenge_of(&head, &request, auth_failures) {
                    let disposition = ask(|decide| {
                        self.shared
                            .delegate
                            .did_receive_challenge(self.handle, challenge, decide);
                    })
                    .await;
                    match disposition {
                        Some(ChallengeDisposition::UseCredential(offered)) => {
                            credential = Some(offered);
                            auth_failures += 1;
                            continue;
                        },
                        Some(ChallengeDisposition::CancelAuthenticationChallenge) | None => {
                            return Err(TransportError::Cancelled { resume_data: None });
                        },
                        Some(
                            ChallengeDisposition::PerformDefaultHandling
                            | ChallengeDisposition::RejectProtectionSpace,
                        ) => {},
                    }
                }
            }

            if head.status.is_redirection() {
                if let Some(proposed) = redirect_target(&head, &request) {
                    let next = ask(|decide| {
                        self.shared.delegate.will_perform_redirect(
                            self.handle,
                            head.clone(),
                            proposed,
                            decide,
                        );
                    })
                    .await
                    .flatten();
                    if let Some(next) = next {
                        request = next;
                        continue;
                    }
                }
            }

            break (response, head);
        };

        let disposition = ask(|decide| {
            self.shared
                .delegate
                .did_receive_response(self.handle, head, decide);
        })
        .await
        .unwrap_or(ResponseDisposition::Cancel);

        match disposition {
            ResponseDisposition::Cancel => return Err(TransportError::Cancelled { resume_data: None }),
            ResponseDisposition::BecomeDownload if self.kind != TaskKind::Download => {
                self.become_download();
            },
            ResponseDisposition::Allow | ResponseDisposition::BecomeDownload => {},
        }

        let expected = response
            .content_length()
            .map_or(-1, |len| i64::try_from(len).unwrap_or(-1));
        match self.kind {
            TaskKind::Download => self.write_to_disk(response, expected).await,
            TaskKind::Data | TaskKind::Upload => self.collect(response).await,
        }
    }

    async fn send(
        &self,
        request: &Request,
        credential: Option<&Credential>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut builder = self
            .shared
            .http
            .request(request.method.clone(), request.url.to_string())
            .headers(request.headers.clone());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(credential) = credential {
            builder = builder.basic_auth(&credential.user, Some(&credential.password));
        }

        let sent = match &request.body {
            Body::Empty => 0,
            Body::Bytes(bytes) => {
                builder = builder.body(bytes.clone());
                bytes.len()
            },
            Body::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(io_error)?;
                let len = bytes.len();
                builder = builder.body(bytes);
                len
            },
        };

        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        if self.kind == TaskKind::Upload {
            let sent = i64::try_from(sent).unwrap_or(i64::MAX);
            self.shared.delegate.did_send_body_data(self.handle, sent, sent);
        }
        Ok(response)
    }

    fn become_download(&mut self) {
        let download = self.shared.next_handle();
        let old = self.handle;
        self.shared.transfers.with_lock(|t| {
            if let Some(slot) = t.remove(&old) {
                t.insert(download, slot);
            }
        });
        self.handle = download;
        self.kind = TaskKind::Download;
        self.shared.delegate.did_become_download(old, download);
    }

    async fn collect(&self, mut response: reqwest::Response) -> Result<(), TransportError> {
        while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(&e))? {
            self.shared.delegate.did_receive_data(self.handle, &chunk);
        }
        Ok(())
    }

    async fn write_to_disk(
        &self,
        mut response: reqwest::Response,
        expected: i64,
    ) -> Result<(), TransportError> {
        let path = std::env::temp_dir().join(format!("ping-{}.download", self.handle.get()));
        let mut file = tokio::fs::File::create(&path).await.map_err(io_error)?;
        let mut written: i64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(&e))? {
            file.write_all(&chunk).await.map_err(io_error)?;
            written = written.saturating_add(i64::try_from(chunk.len()).unwrap_or(i64::MAX));
            self.shared
                .delegate
                .did_write_data(self.handle, written, expected);
        }
        file.flush().await.map_err(io_error)?;
        drop(file);

        self.shared.delegate.did_finish_downloading(self.handle, &path);
        // Normally gone: the task moves the file before the callback returns.
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(())
    }
}

/// Hand a decision callback to the delegate and wait for the answer.
async fn ask<T: Send + 'static>(deliver: impl FnOnce(Decide<T>)) -> Option<T> {
    let (sender, receiver) = oneshot::channel();
    deliver(Box::new(move |answer| {
        let _ = sender.send(answer);
    }));
    receiver.await.ok()
}

fn head_of(response: &reqwest::Response, request: &Request) -> ResponseHead {
    let url = response
        .url()
        .as_str()
        .parse::<Uri>()
        .unwrap_or_else(|_| request.url.clone());
    let mut head = ResponseHead::new(url, response.status());
    head.headers = response.headers().clone();
    head
}

/// The request a redirect response points at, resolved against `request`.
fn redirect_target(head: &ResponseHead, request: &Request) -> Option<Request> {
    let location = head.headers.get(LOCATION)?.to_str().ok()?;
    let target = location.parse::<Uri>().ok()?;
    let url = if target.scheme().is_some() {
        target
    } else {
        let mut parts = request.url.clone().into_parts();
        parts.path_and_query = Some(target.path_and_query()?.clone());
        Uri::from_parts(parts).ok()?
    };

    let mut next = request.clone();
    next.url = url;
    if head.status == StatusCode::SEE_OTHER {
        next.method = Method::GET;
        next.body = Body::Empty;
    }
    Some(next)
}

/// Parse `WWW-Authenticate` into a challenge, e.g. `Basic realm="api"`.
fn challenge_of(head: &ResponseHead, request: &Request, failures: u32) -> Option<Challenge> {
    let header = head.headers.get(WWW_AUTHENTICATE)?.to_str().ok()?;
    let mut words = header.splitn(2, char::is_whitespace);
    let scheme = words.next().filter(|s| !s.is_empty())?.to_string();
    let realm = words.next().and_then(|params| {
        params
            .split(',')
            .map(str::trim)
            .find_map(|param| param.strip_prefix("realm="))
            .map(|realm| realm.trim_matches('"').to_string())
    });

    Some(Challenge {
        host: request.host().unwrap_or_default().to_string(),
        scheme,
        realm,
        previous_failure_count: failures,
    })
}

fn transport_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::TimedOut
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[allow(clippy::needless_pass_by_value)] // Used as a `map_err` adapter
fn io_error(error: std::io::Error) -> TransportError {
    TransportError::Other(error.to_string())
}
