//! # ping
//!
//! Sends one `GET` through an Alice client backed by `reqwest` and prints
//! the JSON body.
//!
//! ```text
//! cargo run -p ping -- https://reqres.in/api/users?page=2
//! ```
//!
//! Requests whose path contains `users` carry the `x-api-key` header from
//! `PING_API_KEY` (default: the public reqres.in key). Log levels follow
//! `RUST_LOG`.

mod transport;

use alice_core::Inline;
use alice_runtime::middleware::middleware_fn;
use alice_runtime::{
    Client, ClientConfig, HttpError, Request, RequestMatcher, Responder, SharedMiddleware,
    SharedResponder, TaskKind,
};
use http::{HeaderName, HeaderValue};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::ReqwestTransport;

const DEFAULT_URL: &str = "https://reqres.in/api/users?page=2";
const DEFAULT_API_KEY: &str = "reqres-free-v1";
const API_KEY: HeaderName = HeaderName::from_static("x-api-key");
const TIME_SPENT: HeaderName = HeaderName::from_static("time-spent");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ping=info,alice_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
    alice_runtime::metrics::describe_metrics();

    let url = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    let api_key = std::env::var("PING_API_KEY").unwrap_or_else(|_| DEFAULT_API_KEY.to_string());

    let http = transport::http_client()?;
    let runtime = tokio::runtime::Handle::current();
    let config = ClientConfig::default()
        .with_name("ping")
        .with_request_timeout(Duration::from_secs(30));
    let client = Client::new(config, |delegate| {
        ReqwestTransport::new(delegate, http, runtime)
    })?;

    client.use_middleware(time_spent());
    client.use_when(api_key_header(&api_key)?, RequestMatcher::path("users")?);

    let task = client.prepare(Request::get(&url)?, TaskKind::Data);
    task.on_download_progress(Inline, |progress| {
        tracing::debug!(
            completed = progress.completed,
            total = progress.total,
            "Download progress"
        );
    });
    task.start();

    let response = task.response().await?;
    tracing::info!(
        status = %response.status(),
        time_spent_us = ?response.headers().get(TIME_SPENT),
        bytes = response.metrics.bytes_received,
        "Response received"
    );

    let body: serde_json::Value = response.json()?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Reports how long the rest of the chain took, in microseconds, as a
/// response header.
fn time_spent() -> SharedMiddleware {
    middleware_fn(|request: Request, next: SharedResponder| {
        let started = Instant::now();
        tracing::info!(method = %request.method, url = %request.url, "Sending request");
        Ok(next.respond(request)?.map(move |mut response| {
            let micros = started.elapsed().as_micros().to_string();
            if let Ok(value) = HeaderValue::from_str(&micros) {
                response.headers_mut().insert(TIME_SPENT, value);
            }
            response
        }))
    })
}

fn api_key_header(key: &str) -> Result<SharedMiddleware, HttpError> {
    let value = HeaderValue::from_str(key)?;
    Ok(middleware_fn(move |request: Request, next: SharedResponder| {
        next.respond(request.with_header(API_KEY, value.clone()))
    }))
}
