//! Task lifecycle metrics.
//!
//! Metrics go through the `metrics` facade. Nothing is recorded unless the
//! application installs a recorder (Prometheus, statsd, ...); call
//! [`describe_metrics`] once after installing it to attach descriptions.
//!
//! - `alice.tasks.started` counter
//! - `alice.tasks.succeeded` counter
//! - `alice.tasks.failed` counter
//! - `alice.tasks.cancelled` counter
//! - `alice.tasks.in_flight` gauge
//! - `alice.tasks.duration_seconds` histogram (successful tasks)

use metrics::{describe_counter, describe_gauge, describe_histogram};
use std::time::Duration;

pub use metrics::{counter, gauge, histogram};

/// Register descriptions for every metric the runtime records.
pub fn describe_metrics() {
    describe_counter!("alice.tasks.started", "Total number of tasks started");
    describe_counter!(
        "alice.tasks.succeeded",
        "Total number of tasks that produced a response"
    );
    describe_counter!(
        "alice.tasks.failed",
        "Total number of tasks that failed for reasons other than cancellation"
    );
    describe_counter!("alice.tasks.cancelled", "Total number of cancelled tasks");
    describe_gauge!(
        "alice.tasks.in_flight",
        "Tasks started whose response future has not resolved yet"
    );
    describe_histogram!(
        "alice.tasks.duration_seconds",
        "Transfer time of successful tasks"
    );
}

/// Task lifecycle recorder.
pub struct TaskLifecycleMetrics;

impl TaskLifecycleMetrics {
    /// Record a task start.
    pub fn record_started() {
        counter!("alice.tasks.started").increment(1);
        gauge!("alice.tasks.in_flight").increment(1.0);
    }

    /// Record a response.
    pub fn record_succeeded(duration: Duration) {
        counter!("alice.tasks.succeeded").increment(1);
        histogram!("alice.tasks.duration_seconds").record(duration.as_secs_f64());
        gauge!("alice.tasks.in_flight").decrement(1.0);
    }

    /// Record a failure.
    pub fn record_failed() {
        counter!("alice.tasks.failed").increment(1);
        gauge!("alice.tasks.in_flight").decrement(1.0);
    }

    /// Record a cancellation.
    pub fn record_cancelled() {
        counter!("alice.tasks.cancelled").increment(1);
        gauge!("alice.tasks.in_flight").decrement(1.0);
    }
}
