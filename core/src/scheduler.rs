//! Where callbacks run.
//!
//! The engine never decides on a concurrency model. Anything that needs to
//! hop onto a caller-chosen context (see [`Future::yield_on`]) takes a
//! [`Scheduler`] and hands it a job.
//!
//! [`Future::yield_on`]: crate::Future::yield_on

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

/// A unit of work handed to a [`Scheduler`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability for running a job according to some policy.
pub trait Scheduler: Send + Sync {
    /// Run `job` according to this scheduler's policy.
    fn schedule(&self, job: Job);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, job: Job) {
        (**self).schedule(job);
    }
}

/// Runs every job synchronously on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Scheduler for Inline {
    fn schedule(&self, job: Job) {
        job();
    }
}

/// Runs jobs one at a time, in submission order, on a dedicated thread.
///
/// A job that panics is logged and skipped; later jobs still run.
/// The worker thread exits once every clone of the scheduler is dropped and
/// the queue has drained.
#[derive(Clone)]
pub struct SerialScheduler {
    label: Arc<str>,
    sender: mpsc::UnboundedSender<Job>,
}

impl SerialScheduler {
    /// Spawn the worker thread, named after `label`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn new(label: impl Into<String>) -> io::Result<Self> {
        let label: Arc<str> = Arc::from(label.into());
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let worker = Arc::clone(&label);
        thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    // A panicking job must not take the queue down with it.
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        tracing::error!(
                            label = %worker,
                            panic = panic_message(payload.as_ref()),
                            "Scheduled job panicked"
                        );
                    }
                }
            })?;

        Ok(Self { label, sender })
    }

    /// The label the worker thread was named after.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Best-effort text of a panic payload caught with
/// [`std::panic::catch_unwind`].
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Scheduler for SerialScheduler {
    fn schedule(&self, job: Job) {
        if self.sender.send(job).is_err() {
            tracing::warn!(label = %self.label, "Serial scheduler worker is gone, dropping job");
        }
    }
}

impl fmt::Debug for SerialScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialScheduler")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Spawns each job as a task on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Schedule onto the runtime behind `handle`.
    #[must_use]
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime the caller is running in, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, job: Job) {
        drop(self.handle.spawn(async move { job() }));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_before_returning() {
        let (tx, rx) = std_mpsc::channel();
        Inline.schedule(Box::new(move || {
            let _ = tx.send(1);
        }));
        assert_eq!(rx.try_recv(), Ok(1));
    }

    #[test]
    fn test_serial_preserves_submission_order() {
        let scheduler = SerialScheduler::new("serial-order").unwrap();
        let (tx, rx) = std_mpsc::channel();

        for n in 0..20 {
            let tx = tx.clone();
            scheduler.schedule(Box::new(move || {
                let _ = tx.send(n);
            }));
        }

        let received: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_serial_runs_on_named_thread() {
        let scheduler = SerialScheduler::new("alice-worker").unwrap();
        let (tx, rx) = std_mpsc::channel();
        scheduler.schedule(Box::new(move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        }));

        let name = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(name.as_deref(), Some("alice-worker"));
        assert_eq!(scheduler.label(), "alice-worker");
    }

    #[test]
    fn test_serial_survives_panicking_job() {
        let scheduler = SerialScheduler::new("serial-panic").unwrap();
        let (tx, rx) = std_mpsc::channel();

        scheduler.schedule(Box::new(|| panic!("job bug")));
        scheduler.schedule(Box::new(move || {
            let _ = tx.send("after");
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok("after"));
    }

    #[test]
    fn test_panic_message_reads_common_payloads() {
        let literal = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "static");

        let formatted = panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "code 7");

        let other = panic::catch_unwind(|| std::panic::panic_any(3_u8)).unwrap_err();
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_tokio_scheduler_spawns_job() {
        let scheduler = TokioScheduler::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.schedule(Box::new(move || {
            let _ = tx.send("done");
        }));
        assert_eq!(rx.await.unwrap(), "done");
    }
}
