//! # Alice Core
//!
//! The asynchronous-result engine the Alice HTTP runtime is built on.
//!
//! ## Core Concepts
//!
//! - **Promise**: write-once producer of a result
//! - **Future**: read side of a promise, with observers, combinators and
//!   blocking waits
//! - **Scheduler**: where a callback runs (inline, a serial worker thread,
//!   or a tokio runtime)
//! - **Bag**: token-addressed list that keeps its first two entries inline
//! - **Lock**: closure-scoped mutex guarding every shared collection
//!
//! ## Example
//!
//! ```
//! use alice_core::{Promise, SerialScheduler};
//! use std::thread;
//!
//! let promise = Promise::<String, String>::new();
//! let worker = SerialScheduler::new("example-worker")?;
//! let greeting = promise.future().map(|name| format!("hello {name}")).yield_on(worker);
//!
//! thread::spawn(move || promise.succeed("alice".to_string()));
//!
//! assert_eq!(greeting.wait().as_deref(), Some("hello alice"));
//! # Ok::<(), std::io::Error>(())
//! ```

/// Token-addressed small collection
pub mod bag;

/// Futures and promises
pub mod future;

/// Closure-scoped mutual exclusion
pub mod lock;

/// Execution contexts for callbacks
pub mod scheduler;

pub use bag::{Bag, BagToken};
pub use future::{Future, Promise};
pub use lock::Lock;
pub use scheduler::{Inline, Job, Scheduler, SerialScheduler, TokioScheduler, panic_message};
