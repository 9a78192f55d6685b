//! VEDA context - a worker pool that carries ambient context into tasks.
//!
//! Per-thread state such as request IDs, tracing data or locale is
//! normally lost (or worse, leaked) when work moves onto pooled threads.
//! [`ContextExecutor`] snapshots the submitting thread's context on every
//! submission, installs the snapshot on the worker for the duration of the
//! task, and clears the worker's slot before the task is reported done.
//!
//! # Quick Start
//!
//! ```
//! use veda_context::prelude::*;
//!
//! static TENANT: ContextKey<&'static str> = ContextKey::new("tenant");
//!
//! let executor = ContextExecutor::fixed(2).unwrap();
//!
//! TENANT.set("acme");
//! let handle = executor.submit(|| TENANT.get()).unwrap();
//! assert_eq!(handle.join().unwrap(), Some("acme"));
//! ```
//!
//! # Features
//!
//! - **Copy-on-submit**: context is captured on the caller, before queueing
//! - **Clear-on-completion**: workers never carry context between tasks,
//!   including after panics and cancellations
//! - **Explicit passing**: [`ContextExecutor::submit_with`] hands the
//!   snapshot to the task body as well
//! - **Elastic pool**: core/max workers, keep-alive, bounded or unbounded
//!   FIFO queue

// Lint configuration
#![warn(missing_debug_implementations)]

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod prelude;

// Re-export key types at crate root
pub use config::{Config, ConfigBuilder, QueuePolicy};
pub use context::{Context, ContextKey};
pub use error::{ContextError, Error, Result, TaskError};
pub use executor::{ContextExecutor, ExecutorStats, PanicStrategy, TaskHandle};
