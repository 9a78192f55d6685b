//! Task execution infrastructure.
//!
//! [`ContextExecutor`] is the public entry point. Underneath it sits a plain
//! FIFO worker pool that only ever sees already-wrapped, opaque jobs.

pub(crate) mod cpu_pool;
pub mod handle;
pub mod panic_handler;
pub mod propagating;
pub mod stats;
pub mod task;
pub(crate) mod worker;

pub use handle::TaskHandle;
pub use panic_handler::{PanicHandler, PanicInfo, PanicStrategy};
pub use propagating::ContextExecutor;
pub use stats::ExecutorStats;
pub use task::TaskId;
