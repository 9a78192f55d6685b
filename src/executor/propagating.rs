//! The context-propagating executor.
//!
//! Every submission snapshots the caller's ambient context on the calling
//! thread, before the job reaches the queue. The worker that later runs the
//! job installs that snapshot, runs the body, and clears its slot again
//! before the task's handle settles. A worker therefore never carries one
//! task's context into the next, whether the body returned, panicked, or
//! the task was cancelled while still queued.

use super::cpu_pool::CpuPool;
use super::handle::{self, Completion, TaskHandle};
use super::panic_handler::PanicHandler;
use super::stats::{ExecutorStats, PoolStats};
use super::task::{Task, TaskId};
use crate::config::Config;
use crate::context::{slot, Context};
use crate::error::{Error, Result, TaskError};
use std::fmt;
use std::sync::Arc;

/// Worker pool whose tasks see the submitting thread's context.
///
/// ```
/// use veda_context::context::ContextKey;
/// use veda_context::ContextExecutor;
///
/// static USER: ContextKey<String> = ContextKey::new("user");
///
/// let executor = ContextExecutor::fixed(1).unwrap();
///
/// USER.set("alice".to_string());
/// let seen = executor.submit(|| USER.get()).unwrap();
/// assert_eq!(seen.join().unwrap().as_deref(), Some("alice"));
///
/// USER.remove();
/// let seen = executor.submit(|| USER.get()).unwrap();
/// assert_eq!(seen.join().unwrap(), None);
/// ```
pub struct ContextExecutor {
    pool: CpuPool,
    panics: Arc<PanicHandler>,
    stats: Arc<PoolStats>,
}

impl ContextExecutor {
    pub fn new(config: Config) -> Result<Self> {
        let stats = Arc::new(PoolStats::default());
        let pool = CpuPool::new(&config, stats.clone())?;

        Ok(Self {
            pool,
            panics: Arc::new(PanicHandler::new(config.panic_strategy)),
            stats,
        })
    }

    /// `n` workers sharing an unbounded queue.
    pub fn fixed(n: usize) -> Result<Self> {
        Self::new(Config::fixed(n))
    }

    /// Fire-and-forget. A panic in `f` is handled by the configured
    /// [`PanicStrategy`](super::PanicStrategy).
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(move |_: &Context| f()).map(drop)
    }

    /// Run `f` on a worker and return a handle to its result.
    ///
    /// A body that can fail should return `Result<T, E>`; its error comes
    /// back unchanged as the handle's value. The handle's own error is
    /// reserved for panics and cancellation.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(move |_: &Context| f())
    }

    /// Run `f` and resolve the handle to `result` once it returns.
    pub fn submit_with_result<F, T>(&self, f: F, result: T) -> Result<TaskHandle<T>>
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(move |_: &Context| {
            f();
            result
        })
    }

    /// Like [`submit`](Self::submit), but also hands the captured context to
    /// `f` directly.
    pub fn submit_with<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(f)
    }

    fn dispatch<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        // capture now, on the caller: by the time a worker dequeues the job
        // this thread may have moved on
        let snapshot = Context::current().map_err(|error| {
            tracing::warn!(%error, "context capture failed, task not submitted");
            Error::CaptureFailed(error)
        })?;

        let id = TaskId::next();
        let (handle, completion) = handle::pair(id);
        let panics = self.panics.clone();
        let stats = self.stats.clone();

        tracing::trace!(task_id = %id, keys = snapshot.len(), "context captured");

        self.pool.submit(Task::new(id, move || {
            run_wrapped(id, snapshot, f, completion, &panics, &stats)
        }))?;
        PoolStats::bump(&self.stats.submitted);

        Ok(handle)
    }

    pub fn num_workers(&self) -> usize {
        self.pool.num_workers()
    }

    pub fn core_workers(&self) -> usize {
        self.pool.core_threads()
    }

    pub fn queued_tasks(&self) -> usize {
        self.pool.queued()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Stop accepting tasks and wait for the queued ones to finish.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Stop accepting tasks and cancel the queued ones. Tasks already
    /// running are waited for. Returns the number cancelled.
    pub fn shutdown_now(&self) -> usize {
        self.pool.shutdown_now()
    }
}

impl fmt::Debug for ContextExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextExecutor")
            .field("workers", &self.pool.num_workers())
            .field("queued", &self.pool.queued())
            .field("shutdown", &self.pool.is_shutdown())
            .finish()
    }
}

fn run_wrapped<F, T>(
    id: TaskId,
    snapshot: Context,
    f: F,
    completion: Completion<T>,
    panics: &PanicHandler,
    stats: &PoolStats,
) where
    F: FnOnce(&Context) -> T,
{
    if !completion.start() {
        PoolStats::bump(&stats.cancelled);
        tracing::trace!(task_id = %id, "task cancelled before start");
        return;
    }

    let installed = InstalledContext::install(id, &snapshot, stats);
    let outcome = panics.execute(id, || f(&snapshot));
    // slot must be empty before anyone waiting on the handle wakes up
    drop(installed);

    match outcome {
        Ok(value) => {
            PoolStats::bump(&stats.completed);
            completion.finish(Ok(value));
        }
        Err(panic) => {
            PoolStats::bump(&stats.panicked);
            completion.finish(Err(TaskError::Panicked(panic)));
        }
    }
}

/// Holds a task's context on the worker; clears the slot on drop.
struct InstalledContext<'a> {
    task_id: TaskId,
    stats: &'a PoolStats,
}

impl<'a> InstalledContext<'a> {
    fn install(task_id: TaskId, snapshot: &Context, stats: &'a PoolStats) -> Self {
        match slot::replace(Some(snapshot.clone())) {
            Ok(None) => {
                tracing::trace!(%task_id, keys = snapshot.len(), "context installed");
            }
            Ok(Some(residue)) => {
                PoolStats::bump(&stats.residue_discarded);
                tracing::warn!(%task_id, ?residue, "discarded stale context left on worker");
                if let Err(error) = slot::release(Some(residue)) {
                    PoolStats::bump(&stats.context_faults);
                    tracing::warn!(%task_id, %error, "failed to release stale context");
                }
            }
            Err(error) => {
                PoolStats::bump(&stats.context_faults);
                tracing::warn!(%task_id, %error, "failed to install context, running task without it");
            }
        }
        Self { task_id, stats }
    }
}

impl Drop for InstalledContext<'_> {
    fn drop(&mut self) {
        // values set by the task are dropped here and may panic
        if let Err(error) = slot::clear().and_then(slot::release) {
            PoolStats::bump(&self.stats.context_faults);
            tracing::warn!(task_id = %self.task_id, %error, "failed to clear context after task");
        }
    }
}
