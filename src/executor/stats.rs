use std::sync::atomic::{AtomicU64, Ordering};

// counters shared by the executor and its workers
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub panicked: AtomicU64,
    pub cancelled: AtomicU64,
    pub rejected: AtomicU64,
    pub context_faults: AtomicU64,
    pub residue_discarded: AtomicU64,
}

impl PoolStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            context_faults: self.context_faults.load(Ordering::Relaxed),
            residue_discarded: self.residue_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for a [`ContextExecutor`](super::ContextExecutor).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Tasks accepted into the queue.
    pub submitted: u64,
    /// Tasks whose body returned normally.
    pub completed: u64,
    pub panicked: u64,
    /// Tasks skipped because they were cancelled or discarded before running.
    pub cancelled: u64,
    pub rejected: u64,
    /// Install or clear operations that failed on a worker.
    pub context_faults: u64,
    /// Stale context found on a worker at install time.
    pub residue_discarded: u64,
}
