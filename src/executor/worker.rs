// worker thread stuff
use super::task::Task;
use crossbeam_channel::Receiver;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type WorkerId = usize;

pub(crate) struct Worker {
    pub id: WorkerId,
    queue: Receiver<Task>,
    // None for core workers, which wait forever
    idle_timeout: Option<Duration>,
    live_workers: Arc<AtomicUsize>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        queue: Receiver<Task>,
        idle_timeout: Option<Duration>,
        live_workers: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            id,
            queue,
            idle_timeout,
            live_workers,
        }
    }

    // main loop; exits when the queue is closed and drained, or on idle timeout
    pub fn run(self, first: Option<Task>) {
        let mut executed = 0u64;

        if let Some(task) = first {
            self.execute_task(task);
            executed += 1;
        }

        while let Some(task) = self.next_task() {
            self.execute_task(task);
            executed += 1;
        }

        self.live_workers.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(worker = self.id, executed, "worker exiting");
    }

    fn next_task(&self) -> Option<Task> {
        match self.idle_timeout {
            None => self.queue.recv().ok(),
            Some(idle) => self.queue.recv_timeout(idle).ok(),
        }
    }

    fn execute_task(&self, task: Task) {
        let tid = task.id;
        tracing::trace!(
            worker = self.id,
            task_id = %tid,
            queued_for = ?task.spawn_time.elapsed(),
            "picked up task"
        );

        // task bodies catch their own panics; this only guards the loop
        if catch_unwind(AssertUnwindSafe(|| task.execute())).is_err() {
            tracing::error!(worker = self.id, task_id = %tid, "task wrapper panicked");
        }
    }
}
