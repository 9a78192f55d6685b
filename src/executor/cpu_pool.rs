use super::stats::PoolStats;
use super::task::Task;
use super::worker::{Worker, WorkerId};
use crate::config::{Config, QueuePolicy};
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(target_os = "linux")]
fn pin_thread_to_core(core_id: usize) {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id, &mut cpuset);
        let result = libc::sched_setaffinity(
            0, // current thread
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        );
        if result != 0 {
            tracing::warn!(
                thread = thread::current().name().unwrap_or("unknown"),
                core_id,
                "failed to pin worker to core"
            );
        }
    }
}

/// Bounded FIFO worker pool. Runs opaque jobs; knows nothing about context.
pub(crate) struct CpuPool {
    sender: RwLock<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    live_workers: Arc<AtomicUsize>,
    next_worker_id: AtomicUsize,
    core_threads: usize,
    max_threads: usize,
    keep_alive: Duration,
    pin_workers: bool,
    stack_size: Option<usize>,
    thread_name_prefix: String,
    stats: Arc<PoolStats>,
}

impl CpuPool {
    pub fn new(config: &Config, stats: Arc<PoolStats>) -> Result<Self> {
        config.validate()?;
        let core_threads = config.worker_threads();
        if core_threads == 0 {
            return Err(Error::config("need at least 1 thread"));
        }

        let (sender, receiver) = match config.queue {
            QueuePolicy::Unbounded => unbounded(),
            QueuePolicy::Bounded { capacity } => bounded(capacity),
        };

        let pool = Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            workers: Mutex::new(Vec::with_capacity(core_threads)),
            live_workers: Arc::new(AtomicUsize::new(0)),
            next_worker_id: AtomicUsize::new(0),
            core_threads,
            max_threads: config.max_worker_threads(),
            keep_alive: config.keep_alive,
            pin_workers: config.pin_workers,
            stack_size: config.stack_size,
            thread_name_prefix: config.thread_name_prefix.clone(),
            stats,
        };

        for _ in 0..core_threads {
            pool.live_workers.fetch_add(1, Ordering::AcqRel);
            if let Err(e) = pool.spawn_worker(None, None) {
                pool.live_workers.fetch_sub(1, Ordering::AcqRel);
                pool.shutdown();
                return Err(e);
            }
        }

        tracing::debug!(
            core = core_threads,
            max = pool.max_threads,
            queue = ?config.queue,
            "worker pool started"
        );

        Ok(pool)
    }

    /// Enqueue a job. Grows the pool past the core size only when a bounded
    /// queue is full; rejects once `max_threads` workers are alive.
    pub fn submit(&self, task: Task) -> Result<()> {
        let sender = self.sender.read();
        let sender = sender.as_ref().ok_or(Error::Shutdown)?;

        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => self.grow(task),
            Err(TrySendError::Disconnected(_)) => Err(Error::Shutdown),
        }
    }

    fn grow(&self, task: Task) -> Result<()> {
        let mut live = self.live_workers.load(Ordering::Acquire);
        loop {
            if live >= self.max_threads {
                PoolStats::bump(&self.stats.rejected);
                tracing::debug!(task_id = %task.id, live, "queue full, task rejected");
                return Err(Error::Rejected);
            }
            match self.live_workers.compare_exchange_weak(
                live,
                live + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => live = actual,
            }
        }

        match self.spawn_worker(Some(task), Some(self.keep_alive)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.live_workers.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    // caller has already counted the worker in `live_workers`
    fn spawn_worker(&self, first: Option<Task>, idle_timeout: Option<Duration>) -> Result<()> {
        let id: WorkerId = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.thread_name_prefix, id);
        let worker = Worker::new(
            id,
            self.receiver.clone(),
            idle_timeout,
            self.live_workers.clone(),
        );

        let mut builder = thread::Builder::new().name(name);

        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let pin_core = (self.pin_workers && idle_timeout.is_none()).then(|| id % num_cpus::get());
        let thread = builder
            .spawn(move || {
                #[cfg(target_os = "linux")]
                if let Some(core_id) = pin_core {
                    pin_thread_to_core(core_id);
                }
                #[cfg(not(target_os = "linux"))]
                let _ = pin_core;

                worker.run(first);
            })
            .map_err(|e| Error::executor(format!("spawn failed: {}", e)))?;

        let mut workers = self.workers.lock();
        workers.retain(|handle| !handle.is_finished());
        workers.push(thread);
        Ok(())
    }

    pub fn num_workers(&self) -> usize {
        self.live_workers.load(Ordering::Acquire)
    }

    pub fn core_threads(&self) -> usize {
        self.core_threads
    }

    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Stop accepting jobs, let queued ones finish, join the workers.
    pub fn shutdown(&self) {
        if self.sender.write().take().is_some() {
            tracing::debug!(queued = self.queued(), "worker pool shutting down");
        }
        self.join_workers();
    }

    /// Stop accepting jobs and discard the queued ones. Returns how many
    /// were discarded.
    pub fn shutdown_now(&self) -> usize {
        self.sender.write().take();

        let mut discarded = 0;
        for task in self.receiver.try_iter() {
            tracing::trace!(task_id = %task.id, "discarding queued task");
            drop(task);
            discarded += 1;
        }
        self.stats
            .cancelled
            .fetch_add(discarded as u64, Ordering::Relaxed);
        tracing::debug!(discarded, "worker pool stopped");

        self.join_workers();
        discarded
    }

    fn join_workers(&self) {
        let current = thread::current().id();
        loop {
            let handles = std::mem::take(&mut *self.workers.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                // a worker tearing down its own pool cannot join itself
                if handle.thread().id() == current {
                    continue;
                }
                if handle.join().is_err() {
                    tracing::error!("worker thread panicked");
                }
            }
        }
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
