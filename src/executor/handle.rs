//! Completion handles for submitted tasks.

use super::task::TaskId;
use crate::error::TaskError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

enum State<T> {
    Queued,
    Running,
    Finished(Result<T, TaskError>),
    Taken,
}

impl<T> State<T> {
    fn is_terminal(&self) -> bool {
        matches!(self, State::Finished(_) | State::Taken)
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    done: Condvar,
}

impl<T> Shared<T> {
    fn settle(&self, outcome: Result<T, TaskError>) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = State::Finished(outcome);
            self.done.notify_all();
        }
    }
}

/// Handle to a submitted task. Dropping it detaches the task.
pub struct TaskHandle<T> {
    id: TaskId,
    shared: Arc<Shared<T>>,
}

/// Worker-side half of a handle. Dropping it unsettled cancels the task,
/// which is how queued jobs discarded by the pool resolve.
pub(crate) struct Completion<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) fn pair<T>(id: TaskId) -> (TaskHandle<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Queued),
        done: Condvar::new(),
    });
    (
        TaskHandle {
            id,
            shared: shared.clone(),
        },
        Completion { shared },
    )
}

impl<T> Completion<T> {
    /// Queued -> Running. False if the task was cancelled first.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.shared.state.lock();
        match *state {
            State::Queued => {
                *state = State::Running;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn finish(self, outcome: Result<T, TaskError>) {
        self.shared.settle(outcome);
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.shared.settle(Err(TaskError::Cancelled));
    }
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Block until the task finishes and return its outcome.
    pub fn join(self) -> Result<T, TaskError> {
        let mut state = self.shared.state.lock();
        while !state.is_terminal() {
            self.shared.done.wait(&mut state);
        }
        match std::mem::replace(&mut *state, State::Taken) {
            State::Finished(outcome) => outcome,
            // only `join` takes, and it consumes the handle
            _ => Err(TaskError::Cancelled),
        }
    }

    /// Wait up to `timeout` for the task to finish. True if it did.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if !state.is_terminal() {
            self.shared
                .done
                .wait_while_for(&mut state, |s| !s.is_terminal(), timeout);
        }
        state.is_terminal()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().is_terminal()
    }

    /// Cancel the task if it has not started yet. A cancelled task never
    /// runs and never installs its context on a worker.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        match *state {
            State::Queued => {
                *state = State::Finished(Err(TaskError::Cancelled));
                self.shared.done.notify_all();
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.shared.state.lock(),
            State::Finished(Err(TaskError::Cancelled))
        )
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.shared.state.lock() {
            State::Queued => "queued",
            State::Running => "running",
            State::Finished(Ok(_)) => "done",
            State::Finished(Err(TaskError::Cancelled)) => "cancelled",
            State::Finished(Err(_)) => "failed",
            State::Taken => "taken",
        };
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}
