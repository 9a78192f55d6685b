use crate::executor::panic_handler::PanicInfo;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("context capture failed: {0}")]
    CaptureFailed(#[source] ContextError),

    #[error("task rejected: queue full and pool at max workers")]
    Rejected,

    #[error("executor is shut down")]
    Shutdown,

    #[error("executor error: {0}")]
    Executor(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

/// Failure to read or write a thread's ambient context slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The slot's thread-local storage was already torn down (thread exit).
    #[error("context slot unavailable on this thread")]
    SlotUnavailable,

    /// The slot was borrowed re-entrantly.
    #[error("context slot is already borrowed")]
    SlotBusy,

    /// A value released from the slot panicked in its `Drop`.
    #[error("context value panicked while being released: {0}")]
    ReleasePanicked(String),
}

/// Outcome of a task that did not produce a value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(PanicInfo),

    #[error("task was cancelled before it started")]
    Cancelled,
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn capture_failure_keeps_source() {
        let err = Error::CaptureFailed(ContextError::SlotUnavailable);
        assert!(err.to_string().starts_with("context capture failed"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("context slot unavailable on this thread"));
    }

    #[test]
    fn task_error_kinds() {
        assert!(TaskError::Cancelled.is_cancelled());
        let panicked = TaskError::Panicked(PanicInfo {
            message: "boom".into(),
        });
        assert!(panicked.is_panic());
        assert_eq!(panicked.to_string(), "task panicked: boom");
    }
}
