pub use crate::config::{Config, ConfigBuilder, QueuePolicy};
pub use crate::context::{Context, ContextKey};
pub use crate::error::{ContextError, Error, Result, TaskError};
pub use crate::executor::{ContextExecutor, ExecutorStats, PanicStrategy, TaskHandle};
