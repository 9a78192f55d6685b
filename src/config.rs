use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

/// How submitted jobs are buffered before a worker picks them up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    Unbounded,
    /// At most `capacity` queued jobs. When full, the pool grows towards
    /// `max_threads`; past that, submission is rejected.
    Bounded { capacity: usize },
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::Unbounded
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Core workers, started with the pool. Defaults to the CPU count.
    pub num_threads: Option<usize>,
    /// Upper bound on workers. Defaults to `num_threads`.
    pub max_threads: Option<usize>,
    /// Idle time after which a worker above the core count exits.
    pub keep_alive: Duration,
    pub queue: QueuePolicy,
    pub panic_strategy: PanicStrategy,
    pub pin_workers: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            max_threads: None,
            keep_alive: Duration::from_secs(60),
            queue: QueuePolicy::default(),
            panic_strategy: PanicStrategy::default(),
            pin_workers: false,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "veda-worker".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// `n` workers and an unbounded queue.
    pub fn fixed(n: usize) -> Self {
        Self {
            num_threads: Some(n),
            max_threads: Some(n),
            keep_alive: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if let Some(max) = self.max_threads {
            if max > 1024 {
                return Err(Error::config("max_threads too large (max 1024)"));
            }
            if max < self.worker_threads() {
                return Err(Error::config("max_threads must be >= num_threads"));
            }
        }

        if let QueuePolicy::Bounded { capacity } = self.queue {
            if capacity == 0 {
                return Err(Error::config("bounded queue capacity must be > 0"));
            }
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }

    pub fn max_worker_threads(&self) -> usize {
        self.max_threads.unwrap_or_else(|| self.worker_threads())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = Some(n);
        self
    }

    pub fn keep_alive(mut self, idle: Duration) -> Self {
        self.config.keep_alive = idle;
        self
    }

    pub fn queue(mut self, policy: QueuePolicy) -> Self {
        self.config.queue = policy;
        self
    }

    pub fn bounded_queue(self, capacity: usize) -> Self {
        self.queue(QueuePolicy::Bounded { capacity })
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.config.pin_workers = pin;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
