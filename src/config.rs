//! # Manager Configuration
//!
//! [`ManagerConfig`] controls the dispatch loop started by [`start`](crate::start).
//! Values can be set in code or loaded from environment variables.
//!
//! ## Environment Variables
//!
//! ### `CHANMGR_QUEUE_CAPACITY`
//!
//! Maximum number of requests waiting in the queue. Senders block once the queue
//! holds this many requests. Must be within `[1, 10000]`; `start` rejects anything else.
//!
//! Default: `1`
//!
//! ### `CHANMGR_STACK_SIZE`
//!
//! Stack size for the dispatch coroutine. Handlers run on this stack, so deep call
//! chains in handlers need a larger value. Accepts decimal (`65536`) or hexadecimal
//! (`0x10000`).
//!
//! Default: `0x10000` (64 KB)
//!
//! ## Usage
//!
//! ```rust
//! use chanmgr::ManagerConfig;
//!
//! let config = ManagerConfig::from_env().with_name("tiles");
//! println!("queue capacity: {}", config.queue_capacity);
//! ```

use crate::error::ConfigError;
use std::env;

/// Smallest accepted queue capacity
pub const MIN_QUEUE_CAPACITY: usize = 1;
/// Largest accepted queue capacity
pub const MAX_QUEUE_CAPACITY: usize = 10_000;
/// Queue capacity used when none is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;
/// Dispatch coroutine stack size used when none is configured (64 KB)
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Configuration for a manager's dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Name recorded on every log line emitted by the manager
    pub name: String,
    /// Maximum number of queued requests
    pub queue_capacity: usize,
    /// Stack size of the dispatch coroutine in bytes
    pub stack_size: usize,
}

impl ManagerConfig {
    /// Create a configuration with the default name.
    #[must_use]
    pub fn new(queue_capacity: usize, stack_size: usize) -> Self {
        Self {
            queue_capacity,
            stack_size,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables, falling back to defaults
    /// for unset or unparsable values.
    #[must_use]
    pub fn from_env() -> Self {
        let queue_capacity = env::var("CHANMGR_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        let stack_size = env::var("CHANMGR_STACK_SIZE")
            .ok()
            .and_then(|s| parse_size(&s))
            .unwrap_or(DEFAULT_STACK_SIZE);

        Self {
            queue_capacity,
            stack_size,
            ..Self::default()
        }
    }

    /// Set the manager name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the dispatch coroutine stack size.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Check the values `start` depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_QUEUE_CAPACITY..=MAX_QUEUE_CAPACITY).contains(&self.queue_capacity) {
            return Err(ConfigError::QueueCapacity {
                capacity: self.queue_capacity,
            });
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "chanmgr".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Parse a byte size given in decimal or `0x`-prefixed hexadecimal.
fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

// from_env readers share process-wide variables
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
