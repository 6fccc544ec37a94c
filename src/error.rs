//! Error types for chanmgr.
//!
//! Failures never escape the dispatch loop. Every error a caller can observe is a
//! returned value from one of the public entry points:
//!
//! - [`ConfigError`] from [`start`](crate::start)
//! - [`EnqueueError`] from [`Binding::send`](crate::Binding::send) and friends
//! - [`HandlerError`] carried as data in a [`Response`](crate::Response)
//! - [`RetrieveError`] from [`Response::get`](crate::Response::get)

use thiserror::Error;

/// Invalid manager setup. Returned synchronously by [`start`](crate::start);
/// no binding changes state and no dispatch loop is spawned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The binding set was empty.
    #[error("bindings must contain at least one binding")]
    NoBindings,

    /// A binding was created without a handler.
    #[error("invalid binding ({index}): handler must be set")]
    MissingHandler {
        /// Position of the offending binding in the set passed to `start`
        index: usize,
    },

    /// A binding already belongs to a manager, or appears twice in the set.
    #[error("invalid binding ({index}): already bound to a manager")]
    AlreadyBound {
        /// Position of the offending binding in the set passed to `start`
        index: usize,
    },

    /// The requested queue capacity is outside the accepted range.
    #[error(
        "queue capacity {capacity} out of range [{}, {}]",
        crate::config::MIN_QUEUE_CAPACITY,
        crate::config::MAX_QUEUE_CAPACITY
    )]
    QueueCapacity {
        /// The rejected capacity
        capacity: usize,
    },

    /// The supplied exit handle already controls another manager.
    #[error("exit handle is already attached to a manager")]
    ExitHandleInUse,

    /// The dispatch coroutine could not be spawned.
    #[error("failed to spawn dispatch loop: {message}")]
    Spawn {
        /// Error reported by the coroutine runtime
        message: String,
    },
}

/// A submission that was not enqueued.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// The binding has not been registered with a running manager, or has no handler.
    #[error("binding is not bound to a manager")]
    Unbound,

    /// The owning manager has exited (or is exiting) and accepts no more work.
    #[error("manager has exited")]
    ManagerExited,

    /// The queue is at capacity. Only returned by the non-blocking submission path.
    #[error("request queue is full")]
    QueueFull,

    /// `send_recv` was called on a binding that discards results.
    #[error("binding does not want responses")]
    NoResponseWanted,
}

/// Failure produced while running a handler. Delivered as the result of a request,
/// never raised.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler failed: {0:#}")]
    Failed(anyhow::Error),

    /// The handler panicked; the panic was contained at the dispatch boundary.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text
        message: String,
    },
}

impl HandlerError {
    /// Whether this error came from a recovered panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, HandlerError::Panicked { .. })
    }
}

/// Failure to retrieve a result from a [`Response`](crate::Response).
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RetrieveError {
    /// `get` already returned for this response. Terminal.
    #[error("response already consumed")]
    AlreadyConsumed,

    /// The result channel closed before a value arrived. Terminal.
    #[error("response abandoned before a result was delivered")]
    Abandoned,

    /// The request was still queued when its manager exited and was dropped. Terminal.
    #[error("request dropped from the queue at manager shutdown")]
    ShutdownAbandoned,

    /// No result arrived within the caller's deadline. Not terminal: the request is
    /// still processed and a later `get` can return it.
    #[error("timed out waiting for response")]
    Timeout,
}

impl RetrieveError {
    /// Whether every further `get` on the same response is guaranteed to fail.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetrieveError::Timeout)
    }
}

/// Umbrella error for call sites that chain several steps, such as
/// [`Binding::send_recv`](crate::Binding::send_recv).
#[derive(Debug, Error)]
pub enum Error {
    /// Setup failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Submission failed
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    /// The handler failed or panicked
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The result could not be retrieved
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::MissingHandler { index: 2 }.to_string(),
            "invalid binding (2): handler must be set"
        );
        assert_eq!(
            ConfigError::QueueCapacity { capacity: 0 }.to_string(),
            "queue capacity 0 out of range [1, 10000]"
        );
    }

    #[test]
    fn test_handler_error_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("writing tile");
        let handler_err = HandlerError::Failed(err);
        assert_eq!(handler_err.to_string(), "handler failed: writing tile: disk full");
        assert!(!handler_err.is_panic());
        assert!(HandlerError::Panicked {
            message: "boom".to_string()
        }
        .is_panic());
    }

    #[test]
    fn test_retrieve_error_terminality() {
        assert!(RetrieveError::AlreadyConsumed.is_terminal());
        assert!(RetrieveError::Abandoned.is_terminal());
        assert!(RetrieveError::ShutdownAbandoned.is_terminal());
        assert!(!RetrieveError::Timeout.is_terminal());
    }

    #[test]
    fn test_umbrella_error_is_transparent() {
        let err: Error = EnqueueError::Unbound.into();
        assert_eq!(err.to_string(), "binding is not bound to a manager");
        assert!(matches!(err, Error::Enqueue(EnqueueError::Unbound)));
    }
}
