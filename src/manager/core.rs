//! Manager core - setup validation, the dispatch loop and the exit handle.

use crate::binding::{Bindable, BindingLink};
use crate::config::ManagerConfig;
use crate::error::ConfigError;
use crate::queue::{self, Envelope, ManagerMetrics, QueueSender, QueueState};
use crate::request::{Disposition, Job};
use may::coroutine;
use may::sync::mpsc;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Validate `bindings`, bind each of them to a new manager and launch its dispatch loop.
///
/// `exit` lets the caller supply the handle used to stop the manager; a fresh one is
/// created when `None`. `config` falls back to [`ManagerConfig::default`].
///
/// On success every binding is bound and the returned handle controls the loop.
///
/// # Errors
///
/// Returns a [`ConfigError`] and leaves every binding untouched when:
/// - `bindings` is empty
/// - the queue capacity is outside `[1, 10000]`
/// - a binding has no handler
/// - a binding is already bound, or appears twice
/// - `exit` already controls another manager
pub fn start(
    bindings: &[&dyn Bindable],
    exit: Option<ExitHandle>,
    config: Option<ManagerConfig>,
) -> Result<ExitHandle, ConfigError> {
    let config = config.unwrap_or_default();
    validate(bindings, &config)?;

    let exit = exit.unwrap_or_default();
    if exit.is_attached() {
        return Err(ConfigError::ExitHandleInUse);
    }

    reserve(bindings, &config)?;
    let queue = match launch(&exit, &config) {
        Ok(queue) => queue,
        Err(e) => {
            release(bindings);
            return Err(e);
        }
    };

    for (index, binding) in bindings.iter().enumerate() {
        binding.attach(BindingLink {
            queue: Arc::clone(&queue),
            index,
        });
    }

    info!(
        manager = %config.name,
        bindings = bindings.len(),
        queue_capacity = config.queue_capacity,
        stack_size = config.stack_size,
        "Manager started"
    );

    Ok(exit)
}

fn validate(bindings: &[&dyn Bindable], config: &ManagerConfig) -> Result<(), ConfigError> {
    if bindings.is_empty() {
        return Err(ConfigError::NoBindings);
    }
    config.validate()?;

    let mut seen = HashSet::with_capacity(bindings.len());
    for (index, binding) in bindings.iter().enumerate() {
        if !binding.has_handler() {
            return Err(ConfigError::MissingHandler { index });
        }
        if binding.is_bound() || !seen.insert(binding.identity()) {
            return Err(ConfigError::AlreadyBound { index });
        }
    }
    Ok(())
}

/// Claim every binding for this call. All or nothing: a binding claimed concurrently
/// by another `start` releases the ones already claimed here.
fn reserve(bindings: &[&dyn Bindable], config: &ManagerConfig) -> Result<(), ConfigError> {
    for (index, binding) in bindings.iter().enumerate() {
        if !binding.reserve() {
            warn!(
                manager = %config.name,
                binding = index,
                "Binding was claimed concurrently by another manager"
            );
            release(&bindings[..index]);
            return Err(ConfigError::AlreadyBound { index });
        }
    }
    Ok(())
}

fn release(bindings: &[&dyn Bindable]) {
    for binding in bindings {
        binding.release();
    }
}

/// Create the queue, spawn the loop and attach `exit` to it.
fn launch(exit: &ExitHandle, config: &ManagerConfig) -> Result<Arc<QueueSender>, ConfigError> {
    let (queue, rx) = queue::bounded(config.name.clone(), config.queue_capacity);
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let manager = Manager {
        state: Arc::clone(queue.state()),
        rx,
        _done: done_tx,
    };
    spawn(manager, config.stack_size)?;

    // Lost a race with another start using the same handle. Dropping `queue` here
    // closes the channel and the new loop winds down on its own.
    if !exit.attach(Arc::clone(&queue), done_rx) {
        return Err(ConfigError::ExitHandleInUse);
    }
    Ok(queue)
}

fn spawn(manager: Manager, stack_size: usize) -> Result<(), ConfigError> {
    let name = manager.state.name().to_string();

    // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
    // The closure owns everything it touches (Manager is Send + 'static), and the
    // loop never blocks a worker thread outside may's own primitives.
    let spawn_result = unsafe {
        coroutine::Builder::new()
            .name(name.clone())
            .stack_size(stack_size)
            .spawn(move || manager.run())
    };

    match spawn_result {
        // Detached: the loop lives until exit or until every sender is dropped
        Ok(_handle) => Ok(()),
        Err(e) => {
            error!(
                manager = %name,
                error = %e,
                stack_size = stack_size,
                "Failed to spawn dispatch coroutine - CRITICAL"
            );
            Err(ConfigError::Spawn {
                message: e.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ExitReason {
    /// `ExitHandle::exit` was called
    Signalled,
    /// Every binding and exit handle was dropped
    Closed,
}

/// The single consumer of one request queue.
struct Manager {
    state: Arc<QueueState>,
    rx: mpsc::Receiver<Envelope>,
    /// Dropped when the loop finishes, releasing `ExitHandle::wait`
    _done: mpsc::Sender<()>,
}

impl Manager {
    fn run(self) {
        let Manager { state, rx, _done } = self;
        let name = state.name().to_string();

        debug!(manager = %name, queue_capacity = state.capacity(), "Dispatch loop start");

        let mut abandoned: u64 = 0;
        let reason = loop {
            if state.is_exiting() {
                break ExitReason::Signalled;
            }

            match rx.recv() {
                Ok(Envelope::Request(job)) => {
                    state.release_slot();
                    state.metrics().record_dequeue();

                    // Exit outranks queued work
                    if state.is_exiting() {
                        abandon(&state, job);
                        abandoned += 1;
                        break ExitReason::Signalled;
                    }
                    process(&state, job);
                }
                Ok(Envelope::Wake) => continue,
                Err(_) => break ExitReason::Closed,
            }
        };

        state.begin_exit();
        // After this no sender can slip a request in behind the drain
        state.close_admission();

        while let Ok(envelope) = rx.try_recv() {
            if let Envelope::Request(job) = envelope {
                state.release_slot();
                state.metrics().record_dequeue();
                abandon(&state, job);
                abandoned += 1;
            }
        }
        drop(rx);

        // Kick any sender still parked on a full queue; each one passes the slot on
        state.release_slot();
        state.mark_terminated();

        info!(
            manager = %name,
            reason = ?reason,
            abandoned = abandoned,
            completed = state.metrics().get_completed_count(),
            "Manager exiting"
        );
    }
}

fn process(state: &QueueState, mut job: Box<dyn Job>) {
    let request_id = job.id();
    let binding = job.binding();

    debug!(
        manager = %state.name(),
        request_id = %request_id,
        binding = binding,
        "Request dequeued"
    );

    let execution_start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| job.invoke()));
    let execution_time_us = execution_start.elapsed().as_micros() as u64;

    match result {
        Ok(Disposition::Succeeded) => {
            state.metrics().record_completion();
            debug!(
                manager = %state.name(),
                request_id = %request_id,
                binding = binding,
                execution_time_us = execution_time_us,
                "Handler execution complete"
            );
        }
        Ok(Disposition::Failed(message)) => {
            state.metrics().record_completion();
            state.metrics().record_failure();
            warn!(
                manager = %state.name(),
                request_id = %request_id,
                binding = binding,
                execution_time_us = execution_time_us,
                error = %message,
                "Handler returned an error"
            );
        }
        Err(panic) => {
            let panic_message = panic_message(panic.as_ref());
            state.metrics().record_panic();
            error!(
                manager = %state.name(),
                request_id = %request_id,
                binding = binding,
                panic_message = %panic_message,
                "Handler panicked - recovered"
            );
            job.record_panic(panic_message);
        }
    }

    // Delivery writes to an unbounded per-request channel and never waits on the
    // reader. A panic here (e.g. from a result's Drop) must not take the loop down;
    // the response then sees a closed channel.
    if catch_unwind(AssertUnwindSafe(move || job.deliver())).is_err() {
        error!(
            manager = %state.name(),
            request_id = %request_id,
            binding = binding,
            "Result delivery panicked - response abandoned"
        );
    }
}

fn abandon(state: &QueueState, job: Box<dyn Job>) {
    let request_id = job.id();
    state.metrics().record_abandon();
    debug!(
        manager = %state.name(),
        request_id = %request_id,
        binding = job.binding(),
        "Queued request abandoned at shutdown"
    );
    if catch_unwind(AssertUnwindSafe(move || job.abandon())).is_err() {
        error!(
            manager = %state.name(),
            request_id = %request_id,
            "Abandon notice panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Controls the lifetime of one manager.
///
/// Clones share the same manager. Calling [`exit`](ExitHandle::exit) on any clone
/// stops the loop: the in-flight handler (if any) finishes, queued requests fail with
/// [`RetrieveError::ShutdownAbandoned`](crate::RetrieveError::ShutdownAbandoned),
/// and further submissions fail with
/// [`EnqueueError::ManagerExited`](crate::EnqueueError::ManagerExited).
///
/// A handle can be created up front with [`ExitHandle::new`] and passed to
/// [`start`]; it controls nothing until then.
#[derive(Clone, Default)]
pub struct ExitHandle {
    inner: Arc<ExitInner>,
}

#[derive(Default)]
struct ExitInner {
    queue: OnceLock<Arc<QueueSender>>,
    done: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ExitHandle {
    /// Create a handle not yet attached to any manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the manager to stop. Idempotent; returns `true` only for the call that
    /// initiated shutdown, `false` for repeats and for detached handles.
    pub fn exit(&self) -> bool {
        let Some(queue) = self.inner.queue.get() else {
            warn!("Exit requested on a handle with no manager - ignored");
            return false;
        };

        if !queue.state().begin_exit() {
            debug!(manager = %queue.state().name(), "Exit already requested - ignored");
            return false;
        }

        info!(manager = %queue.state().name(), "Exit requested");
        queue.wake();
        true
    }

    /// Block until the dispatch loop has terminated. Returns immediately for a
    /// detached handle.
    pub fn wait(&self) {
        let mut done = self
            .inner
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = done.take() {
            // Never sent on: returns once the loop drops its sender
            let _ = rx.recv();
        }
    }

    /// Signal exit and wait for the loop to terminate.
    pub fn shutdown(&self) {
        self.exit();
        self.wait();
    }

    /// Whether the handle controls a manager whose loop has not terminated
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .queue
            .get()
            .is_some_and(|queue| !queue.state().is_terminated())
    }

    /// Counters of the attached manager
    #[must_use]
    pub fn metrics(&self) -> Option<&ManagerMetrics> {
        self.inner.queue.get().map(|queue| queue.state().metrics())
    }

    /// Name of the attached manager
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.queue.get().map(|queue| queue.state().name())
    }

    fn is_attached(&self) -> bool {
        self.inner.queue.get().is_some()
    }

    fn attach(&self, queue: Arc<QueueSender>, done: mpsc::Receiver<()>) -> bool {
        if self.inner.queue.set(queue).is_err() {
            return false;
        }
        *self
            .inner
            .done
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(done);
        true
    }
}

impl std::fmt::Debug for ExitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitHandle")
            .field("name", &self.name())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Binding, ResponseInterest};

    fn square() -> Binding<i64, i64> {
        Binding::new(|x: i64| Ok(x * x), ResponseInterest::WantResponse)
    }

    #[test]
    fn test_panic_message_payloads() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(static_str.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "kaboom");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_validate_leaves_bindings_unbound_on_error() {
        let good = square();
        let missing: Binding<i64, i64> = Binding::unset(ResponseInterest::WantResponse);

        let result = start(&[&good, &missing], None, None);
        assert_eq!(result.unwrap_err(), ConfigError::MissingHandler { index: 1 });
        assert!(!good.is_bound());
    }

    #[test]
    fn test_duplicate_binding_in_one_call() {
        let a = square();
        let b = a.clone();
        assert_eq!(
            start(&[&a, &b], None, None).unwrap_err(),
            ConfigError::AlreadyBound { index: 1 }
        );
        assert!(!a.is_bound());
    }

    #[test]
    fn test_concurrent_claim_leaves_other_bindings_free() {
        use crate::binding::sealed::Sealed;

        let x = square();
        let y = square();
        // Another start call has claimed `y` but not yet attached it
        assert!(y.reserve());

        assert_eq!(
            start(&[&x, &y], None, None).unwrap_err(),
            ConfigError::AlreadyBound { index: 1 }
        );
        assert!(!x.is_bound());

        // `x` was released and can still join a manager
        let exit = start(&[&x], None, None).unwrap();
        assert_eq!(x.send_recv(3).unwrap(), 9);
        exit.shutdown();

        y.release();
        let exit = start(&[&y], None, None).unwrap();
        assert!(y.is_bound());
        exit.shutdown();
    }

    #[test]
    fn test_detached_exit_handle() {
        let handle = ExitHandle::new();
        assert!(!handle.exit());
        assert!(!handle.is_running());
        assert!(handle.metrics().is_none());
        assert!(handle.name().is_none());
        handle.wait();
    }

    #[test]
    fn test_exit_is_idempotent_and_wait_returns() {
        let binding = square();
        let exit = start(&[&binding], None, Some(ManagerConfig::default().with_name("idempotent")))
            .unwrap();
        assert_eq!(exit.name(), Some("idempotent"));
        assert!(exit.is_running());

        assert!(exit.exit());
        assert!(!exit.exit());
        exit.wait();
        assert!(!exit.is_running());
        exit.wait();
    }
}
