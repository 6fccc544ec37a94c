//! # Request Queue
//!
//! The bounded FIFO shared by every binding of one manager.
//!
//! - **Bounded**: a counting semaphore holds one slot per queue position. Senders take
//!   a slot before enqueuing and the dispatch loop returns it on dequeue, so a full
//!   queue blocks senders until the loop catches up.
//! - **FIFO**: all bindings feed the same `may` MPSC channel, so requests are dequeued
//!   in submission order regardless of which binding produced them.
//! - **Exit priority**: the exit signal travels outside the slot accounting, so it is
//!   never stuck behind a full queue.
//! - **Metrics**: enqueue, dequeue, completion, failure, panic and abandon counters.

use crate::error::EnqueueError;
use crate::request::Job;
use may::sync::{mpsc, Semphore};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Item travelling through the request channel
pub(crate) enum Envelope {
    /// Work for the dispatch loop
    Request(Box<dyn Job>),
    /// Wakes the loop so it observes the exit flag
    Wake,
}

/// How a sender behaves when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Block until a slot frees up
    Wait,
    /// Fail with [`EnqueueError::QueueFull`]
    Try,
}

/// Counters for one manager. All values are approximate under concurrency.
#[derive(Debug, Default)]
pub struct ManagerMetrics {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
}

impl ManagerMetrics {
    pub(crate) fn record_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dequeue(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandon(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests currently waiting in the queue
    #[must_use]
    pub fn queue_depth(&self) -> u64 {
        self.get_enqueued_count()
            .saturating_sub(self.dequeued.load(Ordering::Relaxed))
    }

    /// Requests accepted onto the queue
    #[must_use]
    pub fn get_enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Handler invocations that returned, successfully or with an error
    #[must_use]
    pub fn get_completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Handler invocations that returned an error
    #[must_use]
    pub fn get_failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Handler invocations that panicked
    #[must_use]
    pub fn get_panicked_count(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Queued requests dropped when the manager exited
    #[must_use]
    pub fn get_abandoned_count(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }
}

/// State shared by the dispatch loop and every sender
pub(crate) struct QueueState {
    name: String,
    capacity: usize,
    slots: Semphore,
    exiting: AtomicBool,
    /// Held by senders across the final exit check and the channel push; set to
    /// `true` by the loop before its shutdown drain
    admission_closed: Mutex<bool>,
    terminated: AtomicBool,
    metrics: ManagerMetrics,
}

impl QueueState {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn metrics(&self) -> &ManagerMetrics {
        &self.metrics
    }

    /// Returns `true` only for the call that flipped the flag.
    pub(crate) fn begin_exit(&self) -> bool {
        !self.exiting.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Stop admitting requests. Once this returns, every request that was accepted
    /// is already in the channel, so a following drain sees all of them.
    pub(crate) fn close_admission(&self) {
        *self
            .admission_closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub(crate) fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Hand a queue position back after a dequeue.
    pub(crate) fn release_slot(&self) {
        self.slots.post();
    }
}

/// Sending half of the queue, shared by bindings and exit handles.
///
/// Dropping every `QueueSender` closes the channel, which the dispatch loop treats
/// as a graceful shutdown.
pub(crate) struct QueueSender {
    state: Arc<QueueState>,
    tx: Mutex<mpsc::Sender<Envelope>>,
}

impl QueueSender {
    pub(crate) fn state(&self) -> &Arc<QueueState> {
        &self.state
    }

    /// Enqueue a job, honouring the capacity bound.
    pub(crate) fn push(&self, job: Box<dyn Job>, admission: Admission) -> Result<(), EnqueueError> {
        if self.state.is_exiting() {
            return Err(EnqueueError::ManagerExited);
        }

        match admission {
            Admission::Wait => self.state.slots.wait(),
            Admission::Try => {
                if !self.state.slots.try_wait() {
                    return Err(EnqueueError::QueueFull);
                }
            }
        }

        // The final check and the push happen under the admission lock, so the loop's
        // shutdown drain cannot run between them.
        let closed = self
            .state
            .admission_closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Exit may have been signalled while we waited; pass the slot on so the
        // next blocked sender wakes up and sees the flag too.
        if *closed || self.state.is_exiting() {
            drop(closed);
            self.state.release_slot();
            return Err(EnqueueError::ManagerExited);
        }

        self.state.metrics.record_enqueue();
        if !self.send(Envelope::Request(job)) {
            drop(closed);
            self.state.metrics.record_dequeue();
            self.state.release_slot();
            return Err(EnqueueError::ManagerExited);
        }
        Ok(())
    }

    /// Wake the dispatch loop without taking a slot.
    pub(crate) fn wake(&self) {
        if !self.send(Envelope::Wake) {
            tracing::debug!(manager = %self.state.name, "Wake skipped - dispatch loop already gone");
        }
    }

    /// Returns `false` when the receiving side has been dropped.
    fn send(&self, envelope: Envelope) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(envelope)
            .is_ok()
    }
}

/// Create a queue holding at most `capacity` requests.
pub(crate) fn bounded(
    name: String,
    capacity: usize,
) -> (Arc<QueueSender>, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel::<Envelope>();
    let state = Arc::new(QueueState {
        name,
        capacity,
        slots: Semphore::new(capacity),
        exiting: AtomicBool::new(false),
        admission_closed: Mutex::new(false),
        terminated: AtomicBool::new(false),
        metrics: ManagerMetrics::default(),
    });
    let sender = Arc::new(QueueSender {
        state,
        tx: Mutex::new(tx),
    });
    (sender, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_metrics() {
        let metrics = ManagerMetrics::default();

        assert_eq!(metrics.queue_depth(), 0);
        assert_eq!(metrics.get_enqueued_count(), 0);
        assert_eq!(metrics.get_completed_count(), 0);

        metrics.record_enqueue();
        metrics.record_enqueue();
        assert_eq!(metrics.get_enqueued_count(), 2);
        assert_eq!(metrics.queue_depth(), 2);

        metrics.record_dequeue();
        metrics.record_completion();
        metrics.record_failure();
        assert_eq!(metrics.queue_depth(), 1);
        assert_eq!(metrics.get_completed_count(), 1);
        assert_eq!(metrics.get_failed_count(), 1);

        metrics.record_dequeue();
        metrics.record_panic();
        metrics.record_abandon();
        assert_eq!(metrics.queue_depth(), 0);
        assert_eq!(metrics.get_panicked_count(), 1);
        assert_eq!(metrics.get_abandoned_count(), 1);
    }

    #[test]
    fn test_queue_depth_never_underflows() {
        let metrics = ManagerMetrics::default();
        metrics.record_dequeue();
        assert_eq!(metrics.queue_depth(), 0);
    }

    #[test]
    fn test_begin_exit_is_idempotent() {
        let (sender, _rx) = bounded("test".to_string(), 4);
        let state = sender.state();
        assert_eq!(state.capacity(), 4);
        assert!(!state.is_exiting());
        assert!(state.begin_exit());
        assert!(!state.begin_exit());
        assert!(state.is_exiting());
    }

    #[test]
    fn test_closed_admission_rejects_push() {
        use crate::request::{HandlerFn, Request};

        let (sender, rx) = bounded("test".to_string(), 2);
        let handler: HandlerFn<u8, u8> = Arc::new(|x: u8| -> anyhow::Result<u8> { Ok(x) });
        sender.state().close_admission();

        let job = Box::new(Request::new(0, 1_u8, Arc::clone(&handler), None));
        assert_eq!(
            sender.push(job, Admission::Try),
            Err(EnqueueError::ManagerExited)
        );
        assert!(rx.try_recv().is_err());
        // The slot taken for the rejected push was handed back
        let job = Box::new(Request::new(0, 2_u8, handler, None));
        assert_eq!(
            sender.push(job, Admission::Try),
            Err(EnqueueError::ManagerExited)
        );
        assert_eq!(sender.state().metrics().get_enqueued_count(), 0);
    }

    #[test]
    fn test_wake_does_not_consume_capacity() {
        let (sender, rx) = bounded("test".to_string(), 1);
        sender.wake();
        sender.wake();
        assert!(matches!(rx.recv(), Ok(Envelope::Wake)));
        assert!(matches!(rx.recv(), Ok(Envelope::Wake)));
        assert_eq!(sender.state().metrics().queue_depth(), 0);
    }
}
