//! # Response
//!
//! The caller-held handle returned by [`Binding::send`](crate::Binding::send) when
//! the binding wants results. It decouples "the dispatch loop has produced a result"
//! from "the caller has read it": the loop writes once into the response's private
//! unbounded channel and moves on, whether or not anyone is reading yet.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──(result observed by is_available)──► Ready ──(get)──► Consumed
//!    └─────────────────────────(get)──────────────────────────────────┘
//! ```
//!
//! `get` succeeds at most once. Every later call returns
//! [`RetrieveError::AlreadyConsumed`]; there is no way to re-arm a response.
//!
//! ## Caveats
//!
//! - A response dropped unread is harmless: the loop's write simply finds no reader.
//! - `get` blocks until the manager processes the request. Since handlers run one at a
//!   time, a handler that never returns stalls every outstanding response.
//!   [`get_timeout`](Response::get_timeout) bounds the wait without cancelling the
//!   request.

use crate::error::{HandlerError, RetrieveError};
use crate::request::Delivery;
use may::sync::mpsc;
use std::sync::mpsc::{RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Where a [`Response`] is in its lifecycle, as last observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Submitted; no result observed yet
    Pending,
    /// A result is buffered and the next `get` returns it without blocking
    Ready,
    /// `get` has returned; the result (if any) is in the response's fields
    Consumed,
}

/// Handle to the eventual result of one submission.
///
/// `C` is caller context echoed back untouched; it is never passed to the handler.
pub struct Response<I, O, C = ()> {
    context: C,
    input: I,
    rx: mpsc::Receiver<Delivery<O>>,
    buffered: Option<Delivery<O>>,
    outcome: Option<Result<O, HandlerError>>,
    consumed: bool,
}

impl<I, O, C> Response<I, O, C> {
    pub(crate) fn new(context: C, input: I, rx: mpsc::Receiver<Delivery<O>>) -> Self {
        Self {
            context,
            input,
            rx,
            buffered: None,
            outcome: None,
            consumed: false,
        }
    }

    /// Block until the result arrives, then store it in this response.
    ///
    /// # Errors
    ///
    /// - [`RetrieveError::AlreadyConsumed`] on every call after the first
    /// - [`RetrieveError::Abandoned`] if the result channel closed with no value
    /// - [`RetrieveError::ShutdownAbandoned`] if the manager exited before running the request
    pub fn get(&mut self) -> Result<(), RetrieveError> {
        if self.consumed {
            return Err(RetrieveError::AlreadyConsumed);
        }

        let delivery = match self.buffered.take() {
            Some(delivery) => delivery,
            None => {
                match self.rx.recv() {
                    Ok(delivery) => delivery,
                    Err(_) => return Err(self.close(RetrieveError::Abandoned)),
                }
            }
        };

        self.settle(delivery)
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    ///
    /// A timeout is not terminal: the request is still processed and a later call
    /// can return its result.
    pub fn get_timeout(&mut self, timeout: Duration) -> Result<(), RetrieveError> {
        if self.consumed {
            return Err(RetrieveError::AlreadyConsumed);
        }

        let delivery = match self.buffered.take() {
            Some(delivery) => delivery,
            None => {
                match self.rx.recv_timeout(timeout) {
                    Ok(delivery) => delivery,
                    Err(RecvTimeoutError::Timeout) => return Err(RetrieveError::Timeout),
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(self.close(RetrieveError::Abandoned))
                    }
                }
            }
        };

        self.settle(delivery)
    }

    /// Non-blocking check for a result.
    ///
    /// This is an approximation, not a synchronization primitive: `false` only means
    /// nothing had arrived at the instant of the call. A value observed here is kept
    /// so the following `get` returns it without blocking. Always `false` once the
    /// response is consumed.
    pub fn is_available(&mut self) -> bool {
        if self.consumed {
            return false;
        }
        if self.buffered.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(delivery) => {
                self.buffered = Some(delivery);
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    /// Lifecycle state as last observed. Does not poll the channel.
    #[must_use]
    pub fn state(&self) -> ResponseState {
        if self.consumed {
            ResponseState::Consumed
        } else if self.buffered.is_some() {
            ResponseState::Ready
        } else {
            ResponseState::Pending
        }
    }

    /// Caller context supplied at submission
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Input originally submitted
    pub fn input(&self) -> &I {
        &self.input
    }

    /// Handler output, once `get` has succeeded and the handler returned `Ok`
    pub fn data(&self) -> Option<&O> {
        self.outcome.as_ref().and_then(|r| r.as_ref().ok())
    }

    /// Handler error, once `get` has succeeded and the handler failed or panicked
    pub fn error(&self) -> Option<&HandlerError> {
        self.outcome.as_ref().and_then(|r| r.as_ref().err())
    }

    /// Full result, once `get` has succeeded
    pub fn outcome(&self) -> Option<&Result<O, HandlerError>> {
        self.outcome.as_ref()
    }

    /// Move the result out, leaving the response consumed and empty.
    pub fn take_outcome(&mut self) -> Option<Result<O, HandlerError>> {
        self.outcome.take()
    }

    /// Split the response into its context and result.
    pub fn into_parts(self) -> (C, Option<Result<O, HandlerError>>) {
        (self.context, self.outcome)
    }

    fn settle(&mut self, delivery: Delivery<O>) -> Result<(), RetrieveError> {
        match delivery {
            Delivery::Completed(outcome) => {
                self.outcome = Some(outcome);
                self.consumed = true;
                Ok(())
            }
            Delivery::ShutdownAbandoned => Err(self.close(RetrieveError::ShutdownAbandoned)),
        }
    }

    fn close(&mut self, err: RetrieveError) -> RetrieveError {
        self.consumed = true;
        err
    }
}

impl<I, O, C> std::fmt::Debug for Response<I, O, C>
where
    I: std::fmt::Debug,
    O: std::fmt::Debug,
    C: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("state", &self.state())
            .field("context", &self.context)
            .field("input", &self.input)
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(input: i64, context: i64) -> (mpsc::Sender<Delivery<i64>>, Response<i64, i64, i64>) {
        let (tx, rx) = mpsc::channel();
        (tx, Response::new(context, input, rx))
    }

    #[test]
    fn test_get_succeeds_exactly_once() {
        let (tx, mut resp) = pending(5, 25);
        tx.send(Delivery::Completed(Ok(25))).unwrap();

        assert!(resp.get().is_ok());
        assert_eq!(resp.data(), Some(resp.context()));
        assert_eq!(*resp.input(), 5);
        assert!(resp.error().is_none());
        assert_eq!(resp.state(), ResponseState::Consumed);

        assert_eq!(resp.get(), Err(RetrieveError::AlreadyConsumed));
        assert_eq!(resp.get(), Err(RetrieveError::AlreadyConsumed));
        // Result survives the failed retries
        assert_eq!(resp.data(), Some(&25));
    }

    #[test]
    fn test_is_available_buffers_value() {
        let (tx, mut resp) = pending(3, 9);
        assert!(!resp.is_available());
        assert_eq!(resp.state(), ResponseState::Pending);

        tx.send(Delivery::Completed(Ok(9))).unwrap();
        assert!(resp.is_available());
        assert!(resp.is_available());
        assert_eq!(resp.state(), ResponseState::Ready);

        assert!(resp.get().is_ok());
        assert_eq!(resp.data(), Some(&9));
        assert!(!resp.is_available());
    }

    #[test]
    fn test_closed_channel_is_abandoned() {
        let (tx, mut resp) = pending(1, 1);
        drop(tx);
        assert_eq!(resp.get(), Err(RetrieveError::Abandoned));
        assert_eq!(resp.get(), Err(RetrieveError::AlreadyConsumed));
    }

    #[test]
    fn test_consumed_response_ignores_later_deliveries() {
        let (tx, mut resp) = pending(2, 4);
        tx.send(Delivery::Completed(Ok(4))).unwrap();
        assert!(resp.get().is_ok());

        // Nothing after the first result is read off the channel
        tx.send(Delivery::Completed(Ok(99))).unwrap();
        assert!(!resp.is_available());
        assert_eq!(resp.get(), Err(RetrieveError::AlreadyConsumed));
        assert_eq!(
            resp.get_timeout(Duration::from_millis(1)),
            Err(RetrieveError::AlreadyConsumed)
        );
        assert_eq!(resp.data(), Some(&4));
        assert_eq!(resp.state(), ResponseState::Consumed);
    }

    #[test]
    fn test_shutdown_abandonment() {
        let (tx, mut resp) = pending(1, 1);
        tx.send(Delivery::ShutdownAbandoned).unwrap();
        assert_eq!(resp.get(), Err(RetrieveError::ShutdownAbandoned));
        assert_eq!(resp.state(), ResponseState::Consumed);
        assert!(resp.outcome().is_none());
    }

    #[test]
    fn test_handler_error_is_data_not_retrieval_failure() {
        let (tx, mut resp) = pending(1, 1);
        tx.send(Delivery::Completed(Err(HandlerError::Panicked {
            message: "boom".to_string(),
        })))
        .unwrap();

        assert!(resp.get().is_ok());
        assert!(resp.data().is_none());
        assert!(resp.error().is_some_and(HandlerError::is_panic));
    }

    #[test]
    fn test_get_timeout_is_not_terminal() {
        let (tx, mut resp) = pending(4, 16);
        assert_eq!(
            resp.get_timeout(Duration::from_millis(10)),
            Err(RetrieveError::Timeout)
        );
        assert_eq!(resp.state(), ResponseState::Pending);

        tx.send(Delivery::Completed(Ok(16))).unwrap();
        assert!(resp.get_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(resp.data(), Some(&16));
    }

    #[test]
    fn test_into_parts() {
        let (tx, mut resp) = pending(2, 4);
        tx.send(Delivery::Completed(Ok(4))).unwrap();
        resp.get().unwrap();
        let (context, outcome) = resp.into_parts();
        assert_eq!(context, 4);
        assert_eq!(outcome.unwrap().unwrap(), 4);
    }
}
