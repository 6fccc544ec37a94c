//! Internal unit of work carried through the request queue.
//!
//! A [`Request`] is created per submission and holds the payload, the handler copied
//! from its binding, and, when the binding wants responses, the sending half of a
//! private result channel. The dispatch loop is the single writer of that channel and
//! the caller's [`Response`](crate::Response) the single reader.

use crate::error::HandlerError;
use crate::ids::RequestId;
use may::sync::mpsc;
use std::sync::Arc;

/// Shared, type-erased-at-the-queue handler function of one binding
pub(crate) type HandlerFn<I, O> = Arc<dyn Fn(I) -> anyhow::Result<O> + Send + Sync + 'static>;

/// Message written once on a request's private result channel
pub(crate) enum Delivery<O> {
    /// The handler ran; success, handler error or recovered panic
    Completed(Result<O, HandlerError>),
    /// The request was still queued when the manager exited
    ShutdownAbandoned,
}

/// How a handler invocation ended, for logging and metrics
#[derive(Debug)]
pub(crate) enum Disposition {
    Succeeded,
    Failed(String),
}

/// Queue-facing view of a request. Erases the payload and result types so
/// bindings with different handler signatures can share one queue.
pub(crate) trait Job: Send {
    fn id(&self) -> RequestId;

    /// Index of the originating binding within its manager
    fn binding(&self) -> usize;

    /// Run the handler and hold on to its result. May unwind if the handler panics;
    /// the dispatch loop owns the fault boundary.
    fn invoke(&mut self) -> Disposition;

    /// Record a recovered panic as the result.
    fn record_panic(&mut self, message: String);

    /// Send the held result to the waiting response, if any.
    fn deliver(self: Box<Self>);

    /// Fail the waiting response because the request will never run.
    fn abandon(self: Box<Self>);
}

pub(crate) struct Request<I, O> {
    id: RequestId,
    binding: usize,
    payload: Option<I>,
    handler: HandlerFn<I, O>,
    reply: Option<mpsc::Sender<Delivery<O>>>,
    outcome: Option<Result<O, HandlerError>>,
}

impl<I, O> Request<I, O> {
    pub(crate) fn new(
        binding: usize,
        payload: I,
        handler: HandlerFn<I, O>,
        reply: Option<mpsc::Sender<Delivery<O>>>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            binding,
            payload: Some(payload),
            handler,
            reply,
            outcome: None,
        }
    }
}

impl<I, O> Job for Request<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn id(&self) -> RequestId {
        self.id
    }

    fn binding(&self) -> usize {
        self.binding
    }

    fn invoke(&mut self) -> Disposition {
        let Some(payload) = self.payload.take() else {
            return Disposition::Failed("request already processed".to_string());
        };

        match (self.handler)(payload) {
            Ok(data) => {
                self.outcome = Some(Ok(data));
                Disposition::Succeeded
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.outcome = Some(Err(HandlerError::Failed(err)));
                Disposition::Failed(message)
            }
        }
    }

    fn record_panic(&mut self, message: String) {
        self.outcome = Some(Err(HandlerError::Panicked { message }));
    }

    fn deliver(self: Box<Self>) {
        let Request {
            id, reply, outcome, ..
        } = *self;

        let (Some(reply), Some(outcome)) = (reply, outcome) else {
            return;
        };

        // The receiver is gone only if the caller dropped its response unread
        if reply.send(Delivery::Completed(outcome)).is_err() {
            tracing::debug!(request_id = %id, "Response dropped before delivery - result discarded");
        }
    }

    fn abandon(self: Box<Self>) {
        let Request { id, reply, .. } = *self;
        if let Some(reply) = reply {
            if reply.send(Delivery::ShutdownAbandoned).is_err() {
                tracing::debug!(request_id = %id, "Response dropped before abandonment notice");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> HandlerFn<i64, i64> {
        Arc::new(|x: i64| Ok(x * x))
    }

    #[test]
    fn test_invoke_then_deliver() {
        let (tx, rx) = mpsc::channel();
        let mut job: Box<dyn Job> = Box::new(Request::new(3, 7, square(), Some(tx)));
        assert_eq!(job.binding(), 3);
        assert!(matches!(job.invoke(), Disposition::Succeeded));
        job.deliver();

        match rx.recv().unwrap() {
            Delivery::Completed(Ok(v)) => assert_eq!(v, 49),
            _ => panic!("expected a completed delivery"),
        }
    }

    #[test]
    fn test_handler_error_is_delivered_as_data() {
        let failing: HandlerFn<i64, i64> = Arc::new(|_| Err(anyhow::anyhow!("negative input")));
        let (tx, rx) = mpsc::channel();
        let mut job: Box<dyn Job> = Box::new(Request::new(0, -1, failing, Some(tx)));

        match job.invoke() {
            Disposition::Failed(message) => assert_eq!(message, "negative input"),
            Disposition::Succeeded => panic!("handler should have failed"),
        }
        job.deliver();

        match rx.recv().unwrap() {
            Delivery::Completed(Err(HandlerError::Failed(err))) => {
                assert_eq!(err.to_string(), "negative input")
            }
            _ => panic!("expected a handler failure"),
        }
    }

    #[test]
    fn test_second_invoke_does_not_rerun_handler() {
        let mut job = Request::new(0, 2, square(), None);
        assert!(matches!(job.invoke(), Disposition::Succeeded));
        assert!(matches!(job.invoke(), Disposition::Failed(_)));
    }

    #[test]
    fn test_abandon_notifies_response() {
        let (tx, rx) = mpsc::channel();
        let job: Box<dyn Job> = Box::new(Request::new(0, 2, square(), Some(tx)));
        job.abandon();
        assert!(matches!(rx.recv().unwrap(), Delivery::ShutdownAbandoned));
    }

    #[test]
    fn test_deliver_without_reply_channel_is_silent() {
        let mut job: Box<dyn Job> = Box::new(Request::new(0, 2, square(), None));
        job.invoke();
        job.deliver();
    }
}
