//! # Bindings
//!
//! A [`Binding`] pairs one handler function with a [`ResponseInterest`]. It starts out
//! unbound; [`start`](crate::start) binds it to exactly one manager, after which
//! [`send`](Binding::send) enqueues work on that manager's queue.
//!
//! Bindings are homogeneous in their own input and output types. Bindings with
//! different types can share a manager: the queue only sees type-erased requests.
//!
//! ```rust,no_run
//! use chanmgr::{start, Binding, ResponseInterest};
//!
//! let reverse = Binding::new(
//!     |s: String| Ok(s.chars().rev().collect::<String>()),
//!     ResponseInterest::WantResponse,
//! );
//! let exit = start(&[&reverse], None, None)?;
//!
//! assert_eq!(reverse.send_recv("Hello".to_string())?, "olleH");
//! exit.exit();
//! # Ok::<(), chanmgr::Error>(())
//! ```

use crate::error::{EnqueueError, Error, RetrieveError};
use crate::queue::{Admission, QueueSender};
use crate::request::{HandlerFn, Request};
use crate::response::Response;
use may::sync::mpsc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Whether callers expect results back from a binding's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseInterest {
    /// `send` returns a [`Response`] that receives the handler's result
    WantResponse,
    /// Results are discarded; `send` returns `None`
    IgnoreResponse,
}

/// Connection from a bound binding to its manager's queue
pub struct BindingLink {
    pub(crate) queue: Arc<QueueSender>,
    pub(crate) index: usize,
}

struct BindingInner<I, O> {
    handler: Option<HandlerFn<I, O>>,
    interest: ResponseInterest,
    /// Claimed by a `start` call; attaching follows once the loop is running
    reserved: AtomicBool,
    link: OnceLock<BindingLink>,
}

/// A handler registered (or to be registered) with a manager.
///
/// Cloning is cheap and every clone shares the same registration: once one clone is
/// bound, all of them are.
pub struct Binding<I, O> {
    inner: Arc<BindingInner<I, O>>,
}

impl<I, O> Clone for Binding<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> Binding<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create an unbound binding for `handler`.
    pub fn new<F>(handler: F, interest: ResponseInterest) -> Self
    where
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        let handler: HandlerFn<I, O> = Arc::new(handler);
        Self::from_parts(Some(handler), interest)
    }

    /// Create a binding with no handler. [`start`](crate::start) rejects it; it exists
    /// for callers that assemble bindings from optional parts.
    #[must_use]
    pub fn unset(interest: ResponseInterest) -> Self {
        Self::from_parts(None, interest)
    }

    fn from_parts(handler: Option<HandlerFn<I, O>>, interest: ResponseInterest) -> Self {
        Self {
            inner: Arc::new(BindingInner {
                handler,
                interest,
                reserved: AtomicBool::new(false),
                link: OnceLock::new(),
            }),
        }
    }

    /// Submit `data` for processing, blocking while the manager's queue is full.
    ///
    /// Returns `Ok(Some(response))` when the binding wants responses and `Ok(None)`
    /// otherwise. `context` is stored in the response and never reaches the handler.
    ///
    /// # Errors
    ///
    /// - [`EnqueueError::Unbound`] if the binding was never started or has no handler
    /// - [`EnqueueError::ManagerExited`] if the manager is shutting down or gone
    pub fn send<C>(&self, data: I, context: C) -> Result<Option<Response<I, O, C>>, EnqueueError>
    where
        I: Clone,
    {
        self.submit(data, context, Admission::Wait)
    }

    /// Submit `data` without waiting for queue space.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`EnqueueError::QueueFull`] when no slot is free.
    pub fn try_send<C>(
        &self,
        data: I,
        context: C,
    ) -> Result<Option<Response<I, O, C>>, EnqueueError>
    where
        I: Clone,
    {
        self.submit(data, context, Admission::Try)
    }

    /// Submit `data` and block until the handler's result is available.
    ///
    /// # Errors
    ///
    /// Any [`EnqueueError`] or [`RetrieveError`] from the two steps, or
    /// [`Error::Handler`] when the handler itself failed or panicked.
    pub fn send_recv(&self, data: I) -> Result<O, Error>
    where
        I: Clone,
    {
        if self.inner.interest == ResponseInterest::IgnoreResponse {
            return Err(EnqueueError::NoResponseWanted.into());
        }

        let mut response = self
            .send(data, ())?
            .ok_or(EnqueueError::NoResponseWanted)?;
        response.get()?;

        match response.take_outcome() {
            Some(Ok(data)) => Ok(data),
            Some(Err(err)) => Err(err.into()),
            None => Err(RetrieveError::Abandoned.into()),
        }
    }

    fn submit<C>(
        &self,
        data: I,
        context: C,
        admission: Admission,
    ) -> Result<Option<Response<I, O, C>>, EnqueueError>
    where
        I: Clone,
    {
        let link = self.inner.link.get().ok_or(EnqueueError::Unbound)?;
        let handler = self.inner.handler.as_ref().ok_or(EnqueueError::Unbound)?;

        match self.inner.interest {
            ResponseInterest::IgnoreResponse => {
                let request = Request::new(link.index, data, Arc::clone(handler), None);
                link.queue.push(Box::new(request), admission)?;
                Ok(None)
            }
            ResponseInterest::WantResponse => {
                let (reply_tx, reply_rx) = mpsc::channel();
                let input = data.clone();
                let request = Request::new(link.index, data, Arc::clone(handler), Some(reply_tx));
                link.queue.push(Box::new(request), admission)?;
                Ok(Some(Response::new(context, input, reply_rx)))
            }
        }
    }
}

impl<I, O> Binding<I, O> {
    /// Response interest chosen at construction
    #[must_use]
    pub fn interest(&self) -> ResponseInterest {
        self.inner.interest
    }

    /// Whether this binding belongs to a manager
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.inner.link.get().is_some()
    }
}

impl<I, O> std::fmt::Debug for Binding<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("interest", &self.inner.interest)
            .field("has_handler", &self.inner.handler.is_some())
            .field("bound", &self.is_bound())
            .finish()
    }
}

pub mod sealed {
    pub trait Sealed {
        /// Stable identity shared by all clones, used to spot duplicates
        fn identity(&self) -> usize;

        /// Claim the binding for one `start` call. Returns `false` if another call
        /// already holds it.
        fn reserve(&self) -> bool;

        /// Undo a [`reserve`](Sealed::reserve) whose `start` call failed.
        fn release(&self);

        /// Record the manager link. Only the call holding the reservation attaches.
        fn attach(&self, link: crate::binding::BindingLink);
    }
}

/// Type-erased view of a [`Binding`] used by [`start`](crate::start) so bindings
/// with different input and output types can be registered together.
///
/// This trait is sealed; `Binding` is its only implementor.
pub trait Bindable: sealed::Sealed + Send + Sync {
    /// Whether a handler is present
    fn has_handler(&self) -> bool;

    /// Whether the binding already belongs to a manager
    fn is_bound(&self) -> bool;
}

impl<I, O> sealed::Sealed for Binding<I, O> {
    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    fn reserve(&self) -> bool {
        self.inner
            .reserved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        if self.inner.link.get().is_none() {
            self.inner.reserved.store(false, Ordering::Release);
        }
    }

    fn attach(&self, link: BindingLink) {
        if self.inner.link.set(link).is_err() {
            tracing::error!("Binding attached twice - keeping the first manager");
        }
    }
}

impl<I, O> Bindable for Binding<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn has_handler(&self) -> bool {
        self.inner.handler.is_some()
    }

    fn is_bound(&self) -> bool {
        Binding::is_bound(self)
    }
}
