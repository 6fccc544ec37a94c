//! # Manager Module
//!
//! The manager owns one bounded request queue and the single dispatch loop that
//! drains it. It is the only place where ordering and fault isolation are decided.
//!
//! ## Overview
//!
//! [`start`] validates a set of bindings, binds them to a new manager, and spawns
//! the loop on a `may` coroutine. The loop then:
//! - Dequeues requests in strict FIFO order across every binding it serves
//! - Runs exactly one handler at a time, so handlers never overlap
//! - Contains handler panics and turns them into error results
//! - Writes each result once to the request's private channel, without waiting on
//!   the reader
//! - Stops when signalled through its [`ExitHandle`], or when every binding and exit
//!   handle has been dropped
//!
//! ## Request Flow
//!
//! 1. Caller calls `Binding::send(data, context)`
//! 2. The request takes a queue slot (blocking while the queue is full) and is enqueued
//! 3. The loop dequeues it, returns the slot and invokes the handler
//! 4. The result is written to the request's private channel
//! 5. The caller's `Response::get` reads it, at any later time
//!
//! ## Shutdown
//!
//! `ExitHandle::exit` outranks queued work. The handler running at that moment
//! completes normally. Requests still queued are failed with
//! `RetrieveError::ShutdownAbandoned`, so no response waits forever on a dead manager,
//! and senders blocked on a full queue are released with `EnqueueError::ManagerExited`.
//! A manager cannot be restarted; start a new one with fresh bindings.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chanmgr::{start, Binding, ManagerConfig, ResponseInterest};
//!
//! let square = Binding::new(|x: u64| Ok(x * x), ResponseInterest::WantResponse);
//! let exit = start(
//!     &[&square],
//!     None,
//!     Some(ManagerConfig::default().with_queue_capacity(1000)),
//! )?;
//!
//! let mut responses = Vec::new();
//! for i in 0..100 {
//!     responses.extend(square.send(i, i * i)?);
//! }
//! for mut response in responses {
//!     response.get()?;
//!     assert_eq!(response.data(), Some(response.context()));
//! }
//!
//! exit.shutdown();
//! # Ok::<(), chanmgr::Error>(())
//! ```

mod core;

pub use core::{start, ExitHandle};
