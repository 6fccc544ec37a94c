//! # chanmgr
//!
//! **chanmgr** serializes work from many concurrent producers through a single
//! consumer loop, built on the `may` coroutine runtime.
//!
//! ## Overview
//!
//! Callers register typed handler functions as [`Binding`]s and [`start`] a manager
//! over them. From then on any thread or coroutine can `send` data through a binding;
//! the manager queues it in a bounded FIFO and runs handlers strictly one at a time.
//! Callers that want results get a [`Response`] back and read it whenever they like.
//!
//! ## Architecture
//!
//! - **[`Binding`]** - a handler plus its [`ResponseInterest`]; the producer-facing API
//! - **`manager`** - validation, the dispatch loop and the [`ExitHandle`]
//! - **[`Response`]** - a one-shot, read-exactly-once handle to a result
//! - **[`config`]** - queue capacity and coroutine stack size
//! - **[`logging`]** - `tracing` subscriber setup for applications
//! - **[`cli`]** - the `chanmgr` demo binary
//!
//! ```text
//!  producers                    manager coroutine
//!  ─────────                    ─────────────────
//!  binding.send(x) ──┐
//!  binding.send(y) ──┼──► bounded FIFO ──► handler(x) ──► response(x)
//!  other.send(z)  ───┘     (capacity)      handler(y) ──► response(y)
//!                                          handler(z) ──► (discarded)
//! ```
//!
//! ## Guarantees
//!
//! 1. **Serialized execution**: at most one handler runs at any time per manager
//! 2. **FIFO**: requests run in the order they were enqueued, across all bindings
//! 3. **Fault isolation**: a panicking handler becomes an error result; the loop survives
//! 4. **Backpressure**: `send` blocks while the queue is full
//! 5. **One-shot results**: `Response::get` succeeds once; later calls fail
//!
//! ## Quick Start
//!
//! ```no_run
//! use chanmgr::{start, Binding, ResponseInterest};
//!
//! let reverse = Binding::new(
//!     |s: String| Ok(s.chars().rev().collect::<String>()),
//!     ResponseInterest::WantResponse,
//! );
//! let exit = start(&[&reverse], None, None)?;
//!
//! let mut response = reverse.send("Hello".to_string(), ())?.expect("wants responses");
//! response.get()?;
//! assert_eq!(response.data().map(String::as_str), Some("olleH"));
//!
//! exit.shutdown();
//! # Ok::<(), chanmgr::Error>(())
//! ```
//!
//! ## Runtime Considerations
//!
//! The dispatch loop runs in a `may` coroutine, not on tokio:
//!
//! - Stack size is configurable via the `CHANMGR_STACK_SIZE` environment variable
//! - Handlers run on the loop's coroutine and should not block outside `may` primitives
//! - A handler that never returns stalls the whole manager

pub mod cli;
pub mod config;
mod error;
pub mod ids;
pub mod logging;

mod binding;
mod manager;
mod queue;
mod request;
mod response;

pub use binding::{Bindable, Binding, ResponseInterest};
pub use config::ManagerConfig;
pub use error::{ConfigError, EnqueueError, Error, HandlerError, Result, RetrieveError};
pub use ids::RequestId;
pub use manager::{start, ExitHandle};
pub use queue::ManagerMetrics;
pub use response::{Response, ResponseState};
