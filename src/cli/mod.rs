//! # CLI Module
//!
//! Command-line front end for the `chanmgr` binary. Each command starts a manager,
//! pushes a small workload through it and shuts it down again.
//!
//! ## Commands
//!
//! ### `reverse`
//!
//! Reverse a string through a single binding:
//!
//! ```bash
//! chanmgr reverse Hello
//! # olleH
//! ```
//!
//! ### `squares`
//!
//! Submit `0..count` to a squaring handler, passing `i * i` as each request's
//! context, and check every result against its context:
//!
//! ```bash
//! chanmgr squares --count 100000 --capacity 1000 --json
//! ```
//!
//! Options:
//! - `--count <N>` - Number of requests (default: 10000)
//! - `--capacity <C>` - Queue capacity, 1-10000 (default: 1000)
//! - `--json` - Print the summary as JSON
//!
//! ## Usage from Code
//!
//! ```rust,ignore
//! use chanmgr::cli::{run_cli, Cli};
//! use clap::Parser;
//!
//! run_cli(Cli::parse())?;
//! ```

mod commands;

#[cfg(test)]
mod tests;

pub use commands::{reverse, run_cli, squares, Cli, Commands, SquaresSummary};
