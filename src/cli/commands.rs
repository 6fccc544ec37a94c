use crate::{start, Binding, ManagerConfig, ResponseInterest};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::time::Instant;

/// Command-line interface for chanmgr
///
/// Runs small workloads through a manager to demonstrate and smoke-test the
/// dispatch loop.
#[derive(Parser)]
#[command(name = "chanmgr")]
#[command(about = "Serialized work dispatch demo", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Reverse a string through a single-binding manager
    Reverse {
        /// Text to reverse
        text: String,
    },
    /// Square 0..count through a manager and check every result against its context
    Squares {
        /// Number of requests to submit
        #[arg(short = 'n', long, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..=1_000_000))]
        count: u64,

        /// Queue capacity of the manager (1-10000)
        #[arg(short, long, default_value_t = 1000)]
        capacity: usize,

        /// Print the summary as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Outcome of a `squares` run
#[derive(Debug, Clone, Serialize)]
pub struct SquaresSummary {
    pub submitted: u64,
    pub verified: u64,
    pub mismatched: u64,
    pub queue_capacity: usize,
    pub elapsed_ms: u128,
    pub requests_per_sec: f64,
}

/// Reverse `text` through a freshly started manager.
///
/// # Errors
///
/// Propagates setup, submission and retrieval failures.
pub fn reverse(text: &str) -> Result<String> {
    let binding = Binding::new(
        |s: String| Ok(s.chars().rev().collect::<String>()),
        ResponseInterest::WantResponse,
    );
    let exit = start(
        &[&binding],
        None,
        Some(ManagerConfig::from_env().with_name("reverse")),
    )?;

    let reversed = binding.send_recv(text.to_string());
    exit.shutdown();
    Ok(reversed?)
}

/// Submit `0..count` to a squaring handler with `context = i * i`, then check that
/// every response's data equals its context.
///
/// # Errors
///
/// Fails on an invalid capacity or if the manager stops accepting work.
pub fn squares(count: u64, capacity: usize) -> Result<SquaresSummary> {
    let binding = Binding::new(
        |x: u64| {
            x.checked_mul(x)
                .with_context(|| format!("square of {x} overflows u64"))
        },
        ResponseInterest::WantResponse,
    );
    let config = ManagerConfig::from_env()
        .with_name("squares")
        .with_queue_capacity(capacity);
    let exit = start(&[&binding], None, Some(config))?;

    let started = Instant::now();
    let mut responses = Vec::with_capacity(usize::try_from(count).unwrap_or_default());
    for i in 0..count {
        let response = binding
            .send(i, i * i)
            .with_context(|| format!("failed to submit request {i}"))?;
        responses.extend(response);
    }

    let mut verified = 0;
    let mut mismatched = 0;
    for mut response in responses {
        match response.get() {
            Ok(()) if response.data() == Some(response.context()) => verified += 1,
            _ => mismatched += 1,
        }
    }
    let elapsed = started.elapsed();
    exit.shutdown();

    let secs = elapsed.as_secs_f64();
    Ok(SquaresSummary {
        submitted: count,
        verified,
        mismatched,
        queue_capacity: capacity,
        elapsed_ms: elapsed.as_millis(),
        requests_per_sec: if secs > 0.0 { count as f64 / secs } else { 0.0 },
    })
}

/// Execute a parsed command line.
///
/// # Errors
///
/// Returns the first failure of the selected command; `squares` also fails when any
/// result does not match its context.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Reverse { text } => {
            println!("{}", reverse(&text)?);
            Ok(())
        }
        Commands::Squares {
            count,
            capacity,
            json,
        } => {
            let summary = squares(count, capacity)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "squares: {}/{} verified, {} mismatched, capacity {}, {} ms ({:.0} req/s)",
                    summary.verified,
                    summary.submitted,
                    summary.mismatched,
                    summary.queue_capacity,
                    summary.elapsed_ms,
                    summary.requests_per_sec
                );
            }
            if summary.mismatched > 0 {
                anyhow::bail!("{} of {} results did not match", summary.mismatched, summary.submitted);
            }
            Ok(())
        }
    }
}
