use chanmgr::cli::{run_cli, Cli};
use chanmgr::logging::init_logging;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Held until exit so buffered log lines are flushed
    let _log_guard = init_logging()?;
    run_cli(cli)
}
