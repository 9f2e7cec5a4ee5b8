use std::process::ExitCode;

use clap::Parser;
use dante_observe::logger_init;
use tracing::info;

mod cli;
mod config;
mod inventory;
mod supervisor;

use cli::{Cli, Command};
use config::ConfigStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // 1) Config
    let mut store = ConfigStore::open(&cli.config)?;

    // 2) Logger (stderr, so one-shot commands keep stdout as JSON)
    logger_init(&store.config().logger())?;
    if store.was_created() {
        info!(target: "dante.providerd", path = %store.path().display(), "wrote default configuration");
    }

    // 3) Command or daemon
    match cli.command() {
        Command::Daemon => supervisor::run(store).await,
        command => {
            let mut stdout = std::io::stdout().lock();
            cli::execute(command, &mut store, &mut stdout).await
        }
    }
}
