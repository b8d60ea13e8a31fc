mod args;
mod reporter;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rbt_core::{FlowError, Outcome, Reporter};
use rbt_util::output::OUTPUT_FILE_ENV;
use rbt_util::{env_flag, env_or, init_tracing};
use tokio::sync::watch;
use tracing::warn;

use crate::args::Cli;
use crate::reporter::ActionsReporter;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let output_path = Some(env_or(OUTPUT_FILE_ENV, ""))
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);
    let annotate = env_flag("GITHUB_ACTIONS") || output_path.is_some();
    let reporter: Arc<dyn Reporter> = Arc::new(ActionsReporter::new(output_path, annotate));

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            reporter.finished(&Outcome::failed(FlowError::Config(err)));
            return Ok(ExitCode::FAILURE);
        }
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = rbt_core::run(&config, reporter, Some(cancel_rx)).await;
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
