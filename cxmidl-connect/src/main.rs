//! CXMIDL Orchestration database client.
//!
//! Prints the requested report as pretty JSON on stdout. The exit status is
//! non-zero when the command fails or its report is degraded.
//!
//! # Security Guarantees
//! - Access tokens and client secrets are never printed or logged
//! - Encrypted sessions with certificate validation only
//! - `--sensitive` parameters are redacted from error output

use clap::Parser;
use cxmidl_connect::{Cli, Command, run};
use cxmidl_core::Connector;
use cxmidl_core::logging::init_logging;
use std::process::ExitCode;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet, cli.global.log_format.into())?;

    let config = cli.connection.to_config()?;
    let command = cli.command.unwrap_or(Command::Check);

    let outcome = run(&command, Connector::new(config)).await.map_err(|e| {
        error!("{:#}", e);
        e
    })?;

    println!("{}", serde_json::to_string_pretty(&outcome.report)?);

    if outcome.success {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Report is degraded");
        Ok(ExitCode::FAILURE)
    }
}
