//! b4uspend - command-line client for the B4USpend personal finance API.

use anyhow::Result;
use b4uspend_cli::{commands, config, logging};
use b4uspend_core::{FinanceClient, TerminationReason};
use clap::Parser;
use std::process::ExitCode;

use commands::Cli;
use config::{Config, API_URL_ENV};
use logging::LogConfig;

/// Exit code when the server ended the session.
const EXIT_SESSION_ENDED: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.override_api_url(std::env::var(API_URL_ENV).ok());
    config.override_api_url(cli.api_url);

    tracing::debug!(
        target: "b4uspend::startup",
        "Using API {}{} (session store: {})",
        config.api_base_url,
        config.api_prefix,
        config.storage_path.display()
    );

    let client = FinanceClient::connect(&config.client_config())?;
    let mut events = client.subscribe();

    let outcome = commands::run(&client, &config, cli.command).await;

    if let Some(reason) = commands::termination(&mut events) {
        if let TerminationReason::RenewalFailed(detail) = reason {
            tracing::debug!(target: "b4uspend::session", "Renewal failed: {}", detail);
        }
        eprintln!("Session expired. Run `b4uspend login` to sign in again.");
        return Ok(ExitCode::from(EXIT_SESSION_ENDED));
    }

    outcome?;
    Ok(ExitCode::SUCCESS)
}
