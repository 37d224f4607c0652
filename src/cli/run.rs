//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, discovers configuration, creates the tokio
//! runtime, dispatches the command and handles all error output.

use clap::Parser;

use super::args::{Cli, Commands};
use super::commands;

use crate::error::ConfigError;
use crate::logging::init_tracing;
use crate::{CliArgs, Config, ExitCode, ReportError};

/// Main CLI execution function.
///
/// Prints all output, including errors. main.rs only maps the returned
/// `ExitCode` to the process exit status.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        language: cli.language.clone(),
        module_timeout: cli.module_timeout,
        max_tokens: cli.max_tokens,
        verbose: cli.verbose.then_some(true),
        llm_provider: cli.llm_provider.clone(),
        cache_backend: cli.cache_backend.clone(),
        cache_dir: cli.cache_dir.clone(),
        stream_mode: match &cli.command {
            Commands::Stream { mode, .. } => mode.clone(),
            _ => None,
        },
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            let report = match err.downcast::<ConfigError>() {
                Ok(config_err) => ReportError::Config(config_err).display_for_user(),
                Err(other) => format!("Error [configuration]: {other:#}"),
            };
            eprintln!("{report}");
            return Err(ExitCode::CLI_ARGS);
        }
    };

    if let Err(e) = init_tracing(config.verbose()) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let operation = cli.command.name();
    let result = rt.block_on(commands::dispatch(cli.command, &config));

    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(operation = operation, error = %err, "Command failed");
            eprintln!("{}", err.display_for_user());
            Err(err.to_exit_code())
        }
    }
}
