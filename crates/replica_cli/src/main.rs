//! Replica CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration error
//! - 4: Container runtime error
//! - 5: Store error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const RUNTIME_ERROR: u8 = 4;
    pub const STORE_ERROR: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::execute(args, cli.config.as_deref()).await,
        Commands::Clones(args) => commands::clones::execute(args, cli.config.as_deref()).await,
        Commands::Teardown(args) => commands::teardown::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

fn default_level(cli: &Cli) -> &'static str {
    if cli.verbose {
        "replica=debug"
    } else if cli.quiet {
        "replica=warn"
    } else {
        "replica=info"
    }
}

fn init_logging(cli: &Cli) {
    let mut filter = EnvFilter::from_default_env();
    for directive in [default_level(cli), "warn"] {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {}: {}", directive, e),
        }
    }

    let log_result = if cli.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    let msg = format!("{:#}", e).to_lowercase();

    if msg.contains("configuration") || msg.contains("credentials") || msg.contains("capture source") {
        ExitCodes::CONFIG_ERROR
    } else if msg.contains("docker") || msg.contains("container") {
        ExitCodes::RUNTIME_ERROR
    } else if msg.contains("store") || msg.contains("record") {
        ExitCodes::STORE_ERROR
    } else if msg.contains("argument") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_error() {
        assert_eq!(
            categorize_error(&anyhow::anyhow!("Invalid configuration: bind is empty")),
            ExitCodes::CONFIG_ERROR
        );
        assert_eq!(
            categorize_error(&anyhow::anyhow!("Docker not available: socket missing")),
            ExitCodes::RUNTIME_ERROR
        );
        assert_eq!(
            categorize_error(&anyhow::anyhow!("Clone not found: abc")),
            ExitCodes::INVALID_ARGS
        );
        assert_eq!(categorize_error(&anyhow::anyhow!("boom")), ExitCodes::GENERAL_ERROR);
    }

    #[test]
    fn test_verbose_raises_level() {
        let cli = Cli::parse_from(["replica", "--verbose", "teardown"]);
        assert_eq!(default_level(&cli), "replica=debug");

        let cli = Cli::parse_from(["replica", "teardown", "-q"]);
        assert_eq!(default_level(&cli), "replica=warn");
    }
}
