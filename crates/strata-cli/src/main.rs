//! The `strata` binary.

use std::path::PathBuf;
use std::process::ExitCode;

use strata_cli::commands::register_builtin_commands;
use strata_cli::{connect, load_settings, CommandContext, CommandRegistry};
use strata_core::logging::setup_logging;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let mut registry = CommandRegistry::new();
    register_builtin_commands(&mut registry);
    let matches = registry.build_cli().get_matches();

    let settings_path = matches.get_one::<PathBuf>("settings").cloned();
    let settings = match load_settings(settings_path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&settings);

    let db = match connect(&settings) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Could not open database");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // The first Ctrl-C cancels the run; migrations stop at the next unit
    // of work and roll back.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::warn!("Received interrupt, cancelling");
        interrupt.cancel();
    });

    let ctx = CommandContext {
        settings,
        db,
        cancel,
    };
    match registry.execute(&matches, &ctx).await {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
