//! tsq binary entrypoint.

mod cli;
mod commands;
mod helpers;

use clap::{CommandFactory, Parser};
use tsq_core::TsqError;

#[tokio::main]
async fn main() {
    let cli::Cli {
        verbose,
        config,
        connection,
        output,
        command,
    } = cli::Cli::parse();

    tsq_core::logging::init_logging(verbose);

    // Bare invocation prints help and exits cleanly.
    let Some(command) = command else {
        let _ = cli::Cli::command().print_help();
        return;
    };

    let ctx = commands::Context::new(config, connection, output);
    if let Err(err) = commands::run(ctx, command).await {
        report(&err);
        std::process::exit(err.exit_code());
    }
}

fn report(err: &TsqError) {
    if err.is_interrupted() {
        // The shell already echoed ^C; exit 130 says the rest.
        return;
    }
    if err.exit_code() == 0 {
        // Output sink closed after rows were written (e.g. `tsq ... | head`).
        tracing::debug!(error = %err, "output sink closed after partial write");
        return;
    }
    eprintln!("Error: {err}");
    if let Some(detail) = err.detail() {
        eprintln!("Detail: {detail}");
    }
    if let Some(hint) = err.hint() {
        eprintln!("Hint: {hint}");
    }
}
