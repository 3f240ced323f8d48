use std::{io, process};

use hydrocache::{cli, config, error::AppError, infra::telemetry};
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let mut stdout = io::stdout().lock();
    match &cli_args.command {
        config::Command::Hash(args) => cli::run_hash(args, &mut stdout),
        config::Command::Snapshot(args) => cli::run_snapshot(&settings, args, &mut stdout).await,
        config::Command::Inspect(args) => cli::run_inspect(&settings, args, &mut stdout).await,
    }
}
