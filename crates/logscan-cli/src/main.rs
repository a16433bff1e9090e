//! logscan CLI binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use logscan::Engine;
use logscan_cli::cli::{Cli, Commands};
use logscan_cli::commands::{SearchCommand, StreamCommand};
use logscan_cli::{load_config, CliError, OutputFormat};

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries records only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let engine = Engine::new(config)?;
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::StreamForward(args) => {
            let query = StreamCommand::forward_query(&args);
            StreamCommand::new(&engine)
                .execute(&mut stdout, &format, &query, args.range.limit, cancel)
                .await?;
        }
        Commands::StreamBackward(args) => {
            let query = StreamCommand::backward_query(&args);
            StreamCommand::new(&engine)
                .execute(&mut stdout, &format, &query, args.range.limit, cancel)
                .await?;
        }
        Commands::Search(args) => {
            SearchCommand::new(&engine).execute(&mut stdout, &format, &args)?;
        }
    }

    Ok(())
}
