//! mcpq entry point

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod error;
mod output;

use cli::{resolve_external, Cli, Commands};
use error::CliResult;
use mcpq_auth::AuthMode;
use mcpq_config::ConfigLoader;
use mcpq_connection::ConnectOptions;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    init_tracing();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return handle_parse_error(e),
    };

    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            err.render();
            err.exit_code()
        }
    }
}

/// Keep clap's help/version output, but route real parse failures through
/// the shared error shape (clap would otherwise exit 2 with its own
/// format).
fn handle_parse_error(e: clap::Error) -> i32 {
    use clap::error::ErrorKind;

    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            print!("{e}");
            0
        }
        kind => {
            let message = e
                .to_string()
                .lines()
                .next()
                .unwrap_or("invalid arguments")
                .trim_start_matches("error: ")
                .to_string();
            let err = match kind {
                ErrorKind::MissingRequiredArgument => error::CliError::MissingArgument {
                    what: message,
                },
                ErrorKind::TooManyValues => error::CliError::TooManyArguments {
                    command: message,
                },
                _ => error::CliError::UnknownOption { message },
            };
            err.render();
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli) -> CliResult<i32> {
    // The worker owns its own signal handling and cleanup; everything
    // else gets the plain interrupt/terminate exit codes.
    if let Some(Commands::DaemonWorker { server }) = &cli.command {
        let server = server.clone();
        return commands::daemon_worker::run(cli.config, &server).await;
    }
    spawn_signal_handlers();

    if let Some(Commands::External(tokens)) = &cli.command {
        return Err(resolve_external(tokens));
    }

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let catalogue = Arc::new(loader.load()?);

    // Clear out leftovers from crashed daemons before touching any socket.
    #[cfg(unix)]
    mcpq_daemon::DaemonClient::sweep();

    let options = ConnectOptions {
        config_path: cli.config.clone(),
        auth_mode: AuthMode::Interactive,
    };

    match cli.command {
        None => commands::list::run(catalogue, options, cli.with_descriptions).await,
        Some(Commands::Info { server, tool }) => {
            commands::info::run(
                catalogue,
                options,
                &server,
                tool.as_deref(),
                cli.with_descriptions,
            )
            .await
        }
        Some(Commands::Grep { pattern }) => {
            commands::grep::run(catalogue, options, &pattern, cli.with_descriptions).await
        }
        Some(Commands::Call { args }) => commands::call::run(catalogue, options, &args).await,
        Some(Commands::External(_)) | Some(Commands::DaemonWorker { .. }) => {
            unreachable!("handled above")
        }
    }
}

fn init_tracing() {
    let debug_enabled =
        std::env::var("MCPQ_DEBUG").is_ok_and(|v| !v.is_empty() && v != "0" && v != "false");
    let default_filter = if debug_enabled { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spawn_signal_handlers() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    #[cfg(unix)]
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut terminate) = signal(SignalKind::terminate()) {
            terminate.recv().await;
            std::process::exit(143);
        }
    });
}
