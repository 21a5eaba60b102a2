//! Hidden `daemon-worker <server>` subcommand
//!
//! The daemon client spawns our own binary with this subcommand; the
//! worker loads the same catalogue (the spawner forwards `--config`) and
//! serves until idle.

use std::path::PathBuf;

use crate::error::CliResult;

#[cfg(unix)]
pub async fn run(config: Option<PathBuf>, server: &str) -> CliResult<i32> {
    use mcpq_config::ConfigLoader;

    let loader = match config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let catalogue = loader.load()?;
    let record = catalogue.get(server)?;
    Ok(mcpq_daemon::worker::run(record).await)
}

#[cfg(not(unix))]
pub async fn run(_config: Option<PathBuf>, _server: &str) -> CliResult<i32> {
    eprintln!("connection daemons require Unix-domain sockets; not supported on this platform");
    Ok(1)
}
