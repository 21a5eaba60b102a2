//! `call <server> <tool> [<json>]`: invoke a tool
//!
//! JSON arguments come from the command line or, when omitted, from
//! standard input (so `echo '{...}' | mcpq call fs read_file` works in
//! pipelines). The raw MCP result goes to stdout untouched; a remote
//! failure still prints the result and exits 2.

use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use mcpq_config::Catalogue;
use mcpq_connection::{ConnectOptions, ServerConnection};

use crate::cli::resolve_call_args;
use crate::error::{CliError, CliResult};

pub async fn run(
    catalogue: Arc<Catalogue>,
    options: ConnectOptions,
    args: &[String],
) -> CliResult<i32> {
    let target = resolve_call_args(args)?;

    let json_text = match target.json {
        Some(json) => json,
        None => read_stdin().await?,
    };
    let arguments = parse_arguments(&json_text)?;

    let record = catalogue.get(&target.server)?;
    let mut connection = ServerConnection::connect(record, &options).await?;
    let outcome = connection.call_tool(&target.tool, arguments).await;
    connection.close().await;
    let outcome = outcome?;

    match serde_json::to_string(&outcome.raw) {
        Ok(raw) => println!("{raw}"),
        Err(_) => println!("{}", outcome.raw),
    }

    if outcome.is_error {
        return Err(CliError::ToolExecutionFailed {
            server: target.server,
            tool: target.tool,
        });
    }
    Ok(0)
}

fn parse_arguments(text: &str) -> CliResult<Option<Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| CliError::InvalidJsonArguments {
            message: e.to_string(),
        })?;
    match value {
        Value::Object(_) => Ok(Some(value)),
        Value::Null => Ok(None),
        other => Err(CliError::InvalidJsonArguments {
            message: format!("expected a JSON object, got {other}"),
        }),
    }
}

async fn read_stdin() -> CliResult<String> {
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .map_err(|e| CliError::InvalidJsonArguments {
            message: format!("failed to read arguments from stdin: {e}"),
        })?;
    Ok(buffer)
}
