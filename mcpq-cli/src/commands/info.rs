//! `info <server> [<tool>]`: server or tool detail

use std::sync::Arc;

use mcpq_config::Catalogue;
use mcpq_connection::{ConnectOptions, ServerConnection};

use crate::error::{CliError, CliResult};
use crate::output;

pub async fn run(
    catalogue: Arc<Catalogue>,
    options: ConnectOptions,
    server: &str,
    tool: Option<&str>,
    with_descriptions: bool,
) -> CliResult<i32> {
    let record = catalogue.get(server)?;
    let mut connection = ServerConnection::connect(record, &options).await?;

    let result = show(&connection, record, tool, with_descriptions).await;
    connection.close().await;
    result.map(|()| 0)
}

async fn show(
    connection: &ServerConnection,
    record: &mcpq_config::ServerRecord,
    tool: Option<&str>,
    with_descriptions: bool,
) -> CliResult<()> {
    let tools = connection.list_tools().await?;

    match tool {
        Some(tool_name) => {
            let Some(descriptor) = tools.iter().find(|t| t.name == tool_name) else {
                return Err(CliError::ToolNotFound {
                    server: record.name.clone(),
                    tool: tool_name.to_string(),
                    available: tools.into_iter().map(|t| t.name).collect(),
                });
            };
            output::print_tool_info(&record.name, descriptor);
        }
        None => {
            // Instructions are best-effort; a daemon that predates them or
            // a server without any must not fail the whole command.
            let instructions = connection.instructions().await.unwrap_or(None);
            output::print_server_info(record, &tools, instructions.as_deref(), with_descriptions);
        }
    }
    Ok(())
}
