//! `grep <pattern>`: search tool names across all servers

use std::sync::Arc;
use tracing::debug;

use mcpq_config::filter::glob_match;
use mcpq_config::Catalogue;
use mcpq_connection::ConnectOptions;

use crate::error::CliResult;
use crate::output;

pub async fn run(
    catalogue: Arc<Catalogue>,
    options: ConnectOptions,
    pattern: &str,
    with_descriptions: bool,
) -> CliResult<i32> {
    // A bare word searches as a substring; explicit wildcards are taken
    // verbatim.
    let effective = if pattern.contains('*') || pattern.contains('?') {
        pattern.to_string()
    } else {
        format!("*{pattern}*")
    };

    let results = super::fetch_all_tools(catalogue, options).await;

    let mut matches = Vec::new();
    for result in results {
        match result.outcome {
            Ok(tools) => {
                for tool in tools {
                    if glob_match(&effective, &tool.name) {
                        matches.push((result.server.clone(), tool));
                    }
                }
            }
            Err(message) => {
                debug!(server = %result.server, %message, "skipping unreachable server in grep");
            }
        }
    }

    if matches.is_empty() {
        eprintln!("No tools match '{pattern}'.");
    } else {
        output::print_grep_matches(&matches, with_descriptions);
    }
    Ok(0)
}
