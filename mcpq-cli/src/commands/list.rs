//! Default subcommand: list every server and its tools

use std::sync::Arc;

use mcpq_config::Catalogue;
use mcpq_connection::ConnectOptions;

use crate::error::CliResult;
use crate::output;

pub async fn run(
    catalogue: Arc<Catalogue>,
    options: ConnectOptions,
    with_descriptions: bool,
) -> CliResult<i32> {
    if catalogue.is_empty() {
        println!("No servers configured.");
        return Ok(0);
    }
    let results = super::fetch_all_tools(catalogue, options).await;
    output::print_server_list(&results, with_descriptions);
    Ok(0)
}
