//! Subcommand implementations

pub mod call;
pub mod daemon_worker;
pub mod grep;
pub mod info;
pub mod list;

use std::sync::Arc;

use mcpq_config::Catalogue;
use mcpq_connection::{fan_out, pool_size, ConnectOptions, FanoutResult, ServerConnection};
use mcpq_transport::ToolDescriptor;

/// Fetch every server's tool list through the facade, with bounded
/// parallelism. Shared by the default listing and `grep`.
pub(crate) async fn fetch_all_tools(
    catalogue: Arc<Catalogue>,
    options: ConnectOptions,
) -> Vec<FanoutResult<Vec<ToolDescriptor>>> {
    let names = catalogue.names();
    fan_out(names, pool_size(), move |name| {
        let catalogue = Arc::clone(&catalogue);
        let options = options.clone();
        async move {
            let record = catalogue.get(&name).map_err(|e| e.to_string())?;
            let mut connection = ServerConnection::connect(record, &options)
                .await
                .map_err(|e| e.to_string())?;
            let tools = connection.list_tools().await.map_err(|e| e.to_string());
            connection.close().await;
            tools
        }
    })
    .await
}
