//! Tool descriptors and call outcomes
//!
//! The daemon serialises these across its socket, so they are plain serde
//! types rather than re-exports of the SDK's models.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool offered by a server. `input_schema` is opaque to mcpq and
/// passed through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

impl From<rmcp::model::Tool> for ToolDescriptor {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()),
            input_schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}

/// Result of one tool invocation. `raw` is the MCP result exactly as the
/// server returned it; `call` prints it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
    pub raw: Value,
    pub is_error: bool,
}
