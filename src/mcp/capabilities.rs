//! MCP capability negotiation for the `initialize` handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capabilities this server can advertise. Only `tools` is implemented —
/// there are no resources, prompts, or sampling delegation in this server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasMcpCapabilities {
    pub tools: bool,
}

impl Default for GasMcpCapabilities {
    fn default() -> Self {
        Self { tools: true }
    }
}

impl GasMcpCapabilities {
    pub fn to_mcp_value(&self) -> Value {
        let mut cap = serde_json::Map::new();
        if self.tools {
            cap.insert("tools".into(), serde_json::json!({ "listChanged": false }));
        }
        Value::Object(cap)
    }
}

/// Intersect the client's requested capabilities with what this server
/// supports. The MCP spec forbids advertising a capability the client
/// didn't ask about, even one we have.
pub fn negotiate(client_caps: Value) -> GasMcpCapabilities {
    let defaults = GasMcpCapabilities::default();
    let client_wants_tools = client_caps.get("tools").is_some();
    GasMcpCapabilities {
        tools: defaults.tools && client_wants_tools,
    }
}
