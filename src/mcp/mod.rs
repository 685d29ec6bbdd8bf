//! MCP surface: wire framing ([`transport`]), capability negotiation
//! ([`capabilities`]), the tool catalogue ([`tools`]), and the dispatcher
//! that routes a `tools/call` to the rest of the crate ([`dispatch`]).

pub mod capabilities;
pub mod dispatch;
pub mod tools;
pub mod transport;

pub use dispatch::GasMcpServer;
