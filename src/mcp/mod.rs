//! Model Context Protocol surface.
//!
//! Publishes the current registry generation as MCP tools and exposes job
//! status and API documentation as MCP resources, over JSON-RPC 2.0 on
//! `POST /mcp`.

pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;

pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use resources::ResourceUri;
pub use tools::{tool_name, ToolFilter};
