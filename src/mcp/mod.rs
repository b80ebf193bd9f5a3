//! Model Context Protocol (MCP) server implementation.
//!
//! Exposes the bridge's tools and read-only resources to AI assistants over
//! stdio using JSON-RPC 2.0 messages, one per line.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌────────────────┐   │
//! │   │  Transport  │───▶│   Server    │───▶│  ToolHandler   │   │
//! │   │   (stdio)   │    │ (lifecycle) │    │ (task per call)│   │
//! │   └─────────────┘    └─────────────┘    └────────────────┘   │
//! │          ▲                  ▲                   │            │
//! │          │                  │                   ▼            │
//! │   MessageSender ◀── mode transitions ◀──── Dispatcher        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod resources;
pub mod server;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::{McpServer, ServerState, ToolCallResult, ToolHandler};
pub use transport::{LineReader, MessageSender};
