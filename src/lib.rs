//! cad-bridge-mcp: MCP server bridging AI assistants to a CAD host plugin.
//!
//! The server exposes CAD modelling operations as MCP tools and forwards them
//! to a plugin running inside the CAD host, over a local TCP link. When the
//! host is unreachable the bridge either simulates results or refuses work,
//! depending on policy, and switches back once the host answers again.
//!
//! # Architecture
//!
//! - **Bridge**: wire codec, connection manager, mode selection, dispatch
//! - **Design intent**: named entities, parameter history and command
//!   history recorded from successful commands, persisted to a session file
//! - **Tools**: the declarative catalogue that maps MCP tools onto host
//!   commands, local computations and session operations
//!
//! # Modules
//!
//! - [`bridge`]: Host link, modes and command dispatch
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Configuration errors
//! - [`intent`]: Design intent store and session file
//! - [`mcp`]: MCP protocol implementation
//! - [`tools`]: Tool catalogue and local tools

pub mod bridge;
pub mod config;
pub mod error;
pub mod intent;
pub mod mcp;
pub mod tools;
