//! MCP (Model Context Protocol) Server Module
//!
//! Exposes the LocalForge retrieval pipeline to AI clients: indexing,
//! similarity search, grounded answers and store maintenance.
//!
//! ## Usage
//!
//! ```bash
//! localforge --db-path ./data/localforge mcp
//! ```
//!
//! The MCP server communicates via stdio using JSON-RPC 2.0.

pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::*;
pub use server::{McpBackend, McpServer};
