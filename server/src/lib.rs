//! LocalForge Server Library
//!
//! Runtime settings, folder ingestion, the Ollama client and the MCP server
//! built on top of `localforge-store`.

pub mod config;
pub mod error;
pub mod mcp;
pub mod ollama;
pub mod workspace;

pub use config::Settings;
pub use error::{ServerError, ServerResult};
pub use ollama::{OllamaClient, OllamaConfig};
