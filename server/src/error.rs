//! Error types for the LocalForge server.

use std::path::PathBuf;

use localforge_store::StoreError;
use thiserror::Error;

use crate::mcp::protocol::JsonRpcError;

/// Errors that can occur while serving requests.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }
}

impl From<ServerError> for JsonRpcError {
    fn from(err: ServerError) -> Self {
        let message = err.to_string();
        match err {
            ServerError::InvalidParams(_)
            | ServerError::PathNotFound(_)
            | ServerError::Glob(_)
            | ServerError::Json(_)
            | ServerError::Store(StoreError::NotFound(_))
            | ServerError::Store(StoreError::InvalidDocument(_))
            | ServerError::Store(StoreError::UnknownStrategy(_)) => {
                JsonRpcError::invalid_params(message)
            }
            _ => JsonRpcError::internal_error(message),
        }
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
