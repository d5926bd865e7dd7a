//! MCP Resource Definitions

use super::protocol::{Resource, ResourceContent, ResourceReadResult};
use localforge_store::Retriever;

pub const STORE_STATS_URI: &str = "localforge://store/stats";
pub const STALE_DOCUMENTS_URI: &str = "localforge://store/stale";

/// Get all available resources
pub fn get_all_resources() -> Vec<Resource> {
    vec![
        Resource {
            uri: STORE_STATS_URI.to_string(),
            name: "Store Statistics".to_string(),
            description: Some(
                "Active embedding strategy, documents per strategy and index sizes".to_string(),
            ),
            mime_type: Some("application/json".to_string()),
        },
        Resource {
            uri: STALE_DOCUMENTS_URI.to_string(),
            name: "Stale Documents".to_string(),
            description: Some(
                "Documents embedded under a strategy that is no longer configured".to_string(),
            ),
            mime_type: Some("application/json".to_string()),
        },
    ]
}

/// Read a resource by URI
pub fn read_resource(uri: &str, retriever: &Retriever) -> Option<ResourceReadResult> {
    let body = match uri {
        STORE_STATS_URI => match retriever.stats() {
            Ok(stats) => serde_json::to_value(stats).unwrap_or_default(),
            Err(e) => serde_json::json!({ "error": format!("Failed to get store stats: {}", e) }),
        },
        STALE_DOCUMENTS_URI => serde_json::json!({
            "stale": retriever.store().stale_documents(),
        }),
        _ => return None,
    };

    Some(ResourceReadResult {
        contents: vec![ResourceContent {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text: Some(serde_json::to_string_pretty(&body).unwrap_or_default()),
        }],
    })
}
