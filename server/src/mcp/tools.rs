//! MCP Tool Definitions
//!
//! The eight LocalForge tools and their argument types.

use super::protocol::{PropertySchema, Tool, ToolInputSchema};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const INDEX: &str = "localforge_index";
pub const INDEX_PATH: &str = "localforge_index_path";
pub const SEARCH: &str = "localforge_search";
pub const QUERY: &str = "localforge_query";
pub const DELETE: &str = "localforge_delete";
pub const CLEAR: &str = "localforge_clear";
pub const REBUILD: &str = "localforge_rebuild";
pub const STATS: &str = "localforge_stats";

/// Get all available LocalForge tools
pub fn get_all_tools() -> Vec<Tool> {
    vec![
        index_tool(),
        index_path_tool(),
        search_tool(),
        query_tool(),
        delete_tool(),
        clear_tool(),
        rebuild_tool(),
        stats_tool(),
    ]
}

#[derive(Debug, Deserialize)]
pub struct IndexArgs {
    /// Parsed one by one so a bad item fails alone
    pub items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct IndexPathArgs {
    pub path: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Arguments of `localforge_search` and `localforge_query`
#[derive(Debug, Deserialize)]
pub struct QueryArgs {
    pub query: String,
    /// Zero or negative asks for no hits
    #[serde(default, alias = "topK")]
    pub top_k: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteArgs {
    #[serde(alias = "docId")]
    pub doc_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RebuildArgs {
    #[serde(default, alias = "strategyId")]
    pub strategy_id: Option<String>,
}

// Helper to create property schema
fn prop(property_type: &str, description: &str) -> PropertySchema {
    PropertySchema {
        property_type: property_type.to_string(),
        description: Some(description.to_string()),
        ..Default::default()
    }
}

fn string_array_prop(description: &str) -> PropertySchema {
    PropertySchema {
        items: Some(Box::new(PropertySchema {
            property_type: "string".to_string(),
            ..Default::default()
        })),
        ..prop("array", description)
    }
}

fn top_k_prop() -> PropertySchema {
    PropertySchema {
        default: Some(serde_json::json!(5)),
        ..prop("integer", "Number of documents to retrieve; 0 or less returns none")
    }
}

fn tool(name: &str, description: &str, properties: Vec<(&str, PropertySchema)>, required: &[&str]) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: ToolInputSchema {
            schema_type: "object".to_string(),
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            required: required.iter().map(|s| s.to_string()).collect(),
        },
    }
}

fn index_tool() -> Tool {
    let mut item_props = BTreeMap::new();
    item_props.insert("doc_id".to_string(), prop("string", "Unique document id"));
    item_props.insert("content".to_string(), prop("string", "Document text"));
    item_props.insert(
        "metadata".to_string(),
        prop("object", "Scalar metadata values (string, number, boolean)"),
    );

    let items = PropertySchema {
        items: Some(Box::new(PropertySchema {
            properties: Some(item_props),
            required: Some(vec!["doc_id".to_string(), "content".to_string()]),
            ..prop("object", "A document")
        })),
        ..prop("array", "Documents to index; re-indexing a doc_id replaces it")
    };

    tool(
        INDEX,
        "Embed and store documents. Returns how many were indexed and a reason for each failure.",
        vec![("items", items)],
        &["items"],
    )
}

fn index_path_tool() -> Tool {
    tool(
        INDEX_PATH,
        "Index every matching file under a folder on this machine. The file path becomes the doc_id.",
        vec![
            ("path", prop("string", "File or folder to index")),
            (
                "extensions",
                string_array_prop("File extensions to include (default: .py .js .ts .md .txt)"),
            ),
            (
                "exclude",
                string_array_prop("Glob patterns, relative to path, to leave out"),
            ),
        ],
        &["path"],
    )
}

fn search_tool() -> Tool {
    tool(
        SEARCH,
        "Rank stored documents by similarity to a query and return their content.",
        vec![
            ("query", prop("string", "Search text")),
            ("top_k", top_k_prop()),
        ],
        &["query"],
    )
}

fn query_tool() -> Tool {
    tool(
        QUERY,
        "Answer a question with the local language model, grounded in the most similar documents.",
        vec![
            ("query", prop("string", "Question to answer")),
            ("top_k", top_k_prop()),
        ],
        &["query"],
    )
}

fn delete_tool() -> Tool {
    tool(
        DELETE,
        "Remove one document from the store and the index.",
        vec![("doc_id", prop("string", "Id of the document to remove"))],
        &["doc_id"],
    )
}

fn clear_tool() -> Tool {
    tool(CLEAR, "Remove every stored document.", vec![], &[])
}

fn rebuild_tool() -> Tool {
    tool(
        REBUILD,
        "Reload the similarity index from the store.",
        vec![(
            "strategy_id",
            prop("string", "Strategy to rebuild (default: all declared strategies)"),
        )],
        &[],
    )
}

fn stats_tool() -> Tool {
    tool(
        STATS,
        "Active embedding strategy, document counts per strategy and index sizes.",
        vec![],
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_all_tools() {
        let tools = get_all_tools();
        assert_eq!(tools.len(), 8);
        for name in [INDEX, INDEX_PATH, SEARCH, QUERY, DELETE, CLEAR, REBUILD, STATS] {
            assert!(tools.iter().any(|t| t.name == name), "missing {}", name);
        }
    }

    #[test]
    fn test_tool_schemas_serialize() {
        for tool in get_all_tools() {
            let json = serde_json::to_value(&tool).unwrap();
            assert_eq!(json["inputSchema"]["type"], "object");
            assert!(json["inputSchema"]["properties"].is_object());
        }

        let search = serde_json::to_value(search_tool()).unwrap();
        assert_eq!(search["inputSchema"]["required"][0], "query");
        assert_eq!(search["inputSchema"]["properties"]["top_k"]["default"], 5);
    }

    #[test]
    fn test_index_args_keep_malformed_items() {
        let args: IndexArgs = serde_json::from_value(serde_json::json!({
            "items": [
                {"doc_id": "a.md", "content": "alpha", "metadata": {"lines": 3, "draft": true}},
                {"doc_id": "b.md", "content": "beta", "metadata": {"tags": ["x"]}},
                {"doc_id": "c.md"}
            ]
        }))
        .unwrap();
        assert_eq!(args.items.len(), 3);
    }

    #[test]
    fn test_query_args_accept_negative_top_k() {
        let args: QueryArgs =
            serde_json::from_value(serde_json::json!({"query": "q", "top_k": -1})).unwrap();
        assert_eq!(args.top_k, Some(-1));
    }

    #[test]
    fn test_query_args_aliases() {
        let args: QueryArgs =
            serde_json::from_value(serde_json::json!({"query": "q", "topK": 3})).unwrap();
        assert_eq!(args.top_k, Some(3));

        let args: DeleteArgs = serde_json::from_value(serde_json::json!({"docId": "x"})).unwrap();
        assert_eq!(args.doc_id, "x");
    }
}
