//! MCP Server Implementation
//!
//! Handles MCP protocol requests and routes them to the retrieval pipeline.

use super::protocol::*;
use super::resources::{get_all_resources, read_resource};
use super::tools::{self, get_all_tools};
use super::transport::{Incoming, LineTransport};
use crate::error::{ServerError, ServerResult};
use crate::workspace::{index_folder, WalkOptions};
use localforge_store::{LanguageModel, Retriever};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "localforge";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Backend - the retrieval pipeline and its language model
pub struct McpBackend {
    pub retriever: Retriever,
    pub model: Arc<dyn LanguageModel>,
}

impl McpBackend {
    pub fn new(retriever: Retriever, model: Arc<dyn LanguageModel>) -> Self {
        Self { retriever, model }
    }

    fn top_k(&self, requested: Option<i64>) -> usize {
        self.retriever.config().resolve_top_k(requested)
    }

    /// Execute a tool by name
    pub async fn execute_tool(&self, name: &str, args: Value) -> ServerResult<Value> {
        match name {
            tools::INDEX => {
                let args: tools::IndexArgs = parse_args(args)?;
                let report = self.retriever.index_json_items(args.items).await?;
                Ok(serde_json::to_value(report)?)
            }

            tools::INDEX_PATH => {
                let args: tools::IndexPathArgs = parse_args(args)?;
                let options = WalkOptions::new(&args.extensions, &args.exclude);
                let report = index_folder(&self.retriever, Path::new(&args.path), &options).await?;
                Ok(serde_json::to_value(report)?)
            }

            tools::SEARCH => {
                let args: tools::QueryArgs = parse_args(args)?;
                let results = self
                    .retriever
                    .search(&args.query, self.top_k(args.top_k))
                    .await?;
                Ok(serde_json::json!({ "results": results }))
            }

            tools::QUERY => {
                let args: tools::QueryArgs = parse_args(args)?;
                let answer = self
                    .retriever
                    .query(&args.query, self.top_k(args.top_k), self.model.as_ref())
                    .await?;
                Ok(serde_json::to_value(answer)?)
            }

            tools::DELETE => {
                let args: tools::DeleteArgs = parse_args(args)?;
                let removed = self.retriever.delete(&args.doc_id)?;
                Ok(serde_json::json!({ "deleted": removed.doc_id }))
            }

            tools::CLEAR => {
                let removed = self.retriever.clear()?;
                Ok(serde_json::json!({ "cleared": removed }))
            }

            tools::REBUILD => {
                let args: tools::RebuildArgs = parse_args(args)?;
                let rebuilt: BTreeMap<String, usize> = match args.strategy_id {
                    Some(strategy_id) => {
                        let count = self.retriever.rebuild(&strategy_id)?;
                        [(strategy_id, count)].into_iter().collect()
                    }
                    None => self.retriever.rebuild_all()?,
                };
                Ok(serde_json::json!({ "rebuilt": rebuilt }))
            }

            tools::STATS => Ok(serde_json::to_value(self.retriever.stats()?)?),

            _ => Err(ServerError::invalid_params(format!("Unknown tool: {}", name))),
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> ServerResult<T> {
    serde_json::from_value(args).map_err(|e| ServerError::invalid_params(format!("Invalid arguments: {}", e)))
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> ServerResult<T> {
    let params = params.ok_or_else(|| ServerError::invalid_params("Missing params"))?;
    serde_json::from_value(params)
        .map_err(|e| ServerError::invalid_params(format!("Invalid params: {}", e)))
}

/// MCP Server - handles protocol messages
pub struct McpServer {
    backend: McpBackend,
    /// Set by `initialize`; tool calls and resource reads wait for it
    initialized: bool,
}

impl McpServer {
    pub fn new(backend: McpBackend) -> Self {
        Self {
            backend,
            initialized: false,
        }
    }

    pub fn backend(&self) -> &McpBackend {
        &self.backend
    }

    /// Serve over stdio until the client disconnects
    pub async fn run(&mut self) -> std::io::Result<()> {
        self.serve(LineTransport::stdio()).await
    }

    /// Serve over any line transport until EOF
    pub async fn serve<R, W>(&mut self, mut transport: LineTransport<R, W>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!("MCP server starting...");

        while let Some(incoming) = transport.read().await? {
            let response = match incoming {
                Incoming::Request(request) => self.handle_request(request).await,
                Incoming::Malformed(e) => Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(format!("Parse error: {}", e)),
                )),
            };
            if let Some(response) = response {
                transport.write(&response).await?;
            }
        }

        tracing::info!("Client disconnected");
        Ok(())
    }

    /// Handle a JSON-RPC message; notifications get no response
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!("Handling request: {}", request.method);

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("Only JSON-RPC 2.0 is supported"),
            ));
        }
        if request.is_notification() {
            if request.method == "notifications/initialized" || request.method == "initialized" {
                self.initialized = true;
            }
            return None;
        }

        let id = request.id;
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::from_result(
                id,
                &ToolsListResult {
                    tools: get_all_tools(),
                },
            ),
            "tools/call" | "resources/read" if !self.initialized => JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Server not initialized"),
            ),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => JsonRpcResponse::from_result(
                id,
                &ResourcesListResult {
                    resources: get_all_resources(),
                },
            ),
            "resources/read" => self.handle_resources_read(id, request.params),
            _ => JsonRpcResponse::error(id, JsonRpcError::method_not_found(&request.method)),
        };
        Some(response)
    }

    fn handle_initialize(&mut self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        if let Some(client) = &params.client_info {
            tracing::info!(
                "Client connected: {} {}",
                client.name,
                client.version.as_deref().unwrap_or("")
            );
        }
        self.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                resources: Some(ListCapability {
                    subscribe: Some(false),
                    list_changed: Some(false),
                }),
                tools: Some(ListCapability {
                    subscribe: None,
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: Some(SERVER_VERSION.to_string()),
            },
        };

        JsonRpcResponse::from_result(id, &result)
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::error(id, e.into()),
        };
        let args = params
            .arguments
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let result = match self.backend.execute_tool(&params.name, args).await {
            Ok(value) => ToolCallResult::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            ),
            // Unknown tools and malformed arguments are protocol errors
            Err(e @ ServerError::InvalidParams(_)) => return JsonRpcResponse::error(id, e.into()),
            Err(e) => {
                tracing::warn!("Tool {} failed: {}", params.name, e);
                ToolCallResult::failure(format!("Error: {}", e))
            }
        };
        JsonRpcResponse::from_result(id, &result)
    }

    fn handle_resources_read(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ResourceReadParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::error(id, e.into()),
        };

        match read_resource(&params.uri, &self.backend.retriever) {
            Some(result) => JsonRpcResponse::from_result(id, &result),
            None => JsonRpcResponse::error(
                id,
                ServerError::invalid_params(format!("Resource not found: {}", params.uri)).into(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use localforge_store::{StrategyChoice, Vectorizer, VectorizerConfig};
    use tempfile::TempDir;

    struct FixedModel;

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn complete(&self, prompt: &str) -> localforge_store::Result<String> {
            Ok(format!("prompt had {} chars", prompt.chars().count()))
        }
    }

    fn new_server(dir: &TempDir) -> McpServer {
        let vectorizer = Vectorizer::from_config(&VectorizerConfig {
            strategy: StrategyChoice::Hashing,
            ..Default::default()
        })
        .unwrap();
        let retriever = Retriever::open(dir.path(), vectorizer, Default::default()).unwrap();
        McpServer::new(McpBackend::new(retriever, Arc::new(FixedModel)))
    }

    async fn server(dir: &TempDir) -> McpServer {
        let mut server = new_server(dir);
        let init = server
            .handle_request(request(0, "initialize", serde_json::json!({})))
            .await
            .unwrap();
        assert!(init.error.is_none());
        server
    }

    fn request(id: u64, method: &str, params: Value) -> JsonRpcRequest {
        serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    async fn call_tool(server: &mut McpServer, name: &str, arguments: Value) -> Value {
        let response = server
            .handle_request(request(
                7,
                "tools/call",
                serde_json::json!({"name": name, "arguments": arguments}),
            ))
            .await
            .unwrap();
        serde_json::to_value(response.result.unwrap()).unwrap()
    }

    fn tool_payload(result: &Value) -> Value {
        serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_lists() {
        let dir = TempDir::new().unwrap();
        let mut server = new_server(&dir);

        let init = server
            .handle_request(request(1, "initialize", serde_json::json!({})))
            .await
            .unwrap();
        let result = init.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "localforge");

        let tools = server
            .handle_request(request(2, "tools/list", Value::Null))
            .await
            .unwrap();
        assert_eq!(tools.result.unwrap()["tools"].as_array().unwrap().len(), 8);

        let unknown = server
            .handle_request(request(3, "bogus", Value::Null))
            .await
            .unwrap();
        assert_eq!(unknown.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let dir = TempDir::new().unwrap();
        let mut server = new_server(&dir);
        let note: JsonRpcRequest = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(server.handle_request(note).await.is_none());
        assert!(server.initialized);
    }

    #[tokio::test]
    async fn test_index_search_query_delete_flow() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;

        let result = call_tool(
            &mut server,
            tools::INDEX,
            serde_json::json!({"items": [
                {"doc_id": "install.md", "content": "Install with cargo install localforge"},
                {"doc_id": "empty.md", "content": "   "},
                {"doc_id": "usage.md", "content": "Run localforge search to find documents"}
            ]}),
        )
        .await;
        let report = tool_payload(&result);
        assert_eq!(report["indexed"], 2);
        assert_eq!(report["failed"][0]["doc_id"], "empty.md");
        assert_eq!(report["failed"][0]["retryable"], false);

        let result = call_tool(
            &mut server,
            tools::SEARCH,
            serde_json::json!({"query": "cargo install", "top_k": 1}),
        )
        .await;
        let payload = tool_payload(&result);
        assert_eq!(payload["results"][0]["doc_id"], "install.md");
        assert!(payload["results"][0]["content"].as_str().unwrap().contains("cargo"));

        let result = call_tool(
            &mut server,
            tools::QUERY,
            serde_json::json!({"query": "how to install?"}),
        )
        .await;
        let payload = tool_payload(&result);
        assert!(payload["response"].as_str().unwrap().starts_with("prompt had"));
        assert!(payload["context_doc_ids"].is_array());

        let result = call_tool(&mut server, tools::DELETE, serde_json::json!({"doc_id": "install.md"})).await;
        assert_eq!(tool_payload(&result)["deleted"], "install.md");

        let result = call_tool(&mut server, tools::DELETE, serde_json::json!({"doc_id": "install.md"})).await;
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("not found"));
    }

    async fn call_tool_error(server: &mut McpServer, name: &str, arguments: Value) -> JsonRpcError {
        server
            .handle_request(request(
                8,
                "tools/call",
                serde_json::json!({"name": name, "arguments": arguments}),
            ))
            .await
            .unwrap()
            .error
            .unwrap()
    }

    #[tokio::test]
    async fn test_calls_before_initialize_are_refused() {
        let dir = TempDir::new().unwrap();
        let mut server = new_server(&dir);

        let err = call_tool_error(&mut server, tools::STATS, serde_json::json!({})).await;
        assert_eq!(err.code, -32600);

        let ping = server
            .handle_request(request(1, "ping", Value::Null))
            .await
            .unwrap();
        assert!(ping.error.is_none());
    }

    #[tokio::test]
    async fn test_bad_arguments_are_protocol_errors() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;

        let err = call_tool_error(&mut server, tools::SEARCH, serde_json::json!({})).await;
        assert_eq!(err.code, -32602);

        let err = call_tool_error(&mut server, "nope", serde_json::json!({})).await;
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_tool_failures_are_results() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;

        let result = call_tool(
            &mut server,
            tools::INDEX_PATH,
            serde_json::json!({"path": "/definitely/not/here"}),
        )
        .await;
        assert!(result["content"][0]["text"].as_str().unwrap().contains("Path not found"));
    }

    #[tokio::test]
    async fn test_one_malformed_item_does_not_abort_the_batch() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;

        let result = call_tool(
            &mut server,
            tools::INDEX,
            serde_json::json!({"items": [
                {"doc_id": "a.md", "content": "alpha notes"},
                {"doc_id": "b.md", "content": "beta notes", "metadata": {"tags": ["x"]}},
                {"doc_id": "c.md", "content": "gamma notes"}
            ]}),
        )
        .await;
        assert!(result.get("isError").is_none());

        let report = tool_payload(&result);
        assert_eq!(report["indexed"], 2);
        assert_eq!(report["failed"].as_array().unwrap().len(), 1);
        assert_eq!(report["failed"][0]["doc_id"], "b.md");
        assert!(report["failed"][0]["reason"].as_str().unwrap().contains("tags"));
    }

    #[tokio::test]
    async fn test_non_positive_top_k_returns_no_results() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;
        call_tool(
            &mut server,
            tools::INDEX,
            serde_json::json!({"items": [{"doc_id": "a", "content": "some text"}]}),
        )
        .await;

        for top_k in [-1, 0] {
            let result = call_tool(
                &mut server,
                tools::SEARCH,
                serde_json::json!({"query": "some text", "top_k": top_k}),
            )
            .await;
            assert!(result.get("isError").is_none());
            assert_eq!(tool_payload(&result), serde_json::json!({"results": []}));
        }
    }

    #[tokio::test]
    async fn test_stats_rebuild_and_resources() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;
        call_tool(
            &mut server,
            tools::INDEX,
            serde_json::json!({"items": [{"doc_id": "a", "content": "alpha beta"}]}),
        )
        .await;

        let stats = tool_payload(&call_tool(&mut server, tools::STATS, serde_json::json!({})).await);
        assert_eq!(stats["activeStrategy"], "hash-tf-512/v1");
        assert_eq!(stats["store"]["totalDocuments"], 1);

        let rebuilt = tool_payload(&call_tool(&mut server, tools::REBUILD, serde_json::json!({})).await);
        assert_eq!(rebuilt["rebuilt"]["hash-tf-512/v1"], 1);

        let read = server
            .handle_request(request(
                9,
                "resources/read",
                serde_json::json!({"uri": "localforge://store/stats"}),
            ))
            .await
            .unwrap();
        let text = read.result.unwrap()["contents"][0]["text"].as_str().unwrap().to_string();
        assert!(text.contains("totalDocuments"));

        let cleared = tool_payload(&call_tool(&mut server, tools::CLEAR, serde_json::json!({})).await);
        assert_eq!(cleared["cleared"], 1);
    }

    #[tokio::test]
    async fn test_serve_over_line_transport() {
        let dir = TempDir::new().unwrap();
        let mut server = server(&dir).await;

        let input: &[u8] = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\
{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
garbage\n";
        let mut output = Vec::new();
        tokio_test::assert_ok!(server.serve(LineTransport::new(input, &mut output)).await);

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["error"]["code"], -32700);
    }
}
