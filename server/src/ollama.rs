//! Ollama client
//!
//! Non-streaming `/api/generate` calls against a local Ollama server.

use std::time::Duration;

use async_trait::async_trait;
use localforge_store::{LanguageModel, StoreError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ServerResult;

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Whole-request timeout (default: 120s)
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

pub struct OllamaClient {
    config: OllamaConfig,
    http: Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> ServerResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Complete a prompt; an absent `response` field yields an empty string
    pub async fn generate(&self, prompt: &str) -> ServerResult<String> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        let response = self
            .http
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let payload: GenerateResponse = response.json().await?;
        Ok(payload.response.unwrap_or_default())
    }

    /// Whether the server answers at all
    pub async fn is_reachable(&self) -> bool {
        match self.http.get(self.url("/api/tags")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Ollama not reachable at {}: {}", self.config.base_url, e);
                false
            }
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &str) -> localforge_store::Result<String> {
        self.generate(prompt)
            .await
            .map_err(|e| StoreError::language_model(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request
    async fn one_shot_server(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}/", addr), handle)
    }

    fn client(base_url: String) -> OllamaClient {
        OllamaClient::new(OllamaConfig {
            base_url,
            model: "llama3.1".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(GenerateRequest {
            model: "llama3.1",
            prompt: "hi",
            stream: false,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "llama3.1", "prompt": "hi", "stream": false})
        );
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let c = client("http://localhost:11434/".to_string());
        assert_eq!(c.url("/api/generate"), "http://localhost:11434/api/generate");
    }

    #[tokio::test]
    async fn test_generate_returns_response_field() {
        let (url, server) = one_shot_server("200 OK", r#"{"model":"llama3.1","response":"42","done":true}"#).await;

        let answer = client(url).generate("what is it?").await.unwrap();
        assert_eq!(answer, "42");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/generate"));
        assert!(request.contains(r#""prompt":"what is it?""#));
        assert!(request.contains(r#""stream":false"#));
    }

    #[tokio::test]
    async fn test_missing_response_field_is_empty() {
        let (url, server) = one_shot_server("200 OK", r#"{"done":true}"#).await;
        assert_eq!(client(url).generate("x").await.unwrap(), "");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_error_becomes_language_model_error() {
        let (url, server) = one_shot_server("500 Internal Server Error", r#"{"error":"boom"}"#).await;

        let err = client(url).complete("x").await.unwrap_err();
        assert!(matches!(err, StoreError::LanguageModel(_)));
        server.await.unwrap();
    }
}
