//! Remote inference clients: embeddings (TEI or Ollama) and chat completion
//! (OpenAI-compatible or Ollama).

use crate::{AgentError, Result};
use async_trait::async_trait;
use healthguard_index::{EmbeddingProvider, IndexError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TEI_URL: &str = "http://localhost:8081";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OLLAMA_EMBED_MODEL: &str = "all-minilm:latest";
pub const DEFAULT_OLLAMA_CHAT_MODEL: &str = "phi4-mini:latest";
pub const DEFAULT_OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEI_MAX_BATCH: usize = 32;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

pub(crate) fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Tei,
    Ollama,
}

/// Embedding service client
#[derive(Clone)]
pub struct TeiClient {
    client: Client,
    base_url: String,
    backend: EmbeddingBackend,
    model: String,
    dimensions: usize,
    model_id: String,
    timeout: Duration,
}

impl TeiClient {
    pub fn new(
        backend: EmbeddingBackend,
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        let model = model.into();
        let model_id = match backend {
            EmbeddingBackend::Tei => format!("tei:{}", model),
            EmbeddingBackend::Ollama => format!("ollama:{}", model),
        };
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backend,
            model,
            dimensions,
            model_id,
            timeout: Duration::from_secs(DEFAULT_EMBEDDING_TIMEOUT_SECS),
        }
    }

    /// Deadline for each request to the embedding service
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backend(&self) -> EmbeddingBackend {
        self.backend
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<bool> {
        let url = match self.backend {
            EmbeddingBackend::Tei => format!("{}/health", self.base_url),
            EmbeddingBackend::Ollama => format!("{}/api/tags", self.base_url),
        };
        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        Ok(response.status().is_success())
    }

    fn backend_error(&self, message: impl std::fmt::Display) -> IndexError {
        IndexError::Embedding {
            provider: self.model_id.clone(),
            message: message.to_string(),
        }
    }

    fn check_dimension(&self, len: usize) -> healthguard_index::Result<()> {
        if len != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: len,
            });
        }
        Ok(())
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> healthguard_index::Result<Value> {
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| self.backend_error(e))?
            .json::<Value>()
            .await
            .map_err(|e| self.backend_error(e))
    }

    async fn ollama_embed(&self, text: &str) -> healthguard_index::Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = OllamaEmbedRequest {
            model: &self.model,
            prompt: text,
        };
        let value = self.post_json(&url, &request).await?;
        let response: OllamaEmbedResponse =
            serde_json::from_value(value).map_err(|e| self.backend_error(e))?;
        Ok(response.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for TeiClient {
    async fn embed(&self, text: &str) -> healthguard_index::Result<Vec<f32>> {
        let embedding = match self.backend {
            EmbeddingBackend::Ollama => self.ollama_embed(text).await?,
            EmbeddingBackend::Tei => {
                let url = format!("{}/embed", self.base_url);
                let request = TeiEmbedRequest {
                    inputs: text,
                    truncate: true,
                };
                let value = self.post_json(&url, &request).await?;
                parse_embedding_response(value).map_err(|e| self.backend_error(e))?
            }
        };
        self.check_dimension(embedding.len())?;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> healthguard_index::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        match self.backend {
            EmbeddingBackend::Ollama => {
                for text in texts {
                    results.push(self.embed(text).await?);
                }
            }
            EmbeddingBackend::Tei => {
                let max_batch = env_parse("TEI_MAX_BATCH", DEFAULT_TEI_MAX_BATCH).max(1);
                let url = format!("{}/embed", self.base_url);
                for batch in texts.chunks(max_batch) {
                    let request = TeiEmbedBatchRequest {
                        inputs: batch,
                        truncate: true,
                    };
                    let value = self.post_json(&url, &request).await?;
                    let embeddings =
                        parse_embeddings_response(value).map_err(|e| self.backend_error(e))?;
                    for embedding in &embeddings {
                        self.check_dimension(embedding.len())?;
                    }
                    debug!("Embedded batch of {} texts", embeddings.len());
                    results.extend(embeddings);
                }
            }
        }
        Ok(results)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatBackend {
    OpenAi,
    Ollama,
}

/// Chat-completion client that asks for a single JSON object
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    backend: ChatBackend,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(backend: ChatBackend, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backend,
            model: model.into(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<bool> {
        let url = match self.backend {
            ChatBackend::OpenAi => format!("{}/v1/models", self.base_url),
            ChatBackend::Ollama => format!("{}/api/tags", self.base_url),
        };
        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        Ok(response.status().is_success())
    }

    /// Run one system+user exchange and return the raw assistant content
    pub async fn complete_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: system_prompt,
            },
            ChatMessage {
                role: "user",
                content: user_prompt,
            },
        ];

        let content = match self.backend {
            ChatBackend::OpenAi => {
                let url = format!("{}/v1/chat/completions", self.base_url);
                let request = OpenAiChatRequest {
                    model: &self.model,
                    messages,
                    temperature: 0.2,
                    response_format: ResponseFormat { kind: "json_object" },
                };
                let mut builder = self.client.post(&url).json(&request).timeout(self.timeout);
                if let Some(key) = &self.api_key {
                    builder = builder.bearer_auth(key);
                }
                let response = builder
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<OpenAiChatResponse>()
                    .await?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| AgentError::InvalidOutput("empty completion".to_string()))?
            }
            ChatBackend::Ollama => {
                let url = format!("{}/api/chat", self.base_url);
                let request = OllamaChatRequest {
                    model: &self.model,
                    messages,
                    stream: false,
                    format: "json",
                };
                let response = self
                    .client
                    .post(&url)
                    .json(&request)
                    .timeout(self.timeout)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<OllamaChatResponse>()
                    .await?;

                if let Some(total_ms) = response.total_duration.map(|ns| ns as f64 / 1_000_000.0) {
                    debug!("Ollama chat total_duration_ms={:.2}", total_ms);
                }
                response.message.content
            }
        };

        debug!("Chat completion returned {} chars", content.len());
        Ok(content)
    }
}

#[derive(Serialize)]
struct TeiEmbedRequest<'a> {
    inputs: &'a str,
    truncate: bool,
}

#[derive(Serialize)]
struct TeiEmbedBatchRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessageResponse,
    #[serde(default)]
    total_duration: Option<u64>,
}

#[derive(Deserialize)]
struct OllamaChatMessageResponse {
    content: String,
}

fn parse_embedding_response(value: Value) -> std::result::Result<Vec<f32>, String> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_number()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items))
                    .map_err(|e| format!("invalid embedding array: {}", e))
            } else {
                let first = items
                    .into_iter()
                    .next()
                    .ok_or_else(|| "missing embeddings".to_string())?;
                serde_json::from_value(first).map_err(|e| format!("invalid embedding array: {}", e))
            }
        }
        other => Err(format!("unexpected embedding response format: {}", other)),
    }
}

fn parse_embeddings_response(value: Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items.first().map(|v| v.is_array()).unwrap_or(false) {
                serde_json::from_value(Value::Array(items))
                    .map_err(|e| format!("invalid embeddings response: {}", e))
            } else {
                let single: Vec<f32> = serde_json::from_value(Value::Array(items))
                    .map_err(|e| format!("invalid embedding array: {}", e))?;
                Ok(vec![single])
            }
        }
        other => Err(format!("unexpected embedding response format: {}", other)),
    }
}

/// Strip markdown fences and surrounding prose from a model's JSON reply
pub fn normalize_json_payload(payload: &str) -> String {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }

    let without_fence = if trimmed.starts_with("```") {
        let mut lines = trimmed.lines();
        let _ = lines.next(); // drop ``` or ```json
        let mut content = lines.collect::<Vec<_>>().join("\n");
        if content.ends_with("```") {
            content.truncate(content.len().saturating_sub(3));
        }
        content.trim().to_string()
    } else {
        trimmed.to_string()
    };

    if let (Some(start), Some(end)) = (without_fence.find('{'), without_fence.rfind('}')) {
        if start < end {
            return without_fence[start..=end].to_string();
        }
    }

    without_fence
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_strips_fences() {
        let raw = "```json\n{\"symptoms\": []}\n```";
        assert_eq!(normalize_json_payload(raw), "{\"symptoms\": []}");
    }

    #[test]
    fn test_normalize_drops_prose() {
        let raw = "Here you go: {\"a\": 1} hope that helps";
        assert_eq!(normalize_json_payload(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_embedding_shapes() {
        assert_eq!(parse_embedding_response(json!([0.5, 1.0])).unwrap(), vec![0.5, 1.0]);
        assert_eq!(parse_embedding_response(json!([[0.5, 1.0]])).unwrap(), vec![0.5, 1.0]);
        assert!(parse_embedding_response(json!({"error": "x"})).is_err());

        let batch = parse_embeddings_response(json!([[1.0], [2.0]])).unwrap();
        assert_eq!(batch, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_model_ids() {
        let tei = TeiClient::new(EmbeddingBackend::Tei, "http://localhost:8081/", "bge-small", 384);
        assert_eq!(tei.model_id(), "tei:bge-small");
        assert_eq!(tei.base_url(), "http://localhost:8081");
        assert_eq!(tei.dimensions(), 384);
    }

    #[tokio::test]
    async fn test_stalled_embedding_service_times_out() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let client = TeiClient::new(EmbeddingBackend::Tei, format!("http://{}", addr), "default", 384)
            .with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = client.embed("fever").await.unwrap_err();

        assert!(matches!(err, IndexError::Embedding { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(AgentError::from(err).is_transient());
        server.abort();
    }

    #[tokio::test]
    #[ignore = "requires a running TEI server"]
    async fn test_tei_embed_live() {
        let client = TeiClient::new(EmbeddingBackend::Tei, DEFAULT_TEI_URL, "default", 384);
        let vector = client.embed("fever and cough").await.unwrap();
        assert_eq!(vector.len(), 384);
    }
}
