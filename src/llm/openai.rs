//! OpenAI-compatible chat-completions client with JSON-schema output.
//!
//! Works against any server exposing `/chat/completions` with
//! `response_format: json_schema` (OpenAI, vLLM, llama.cpp server, Ollama).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::{parse_json_content, LlmRequest, LlmService};
use crate::TaleforgeError;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    response_format: Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiCompatibleLlm {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiCompatibleLlm {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        temperature: f32,
    ) -> Result<Self, TaleforgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TaleforgeError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            temperature,
        })
    }
}

/// Map an HTTP status to the error taxonomy: throttling and server errors
/// are transient, everything else is permanent.
pub(crate) fn classify_status(service: &str, status: StatusCode, body: String) -> TaleforgeError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        TaleforgeError::transient(service, format!("status {status}: {body}"))
    } else {
        TaleforgeError::service(service, format!("status {status}: {body}"))
    }
}

#[async_trait]
impl LlmService for OpenAiCompatibleLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<Value, TaleforgeError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.task,
                    "schema": request.schema,
                    "strict": false,
                }
            }),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("llm", status, text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TaleforgeError::SchemaViolation(format!("malformed completion: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TaleforgeError::SchemaViolation("empty completion".to_string()))?;

        debug!(task = %request.task, chars = content.len(), "LLM completion received");
        parse_json_content(&content)
    }

    fn is_available(&self) -> bool {
        true
    }
}
