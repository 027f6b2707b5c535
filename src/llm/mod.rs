//! Structured-output LLM access.
//!
//! The `LlmService` trait hides the provider; `complete_typed` adds the
//! schema contract on top: the JSON schema is derived from the Rust output
//! type with `schemars`, transient failures are retried with backoff, and a
//! response that does not parse gets one stricter re-prompt before surfacing
//! as `SchemaViolation`.

pub mod openai;
pub mod provider;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::utils::retry::with_backoff;
use crate::TaleforgeError;

pub use openai::OpenAiCompatibleLlm;
pub use provider::{create_llm_service, load_llm_config, LlmConfig};

/// One structured completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Short task name (`segment`, `beats`, `resolve_identity`, …); also the
    /// schema name sent to the provider.
    pub task: String,
    pub system: String,
    pub prompt: String,
    /// JSON schema the response must satisfy.
    pub schema: Value,
    /// Set on the re-prompt after a schema violation.
    pub strict: bool,
}

impl LlmRequest {
    pub fn new(task: impl Into<String>, prompt: impl Into<String>, schema: Value) -> Self {
        Self {
            task: task.into(),
            system: "You convert narrative prose into structured game-world data. \
                     Answer with JSON only."
                .to_string(),
            prompt: prompt.into(),
            schema,
            strict: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    /// Same request, with the parse error and schema spelled out.
    pub fn stricter(&self, error: &str) -> Self {
        let mut next = self.clone();
        next.strict = true;
        next.prompt = format!(
            "{}\n\nYour previous answer was rejected: {}.\n\
             Reply with a single JSON object that validates against this schema, \
             with no prose and no code fences:\n{}",
            self.prompt, error, self.schema
        );
        next
    }
}

/// Provider-agnostic structured completion.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Return the parsed JSON answer to `request`.
    async fn complete(&self, request: &LlmRequest) -> Result<Value, TaleforgeError>;

    /// False when no provider is configured.
    fn is_available(&self) -> bool;
}

/// Stand-in used when no LLM is configured. Every call fails permanently so
/// callers take their vector-only fallbacks.
pub struct NoopLlmService;

impl Default for NoopLlmService {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopLlmService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmService for NoopLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<Value, TaleforgeError> {
        Err(TaleforgeError::service(
            "llm",
            format!("no LLM configured (task '{}')", request.task),
        ))
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// JSON schema of `T` as a plain value.
pub fn schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(&schema).unwrap_or(Value::Null)
}

/// Pull a JSON value out of model text: strips code fences and any prose
/// around the outermost object or array.
pub fn parse_json_content(text: &str) -> Result<Value, TaleforgeError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }

    let start = unfenced.find(['{', '[']);
    let end = unfenced.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e > s => serde_json::from_str::<Value>(&unfenced[s..=e])
            .map_err(|err| TaleforgeError::SchemaViolation(format!("unparseable JSON: {err}"))),
        _ => Err(TaleforgeError::SchemaViolation(
            "response contains no JSON object".to_string(),
        )),
    }
}

/// Run a typed completion with retry and the stricter re-prompt.
pub async fn complete_typed<T>(
    llm: &dyn LlmService,
    retry: &RetryPolicy,
    schema_retries: u32,
    task: &str,
    prompt: String,
) -> Result<T, TaleforgeError>
where
    T: DeserializeOwned + JsonSchema,
{
    let mut request = LlmRequest::new(task, prompt, schema_for::<T>());
    let mut attempt = 0;
    loop {
        let value = with_backoff(retry, task, || llm.complete(&request)).await?;
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => {
                debug!(task, strict = request.strict, "structured completion parsed");
                return Ok(parsed);
            }
            Err(e) if attempt < schema_retries => {
                warn!(task, error = %e, "LLM output failed schema, re-prompting");
                request = request.stricter(&e.to_string());
                attempt += 1;
            }
            Err(e) => {
                return Err(TaleforgeError::SchemaViolation(format!(
                    "{task}: {e} after {} attempt(s)",
                    attempt + 1
                )));
            }
        }
    }
}
