//! LLM client: one interface over Ollama, OpenAI-compatible and Anthropic
//! chat endpoints.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{ChatRequest, ChatResponse};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ERROR_BODY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Provider seam
// ---------------------------------------------------------------------------

/// Anything that can answer a chat request.
///
/// [`LlmClient`] is the network implementation; tests substitute canned
/// providers.
pub trait ChatProvider: Send + Sync {
    /// Send one request.
    fn chat(&self, request: &ChatRequest) -> impl Future<Output = Result<ChatResponse, LlmError>> + Send;

    /// Model name used in logs.
    fn model(&self) -> &str;
}

/// Backend for [`LlmClient`].
#[derive(Clone)]
pub enum LlmProvider {
    /// Ollama's `/api/chat`.
    Ollama {
        /// e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// `/v1/chat/completions` (OpenAI, vLLM, llama.cpp server, Together, ...).
    OpenAiCompatible {
        /// API root without `/v1`.
        base_url: String,
        /// Bearer token, if required.
        api_key: Option<String>,
    },
    /// Anthropic's `/v1/messages`.
    Anthropic {
        /// API root without `/v1`.
        base_url: String,
        /// `x-api-key` value.
        api_key: String,
    },
    /// No model; every call fails with [`LlmError::Unavailable`].
    None,
}

impl fmt::Debug for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama { base_url } => f.debug_struct("Ollama").field("base_url", base_url).finish(),
            Self::OpenAiCompatible { base_url, api_key } => f
                .debug_struct("OpenAiCompatible")
                .field("base_url", base_url)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Anthropic { base_url, .. } => f
                .debug_struct("Anthropic")
                .field("base_url", base_url)
                .field("api_key", &"<redacted>")
                .finish(),
            Self::None => f.write_str("None"),
        }
    }
}

impl LlmProvider {
    /// Build from a config-style provider name: `ollama`, `openai`,
    /// `anthropic` or `none`.
    ///
    /// # Errors
    /// [`LlmError::ConfigError`] for an unknown name or a missing Anthropic key.
    pub fn from_name(name: &str, base_url: &str, api_key: Option<String>) -> Result<Self, LlmError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama { base_url }),
            "openai" | "openai-compatible" | "openai_compatible" => Ok(Self::OpenAiCompatible { base_url, api_key }),
            "anthropic" => {
                let api_key = api_key.ok_or_else(|| LlmError::ConfigError("anthropic provider needs an API key".into()))?;
                Ok(Self::Anthropic { base_url, api_key })
            }
            "none" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!("unknown provider '{other}'"))),
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ollama { .. } => "ollama",
            Self::OpenAiCompatible { .. } => "openai",
            Self::Anthropic { .. } => "anthropic",
            Self::None => "none",
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Call counts since the client was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Successful calls.
    pub calls: u64,
    /// Calls that failed after all attempts.
    pub failures: u64,
    /// Extra attempts made.
    pub retries: u64,
    /// Tokens generated across successful calls.
    pub tokens_generated: u64,
}

/// HTTP chat client with retry and linear backoff.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    max_retries: u32,
    backoff_ms: u64,
    stats: Mutex<ClientStats>,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            max_retries,
            backoff_ms: 500,
            stats: Mutex::new(ClientStats::default()),
        }
    }

    /// A client with no backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, "", 0)
    }

    /// Base delay between attempts; attempt `k` waits `k × backoff_ms`.
    #[must_use]
    pub fn with_backoff(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    /// Whether a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// The configured backend.
    #[must_use]
    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    /// Call counts so far.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        *self.stats.lock()
    }

    /// Send `request`, retrying transient failures up to `max_retries` times.
    ///
    /// # Errors
    /// [`LlmError::Unavailable`] with no backend, the first non-retryable
    /// error, or [`LlmError::RetriesExhausted`].
    pub async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let (url, headers, body): (String, Vec<(&'static str, String)>, Value) = match &self.provider {
            LlmProvider::None => return Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => (format!("{base_url}/api/chat"), Vec::new(), ollama_body(&self.model, request)),
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let headers: Vec<(&'static str, String)> = api_key
                    .iter()
                    .map(|key| ("Authorization", format!("Bearer {key}")))
                    .collect();
                (format!("{base_url}/v1/chat/completions"), headers, openai_body(&self.model, request))
            }
            LlmProvider::Anthropic { base_url, api_key } => (
                format!("{base_url}/v1/messages"),
                vec![("x-api-key", api_key.clone()), ("anthropic-version", ANTHROPIC_VERSION.to_string())],
                anthropic_body(&self.model, request),
            ),
        };

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                self.stats.lock().retries += 1;
                debug!(attempt = attempt + 1, max = self.max_retries + 1, provider = self.provider.kind(), "Retrying LLM call");
                tokio::time::sleep(Duration::from_millis(self.backoff_ms * u64::from(attempt))).await;
            }

            let outcome = match self.attempt(&url, &headers, &body, request.timeout_ms).await {
                Ok((json, latency_ms)) => extract_reply(&self.provider, &json).map(|(text, tokens)| (text, tokens, latency_ms)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok((text, tokens_generated, latency_ms)) => {
                    {
                        let mut stats = self.stats.lock();
                        stats.calls += 1;
                        stats.tokens_generated += u64::from(tokens_generated);
                    }
                    debug!(provider = self.provider.kind(), model = %self.model, latency_ms, tokens_generated, "LLM call succeeded");
                    return Ok(ChatResponse {
                        text,
                        tokens_generated,
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(provider = self.provider.kind(), attempt = attempt + 1, error = %e, "LLM call failed");
                    last_error = e.to_string();
                }
                Err(e) => {
                    warn!(provider = self.provider.kind(), error = %e, "LLM call failed, not retrying");
                    self.stats.lock().failures += 1;
                    return Err(e);
                }
            }
        }

        self.stats.lock().failures += 1;
        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &Value,
        timeout_ms: u64,
    ) -> Result<(Value, u64), LlmError> {
        let start = Instant::now();
        let mut builder = self.http.post(url).json(body).timeout(Duration::from_millis(timeout_ms));
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| if e.is_timeout() { LlmError::Timeout(timeout_ms) } else { e.into() })?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                let cut = (0..=ERROR_BODY_LIMIT).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
                body.truncate(cut);
            }
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp.json().await.map_err(|e| LlmError::ParseError(e.to_string()))?;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok((json, latency_ms))
    }
}

impl ChatProvider for LlmClient {
    fn chat(&self, request: &ChatRequest) -> impl Future<Output = Result<ChatResponse, LlmError>> + Send {
        self.generate(request)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Wire formats
// ---------------------------------------------------------------------------

fn ollama_body(model: &str, request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
        "stream": false,
        "options": {
            "temperature": request.temperature,
            "num_predict": request.max_tokens,
        }
    });
    if request.json_mode {
        body["format"] = json!("json");
    }
    body
}

fn openai_body(model: &str, request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });
    if request.json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn anthropic_body(model: &str, request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.conversation(),
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });
    if let Some(system) = request.system_prompt() {
        body["system"] = json!(system);
    }
    body
}

/// Pull reply text and token count out of a provider response.
fn extract_reply(provider: &LlmProvider, json: &Value) -> Result<(String, u32), LlmError> {
    let tokens = |v: &Value| u32::try_from(v.as_u64().unwrap_or(0)).unwrap_or(u32::MAX);
    let missing = |what: &str| LlmError::ParseError(format!("{} response missing {what}", provider.kind()));

    match provider {
        LlmProvider::Ollama { .. } => {
            let text = json["message"]["content"].as_str().ok_or_else(|| missing("message.content"))?;
            Ok((text.to_string(), tokens(&json["eval_count"])))
        }
        LlmProvider::OpenAiCompatible { .. } => {
            let text = json["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| missing("choices[0].message.content"))?;
            Ok((text.to_string(), tokens(&json["usage"]["completion_tokens"])))
        }
        LlmProvider::Anthropic { .. } => {
            let blocks = json["content"].as_array().ok_or_else(|| missing("content"))?;
            let text: String = blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect();
            Ok((text, tokens(&json["usage"]["output_tokens"])))
        }
        LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
    }
}

// ---------------------------------------------------------------------------
// Structured output
// ---------------------------------------------------------------------------

/// The outermost `{...}` block in `text`, skipping code fences and chatter.
#[must_use]
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse model output as JSON into `T`.
///
/// # Errors
/// [`LlmError::ParseError`] if no JSON object is found or it does not match `T`.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let block = extract_json_block(text).ok_or_else(|| LlmError::ParseError("no JSON object in reply".into()))?;
    serde_json::from_str(block).map_err(|e| LlmError::ParseError(format!("JSON parse error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatRequest {
        ChatRequest::new("You are a critic.", "Scene one.").with_json()
    }

    #[test]
    fn provider_from_name() {
        assert_eq!(
            LlmProvider::from_name("Ollama", "http://localhost:11434/", None).expect("ollama").kind(),
            "ollama"
        );
        assert!(matches!(
            LlmProvider::from_name("anthropic", "https://api.anthropic.com", None),
            Err(LlmError::ConfigError(_))
        ));
        assert!(LlmProvider::from_name("gpt", "", None).is_err());
        match LlmProvider::from_name("openai", "https://api.example.com/", Some("k".into())).expect("openai") {
            LlmProvider::OpenAiCompatible { base_url, .. } => assert_eq!(base_url, "https://api.example.com"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn debug_redacts_keys() {
        let provider = LlmProvider::Anthropic {
            base_url: "https://api.anthropic.com".into(),
            api_key: "sk-secret".into(),
        };
        assert!(!format!("{provider:?}").contains("sk-secret"));
    }

    #[tokio::test]
    async fn none_client_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        let err = client.generate(&request()).await.expect_err("no backend");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[test]
    fn request_bodies_per_provider() {
        let req = request();
        let ollama = ollama_body("qwen", &req);
        assert_eq!(ollama["format"], "json");
        assert_eq!(ollama["messages"][0]["role"], "system");
        assert_eq!(ollama["stream"], false);

        let openai = openai_body("gpt", &req);
        assert_eq!(openai["response_format"]["type"], "json_object");
        assert_eq!(openai["messages"].as_array().map(Vec::len), Some(2));

        let anthropic = anthropic_body("claude", &req);
        assert_eq!(anthropic["system"], "You are a critic.");
        assert_eq!(anthropic["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(anthropic["messages"][0]["role"], "user");
    }

    #[test]
    fn replies_are_extracted() {
        let ollama = LlmProvider::Ollama { base_url: String::new() };
        let (text, tokens) =
            extract_reply(&ollama, &json!({"message": {"content": "hi"}, "eval_count": 7})).expect("ollama");
        assert_eq!((text.as_str(), tokens), ("hi", 7));

        let openai = LlmProvider::OpenAiCompatible { base_url: String::new(), api_key: None };
        let reply = json!({"choices": [{"message": {"content": "ok"}}], "usage": {"completion_tokens": 3}});
        assert_eq!(extract_reply(&openai, &reply).expect("openai"), ("ok".to_string(), 3));

        let anthropic = LlmProvider::Anthropic { base_url: String::new(), api_key: "k".into() };
        let reply = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}], "usage": {"output_tokens": 2}});
        assert_eq!(extract_reply(&anthropic, &reply).expect("anthropic"), ("ab".to_string(), 2));

        assert!(matches!(extract_reply(&ollama, &json!({})), Err(LlmError::ParseError(_))));
    }

    #[test]
    fn structured_output_survives_fences() {
        #[derive(serde::Deserialize)]
        struct Reply {
            engagement: f32,
        }
        let text = "Sure!\n```json\n{\"engagement\": 0.7}\n```";
        let reply: Reply = parse_structured(text).expect("parse");
        assert!((reply.engagement - 0.7).abs() < f32::EPSILON);
        assert!(parse_structured::<Reply>("no json here").is_err());
    }
}
