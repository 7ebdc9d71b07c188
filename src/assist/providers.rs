//! Remote text-generation backends.

use super::AssistError;
use crate::config::{Provider, Settings};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-3.5-turbo";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A single request to a text-generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    /// Ask the backend for a JSON document instead of free text.
    pub json: bool,
    pub max_tokens: Option<u32>,
}

/// Something that turns a prompt into text.
///
/// Implement this for each remote provider; tests inject their own.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AssistError>;

    /// Display name for status lines and logs.
    fn name(&self) -> &'static str;
}

/// Google Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

/// Any endpoint speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Prompt {
    pub fn text(user: impl Into<String>) -> Self {
        Prompt {
            system: None,
            user: user.into(),
            json: false,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn limit(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        GeminiClient {
            http: http_client(),
            api_key,
            base_url: trimmed_base(base_url, GEMINI_BASE_URL),
            model: model.unwrap_or_else(|| GEMINI_MODEL.to_string()),
        }
    }

    fn body(prompt: &Prompt) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt.user }] }],
        });
        if let Some(system) = &prompt.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        let mut generation = serde_json::Map::new();
        if prompt.json {
            generation.insert("responseMimeType".into(), json!("application/json"));
            generation.insert(
                "responseSchema".into(),
                json!({
                    "type": "OBJECT",
                    "properties": { "tasks": { "type": "ARRAY", "items": { "type": "STRING" } } },
                    "required": ["tasks"],
                }),
            );
        }
        if let Some(max) = prompt.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AssistError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::body(prompt))
            .send()
            .await?;
        let parsed: GeminiResponse = read_json(response).await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        non_empty(text)
    }

    fn name(&self) -> &'static str {
        "Gemini"
    }
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        OpenAiClient {
            http: http_client(),
            api_key,
            base_url: trimmed_base(base_url, OPENAI_BASE_URL),
            model: model.unwrap_or_else(|| OPENAI_MODEL.to_string()),
        }
    }

    fn body(&self, prompt: &Prompt) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &prompt.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt.user }));
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(max) = prompt.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AssistError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(prompt))
            .send()
            .await?;
        let parsed: ChatResponse = read_json(response).await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(text)
    }

    fn name(&self) -> &'static str {
        "OpenAI"
    }
}

/// Backend for the configured provider, or `None` without a key.
pub fn from_settings(settings: &Settings, api_key: Option<String>) -> Option<Arc<dyn TextGenerator>> {
    let key = api_key?;
    let generator: Arc<dyn TextGenerator> = match settings.provider {
        Provider::Gemini => Arc::new(GeminiClient::new(
            key,
            settings.base_url.clone(),
            settings.model.clone(),
        )),
        Provider::OpenAi => Arc::new(OpenAiClient::new(
            key,
            settings.base_url.clone(),
            settings.model.clone(),
        )),
    };
    Some(generator)
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to default http client");
            reqwest::Client::new()
        })
}

fn trimmed_base(base: Option<String>, default: &str) -> String {
    base.map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AssistError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(AssistError::Status {
            status: status.as_u16(),
            body: error_message(&body),
        });
    }
    serde_json::from_str(&body).map_err(|err| AssistError::Parse(err.to_string()))
}

/// `error.message` from a JSON error body, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn non_empty(text: String) -> Result<String, AssistError> {
    if text.trim().is_empty() {
        Err(AssistError::EmptyResponse)
    } else {
        Ok(text)
    }
}
