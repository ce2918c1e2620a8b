use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Response;
use serde_json::{json, Value};

use crate::error::AnalysisError;

pub const ASSESSOR_SYSTEM_PROMPT: &str = r#"You are an expert automotive damage assessor with decades of experience in the insurance industry.
Analyze the car image and provide the following information:
1. Car metadata (make, model, and color)
2. A detailed description of the visible damage
3. An estimated repair cost range in USD

If you cannot determine any information with confidence, respond with "TBD" for that specific field.
Format your response as JSON with the following structure:
{
  "carMetadata": {
    "make": "string",
    "model": "string",
    "color": "string"
  },
  "damageDescription": "string",
  "repairEstimate": "string"
}"#;

pub const ASSESSOR_USER_INSTRUCTION: &str =
    "Analyze this car image for make, model, color, damage description, and estimated repair cost.";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u64 = 1024;
const ERROR_BODY_MAX_CHARS: usize = 512;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    /// Answers locally with a canned completion.
    Dryrun,
}

impl ProviderKind {
    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Dryrun => "dryrun",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            ProviderKind::Dryrun => "dryrun-vision-1",
        }
    }

    pub fn default_api_base(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Dryrun => "dryrun://local",
        }
    }

    fn api_base_env_keys(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["OPENAI_API_BASE", "OPENAI_BASE_URL"],
            ProviderKind::Anthropic => &["ANTHROPIC_API_BASE"],
            ProviderKind::Dryrun => &[],
        }
    }

    /// Environment variables consulted for a key when none is given.
    pub fn api_key_env_keys(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
            ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderKind::Dryrun => &[],
        }
    }

    pub fn api_key_from_env(self) -> Option<String> {
        first_non_empty_env(self.api_key_env_keys())
    }
}

impl FromStr for ProviderKind {
    type Err = AnalysisError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "dryrun" => Ok(ProviderKind::Dryrun),
            other => Err(AnalysisError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Provider selection and transport settings for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl AnalysisConfig {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_base: provider.default_api_base().to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Defaults overlaid with `*_API_BASE` and `CLAIMLENS_MODEL`.
    pub fn from_env(provider: ProviderKind) -> Self {
        let mut config = Self::new(provider);
        if let Some(base) = first_non_empty_env(provider.api_base_env_keys()) {
            config = config.with_api_base(&base);
        }
        if let Some(model) = first_non_empty_env(&["CLAIMLENS_MODEL"]) {
            config.model = model;
        }
        config
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        let trimmed = model.trim();
        if !trimmed.is_empty() {
            self.model = trimmed.to_string();
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        match self.provider {
            ProviderKind::OpenAi => format!("{}/chat/completions", self.api_base),
            ProviderKind::Anthropic => format!("{}/messages", self.api_base),
            ProviderKind::Dryrun => self.api_base.clone(),
        }
    }
}

/// Sends one image to the configured multimodal model.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    config: AnalysisConfig,
    http: reqwest::Client,
}

impl InferenceClient {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AnalysisError::Transport)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Shared HTTP client, also used for remote image ingestion.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Returns the decoded provider body untouched.
    pub async fn request_analysis(
        &self,
        api_key: &str,
        preview_uri: &str,
    ) -> Result<Value, AnalysisError> {
        if api_key.trim().is_empty() {
            return Err(AnalysisError::MissingCredential);
        }

        let endpoint = self.config.endpoint();
        log::info!(
            "ANALYSIS_REQUEST provider={} model={} endpoint={}",
            self.config.provider,
            self.config.model,
            endpoint
        );

        let request = match self.config.provider {
            ProviderKind::Dryrun => return Ok(dryrun_completion(&self.config.model)),
            ProviderKind::OpenAi => self
                .http
                .post(&endpoint)
                .bearer_auth(api_key)
                .json(&openai_payload(&self.config.model, preview_uri)),
            ProviderKind::Anthropic => self
                .http
                .post(&endpoint)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_payload(&self.config.model, preview_uri)),
        };

        let response = request.send().await.map_err(AnalysisError::Transport)?;
        response_json_or_error(response).await
    }

    /// Pulls the model's reply text out of a provider body. Missing text
    /// comes back empty.
    pub fn completion_text(&self, body: &Value) -> String {
        match self.config.provider {
            ProviderKind::OpenAi | ProviderKind::Dryrun => openai_completion_text(body),
            ProviderKind::Anthropic => anthropic_completion_text(body),
        }
    }
}

fn openai_payload(model: &str, preview_uri: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            {
                "role": "system",
                "content": ASSESSOR_SYSTEM_PROMPT,
            },
            {
                "role": "user",
                "content": [
                    {"type": "text", "text": ASSESSOR_USER_INSTRUCTION},
                    {"type": "image_url", "image_url": {"url": preview_uri}},
                ],
            },
        ],
    })
}

fn anthropic_payload(model: &str, preview_uri: &str) -> Value {
    let source = match split_data_uri(preview_uri) {
        Some((media_type, data)) => json!({
            "type": "base64",
            "media_type": media_type,
            "data": data,
        }),
        None => json!({"type": "url", "url": preview_uri}),
    };
    json!({
        "model": model,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "system": ASSESSOR_SYSTEM_PROMPT,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "image", "source": source},
                {"type": "text", "text": ASSESSOR_USER_INSTRUCTION},
            ],
        }],
    })
}

fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    Some((media_type, data))
}

fn openai_completion_text(body: &Value) -> String {
    match body.pointer("/choices/0/message/content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => join_text_parts(parts),
        _ => String::new(),
    }
}

fn anthropic_completion_text(body: &Value) -> String {
    body.get("content")
        .and_then(Value::as_array)
        .map(|parts| join_text_parts(parts))
        .unwrap_or_default()
}

fn join_text_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("\n")
}

async fn response_json_or_error(response: Response) -> Result<Value, AnalysisError> {
    let status = response.status();
    let code = status.as_u16();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    let body = response.text().await;

    if !status.is_success() {
        let text = body.unwrap_or_default();
        let message = upstream_error_message(code, is_json, &text);
        log::warn!("ANALYSIS_UPSTREAM_ERROR status={code} message={message:?}");
        return Err(AnalysisError::UpstreamError {
            status: code,
            message,
        });
    }

    let text = body.map_err(AnalysisError::Transport)?;
    serde_json::from_str(&text).map_err(|err| AnalysisError::InvalidResponse(err.to_string()))
}

/// JSON bodies yield `error.message` (plus its code or type when not already
/// mentioned) or the generic status line; other bodies yield their raw text.
fn upstream_error_message(status: u16, is_json: bool, body: &str) -> String {
    if is_json {
        if let Some(error) = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|value| value.get("error").cloned())
        {
            if let Some(message) = error.get("message").and_then(Value::as_str) {
                let marker = error
                    .get("code")
                    .and_then(Value::as_str)
                    .or_else(|| error.get("type").and_then(Value::as_str));
                return match marker {
                    Some(marker) if !message.contains(marker) => format!("{message} ({marker})"),
                    _ => message.to_string(),
                };
            }
        }
        return generic_status_message(status);
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return truncate_text(trimmed, ERROR_BODY_MAX_CHARS);
    }
    generic_status_message(status)
}

fn generic_status_message(status: u16) -> String {
    format!("request failed with status {status}")
}

fn dryrun_completion(model: &str) -> Value {
    let content = "Assessment complete.\n{\"carMetadata\": {\"make\": \"Toyota\", \"model\": \"Camry\", \"color\": \"Silver\"}, \"damageDescription\": \"Dented rear bumper with scuffed paint on the left corner.\", \"repairEstimate\": \"TBD\"}";
    json!({
        "id": "dryrun-completion",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
    })
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn client_for(provider: ProviderKind, api_base: &str) -> anyhow::Result<InferenceClient> {
        Ok(InferenceClient::new(
            AnalysisConfig::new(provider).with_api_base(api_base),
        )?)
    }

    #[test]
    fn provider_kind_parses_ids() {
        assert_eq!("OpenAI".parse::<ProviderKind>().ok(), Some(ProviderKind::OpenAi));
        assert_eq!(" anthropic ".parse::<ProviderKind>().ok(), Some(ProviderKind::Anthropic));
        assert!(matches!(
            "gemini".parse::<ProviderKind>(),
            Err(AnalysisError::UnsupportedProvider(ref id)) if id == "gemini"
        ));
    }

    #[test]
    fn config_builders_normalize_values() {
        let config = AnalysisConfig::new(ProviderKind::OpenAi)
            .with_api_base("http://localhost:9000/v1/")
            .with_model("  ");
        assert_eq!(config.endpoint(), "http://localhost:9000/v1/chat/completions");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(
            config.with_timeout(Duration::from_secs(5)).timeout,
            Duration::from_secs(5)
        );
        assert_eq!(
            AnalysisConfig::new(ProviderKind::Anthropic).endpoint(),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn openai_payload_carries_prompt_and_image() {
        let payload = openai_payload("gpt-4o", "data:image/png;base64,AAAA");
        assert_eq!(payload["model"], json!("gpt-4o"));
        assert_eq!(payload["messages"][0]["role"], json!("system"));
        assert!(payload["messages"][0]["content"]
            .as_str()
            .unwrap_or_default()
            .contains("\"carMetadata\""));
        assert_eq!(payload["messages"][1]["content"][0]["text"], json!(ASSESSOR_USER_INSTRUCTION));
        assert_eq!(
            payload["messages"][1]["content"][1]["image_url"]["url"],
            json!("data:image/png;base64,AAAA")
        );
    }

    #[test]
    fn anthropic_payload_splits_data_uri() {
        let payload = anthropic_payload("claude", "data:image/jpeg;base64,QUJD");
        let source = &payload["messages"][0]["content"][0]["source"];
        assert_eq!(source["type"], json!("base64"));
        assert_eq!(source["media_type"], json!("image/jpeg"));
        assert_eq!(source["data"], json!("QUJD"));
        assert_eq!(payload["system"], json!(ASSESSOR_SYSTEM_PROMPT));

        let remote = anthropic_payload("claude", "https://example.test/car.jpg");
        assert_eq!(remote["messages"][0]["content"][0]["source"]["type"], json!("url"));
    }

    #[test]
    fn completion_text_handles_each_shape() {
        let openai = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(openai_completion_text(&openai), "hello");
        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}}]});
        assert_eq!(openai_completion_text(&parts), "a\nb");
        assert_eq!(openai_completion_text(&json!({"choices": []})), "");
        let anthropic = json!({"content": [{"type": "text", "text": "{\"repairEstimate\": \"$1\"}"}]});
        assert_eq!(anthropic_completion_text(&anthropic), "{\"repairEstimate\": \"$1\"}");
        assert_eq!(anthropic_completion_text(&Value::Null), "");
    }

    #[test]
    fn upstream_error_message_fallbacks() {
        assert_eq!(
            upstream_error_message(401, true, r#"{"error":{"message":"invalid_api_key"}}"#),
            "invalid_api_key"
        );
        assert_eq!(
            upstream_error_message(
                401,
                true,
                r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#
            ),
            "Incorrect API key provided (invalid_api_key)"
        );
        assert_eq!(
            upstream_error_message(
                429,
                true,
                r#"{"type":"error","error":{"type":"rate_limit_error","message":"Slow down"}}"#
            ),
            "Slow down (rate_limit_error)"
        );
        assert_eq!(upstream_error_message(502, false, "Bad Gateway\n"), "Bad Gateway");
        assert_eq!(
            upstream_error_message(500, true, r#"{"detail":"boom"}"#),
            "request failed with status 500"
        );
        assert_eq!(
            upstream_error_message(500, true, "<html>oops</html>"),
            "request failed with status 500"
        );
        assert_eq!(upstream_error_message(503, false, "   "), "request failed with status 503");
    }

    #[tokio::test]
    async fn missing_credential_is_checked_before_network() -> anyhow::Result<()> {
        let client = client_for(ProviderKind::OpenAi, "http://127.0.0.1:9")?;
        let err = client.request_analysis("  ", "data:image/png;base64,AA").await;
        assert!(matches!(err, Err(AnalysisError::MissingCredential)));
        Ok(())
    }

    #[tokio::test]
    async fn openai_request_is_bearer_authenticated() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "{}"}}]});
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "gpt-4o"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = client_for(ProviderKind::OpenAi, &server.url())?;
        let response = client
            .request_analysis("sk-test", "data:image/png;base64,AA")
            .await?;
        mock.assert_async().await;
        assert_eq!(response, body);
        assert_eq!(client.completion_text(&response), "{}");
        Ok(())
    }

    #[tokio::test]
    async fn anthropic_request_uses_api_key_header() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "ak-test")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": [{"type": "text", "text": "none"}]}"#)
            .create_async()
            .await;

        let client = client_for(ProviderKind::Anthropic, &server.url())?;
        let response = client
            .request_analysis("ak-test", "data:image/png;base64,AA")
            .await?;
        mock.assert_async().await;
        assert_eq!(client.completion_text(&response), "none");
        Ok(())
    }

    #[tokio::test]
    async fn non_success_status_becomes_upstream_error() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_header("content-type", "text/plain")
            .with_body("upstream exploded")
            .create_async()
            .await;

        let client = client_for(ProviderKind::OpenAi, &server.url())?;
        let err = client
            .request_analysis("sk-test", "data:image/png;base64,AA")
            .await;
        assert!(matches!(
            err,
            Err(AnalysisError::UpstreamError { status: 500, ref message }) if message == "upstream exploded"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_success_body_is_reported() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let client = client_for(ProviderKind::OpenAi, &server.url())?;
        let err = client
            .request_analysis("sk-test", "data:image/png;base64,AA")
            .await;
        assert!(matches!(err, Err(AnalysisError::InvalidResponse(_))));
        Ok(())
    }

    #[tokio::test]
    async fn dryrun_answers_without_network() -> anyhow::Result<()> {
        let client = client_for(ProviderKind::Dryrun, "dryrun://local")?;
        let response = client.request_analysis("any-key", "data:image/png;base64,AA").await?;
        let text = client.completion_text(&response);
        assert!(text.starts_with("Assessment complete."));
        assert!(text.contains("\"make\": \"Toyota\""));
        Ok(())
    }
}
