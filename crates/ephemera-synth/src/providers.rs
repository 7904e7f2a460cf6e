//! LLM provider abstraction. Each provider implements the same interface so
//! the synthesizer can switch between them purely via configuration.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::error::SynthError;

const MAX_OUTPUT_TOKENS: u32 = 8192;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub model: String,
    pub provider: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmResponse, SynthError>;
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("reqwest client builder never fails with static config")
}

// ── Anthropic Claude ──────────────────────────────────────────────────────────

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        AnthropicProvider { client: http_client(), api_key: api_key.into(), model: model.into() }
    }

    pub fn default_model() -> &'static str {
        "claude-sonnet-4-20250514"
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmResponse, SynthError> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthError::Provider(format!("Anthropic request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(SynthError::Provider(format!("Anthropic API error: {}", resp.status())));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SynthError::Provider(format!("Anthropic response decode failed: {e}")))?;

        let text = value["content"][0]["text"]
            .as_str()
            .ok_or_else(|| SynthError::Provider("empty response from Anthropic API".into()))?
            .to_string();

        Ok(LlmResponse {
            text,
            input_tokens: value["usage"]["input_tokens"].as_u64(),
            output_tokens: value["usage"]["output_tokens"].as_u64(),
            model: self.model.clone(),
            provider: "anthropic".to_string(),
        })
    }
}

// ── OpenAI GPT ─────────────────────────────────────────────────────────────────

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAiProvider { client: http_client(), api_key: api_key.into(), model: model.into() }
    }

    pub fn default_model() -> &'static str {
        "gpt-4o"
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmResponse, SynthError> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthError::Provider(format!("OpenAI request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(SynthError::Provider(format!("OpenAI API error: {}", resp.status())));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SynthError::Provider(format!("OpenAI response decode failed: {e}")))?;

        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| SynthError::Provider("empty response from OpenAI API".into()))?
            .to_string();

        Ok(LlmResponse {
            text,
            input_tokens: value["usage"]["prompt_tokens"].as_u64(),
            output_tokens: value["usage"]["completion_tokens"].as_u64(),
            model: self.model.clone(),
            provider: "openai".to_string(),
        })
    }
}

// ── Google Gemini ──────────────────────────────────────────────────────────────

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        GeminiProvider { client: http_client(), api_key: api_key.into(), model: model.into() }
    }

    pub fn default_model() -> &'static str {
        "gemini-2.0-flash"
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmResponse, SynthError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = json!({
            "contents": [{"parts": [{"text": user_prompt}]}],
            "systemInstruction": {"parts": [{"text": system_prompt}]},
            "generationConfig": {
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "responseMimeType": "application/json",
            },
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthError::Provider(format!("Gemini request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(SynthError::Provider(format!("Gemini API error: {}", resp.status())));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SynthError::Provider(format!("Gemini response decode failed: {e}")))?;

        let text = value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| SynthError::Provider("empty response from Gemini API".into()))?
            .to_string();

        Ok(LlmResponse {
            text,
            input_tokens: value["usageMetadata"]["promptTokenCount"].as_u64(),
            output_tokens: value["usageMetadata"]["candidatesTokenCount"].as_u64(),
            model: self.model.clone(),
            provider: "gemini".to_string(),
        })
    }
}

// ── Factory ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub provider: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
}

/// Builds an LLM provider from configuration. Returns `None` when the
/// configured provider is unset or missing its API key — the caller treats
/// absence as "no AI configured" and the pipeline short-circuits to C3.
pub fn create_provider(config: &ProviderConfig) -> Option<Box<dyn LlmProvider>> {
    let name = config.provider.as_deref().unwrap_or("anthropic").to_lowercase();
    match name.as_str() {
        "anthropic" => {
            let key = config.anthropic_api_key.clone()?;
            let model = config.anthropic_model.clone().unwrap_or_else(|| AnthropicProvider::default_model().into());
            tracing::info!(model = %model, "initializing Anthropic provider");
            Some(Box::new(AnthropicProvider::new(key, model)))
        }
        "openai" => {
            let key = config.openai_api_key.clone()?;
            let model = config.openai_model.clone().unwrap_or_else(|| OpenAiProvider::default_model().into());
            tracing::info!(model = %model, "initializing OpenAI provider");
            Some(Box::new(OpenAiProvider::new(key, model)))
        }
        "gemini" => {
            let key = config.gemini_api_key.clone()?;
            let model = config.gemini_model.clone().unwrap_or_else(|| GeminiProvider::default_model().into());
            tracing::info!(model = %model, "initializing Gemini provider");
            Some(Box::new(GeminiProvider::new(key, model)))
        }
        "none" => None,
        other => {
            tracing::warn!(provider = other, "unknown AI provider, disabling LLM synthesis");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_returns_none_without_api_key() {
        let config = ProviderConfig { provider: Some("anthropic".into()), ..Default::default() };
        assert!(create_provider(&config).is_none());
    }

    #[test]
    fn factory_returns_none_for_explicit_none() {
        let config = ProviderConfig { provider: Some("none".into()), ..Default::default() };
        assert!(create_provider(&config).is_none());
    }

    #[test]
    fn factory_builds_configured_provider() {
        let config = ProviderConfig {
            provider: Some("openai".into()),
            openai_api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
