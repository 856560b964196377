//! LLM Provider Clients
//!
//! Two wire shapes cover the three providers:
//! - OpenAI-compatible chat completions (xAI, Groq): `choices[0].message.content`
//! - Gemini `generateContent`: `candidates[0].content.parts[0].text`
//!
//! A provider may hold several API keys; they are tried in order and the
//! provider fails only when every key failed. HTTP 429 counts as a failure.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::config::LlmConfig;
use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::{GEMINI_BASE_URL, GROQ_CHAT_URL, USER_AGENT, XAI_CHAT_URL};

/// One text-completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name recorded as provenance ("xai", "groq", "gemini")
    fn name(&self) -> &str;

    /// Send a single-turn prompt, return the raw text answer
    async fn complete(&self, prompt: &str) -> AppResult<String>;
}

fn build_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| AppError::with_source(ErrorCode::ProviderLlmFailed, "HTTP client build failed", e))
}

fn check_status(provider: &str, status: reqwest::StatusCode) -> AppResult<()> {
    if status.as_u16() == 429 {
        return Err(AppError::rate_limited(provider));
    }
    if !status.is_success() {
        return Err(AppError::llm_failed(provider, format!("HTTP {}", status)));
    }
    Ok(())
}

// ============================================
// OPENAI-COMPATIBLE (xAI, Groq)
// ============================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Chat-completions endpoint with bearer auth
pub struct OpenAiCompatible {
    name: String,
    url: String,
    model: String,
    keys: Vec<String>,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        model: impl Into<String>,
        keys: Vec<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            model: model.into(),
            keys,
            client: build_client(timeout)?,
        })
    }

    async fn complete_with_key(&self, key: &str, prompt: &str) -> AppResult<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(key)
            .json(&payload)
            .send()
            .await?;
        check_status(&self.name, response.status())?;

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AppError::new(ErrorCode::RespInvalidJson, format!("{}: empty completion", self.name)))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> AppResult<String> {
        try_keys(&self.name, &self.keys, |key| self.complete_with_key(key, prompt)).await
    }
}

// ============================================
// GEMINI
// ============================================

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

/// Google Generative Language API, key passed as query parameter
pub struct GeminiProvider {
    base_url: String,
    model: String,
    keys: Vec<String>,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(model: impl Into<String>, keys: Vec<String>, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            keys,
            client: build_client(timeout)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn complete_with_key(&self, key: &str, prompt: &str) -> AppResult<String> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", key)])
            .json(&payload)
            .send()
            .await?;
        check_status("gemini", response.status())?;

        let body: GeminiResponse = response.json().await?;
        body.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AppError::new(ErrorCode::RespInvalidJson, "gemini: unexpected response shape"))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, prompt: &str) -> AppResult<String> {
        try_keys("gemini", &self.keys, |key| self.complete_with_key(key, prompt)).await
    }
}

// ============================================
// HELPERS
// ============================================

/// Run `call` with each key in turn until one succeeds
async fn try_keys<'a, F, Fut>(provider: &str, keys: &'a [String], call: F) -> AppResult<String>
where
    F: Fn(&'a str) -> Fut,
    Fut: std::future::Future<Output = AppResult<String>>,
{
    let mut last_error = None;
    for (idx, key) in keys.iter().enumerate() {
        match call(key.as_str()).await {
            Ok(text) => {
                debug!("🧠 {} answered with key #{}", provider, idx + 1);
                return Ok(text);
            }
            Err(e) => {
                warn!("⚠️ {} key #{} failed: {}", provider, idx + 1, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        AppError::new(ErrorCode::ProviderLlmNotConfigured, format!("{}: no API keys", provider))
    }))
}

/// Providers in fixed fallback order xAI → Groq → Gemini; unkeyed ones are skipped
pub fn providers_from_config(cfg: &LlmConfig) -> AppResult<Vec<Arc<dyn LlmProvider>>> {
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
    if !cfg.xai_keys.is_empty() {
        providers.push(Arc::new(OpenAiCompatible::new(
            "xai",
            XAI_CHAT_URL,
            cfg.xai_model.clone(),
            cfg.xai_keys.clone(),
            cfg.timeout,
        )?));
    }
    if !cfg.groq_keys.is_empty() {
        providers.push(Arc::new(OpenAiCompatible::new(
            "groq",
            GROQ_CHAT_URL,
            cfg.groq_model.clone(),
            cfg.groq_keys.clone(),
            cfg.timeout,
        )?));
    }
    if !cfg.gemini_keys.is_empty() {
        providers.push(Arc::new(GeminiProvider::new(
            cfg.gemini_model.clone(),
            cfg.gemini_keys.clone(),
            cfg.timeout,
        )?));
    }
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_order() {
        let cfg = LlmConfig {
            xai_keys: vec![],
            groq_keys: vec!["g".into()],
            gemini_keys: vec!["m".into()],
            timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let providers = providers_from_config(&cfg).unwrap();
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["groq", "gemini"]);
    }

    #[test]
    fn test_gemini_shape() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#;
        let body: GeminiResponse = serde_json::from_str(raw).unwrap();
        let text = body.candidates[0].content.as_ref().unwrap().parts[0].text.clone();
        assert_eq!(text.as_deref(), Some("hello"));
    }
}
