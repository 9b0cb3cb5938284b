//! Generative-language provider seam.
//!
//! [`LlmClient`] is the only thing the decision engine knows about a provider.
//! [`HttpLlmClient`] speaks the OpenAI-compatible chat-completions API (OpenAI and
//! Ollama) and the Anthropic messages API. The static and scripted clients are
//! deterministic stand-ins for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dealpilot_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self { temperature: 0.1, max_tokens: 1024, timeout: Duration::from_secs(30) }
    }
}

impl From<&LlmConfig> for CompletionOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}

pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build http client")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());

        Ok(Self {
            client,
            provider: config.provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    async fn send_once(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAi | LlmProvider::Ollama => self.chat_completion(prompt, options).await,
            LlmProvider::Anthropic => self.anthropic_message(prompt, options).await,
        }
    }

    async fn chat_completion(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(options.timeout)
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("chat completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {status}: {detail}", self.provider.as_str()));
        }
        let parsed: ChatResponse =
            response.json().await.context("chat completion response was not valid json")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("{} returned no completion choices", self.provider.as_str()))
    }

    async fn anthropic_message(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("anthropic provider requires an api key"))?;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .timeout(options.timeout)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("anthropic returned {status}: {detail}"));
        }
        let parsed: AnthropicResponse =
            response.json().await.context("anthropic response was not valid json")?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(anyhow!("anthropic returned no text content"));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.send_once(prompt, options).await {
                Ok(text) => return Ok(text),
                Err(error) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        event_name = "llm.request.retry",
                        provider = self.provider.as_str(),
                        attempt,
                        error = %error,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Returns the same text for every prompt and counts calls.
#[derive(Debug, Default)]
pub struct StaticLlmClient {
    response: String,
    calls: AtomicUsize,
}

impl StaticLlmClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into(), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for StaticLlmClient {
    async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Replays queued responses in order and records every prompt it receives. An
/// `Err` entry simulates a provider failure.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = std::result::Result<String, String>>,
    {
        Self { responses: Mutex::new(responses.into_iter().collect()), prompts: Mutex::default() }
    }

    pub fn prompts(&self) -> Vec<String> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }
        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted client has no responses left")),
        }
    }
}

#[cfg(test)]
mod tests {
    use dealpilot_core::config::AppConfig;

    use super::{CompletionOptions, HttpLlmClient, LlmClient, ScriptedLlmClient, StaticLlmClient};

    #[tokio::test]
    async fn scripted_client_replays_in_order_and_records_prompts() {
        let client =
            ScriptedLlmClient::new([Ok("first".to_string()), Err("provider down".to_string())]);
        let options = CompletionOptions::default();

        assert_eq!(client.complete("p1", &options).await.unwrap(), "first");
        let error = client.complete("p2", &options).await.unwrap_err();
        assert!(error.to_string().contains("provider down"));
        assert!(client.complete("p3", &options).await.is_err());
        assert_eq!(client.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn static_client_counts_calls() {
        let client = StaticLlmClient::new("{}");
        let options = CompletionOptions::default();
        client.complete("a", &options).await.unwrap();
        client.complete("b", &options).await.unwrap();
        assert_eq!(client.calls(), 2);
    }

    #[test]
    fn http_client_uses_provider_default_base_url() {
        let mut config = AppConfig::default().llm;
        config.base_url = None;
        let client = HttpLlmClient::from_config(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");

        let options = CompletionOptions::from(&config);
        assert!((options.temperature - 0.1).abs() < f32::EPSILON);
    }
}
