//! OpenAI-compatible chat completions client.
//!
//! Endpoint: POST {base_url}/v1/chat/completions
//! Auth: Bearer token (optional, for local routers)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::retry::{with_retry, RetryPolicy};
use super::{GenerationError, Generator, GeneratorConfig};

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat completion request
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Chat completion response
#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Generator backed by an OpenAI-compatible HTTP endpoint
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl OpenAiGenerator {
    /// Create a client for `base_url`
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, call_timeout: Duration) -> Result<Self> {
        let cleaned_url = base_url.trim_end_matches('/');

        let parsed = reqwest::Url::parse(cleaned_url)
            .with_context(|| format!("Invalid generator URL '{}'", cleaned_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!(
                "Generator URL must use http or https scheme, got: {}",
                parsed.scheme()
            );
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(call_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!(base_url = cleaned_url, model, "OpenAI-compatible generator created");

        Ok(Self {
            client,
            base_url: cleaned_url.to_string(),
            model: model.to_string(),
            api_key,
            system_prompt: None,
            call_timeout,
            retry: RetryPolicy::default(),
        })
    }

    /// Build from config, reading the API key from `api_key_env`
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "No API key set; requests will be sent without Authorization"
            );
        }

        let mut generator = Self::new(&config.base_url, &config.model, api_key, config.timeout())?;
        generator.system_prompt = config.system_prompt.clone();
        generator.retry = config.retry.clone();
        Ok(generator)
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn build_request<'a>(&'a self, prompt: &str) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: false,
        }
    }

    async fn send_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(self.completions_url())
            .headers(self.headers())
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.call_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        extract_completion(body)
    }
}

/// Pull the first choice's content out of a response
fn extract_completion(response: ChatCompletionResponse) -> Result<String, GenerationError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| GenerationError::MalformedResponse("no choices returned".into()))?;

    if content.trim().is_empty() {
        return Err(GenerationError::EmptyCompletion);
    }
    Ok(content)
}

fn map_reqwest_error(err: reqwest::Error, call_timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(call_timeout)
    } else {
        GenerationError::Transport(err.to_string())
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_bytes = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let completion = with_retry(&self.retry, &self.model, || self.send_once(prompt)).await?;
        debug!(completion_bytes = completion.len(), "Chat completion finished");
        Ok(completion)
    }

    async fn health_check(&self) -> Result<(), GenerationError> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.call_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> OpenAiGenerator {
        OpenAiGenerator::new("http://localhost:4000/", "gpt-4o", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(generator().completions_url(), "http://localhost:4000/v1/chat/completions");
    }

    #[test]
    fn test_invalid_scheme_rejected() {
        let result = OpenAiGenerator::new("ftp://example.com", "m", None, Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[test]
    fn test_request_body() {
        let mut generator = generator();
        generator.system_prompt = Some("You are a physician.".into());

        let json = serde_json::to_value(generator.build_request("Summarize.")).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "Summarize.");
    }

    #[test]
    fn test_authorization_header_only_with_key() {
        assert!(generator().headers().get(AUTHORIZATION).is_none());

        let mut keyed = generator();
        keyed.api_key = Some("secret".into());
        assert_eq!(keyed.headers().get(AUTHORIZATION).unwrap(), "Bearer secret");
    }

    #[test]
    fn test_extract_completion() {
        let body: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Summary"}}],"model":"gpt-4o"}"#,
        )
        .unwrap();
        assert_eq!(extract_completion(body).unwrap(), "Summary");

        let empty: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_completion(empty),
            Err(GenerationError::MalformedResponse(_))
        ));

        let blank: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  "}}]}"#,
        )
        .unwrap();
        assert!(matches!(extract_completion(blank), Err(GenerationError::EmptyCompletion)));
    }
}
