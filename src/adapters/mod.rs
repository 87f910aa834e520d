//! Generation backends.
//!
//! Everything that produces text goes through the [`Generator`] trait: one
//! prompt in, one completion out. The refiner and the evaluator only ever
//! see `Arc<dyn Generator>`, so backends can be swapped from config.

pub mod command;
pub mod openai;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use command::CommandGenerator;
pub use openai::OpenAiGenerator;
pub use retry::RetryPolicy;

/// Backend-level generation failure
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("backend returned an empty completion")]
    EmptyCompletion,

    #[error("generator process exited with code {code}: {stderr}")]
    Process { code: i32, stderr: String },

    #[error("failed to start generator process: {0}")]
    Spawn(String),

    #[error("generator misconfigured: {0}")]
    Config(String),
}

impl GenerationError {
    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Text generation port
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable backend name (used in logs and stored summaries)
    fn name(&self) -> &str;

    /// Send one prompt and return the completion text
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

/// Supported backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// OpenAI-compatible chat completions endpoint
    OpenAi,

    /// Local CLI reading the prompt on stdin
    Command,
}

impl Default for BackendType {
    fn default() -> Self {
        Self::OpenAi
    }
}

/// Settings for one generation backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub backend: BackendType,

    /// Model name sent to the backend and used to name stored summaries
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL for HTTP backends
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Program and arguments for the command backend
    #[serde(default)]
    pub command: Vec<String>,

    /// Optional system prompt for chat backends
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout() -> u64 {
    300
} // 5 min

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            command: Vec::new(),
            system_prompt: None,
            timeout_seconds: default_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Build a generator from its config
pub fn from_config(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    let generator: Arc<dyn Generator> = match config.backend {
        BackendType::OpenAi => Arc::new(OpenAiGenerator::from_config(config)?),
        BackendType::Command => Arc::new(CommandGenerator::from_config(config)?),
    };
    Ok(generator)
}
