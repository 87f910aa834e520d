//! Subprocess generator.
//!
//! Pipes the prompt to a local CLI on stdin and takes stdout as the
//! completion. Works with anything that behaves like a filter, e.g.
//! `fabric -p raw_query` or `ollama run llama3`.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument};

use super::retry::{with_retry, RetryPolicy};
use super::{GenerationError, Generator, GeneratorConfig};

/// Generator backed by a local command
pub struct CommandGenerator {
    /// Name reported in logs and stored summaries
    name: String,

    /// Program to run
    program: String,

    /// Arguments passed to the program
    args: Vec<String>,

    call_timeout: Duration,

    retry: RetryPolicy,
}

impl CommandGenerator {
    /// Create a generator for `program args...`
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            call_timeout: Duration::from_secs(300),
            retry: RetryPolicy::none(),
        }
    }

    /// Build from config; `command` must name at least the program
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let (program, args) = config.command.split_first().ok_or_else(|| {
            anyhow::anyhow!("Command backend requires a non-empty `command` list")
        })?;

        Ok(Self {
            name: config.model.clone(),
            program: program.clone(),
            args: args.to_vec(),
            call_timeout: config.timeout(),
            retry: config.retry.clone(),
        })
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Run the command once with the prompt on stdin
    async fn run_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GenerationError::Spawn(format!("{}: {}", self.program, e)))?;

        // Feed stdin while stdout is drained so a filter never blocks on a full pipe
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(prompt.as_bytes()).await {
                    Ok(()) => {}
                    // Process exited without reading; its exit status tells the story
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => {
                        return Err(GenerationError::Transport(format!(
                            "failed to write prompt: {}",
                            e
                        )))
                    }
                }
                // Dropping stdin signals EOF
            }
            Ok(())
        };

        let exchange = async move {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output.map_err(|e| GenerationError::Transport(format!("failed to wait for process: {}", e)))
        };

        let output = timeout(self.call_timeout, exchange)
            .await
            .map_err(|_| GenerationError::Timeout(self.call_timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Process {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| GenerationError::MalformedResponse("output is not valid UTF-8".into()))?;

        if stdout.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }

        Ok(stdout)
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, prompt), fields(backend = %self.name, prompt_bytes = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let completion = with_retry(&self.retry, &self.name, || self.run_once(prompt)).await?;
        debug!(completion_bytes = completion.len(), "Command generation finished");
        Ok(completion)
    }

    async fn health_check(&self) -> Result<(), GenerationError> {
        // The program must at least be spawnable
        let status = Command::new(&self.program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| GenerationError::Spawn(format!("{}: {}", self.program, e)))?;

        if !status.success() {
            return Err(GenerationError::Process {
                code: status.code().unwrap_or(-1),
                stderr: format!("`{} --help` failed", self.program),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_splits_program() {
        let config = GeneratorConfig {
            model: "fabric".into(),
            command: vec!["fabric".into(), "-p".into(), "raw_query".into()],
            ..Default::default()
        };
        let generator = CommandGenerator::from_config(&config).unwrap();

        assert_eq!(generator.name(), "fabric");
        assert_eq!(generator.program, "fabric");
        assert_eq!(generator.args, vec!["-p", "raw_query"]);
    }

    #[test]
    fn test_from_config_requires_command() {
        let config = GeneratorConfig::default();
        assert!(CommandGenerator::from_config(&config).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cat_echoes_prompt() {
        let generator = CommandGenerator::new("cat", "cat", Vec::new());
        let completion = generator.generate("Hospital course").await.unwrap();
        assert_eq!(completion, "Hospital course");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_prompt_does_not_stall_pipe() {
        let generator = CommandGenerator::new("cat", "cat", Vec::new()).with_timeout(Duration::from_secs(10));
        let prompt = "x".repeat(512 * 1024);

        let completion = generator.generate(&prompt).await.unwrap();
        assert_eq!(completion.len(), prompt.len());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_process_error() {
        let generator = CommandGenerator::new("false", "false", Vec::new());
        let result = generator.generate("prompt").await;
        assert!(matches!(result, Err(GenerationError::Process { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let generator = CommandGenerator::new("nope", "definitely-not-a-real-binary-xyz", Vec::new());
        let result = generator.generate("prompt").await;
        assert!(matches!(result, Err(GenerationError::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let generator = CommandGenerator::new("sleep", "sleep", vec!["5".into()])
            .with_timeout(Duration::from_millis(50));
        let result = generator.generate("prompt").await;
        assert!(matches!(result, Err(GenerationError::Timeout(_))));
    }
}
