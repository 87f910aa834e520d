//! Configuration for hospital-course.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (HOSPITAL_COURSE_MODEL, HOSPITAL_COURSE_BASE_URL,
//!    HOSPITAL_COURSE_OUTPUT)
//! 2. Config file given with `--config`
//! 3. `.hospital-course/config.yaml` in the current directory or a parent
//! 4. `~/.hospital-course/config.yaml`
//! 5. Defaults
//!
//! Paths in a config file are relative to the directory containing
//! `.hospital-course/`. The resolved [`Config`] is passed explicitly to
//! whatever needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::GeneratorConfig;
use crate::core::{RecordFormat, SummaryPrompts};

const CONFIG_DIR: &str = ".hospital-course";
const CONFIG_FILE: &str = "config.yaml";

pub const ENV_MODEL: &str = "HOSPITAL_COURSE_MODEL";
pub const ENV_BASE_URL: &str = "HOSPITAL_COURSE_BASE_URL";
pub const ENV_OUTPUT: &str = "HOSPITAL_COURSE_OUTPUT";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,

    /// Backend that writes summaries
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,

    /// Backend that judges summaries (defaults to `generator`)
    #[serde(default)]
    pub judge: Option<GeneratorConfig>,

    #[serde(default)]
    pub record_format: Option<RecordFormat>,

    #[serde(default)]
    pub evaluation: Option<EvaluationSettings>,

    /// Wall-clock budget for one refinement run
    #[serde(default)]
    pub run_timeout_seconds: Option<u64>,

    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Output root for summaries and reports
    pub output: Option<String>,

    /// File replacing the built-in summary format instructions
    pub summary_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    /// Patients evaluated at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Expected facts per patient in the fact sheet
    #[serde(default = "default_facts_per_patient")]
    pub facts_per_patient: usize,
}

fn default_concurrency() -> usize {
    4
}
fn default_facts_per_patient() -> usize {
    3
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            facts_per_patient: default_facts_per_patient(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub generator: GeneratorConfig,
    pub judge: GeneratorConfig,
    pub record_format: RecordFormat,
    pub evaluation: EvaluationSettings,
    pub run_timeout_seconds: u64,
    pub output_dir: PathBuf,
    pub summary_format: Option<PathBuf>,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from all sources
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => find_config_file().or_else(home_config_file),
        };

        let file = match config_path {
            Some(ref path) => Some(load_config_file(path)?),
            None => None,
        };

        Self::resolve(file, config_path, |key| std::env::var(key).ok())
    }

    /// Merge file settings, environment and defaults
    fn resolve<F>(file: Option<ConfigFile>, config_path: Option<PathBuf>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();

        // Base directory is the parent of .hospital-course/
        let base_dir = match config_path {
            Some(ref path) => path
                .parent()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            None => std::env::current_dir().context("Failed to determine current directory")?,
        };

        let mut generator = file.generator.unwrap_or_default();
        if let Some(model) = env(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            generator.model = model;
        }
        if let Some(url) = env(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            generator.base_url = url;
        }
        let judge = file.judge.unwrap_or_else(|| generator.clone());

        let output_dir = match env(ENV_OUTPUT).filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => resolve_path(&base_dir, file.paths.output.as_deref().unwrap_or("hospital_course_output")),
        };

        let evaluation = file.evaluation.unwrap_or_default();
        if evaluation.concurrency == 0 {
            anyhow::bail!("evaluation.concurrency must be at least 1");
        }

        Ok(Self {
            generator,
            judge,
            record_format: file.record_format.unwrap_or_default(),
            evaluation,
            run_timeout_seconds: file.run_timeout_seconds.unwrap_or(1800),
            output_dir,
            summary_format: file
                .paths
                .summary_format
                .as_deref()
                .map(|p| resolve_path(&base_dir, p)),
            config_file: config_path,
        })
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    /// Summary prompts, with the format file applied if configured
    pub fn summary_prompts(&self) -> Result<SummaryPrompts> {
        match self.summary_format {
            Some(ref path) => SummaryPrompts::from_file(path),
            None => Ok(SummaryPrompts::default()),
        }
    }

    /// Effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn home_config_file() -> Option<PathBuf> {
    let path = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    path.exists().then_some(path)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
