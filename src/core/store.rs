//! File-based summary store.
//!
//! Layout under the output root:
//!
//! ```text
//! patient_<id>/<model>.md            header line, blank line, final summary
//! patient_<id>/<model>.drafts.jsonl  one Draft per line, seed first
//! evaluation_<model>__<judge>.json   EvalReport
//! ```
//!
//! Readers take everything after the first blank line as the summary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::domain::{Draft, EvalReport};

use super::orchestrator::Refinement;

const PATIENT_PREFIX: &str = "patient_";

/// Summaries and reports on disk
pub struct SummaryStore {
    root: PathBuf,
}

impl SummaryStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create output directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn patient_dir(&self, patient_id: &str) -> PathBuf {
        self.root.join(format!("{}{}", PATIENT_PREFIX, patient_id))
    }

    pub fn summary_path(&self, patient_id: &str, model: &str) -> PathBuf {
        self.patient_dir(patient_id)
            .join(format!("{}.md", file_safe(model)))
    }

    pub fn drafts_path(&self, patient_id: &str, model: &str) -> PathBuf {
        self.patient_dir(patient_id)
            .join(format!("{}.drafts.jsonl", file_safe(model)))
    }

    pub fn report_path(&self, summary_model: &str, judge: &str) -> PathBuf {
        self.root.join(format!(
            "evaluation_{}__{}.json",
            file_safe(summary_model),
            file_safe(judge)
        ))
    }

    /// Persist a finished run: the final summary and its draft history
    pub async fn write_summary(&self, patient_id: &str, model: &str, refinement: &Refinement) -> Result<PathBuf> {
        let dir = self.patient_dir(patient_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create patient directory: {}", dir.display()))?;

        let path = self.summary_path(patient_id, model);
        let content = format!(
            "{}\n\n{}\n",
            summary_header(patient_id, model, refinement),
            refinement.final_draft.trim()
        );
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;

        self.write_drafts(patient_id, model, refinement.drafts.iter()).await?;

        debug!(path = %path.display(), "Summary stored");
        Ok(path)
    }

    /// Replace the draft history for a patient
    async fn write_drafts<'a>(
        &self,
        patient_id: &str,
        model: &str,
        drafts: impl Iterator<Item = &'a Draft>,
    ) -> Result<()> {
        let path = self.drafts_path(patient_id, model);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open drafts file: {}", path.display()))?;

        for draft in drafts {
            let json = serde_json::to_string(draft).context("Failed to serialize draft")?;
            file.write_all(format!("{}\n", json).as_bytes())
                .await
                .context("Failed to write draft")?;
        }
        file.flush().await.context("Failed to flush drafts")?;

        Ok(())
    }

    /// Stored summary text without its header, if present
    pub async fn read_summary(&self, patient_id: &str, model: &str) -> Result<Option<String>> {
        let path = self.summary_path(patient_id, model);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read summary: {}", path.display()))?;

        let summary = content
            .split_once("\n\n")
            .map(|(_, body)| body)
            .unwrap_or(content.as_str());
        Ok(Some(summary.trim().to_string()))
    }

    /// Draft history in step order
    pub async fn read_drafts(&self, patient_id: &str, model: &str) -> Result<Vec<Draft>> {
        let path = self.drafts_path(patient_id, model);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open drafts file: {}", path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut drafts = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let draft: Draft = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse draft in {}", path.display()))?;
            drafts.push(draft);
        }

        Ok(drafts)
    }

    /// Patient ids with a stored summary for `model`, sorted
    pub async fn list_patients(&self, model: &str) -> Result<Vec<String>> {
        let mut patients = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(PATIENT_PREFIX))
            {
                if self.summary_path(id, model).exists() {
                    patients.push(id.to_string());
                }
            }
        }

        patients.sort();
        Ok(patients)
    }

    /// Write an evaluation report as pretty JSON
    pub async fn write_report(&self, report: &EvalReport) -> Result<PathBuf> {
        let path = self.report_path(&report.summary_model, &report.judge);
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }
}

fn summary_header(patient_id: &str, model: &str, refinement: &Refinement) -> String {
    format!(
        "Hospital course summary | patient {} | model {} | run {} | record {} | {} notes | {:.1}s",
        patient_id,
        model,
        refinement.run_id,
        refinement.record_digest,
        refinement.note_count,
        refinement.elapsed.as_secs_f64()
    )
}

/// Model names such as `org/model:tag` as a single path component
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Hash input content (first 16 hex chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}
