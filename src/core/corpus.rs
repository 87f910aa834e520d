//! Patient records and reference facts on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One raw hospital-stay record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub patient_id: String,
    pub raw: String,
}

impl PatientRecord {
    /// Read a record file; the id is the file stem without a `patient_` prefix
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read record: {}", path.display()))?;
        Ok(Self {
            patient_id: patient_id_from_path(path)?,
            raw,
        })
    }
}

fn patient_id_from_path(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Record file has no usable name: {}", path.display()))?;
    Ok(stem.strip_prefix("patient_").unwrap_or(stem).to_string())
}

/// A record file that exists but could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableRecord {
    pub patient_id: String,
    pub path: PathBuf,
    pub error: String,
}

/// Records found in a directory; a bad file never hides the others
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub records: Vec<PatientRecord>,
    pub unreadable: Vec<UnreadableRecord>,
}

impl RecordSet {
    /// Record files found, readable or not
    pub fn len(&self) -> usize {
        self.records.len() + self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load every `*.txt` record in `dir`, sorted by file name.
///
/// Fails only when the directory itself is unusable. Files that cannot be
/// read are listed in [`RecordSet::unreadable`].
pub fn load_records(dir: &Path) -> Result<RecordSet> {
    if !dir.is_dir() {
        anyhow::bail!("Records directory not found: {}", dir.display());
    }

    let dir_str = dir
        .to_str()
        .with_context(|| format!("Records path is not valid UTF-8: {}", dir.display()))?;
    let pattern = format!("{}/*.txt", glob::Pattern::escape(dir_str.trim_end_matches('/')));

    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .context("Invalid records glob pattern")?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut set = RecordSet::default();
    for path in paths {
        match PatientRecord::from_file(&path) {
            Ok(record) => set.records.push(record),
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(path = %path.display(), error = %error, "Skipping unreadable record");
                set.unreadable.push(UnreadableRecord {
                    patient_id: lossy_patient_id(&path),
                    path,
                    error,
                });
            }
        }
    }

    Ok(set)
}

fn lossy_patient_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    stem.strip_prefix("patient_").map(str::to_string).unwrap_or(stem)
}

/// Reference facts per patient.
///
/// ```yaml
/// patients:
///   "15":
///     - Admitted for NSTEMI
///     - Underwent PCI to the LAD
///     - Discharged on dual antiplatelet therapy
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSheet {
    #[serde(default)]
    pub patients: BTreeMap<String, Vec<String>>,
}

impl FactSheet {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fact sheet: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse fact sheet YAML")
    }

    /// Reject empty sheets and blank facts; warn on unexpected fact counts
    pub fn validate(&self, facts_per_patient: usize) -> Result<()> {
        if self.patients.is_empty() {
            anyhow::bail!("Fact sheet lists no patients");
        }

        for (patient_id, facts) in &self.patients {
            if let Some(i) = facts.iter().position(|f| f.trim().is_empty()) {
                anyhow::bail!("Patient {} has an empty fact at index {}", patient_id, i);
            }
            if facts.len() != facts_per_patient {
                warn!(
                    patient_id = %patient_id,
                    expected = facts_per_patient,
                    found = facts.len(),
                    "Unexpected number of facts"
                );
            }
        }

        Ok(())
    }

    pub fn facts(&self, patient_id: &str) -> Option<&[String]> {
        self.patients.get(patient_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}
