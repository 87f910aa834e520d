//! Evaluation records and batch reports.
//!
//! Every unit of work (one fact check, one quality rating, one refinement)
//! ends in an explicit outcome. Failures are recorded, never defaulted to a
//! verdict.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::judgment::ParsedJudgment;

/// Why a unit could not be judged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "message")]
pub enum UnitFailure {
    /// Raw record lacked the expected marker structure
    Segmentation(String),

    /// Generation backend failed
    Generation(String),

    /// Output could not be repaired into a judgment
    Unparsable(String),

    /// No stored summary for a patient listed in the fact sheet
    MissingSummary,

    /// Run deadline hit between generation calls
    Cancelled(String),

    /// Record could not be read or its summary could not be written
    Io(String),

    /// Worker task panicked or was aborted
    Aborted(String),
}

/// Outcome of one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum UnitOutcome {
    Judged { judgment: ParsedJudgment },
    Failed { failure: UnitFailure },
}

impl UnitOutcome {
    pub fn judgment(&self) -> Option<&ParsedJudgment> {
        match self {
            Self::Judged { judgment } => Some(judgment),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&UnitFailure> {
        match self {
            Self::Judged { .. } => None,
            Self::Failed { failure } => Some(failure),
        }
    }

    /// Verdict if judged and present
    pub fn verdict(&self) -> Option<i64> {
        self.judgment().and_then(|j| j.verdict)
    }
}

/// All evaluation outcomes for one patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientEvaluation {
    pub patient_id: String,

    /// Fact index -> fact-presence outcome
    pub facts: BTreeMap<usize, UnitOutcome>,

    /// Unconditional quality outcome
    pub quality: UnitOutcome,
}

impl PatientEvaluation {
    /// A patient with no summary to evaluate
    pub fn missing(patient_id: String, fact_count: usize) -> Self {
        Self::failed(patient_id, fact_count, UnitFailure::MissingSummary)
    }

    /// A patient whose every unit failed the same way
    pub fn failed(patient_id: String, fact_count: usize, failure: UnitFailure) -> Self {
        let outcome = || UnitOutcome::Failed {
            failure: failure.clone(),
        };
        Self {
            patient_id,
            facts: (0..fact_count).map(|i| (i, outcome())).collect(),
            quality: outcome(),
        }
    }

    /// True when every unit produced a judgment
    pub fn is_complete(&self) -> bool {
        self.quality.judgment().is_some() && self.facts.values().all(|o| o.judgment().is_some())
    }

    /// Number of facts judged present
    pub fn facts_found(&self) -> usize {
        self.facts.values().filter(|o| o.verdict() == Some(1)).count()
    }

    fn outcomes(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.facts.values().chain(std::iter::once(&self.quality))
    }
}

/// Per-kind counts over a batch of units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    pub succeeded: usize,
    pub segmentation: usize,
    pub generation: usize,
    pub unparsable: usize,
    pub missing: usize,
    pub cancelled: usize,
    pub io: usize,
    pub aborted: usize,
}

impl UnitCounts {
    pub fn record(&mut self, outcome: &UnitOutcome) {
        match outcome.failure() {
            None => self.succeeded += 1,
            Some(failure) => self.record_failure(failure),
        }
    }

    pub fn record_failure(&mut self, failure: &UnitFailure) {
        match failure {
            UnitFailure::Segmentation(_) => self.segmentation += 1,
            UnitFailure::Generation(_) => self.generation += 1,
            UnitFailure::Unparsable(_) => self.unparsable += 1,
            UnitFailure::MissingSummary => self.missing += 1,
            UnitFailure::Cancelled(_) => self.cancelled += 1,
            UnitFailure::Io(_) => self.io += 1,
            UnitFailure::Aborted(_) => self.aborted += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.segmentation
            + self.generation
            + self.unparsable
            + self.missing
            + self.cancelled
            + self.io
            + self.aborted
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed()
    }
}

/// Full result of an evaluation batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    /// Model whose summaries were evaluated
    pub summary_model: String,

    /// Backend that produced the judgments
    pub judge: String,

    pub generated_at: DateTime<Utc>,

    /// Patients in fact-sheet order
    pub patients: Vec<PatientEvaluation>,

    /// Counts over fact-presence units
    pub fact_counts: UnitCounts,

    /// Counts over quality units
    pub quality_counts: UnitCounts,
}

impl EvalReport {
    pub fn new(summary_model: String, judge: String, patients: Vec<PatientEvaluation>) -> Self {
        let mut fact_counts = UnitCounts::default();
        let mut quality_counts = UnitCounts::default();

        for patient in &patients {
            for outcome in patient.facts.values() {
                fact_counts.record(outcome);
            }
            quality_counts.record(&patient.quality);
        }

        Self {
            summary_model,
            judge,
            generated_at: Utc::now(),
            patients,
            fact_counts,
            quality_counts,
        }
    }

    /// Mean quality score over judged patients
    pub fn mean_score(&self) -> Option<f64> {
        let scores: Vec<i64> = self
            .patients
            .iter()
            .filter_map(|p| p.quality.verdict())
            .collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<i64>() as f64 / scores.len() as f64)
    }

    /// Fraction of judged facts found present
    pub fn fact_recall(&self) -> Option<f64> {
        let verdicts: Vec<i64> = self
            .patients
            .iter()
            .flat_map(|p| p.facts.values())
            .filter_map(UnitOutcome::verdict)
            .collect();
        if verdicts.is_empty() {
            return None;
        }
        let found = verdicts.iter().filter(|v| **v == 1).count();
        Some(found as f64 / verdicts.len() as f64)
    }

    /// Patients with at least one failed unit
    pub fn incomplete_patients(&self) -> Vec<&str> {
        self.patients
            .iter()
            .filter(|p| p.outcomes().any(|o| o.failure().is_some()))
            .map(|p| p.patient_id.as_str())
            .collect()
    }
}
