//! Draft refinement orchestrator.
//!
//! Drives one summarization run: seed a draft from the H&P and last note,
//! fold in each intermediate note oldest first, then verify the draft
//! against the whole record. Every step depends on the previous draft, so
//! the loop is strictly sequential. A failed generation aborts the run;
//! retries belong to the generator.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::adapters::{GenerationError, Generator};
use crate::domain::{DraftSequence, SegmentedRecord, UnitFailure};

use super::corpus::PatientRecord;
use super::prompts::SummaryPrompts;
use super::segmenter::{segment, RecordFormat, SegmentationError};
use super::store::hash_input;

/// Position of a generation call within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineStep {
    /// First draft from H&P + last note
    Seed,

    /// Folding intermediate note `n` (1-indexed)
    Fold(usize),

    /// Final verification pass
    Verify,
}

impl fmt::Display for RefineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seed => write!(f, "seed"),
            Self::Fold(n) => write!(f, "fold note {}", n),
            Self::Verify => write!(f, "verify"),
        }
    }
}

/// Refinement run failure
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("segmentation failed: {0}")]
    Segmentation(#[from] SegmentationError),

    #[error("generation failed at {step}: {source}")]
    Generation {
        step: RefineStep,
        #[source]
        source: GenerationError,
    },

    #[error("run cancelled after {0:?}")]
    Cancelled(Duration),
}

impl From<&RefineError> for UnitFailure {
    fn from(err: &RefineError) -> Self {
        match err {
            RefineError::Segmentation(e) => UnitFailure::Segmentation(e.to_string()),
            RefineError::Generation { .. } => UnitFailure::Generation(err.to_string()),
            RefineError::Cancelled(_) => UnitFailure::Cancelled(err.to_string()),
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct Refinement {
    pub run_id: Uuid,

    /// Short hash of the raw record
    pub record_digest: String,

    /// Seed draft followed by one draft per folded note
    pub drafts: DraftSequence,

    /// Output of the verification pass
    pub final_draft: String,

    /// Notes summarized, H&P and last note included
    pub note_count: usize,

    pub elapsed: Duration,
}

/// Outcome of one record in a batch
#[derive(Debug)]
pub struct BatchItem {
    pub patient_id: String,
    pub result: Result<Refinement, RefineError>,
}

/// Iterative summarization engine
pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    prompts: SummaryPrompts,
    format: RecordFormat,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn Generator>, prompts: SummaryPrompts, format: RecordFormat) -> Self {
        Self {
            generator,
            prompts,
            format,
        }
    }

    /// Orchestrator with default prompts and record format
    pub fn with_defaults(generator: Arc<dyn Generator>) -> Self {
        Self::new(generator, SummaryPrompts::default(), RecordFormat::default())
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    /// Summarize one raw record
    #[instrument(skip(self, raw), fields(run_id = tracing::field::Empty, backend = %self.generator.name()))]
    pub async fn refine(&self, raw: &str) -> Result<Refinement, RefineError> {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));

        let record = segment(raw, &self.format)?;
        info!(
            notes = record.note_count(),
            "Starting refinement: {} notes to summarize",
            record.note_count()
        );

        let started = Instant::now();
        let (drafts, final_draft) = self.refine_segmented(&record).await?;
        let elapsed = started.elapsed();

        info!(
            drafts = drafts.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Refinement completed"
        );

        Ok(Refinement {
            run_id,
            record_digest: hash_input(raw),
            drafts,
            final_draft,
            note_count: record.note_count(),
            elapsed,
        })
    }

    /// Run the generation loop over an already segmented record.
    ///
    /// Issues exactly `2 + record.others.len()` generation calls.
    pub async fn refine_segmented(
        &self,
        record: &SegmentedRecord,
    ) -> Result<(DraftSequence, String), RefineError> {
        let mut drafts = DraftSequence::new();

        let seed = self
            .call(RefineStep::Seed, self.prompts.seed(&record.hp, &record.last))
            .await?;
        drafts.push(seed);

        for (i, note) in record.others.iter().enumerate() {
            let current = drafts.latest().map(|d| d.text.as_str()).unwrap_or_default();
            let prompt = self.prompts.fold(current, note);
            let folded = self.call(RefineStep::Fold(i + 1), prompt).await?;
            drafts.push(folded);
        }

        let current = drafts.latest().map(|d| d.text.as_str()).unwrap_or_default();
        let prompt = self.prompts.verify(current, record);
        let final_draft = self.call(RefineStep::Verify, prompt).await?;

        Ok((drafts, final_draft))
    }

    /// Like [`refine`](Self::refine), abandoned if `deadline` passes first.
    ///
    /// Cancellation takes effect at the next suspension point; no partial
    /// draft is returned.
    pub async fn refine_with_deadline(&self, raw: &str, deadline: Duration) -> Result<Refinement, RefineError> {
        match tokio::time::timeout(deadline, self.refine(raw)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Refinement cancelled at deadline");
                Err(RefineError::Cancelled(deadline))
            }
        }
    }

    /// Summarize one record of a batch under `deadline`; failures are
    /// logged and returned, never propagated
    pub async fn refine_record(&self, record: &PatientRecord, deadline: Duration) -> BatchItem {
        let result = self.refine_with_deadline(&record.raw, deadline).await;
        if let Err(ref e) = result {
            error!(patient_id = %record.patient_id, error = %e, "Record failed");
        }
        BatchItem {
            patient_id: record.patient_id.clone(),
            result,
        }
    }

    /// Summarize records one after another; a failing record does not stop
    /// the batch
    pub async fn refine_batch(&self, records: &[PatientRecord], deadline: Duration) -> Vec<BatchItem> {
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            items.push(self.refine_record(record, deadline).await);
        }
        items
    }

    async fn call(&self, step: RefineStep, prompt: String) -> Result<String, RefineError> {
        debug!(%step, prompt_bytes = prompt.len(), "Generating");

        let completion = self
            .generator
            .generate(&prompt)
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(GenerationError::EmptyCompletion)
                } else {
                    Ok(text)
                }
            })
            .map_err(|source| RefineError::Generation { step, source })?;

        debug!(%step, completion_bytes = completion.len(), "Step completed");
        Ok(completion)
    }
}
