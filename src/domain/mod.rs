//! Domain types for the summarization pipeline.
//!
//! This module contains the core data structures:
//! - Notes: Labelled note units segmented from a raw record
//! - Drafts: Intermediate summaries produced during refinement
//! - Judgments: Parsed evaluator verdicts
//! - Evaluation: Per-patient outcomes and batch reports

pub mod draft;
pub mod evaluation;
pub mod judgment;
pub mod note;

// Re-export commonly used types
pub use draft::{Draft, DraftSequence};
pub use evaluation::{EvalReport, PatientEvaluation, UnitCounts, UnitFailure, UnitOutcome};
pub use judgment::{JudgmentKind, ParsedJudgment};
pub use note::{NoteUnit, SegmentedRecord};
