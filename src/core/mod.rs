//! Core summarization and evaluation logic.
//!
//! This module contains:
//! - Segmenter: raw record to labelled notes
//! - Prompts: typed prompt builders
//! - Orchestrator: seed, fold, verify refinement loop
//! - Repair: judge output to structured judgment
//! - Evaluator: fact and quality judgments over a batch
//! - Corpus / SummaryStore: records, fact sheets and outputs on disk

pub mod corpus;
pub mod evaluator;
pub mod orchestrator;
pub mod prompts;
pub mod repair;
pub mod segmenter;
pub mod store;

// Re-export commonly used types
pub use corpus::{load_records, FactSheet, PatientRecord, RecordSet, UnreadableRecord};
pub use evaluator::{EvalCase, EvalError, Evaluator};
pub use orchestrator::{BatchItem, Orchestrator, RefineError, RefineStep, Refinement};
pub use prompts::{JudgePrompts, SummaryPrompts};
pub use repair::{parse_judgment, UnparsableJudgmentError};
pub use segmenter::{segment, RecordFormat, SegmentationError};
pub use store::{hash_input, SummaryStore};
