//! hospital-course - Iterative hospital course summarization
//!
//! Produces a structured "Hospital Course Summary" from a patient's
//! hospital-stay record by successive LLM refinement, then evaluates the
//! stored summaries with an LLM judge.
//!
//! # Architecture
//!
//! A run is a strictly sequential chain of generation calls:
//! - Seed: a first draft from the H&P and the last progress note
//! - Fold: each intermediate progress note, oldest first, folded into the draft
//! - Verify: the draft checked against every note in the record
//!
//! Evaluation is independent per patient and runs concurrently. Judge
//! output is repaired into JSON before its verdict is read.
//!
//! # Modules
//!
//! - `adapters`: Generation backends (OpenAI-compatible HTTP, local command)
//! - `core`: Segmenter, prompts, orchestrator, repair parser, evaluator, store
//! - `domain`: Data structures (NoteUnit, DraftSequence, ParsedJudgment, EvalReport)
//! - `config`: Config file discovery and environment overrides
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Summarize one record
//! hospital-course summarize --input records/15.txt
//!
//! # Summarize a directory, then evaluate against reference facts
//! hospital-course batch records/
//! hospital-course evaluate --facts facts.yaml
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{GenerationError, Generator, GeneratorConfig};
pub use config::Config;
pub use core::{Evaluator, Orchestrator, RecordFormat, Refinement};
pub use domain::{EvalReport, NoteUnit, ParsedJudgment, SegmentedRecord};
