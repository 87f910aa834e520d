//! Note units produced by segmenting a raw hospital-stay record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Label given to the admission History & Physical.
pub const HP_LABEL: &str = "H&P";

/// Label given to the most recent progress note.
pub const LAST_NOTE_LABEL: &str = "LAST PROGRESS NOTE";

/// Label for the `n`-th intermediate progress note (1-indexed, oldest first)
pub fn progress_note_label(n: usize) -> String {
    format!("PROGRESS NOTE NO {}", n)
}

/// A single labelled clinical note.
///
/// Built once by the segmenter and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteUnit {
    /// Semantic label ("H&P", "LAST PROGRESS NOTE", "PROGRESS NOTE NO 3")
    pub label: String,

    /// Date stamp that followed the header token, if the note had one
    pub timestamp: Option<String>,

    /// Note text with markers and header removed
    pub body: String,
}

impl NoteUnit {
    pub fn new(label: impl Into<String>, timestamp: Option<String>, body: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timestamp,
            body: body.into(),
        }
    }

    /// Text injected into prompts: label, date stamp, then the body
    pub fn render(&self) -> String {
        match &self.timestamp {
            Some(ts) if self.body.is_empty() => format!("{}: {}", self.label, ts),
            Some(ts) => format!("{}: {}\n{}", self.label, ts, self.body),
            None if self.body.is_empty() => self.label.clone(),
            None => format!("{}\n{}", self.label, self.body),
        }
    }
}

impl fmt::Display for NoteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A raw record split into its labelled notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentedRecord {
    /// Admission History & Physical
    pub hp: NoteUnit,

    /// Most recent progress note
    pub last: NoteUnit,

    /// Intermediate progress notes, oldest first
    pub others: Vec<NoteUnit>,
}

impl SegmentedRecord {
    /// Total number of notes, H&P and last note included
    pub fn note_count(&self) -> usize {
        2 + self.others.len()
    }

    /// All notes in chronological order: H&P, intermediates, last note
    pub fn chronological(&self) -> impl Iterator<Item = &NoteUnit> {
        std::iter::once(&self.hp)
            .chain(self.others.iter())
            .chain(std::iter::once(&self.last))
    }

    /// Full concatenation used by the verification pass
    pub fn full_text(&self) -> String {
        self.chronological()
            .map(NoteUnit::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
