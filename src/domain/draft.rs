//! Drafts produced by the refinement loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One intermediate version of the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// 0 for the seed draft, `i` after folding progress note `i`
    pub step_index: usize,

    /// Draft text returned by the generator
    pub text: String,

    /// When the draft was produced
    pub created_at: DateTime<Utc>,
}

/// Append-only sequence of drafts for one refinement run.
///
/// Step indices are assigned on push, so they are always contiguous from 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSequence {
    drafts: Vec<Draft>,
}

impl DraftSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next draft and return its step index
    pub fn push(&mut self, text: String) -> usize {
        let step_index = self.drafts.len();
        self.drafts.push(Draft {
            step_index,
            text,
            created_at: Utc::now(),
        });
        step_index
    }

    /// Most recent draft
    pub fn latest(&self) -> Option<&Draft> {
        self.drafts.last()
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Draft> {
        self.drafts.iter()
    }

    /// `(step_index, text)` pairs
    pub fn pairs(&self) -> Vec<(usize, &str)> {
        self.drafts
            .iter()
            .map(|d| (d.step_index, d.text.as_str()))
            .collect()
    }
}
