//! Structured judgments recovered from evaluator output.

use serde::{Deserialize, Serialize};

/// Which verdict field a judgment call is expected to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentKind {
    /// Binary fact-presence check (`fact_mentioned`: 0 or 1)
    FactPresence,

    /// Holistic quality rating (`score`: 1 to 10)
    Quality,
}

impl JudgmentKind {
    /// JSON key holding the verdict
    pub fn verdict_field(&self) -> &'static str {
        match self {
            Self::FactPresence => "fact_mentioned",
            Self::Quality => "score",
        }
    }
}

/// A repaired and parsed judgment.
///
/// Missing fields are kept as `None` so "judged absent" (`Some(0)`) stays
/// distinguishable from "no verdict in the output".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedJudgment {
    pub kind: JudgmentKind,

    /// Reasoning given by the evaluator
    pub explanation: Option<String>,

    /// `fact_mentioned` or `score`, depending on `kind`
    pub verdict: Option<i64>,

    /// Comma insertions needed before the output parsed
    pub repairs: usize,
}

impl ParsedJudgment {
    /// True when the verdict is present and inside the expected range
    pub fn verdict_in_range(&self) -> bool {
        match (self.kind, self.verdict) {
            (JudgmentKind::FactPresence, Some(v)) => v == 0 || v == 1,
            (JudgmentKind::Quality, Some(v)) => (1..=10).contains(&v),
            (_, None) => false,
        }
    }
}
