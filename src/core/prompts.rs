//! Prompt templates.
//!
//! Each builder takes the exact pieces it injects, so what reaches the
//! model at each step is visible in the signature. Injected content is
//! always wrapped in `---` fenced sections.

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::{NoteUnit, SegmentedRecord};

/// Default output-format instructions for the summary
pub const DEFAULT_SUMMARY_FORMAT: &str = r#"Format 1: Section-Based Summary
Organize the summary into these numbered sections, using only what is documented:
1. Reason for Admission
2. Relevant Medical History
3. Relevant Surgical History
4. Primary Diagnosis
5. Secondary Diagnoses
6. Key Diagnostic Investigations and Results
7. Therapeutic Procedures Performed
8. Medications (started, changed, discontinued, with documented reasons)
9. Condition at Discharge

Format 2: Problem-Based Summary
Immediately after Format 1, list each medical problem as:
Problem #N: <problem name>
  Current Clinical Status:
  Discharge Plan and Goals:
  Outstanding/Pending Issues:

Conclusion
Close with one paragraph summarizing the overall hospital course and key outcomes."#;

const SUMMARY_REQUIREMENTS: &str = r#"Requirements:
- Concise yet comprehensive.
- Professional tone appropriate for a medical document.
- Precise medical terminology.
- Avoid acronyms unless standard in medical documentation (e.g., ECG)."#;

const ROLE: &str = "Role: You are an expert assistant in internal medicine and medical documentation.";

/// Builds the three refinement prompts
#[derive(Debug, Clone)]
pub struct SummaryPrompts {
    format: String,
}

impl Default for SummaryPrompts {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_FORMAT)
    }
}

impl SummaryPrompts {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Load replacement format instructions from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let format = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read summary format: {}", path.display()))?;
        Ok(Self::new(format.trim()))
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    fn output_format(&self) -> String {
        format!(
            "Output Format: Provide the Hospital Course Summary in both formats, in order, followed by the conclusion paragraph.\n\n{}\n\n{}",
            self.format, SUMMARY_REQUIREMENTS
        )
    }

    /// First draft from the H&P and the last progress note only
    pub fn seed(&self, hp: &NoteUnit, last: &NoteUnit) -> String {
        format!(
            r#"{role}
Task: Read the History & Physical and the last progress note from a patient's hospital stay and write a concise, professional "Hospital Course Summary".

{output}

---
Patient History and Physical (H&P):
{hp}
---
Patient Last Progress Note:
{last}
---
Provide your "Hospital Course Summary" below."#,
            role = ROLE,
            output = self.output_format(),
            hp = hp.render(),
            last = last.render(),
        )
    }

    /// Fold one additional progress note into the current draft
    pub fn fold(&self, draft: &str, note: &NoteUnit) -> String {
        format!(
            r#"{role}
Task: You wrote the draft below from the History & Physical and the last progress note. Improve it by incorporating the relevant details of one additional progress note.

{output}

Your Draft "Hospital Course Summary":
---
{draft}
---

Additional Progress Note:
---
{note}
---
Provide your improved "Hospital Course Summary" below."#,
            role = ROLE,
            output = self.output_format(),
            draft = draft.trim(),
            note = note.render(),
        )
    }

    /// Final verification against every note in the record
    pub fn verify(&self, draft: &str, record: &SegmentedRecord) -> String {
        format!(
            r#"{role}
You work strictly from the records provided. Do not introduce external knowledge or make inferences.

Task: Revise the draft using the complete set of notes for this hospitalization:
- Verification: every statement must be directly supported by the notes.
- Elimination: remove anything that cannot be verified in the notes.
- Accuracy: medical terminology must be precise and correct.
- Clarity: keep a concise, professional tone.

{output}

Your Draft "Hospital Course Summary":
---
{draft}
---

Complete Notes for This Patient:
---
{notes}
---
Provide your verified "Hospital Course Summary" below."#,
            role = ROLE,
            output = self.output_format(),
            draft = draft.trim(),
            notes = record.full_text(),
        )
    }
}

/// Builds the evaluation prompts
#[derive(Debug, Clone, Default)]
pub struct JudgePrompts;

impl JudgePrompts {
    /// Binary check for one expected fact
    pub fn fact_presence(&self, summary: &str, fact: &str) -> String {
        format!(
            r#"You are an expert assistant in internal medicine. Decide whether a specific important fact is explicitly mentioned in the hospital course summary below.

Respond with a single JSON object and nothing else:
{{
    "explanation": "step-by-step reasoning for your decision",
    "fact_mentioned": 1 or 0
}}

Guidelines:
1. Use 1 only if the fact is explicitly and unambiguously stated.
2. Use 0 if it is not stated, even if it could be inferred. Ambiguity means 0.
3. Output exactly one JSON object with no nesting, markdown, or surrounding text.

--- Important Fact to look for ---
{fact}

--- Hospital Course Summary ---
{summary}"#,
            fact = fact.trim(),
            summary = summary.trim(),
        )
    }

    /// Holistic 1-10 quality rating
    pub fn quality(&self, summary: &str) -> String {
        format!(
            r#"You are a senior internal medicine physician rating a hospital course summary from 1 to 10, where 10 is the highest quality.

Respond with a single JSON object and nothing else:
{{
    "explanation": "reasoning covering each criterion below",
    "score": integer from 1 to 10
}}

Criteria: completeness, accuracy and internal consistency, clarity and conciseness, organization, appropriateness of detail. Explain how each influenced the score.

Anchors:
- 1-3: Unacceptable. Significantly incomplete, inaccurate, or disorganized.
- 4-6: Below average. Significant flaws; needs substantial revision.
- 7-8: Good. Accurate and complete with minor room for improvement.
- 9-10: Excellent. Comprehensive, accurate, clear, concise, and well organized.

Output exactly one JSON object with only "explanation" and "score". No trailing text.

--- Hospital Course Summary to evaluate ---
{summary}"#,
            summary = summary.trim(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::note::{progress_note_label, HP_LABEL, LAST_NOTE_LABEL};

    fn record() -> SegmentedRecord {
        SegmentedRecord {
            hp: NoteUnit::new(HP_LABEL, None, "HP-BODY"),
            last: NoteUnit::new(LAST_NOTE_LABEL, None, "LAST-BODY"),
            others: vec![
                NoteUnit::new(progress_note_label(1), None, "NOTE-ONE"),
                NoteUnit::new(progress_note_label(2), None, "NOTE-TWO"),
            ],
        }
    }

    #[test]
    fn test_seed_injects_only_hp_and_last() {
        let record = record();
        let prompt = SummaryPrompts::default().seed(&record.hp, &record.last);

        assert!(prompt.contains("HP-BODY"));
        assert!(prompt.contains("LAST-BODY"));
        assert!(!prompt.contains("NOTE-ONE"));
        assert!(prompt.find("HP-BODY").unwrap() < prompt.find("LAST-BODY").unwrap());
    }

    #[test]
    fn test_fold_injects_draft_and_single_note() {
        let record = record();
        let prompt = SummaryPrompts::default().fold("CURRENT-DRAFT", &record.others[1]);

        assert!(prompt.contains("CURRENT-DRAFT"));
        assert!(prompt.contains("PROGRESS NOTE NO 2\nNOTE-TWO"));
        assert!(!prompt.contains("NOTE-ONE"));
        assert!(!prompt.contains("HP-BODY"));
    }

    #[test]
    fn test_verify_injects_all_notes_in_order() {
        let prompt = SummaryPrompts::default().verify("DRAFT", &record());

        let positions: Vec<usize> = ["HP-BODY", "NOTE-ONE", "NOTE-TWO", "LAST-BODY"]
            .iter()
            .map(|needle| prompt.find(needle).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(prompt.contains("external knowledge"));
    }

    #[test]
    fn test_custom_format() {
        let prompts = SummaryPrompts::new("ONE PARAGRAPH ONLY");
        let record = record();
        assert!(prompts.seed(&record.hp, &record.last).contains("ONE PARAGRAPH ONLY"));
        assert!(!prompts.seed(&record.hp, &record.last).contains("Problem-Based"));
    }

    #[test]
    fn test_judge_prompts_name_verdict_fields() {
        let judge = JudgePrompts;
        let fact = judge.fact_presence("SUMMARY", "Patient had a STEMI");
        assert!(fact.contains("\"fact_mentioned\""));
        assert!(fact.contains("Patient had a STEMI"));
        assert!(fact.contains("SUMMARY"));

        let quality = judge.quality("SUMMARY");
        assert!(quality.contains("\"score\""));
        assert!(quality.contains("SUMMARY"));
    }
}
