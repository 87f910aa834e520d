//! Evaluation driver.
//!
//! For each stored summary, asks the judge whether each reference fact is
//! mentioned and for an overall quality score. Every judgment call is its
//! own unit of work: a failure is recorded against that unit and the rest
//! of the batch carries on.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{GenerationError, Generator};
use crate::domain::{JudgmentKind, ParsedJudgment, PatientEvaluation, UnitFailure, UnitOutcome};

use super::prompts::JudgePrompts;
use super::repair::{parse_judgment, UnparsableJudgmentError};

/// A single judgment call failed
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("judge generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("judge output unparsable: {0}")]
    Unparsable(#[from] UnparsableJudgmentError),
}

impl From<EvalError> for UnitFailure {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Generation(e) => UnitFailure::Generation(e.to_string()),
            EvalError::Unparsable(e) => UnitFailure::Unparsable(e.to_string()),
        }
    }
}

/// Fold a judgment result into an outcome record
pub fn to_outcome(result: Result<ParsedJudgment, EvalError>) -> UnitOutcome {
    match result {
        Ok(judgment) => UnitOutcome::Judged { judgment },
        Err(err) => UnitOutcome::Failed {
            failure: err.into(),
        },
    }
}

/// One patient to evaluate
#[derive(Debug, Clone)]
pub struct EvalCase {
    pub patient_id: String,

    /// `None` when no summary was stored for this patient
    pub summary: Option<String>,

    pub facts: Vec<String>,
}

/// Judges summaries with a generation backend
#[derive(Clone)]
pub struct Evaluator {
    judge: Arc<dyn Generator>,
    prompts: JudgePrompts,
    concurrency: usize,
}

impl Evaluator {
    /// `concurrency` bounds how many patients are evaluated at once
    pub fn new(judge: Arc<dyn Generator>, concurrency: usize) -> Self {
        Self {
            judge,
            prompts: JudgePrompts,
            concurrency: concurrency.max(1),
        }
    }

    pub fn judge_name(&self) -> &str {
        self.judge.name()
    }

    async fn judge(&self, prompt: String, kind: JudgmentKind) -> Result<ParsedJudgment, EvalError> {
        let raw = self.judge.generate(&prompt).await?;
        if raw.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion.into());
        }

        let judgment = parse_judgment(&raw, kind)?;
        if judgment.repairs > 0 {
            debug!(repairs = judgment.repairs, "Judge output repaired");
        }
        if !judgment.verdict_in_range() {
            warn!(
                kind = ?kind,
                verdict = ?judgment.verdict,
                "Judge verdict missing or out of range"
            );
        }
        Ok(judgment)
    }

    /// Fact-presence judgment for one fact
    #[instrument(skip(self, summary, fact))]
    pub async fn judge_fact(&self, summary: &str, fact: &str, fact_index: usize) -> Result<ParsedJudgment, EvalError> {
        self.judge(self.prompts.fact_presence(summary, fact), JudgmentKind::FactPresence)
            .await
    }

    /// Fact-presence judgment for every fact, keyed by fact index
    pub async fn evaluate_facts(
        &self,
        summary: &str,
        facts: &[String],
    ) -> BTreeMap<usize, Result<ParsedJudgment, EvalError>> {
        let mut results = BTreeMap::new();
        for (index, fact) in facts.iter().enumerate() {
            let result = self.judge_fact(summary, fact, index).await;
            if let Err(ref e) = result {
                warn!(fact_index = index, error = %e, "Fact judgment failed");
            }
            results.insert(index, result);
        }
        results
    }

    /// Holistic 1-10 quality judgment
    #[instrument(skip_all)]
    pub async fn evaluate_quality(&self, summary: &str) -> Result<ParsedJudgment, EvalError> {
        self.judge(self.prompts.quality(summary), JudgmentKind::Quality)
            .await
    }

    /// All judgments for one patient. Never fails as a whole.
    #[instrument(skip(self, summary, facts), fields(patient_id = %patient_id, facts = facts.len()))]
    pub async fn evaluate_patient(&self, patient_id: &str, summary: &str, facts: &[String]) -> PatientEvaluation {
        let facts = self
            .evaluate_facts(summary, facts)
            .await
            .into_iter()
            .map(|(index, result)| (index, to_outcome(result)))
            .collect();

        let quality = self.evaluate_quality(summary).await;
        if let Err(ref e) = quality {
            warn!(error = %e, "Quality judgment failed");
        }

        PatientEvaluation {
            patient_id: patient_id.to_string(),
            facts,
            quality: to_outcome(quality),
        }
    }

    /// Evaluate many patients concurrently.
    ///
    /// Returns one evaluation per case, in input order. Cases without a
    /// summary are marked missing without calling the judge.
    pub async fn evaluate_batch(&self, cases: Vec<EvalCase>) -> Vec<PatientEvaluation> {
        let total = cases.len();
        info!(patients = total, concurrency = self.concurrency, "Starting evaluation batch");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<PatientEvaluation>> = vec![None; total];
        let mut shapes = Vec::with_capacity(total);

        for (index, case) in cases.into_iter().enumerate() {
            let EvalCase {
                patient_id,
                summary,
                facts,
            } = case;
            shapes.push((patient_id.clone(), facts.len()));

            let Some(summary) = summary else {
                warn!(patient_id = %patient_id, "No stored summary");
                slots[index] = Some(PatientEvaluation::missing(patient_id, facts.len()));
                continue;
            };

            let evaluator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let evaluation = evaluator.evaluate_patient(&patient_id, &summary, &facts).await;
                (index, evaluation)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, evaluation)) => slots[index] = Some(evaluation),
                Err(e) if e.is_panic() => error!(error = %e, "Evaluation task panicked"),
                Err(e) => error!(error = %e, "Evaluation task aborted"),
            }
        }

        let evaluations: Vec<PatientEvaluation> = slots
            .into_iter()
            .zip(shapes)
            .map(|(slot, (patient_id, fact_count))| {
                slot.unwrap_or_else(|| {
                    PatientEvaluation::failed(
                        patient_id,
                        fact_count,
                        UnitFailure::Aborted("evaluation task did not finish".into()),
                    )
                })
            })
            .collect();

        let complete = evaluations.iter().filter(|e| e.is_complete()).count();
        info!(patients = total, complete, "Evaluation batch finished");

        evaluations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Answers fact prompts with `fact_mentioned: 1` and quality prompts with 7
    struct Agreeable;

    #[async_trait]
    impl Generator for Agreeable {
        fn name(&self) -> &str {
            "agreeable"
        }

        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            if prompt.contains("\"fact_mentioned\"") {
                Ok("```json\n{\"explanation\": \"stated\" \"fact_mentioned\": 1}\n```".into())
            } else {
                Ok("{\"explanation\": \"good\", \"score\": 7,}".into())
            }
        }
    }

    fn facts() -> Vec<String> {
        vec!["a".into(), "b".into(), "c".into()]
    }

    #[tokio::test]
    async fn test_evaluate_patient_repairs_output() {
        let evaluator = Evaluator::new(Arc::new(Agreeable), 2);
        let evaluation = evaluator.evaluate_patient("1", "summary", &facts()).await;

        assert!(evaluation.is_complete());
        assert_eq!(evaluation.facts_found(), 3);
        assert_eq!(evaluation.facts[&0].judgment().unwrap().repairs, 1);
        assert_eq!(evaluation.quality.verdict(), Some(7));
    }

    #[tokio::test]
    async fn test_missing_summary_not_judged() {
        let evaluator = Evaluator::new(Arc::new(Agreeable), 1);
        let cases = vec![
            EvalCase {
                patient_id: "1".into(),
                summary: Some("summary".into()),
                facts: facts(),
            },
            EvalCase {
                patient_id: "2".into(),
                summary: None,
                facts: facts(),
            },
        ];

        let evaluations = evaluator.evaluate_batch(cases).await;
        assert_eq!(evaluations.len(), 2);
        assert!(evaluations[0].is_complete());
        assert_eq!(evaluations[1].patient_id, "2");
        assert_eq!(evaluations[1].quality.failure(), Some(&UnitFailure::MissingSummary));
    }

    #[test]
    fn test_error_to_failure() {
        let failure: UnitFailure = EvalError::Unparsable(UnparsableJudgmentError::NoJsonObject).into();
        assert!(matches!(failure, UnitFailure::Unparsable(_)));

        let failure: UnitFailure = EvalError::Generation(GenerationError::EmptyCompletion).into();
        assert!(matches!(failure, UnitFailure::Generation(_)));
    }
}
