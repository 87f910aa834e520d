//! Evaluation Integration Tests
//!
//! Per-unit failure isolation across a concurrent batch.

mod common;

use std::sync::Arc;

use common::ScriptedGenerator;
use hospital_course::adapters::GenerationError;
use hospital_course::core::{EvalCase, Evaluator};
use hospital_course::domain::{EvalReport, UnitFailure};

const FACT_OK: &str = r#"{"explanation": "stated", "fact_mentioned": 1}"#;
const QUALITY_OK: &str = r#"{"explanation": "clear", "score": 8}"#;

fn is_fact_prompt(prompt: &str) -> bool {
    prompt.contains("\"fact_mentioned\"")
}

fn cases(n: usize) -> Vec<EvalCase> {
    (0..n)
        .map(|i| EvalCase {
            patient_id: format!("{}", i),
            summary: Some(format!("SUMMARY-OF-{}", i)),
            facts: vec![format!("fact a{}", i), format!("fact b{}", i), format!("fact c{}", i)],
        })
        .collect()
}

#[tokio::test]
async fn test_one_failing_patient_leaves_others_intact() {
    let judge = Arc::new(ScriptedGenerator::new(|_, prompt| {
        if prompt.contains("SUMMARY-OF-2") {
            return Err(GenerationError::Http {
                status: 500,
                body: "overloaded".into(),
            });
        }
        Ok(if is_fact_prompt(prompt) { FACT_OK } else { QUALITY_OK }.to_string())
    }));
    let evaluator = Evaluator::new(judge.clone(), 3);

    let evaluations = evaluator.evaluate_batch(cases(5)).await;

    assert_eq!(evaluations.len(), 5);
    let complete: Vec<&str> = evaluations
        .iter()
        .filter(|e| e.is_complete())
        .map(|e| e.patient_id.as_str())
        .collect();
    assert_eq!(complete, vec!["0", "1", "3", "4"]);

    let failed = &evaluations[2];
    assert_eq!(failed.patient_id, "2");
    assert_eq!(failed.facts.len(), 3);
    assert!(failed
        .facts
        .values()
        .all(|o| matches!(o.failure(), Some(UnitFailure::Generation(_)))));
    assert!(matches!(failed.quality.failure(), Some(UnitFailure::Generation(_))));

    // 3 facts + 1 quality per patient, every patient attempted
    assert_eq!(judge.calls(), 20);

    let report = EvalReport::new("gpt-4o".into(), "scripted".into(), evaluations);
    assert_eq!(report.fact_counts.succeeded, 12);
    assert_eq!(report.fact_counts.generation, 3);
    assert_eq!(report.quality_counts.succeeded, 4);
    assert_eq!(report.quality_counts.generation, 1);
    assert_eq!(report.incomplete_patients(), vec!["2"]);
    assert_eq!(report.mean_score(), Some(8.0));
}

#[tokio::test]
async fn test_unparsable_fact_isolated_from_siblings() {
    let judge = Arc::new(ScriptedGenerator::new(|_, prompt| {
        if prompt.contains("fact b0") {
            return Ok("I think the fact is present.".into());
        }
        Ok(if is_fact_prompt(prompt) { FACT_OK } else { QUALITY_OK }.to_string())
    }));
    let evaluator = Evaluator::new(judge, 1);

    let evaluations = evaluator.evaluate_batch(cases(1)).await;
    let patient = &evaluations[0];

    assert_eq!(patient.facts[&0].verdict(), Some(1));
    assert!(matches!(patient.facts[&1].failure(), Some(UnitFailure::Unparsable(_))));
    assert_eq!(patient.facts[&2].verdict(), Some(1));
    assert_eq!(patient.quality.verdict(), Some(8));
    assert_eq!(patient.facts_found(), 2);
}

#[tokio::test]
async fn test_quality_evaluated_even_when_all_facts_fail() {
    let judge = Arc::new(ScriptedGenerator::new(|_, prompt| {
        if is_fact_prompt(prompt) {
            Err(GenerationError::Timeout(std::time::Duration::from_secs(1)))
        } else {
            Ok(QUALITY_OK.to_string())
        }
    }));
    let evaluator = Evaluator::new(judge, 2);

    let evaluation = evaluator
        .evaluate_patient("9", "summary", &["x".to_string(), "y".to_string()])
        .await;

    assert!(evaluation.facts.values().all(|o| o.failure().is_some()));
    assert_eq!(evaluation.quality.verdict(), Some(8));
}

#[tokio::test]
async fn test_evaluate_facts_keys_by_index() {
    let judge = Arc::new(ScriptedGenerator::constant(FACT_OK));
    let evaluator = Evaluator::new(judge.clone(), 1);

    let facts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    let results = evaluator.evaluate_facts("summary", &facts).await;

    assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(results.values().all(|r| r.as_ref().unwrap().verdict == Some(1)));

    let prompts = judge.prompts();
    assert!(prompts[0].contains("one"));
    assert!(prompts[2].contains("three"));
}

#[tokio::test]
async fn test_panicking_judge_marks_only_that_patient_aborted() {
    let judge = Arc::new(ScriptedGenerator::new(|_, prompt| {
        if prompt.contains("SUMMARY-OF-1") {
            panic!("judge crashed");
        }
        Ok(if is_fact_prompt(prompt) { FACT_OK } else { QUALITY_OK }.to_string())
    }));
    let evaluator = Evaluator::new(judge, 2);

    let evaluations = evaluator.evaluate_batch(cases(3)).await;

    assert_eq!(evaluations.len(), 3);
    assert!(evaluations[0].is_complete());
    assert!(evaluations[2].is_complete());

    let aborted = &evaluations[1];
    assert_eq!(aborted.patient_id, "1");
    assert_eq!(aborted.facts.len(), 3);
    assert!(matches!(aborted.quality.failure(), Some(UnitFailure::Aborted(_))));

    let report = EvalReport::new("gpt-4o".into(), "scripted".into(), evaluations);
    assert_eq!(report.fact_counts.aborted, 3);
    assert_eq!(report.quality_counts.aborted, 1);
    assert_eq!(report.fact_counts.generation, 0);
}
