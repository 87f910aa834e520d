//! Repair and parse evaluator output that was supposed to be JSON.
//!
//! Judges are asked for a bare JSON object but often wrap it in markdown
//! fences, add bullet/emphasis characters, leave a dangling comma before
//! the closing brace, or drop the comma between two fields. Repair runs in
//! three stages:
//!
//! 1. Normalize: drop fences and their language tag, flatten newlines,
//!    blank out `*` and `-`, cut to the outermost braces.
//! 2. Remove any comma in the last 10 characters.
//! 3. Parse up to [`MAX_PARSE_ATTEMPTS`] times, inserting a comma at the
//!    reported error position after each failure.
//!
//! Only the missing-comma defect is repaired. Unescaped quotes, missing
//! braces, and truncated output end in [`UnparsableJudgmentError`].

use serde_json::{error::Category, Value};
use thiserror::Error;
use tracing::debug;

use crate::domain::{JudgmentKind, ParsedJudgment};

/// Strict parses tried before giving up.
///
/// Five parses allow at most four comma insertions; a judgment missing
/// five separators is rejected rather than parsed once more.
pub const MAX_PARSE_ATTEMPTS: usize = 5;

/// Trailing characters scanned for a dangling comma
const TRAILING_WINDOW: usize = 10;

/// Repair did not produce a usable JSON object
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnparsableJudgmentError {
    #[error("output contains no JSON object")]
    NoJsonObject,

    #[error("output parsed but is not a JSON object")]
    NotAnObject,

    #[error("still invalid after {attempts} parse attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: String },

    #[error("output cannot be repaired: {0}")]
    Unrecoverable(String),
}

/// Repair loop state
#[derive(Debug)]
enum RepairState {
    Parsing { text: String, attempt: usize },
    Parsed { value: Value, repairs: usize },
    Failed(UnparsableJudgmentError),
}

impl RepairState {
    fn step(self) -> Self {
        let (text, attempt) = match self {
            Self::Parsing { text, attempt } => (text, attempt),
            terminal => return terminal,
        };

        let err = match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                return Self::Parsed {
                    value,
                    repairs: attempt - 1,
                }
            }
            Err(err) => err,
        };

        if attempt >= MAX_PARSE_ATTEMPTS {
            return Self::Failed(UnparsableJudgmentError::Exhausted {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }
        if err.classify() == Category::Eof {
            return Self::Failed(UnparsableJudgmentError::Unrecoverable(err.to_string()));
        }

        match error_offset(&text, err.line(), err.column()) {
            Some(offset) => {
                debug!(attempt, offset, error = %err, "Inserting comma at parse error");
                let mut repaired = String::with_capacity(text.len() + 1);
                repaired.push_str(&text[..offset]);
                repaired.push(',');
                repaired.push_str(&text[offset..]);
                Self::Parsing {
                    text: repaired,
                    attempt: attempt + 1,
                }
            }
            None => Self::Failed(UnparsableJudgmentError::Unrecoverable(err.to_string())),
        }
    }
}

/// Strip formatting noise that is never legitimate JSON content here
pub fn normalize(raw: &str) -> String {
    let text = raw
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
        .replace(|c: char| matches!(c, '\n' | '\r' | '*' | '-'), " ");

    match text.find('{') {
        Some(start) => match text.rfind('}') {
            Some(end) if end > start => text[start..=end].to_string(),
            _ => text[start..].to_string(),
        },
        None => text,
    }
}

/// Remove commas from the last few characters so a dangling comma cannot
/// precede the closing brace
pub fn strip_trailing_comma(text: &str) -> String {
    let split = text
        .char_indices()
        .rev()
        .nth(TRAILING_WINDOW - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let (head, tail) = text.split_at(split);
    format!("{}{}", head, tail.replace(',', ""))
}

/// Byte offset for a 1-based line and column as reported by serde_json
fn error_offset(text: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 || column == 0 {
        return None;
    }
    let line_start = if line == 1 {
        0
    } else {
        text.match_indices('\n').nth(line - 2).map(|(i, _)| i + 1)?
    };
    let offset = line_start + column - 1;
    (offset <= text.len() && text.is_char_boundary(offset)).then_some(offset)
}

/// Parse an evaluator's raw output into a judgment of the given kind
pub fn parse_judgment(raw: &str, kind: JudgmentKind) -> Result<ParsedJudgment, UnparsableJudgmentError> {
    let normalized = normalize(raw);
    if !normalized.contains('{') {
        return Err(UnparsableJudgmentError::NoJsonObject);
    }

    let mut state = RepairState::Parsing {
        text: strip_trailing_comma(&normalized),
        attempt: 1,
    };
    let (value, repairs) = loop {
        state = match state.step() {
            RepairState::Parsed { value, repairs } => break (value, repairs),
            RepairState::Failed(err) => return Err(err),
            parsing => parsing,
        };
    };

    let object = value.as_object().ok_or(UnparsableJudgmentError::NotAnObject)?;

    let explanation = object.get("explanation").and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    });
    let verdict = object.get(kind.verdict_field()).and_then(integer_value);

    Ok(ParsedJudgment {
        kind,
        explanation,
        verdict,
        repairs,
    })
}

/// Integer from a JSON number or numeric string; `None` if not integral
fn integer_value(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => return Some(i64::from(*b)),
        _ => return None,
    };
    (number.is_finite() && number.fract() == 0.0).then_some(number as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_fences_and_markup() {
        let raw = "Here you go:\n```json\n{\n  **\"score\"**: 7\n}\n```\nThanks";
        let normalized = normalize(raw);
        assert!(normalized.starts_with('{'));
        assert!(normalized.ends_with('}'));
        assert!(!normalized.contains("```"));
        assert!(!normalized.contains('*'));
        assert!(!normalized.contains('\n'));
    }

    #[test]
    fn test_strip_trailing_comma_only_in_window() {
        let text = r#"{"a": "x, y", "score": 8,}"#;
        assert_eq!(strip_trailing_comma(text), r#"{"a": "x, y", "score": 8}"#);

        assert_eq!(strip_trailing_comma("1,2"), "12");
    }

    #[test]
    fn test_error_offset() {
        assert_eq!(error_offset("abc", 1, 1), Some(0));
        assert_eq!(error_offset("abc", 1, 4), Some(3));
        assert_eq!(error_offset("ab\ncd", 2, 2), Some(4));
        assert_eq!(error_offset("abc", 1, 9), None);
        assert_eq!(error_offset("abc", 0, 1), None);
    }

    #[test]
    fn test_integer_value() {
        assert_eq!(integer_value(&serde_json::json!(8)), Some(8));
        assert_eq!(integer_value(&serde_json::json!(8.0)), Some(8));
        assert_eq!(integer_value(&serde_json::json!("1")), Some(1));
        assert_eq!(integer_value(&serde_json::json!(7.5)), None);
        assert_eq!(integer_value(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_missing_comma_repaired() {
        let raw = r#"{"explanation": "mentioned in plan" "fact_mentioned": 1}"#;
        let judgment = parse_judgment(raw, JudgmentKind::FactPresence).unwrap();
        assert_eq!(judgment.verdict, Some(1));
        assert_eq!(judgment.repairs, 1);
        assert_eq!(judgment.explanation.as_deref(), Some("mentioned in plan"));
    }

    #[test]
    fn test_truncated_output_unrecoverable() {
        let raw = r#"{"explanation": "the summary"#;
        let result = parse_judgment(raw, JudgmentKind::Quality);
        assert!(matches!(result, Err(UnparsableJudgmentError::Unrecoverable(_))));
    }

    #[test]
    fn test_no_object() {
        assert_eq!(
            parse_judgment("I cannot evaluate this.", JudgmentKind::Quality),
            Err(UnparsableJudgmentError::NoJsonObject)
        );
    }
}
