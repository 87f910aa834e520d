//! Splits a raw hospital-stay record into labelled notes.
//!
//! Raw layout, in text order:
//!
//! ```text
//! <preamble> MARKER <H&P> MARKER <last note> SENTINEL <note k> SENTINEL ... SENTINEL <note 1>
//! ```
//!
//! Notes after the last note are stored newest first, so they are reversed
//! before being numbered. Segmentation is pure: the same input always
//! yields the same notes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::note::{progress_note_label, HP_LABEL, LAST_NOTE_LABEL};
use crate::domain::{NoteUnit, SegmentedRecord};

/// Delimiters used by the raw record format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFormat {
    /// Run of `#` surrounding the H&P
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Separator between progress notes
    #[serde(default = "default_next_note")]
    pub next_note: String,

    /// Token preceding each note's date stamp
    #[serde(default = "default_note_header")]
    pub note_header: String,
}

fn default_marker() -> String {
    "#".repeat(21)
}
fn default_next_note() -> String {
    "---NEXT NOTE---".to_string()
}
fn default_note_header() -> String {
    "UNJITTERED NOTE DATE".to_string()
}

impl Default for RecordFormat {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            next_note: default_next_note(),
            note_header: default_note_header(),
        }
    }
}

/// Record does not have the expected delimiter structure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentationError {
    #[error("expected 2 H&P markers, found {found}")]
    MissingMarker { found: usize },

    #[error("note separator appears before the last progress note")]
    SentinelBeforeLastNote,

    #[error("{label} is empty")]
    EmptyNote { label: String },
}

/// Segment a raw record
pub fn segment(raw: &str, format: &RecordFormat) -> Result<SegmentedRecord, SegmentationError> {
    let marker = format.marker.as_str();

    let (hp_start, hp_end) = marker_span(raw, marker)?;
    let last_start = hp_end + marker.len();

    // Last note runs to the first separator after the H&P, or to the end
    // of the record when there are no intermediate notes
    let first_sentinel = raw.find(&format.next_note);
    let last_end = match first_sentinel {
        Some(pos) if pos < last_start => return Err(SegmentationError::SentinelBeforeLastNote),
        Some(pos) => pos,
        None => raw.len(),
    };

    let hp = normalize(&raw[hp_start..hp_end], HP_LABEL, format)?;
    let last = normalize(&raw[last_start..last_end], LAST_NOTE_LABEL, format)?;

    let others = match first_sentinel {
        Some(pos) => {
            let mut chunks: Vec<&str> = raw[pos + format.next_note.len()..]
                .split(format.next_note.as_str())
                .filter(|chunk| !strip_markers(chunk, marker).trim().is_empty())
                .collect();
            // Stored newest first
            chunks.reverse();
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| normalize(chunk, &progress_note_label(i + 1), format))
                .collect::<Result<Vec<_>, _>>()?
        }
        None => Vec::new(),
    };

    Ok(SegmentedRecord { hp, last, others })
}

/// Byte span of the H&P: between the first and second marker
fn marker_span(raw: &str, marker: &str) -> Result<(usize, usize), SegmentationError> {
    if marker.is_empty() {
        return Err(SegmentationError::MissingMarker { found: 0 });
    }

    let first = raw
        .find(marker)
        .ok_or(SegmentationError::MissingMarker { found: 0 })?;
    let start = first + marker.len();
    let end = raw[start..]
        .find(marker)
        .map(|offset| start + offset)
        .ok_or(SegmentationError::MissingMarker { found: 1 })?;

    Ok((start, end))
}

fn strip_markers(text: &str, marker: &str) -> String {
    text.replace(marker, "")
}

/// Drop everything up to the header token, split off the date stamp, and
/// attach the semantic label
fn normalize(text: &str, label: &str, format: &RecordFormat) -> Result<NoteUnit, SegmentationError> {
    let cleaned = strip_markers(text, &format.marker);
    let cleaned = cleaned.trim();

    let (timestamp, body) = match cleaned.find(&format.note_header) {
        Some(pos) => {
            let rest = &cleaned[pos + format.note_header.len()..];
            let (stamp_line, body) = rest.split_once('\n').unwrap_or((rest, ""));
            let stamp = stamp_line.trim().trim_start_matches(':').trim();
            let timestamp = (!stamp.is_empty()).then(|| stamp.to_string());
            (timestamp, body.trim())
        }
        None => (None, cleaned),
    };

    if timestamp.is_none() && body.is_empty() {
        return Err(SegmentationError::EmptyNote {
            label: label.to_string(),
        });
    }

    Ok(NoteUnit::new(label, timestamp, body))
}
