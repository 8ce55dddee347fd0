//! Tolerance arithmetic and verdict assembly.
//!
//! Pure functions, no IO. A claim is verified when the extracted step count
//! lands within `max(round(3% of claim), 300)` of the claimed value. A date
//! shown on the screenshot that differs from the claimed date is noted but
//! does not change the verdict.

use crate::extract::Extraction;

const MIN_TOLERANCE: i64 = 300;

/// Outcome of comparing a claim against an extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether the claim is accepted.
    pub verified: bool,
    /// Absolute step tolerance applied.
    pub tolerance: i64,
    /// `|extracted - claimed|`, absent when no step count was extracted.
    pub difference: Option<i64>,
    /// Human-readable explanation, never empty.
    pub notes: String,
}

/// Allowed absolute deviation for a claimed step count.
#[must_use]
pub fn tolerance_for(steps_claimed: i64) -> i64 {
    let proportional = (steps_claimed as f64 * 0.03).round() as i64;
    proportional.max(MIN_TOLERANCE)
}

/// Compare a claim against what the model read off the screenshot.
#[must_use]
pub fn evaluate(steps_claimed: i64, for_date: &str, extraction: &Extraction) -> Evaluation {
    let tolerance = tolerance_for(steps_claimed);
    let mut notes: Vec<String> = Vec::new();
    let mut verified = false;
    let mut difference = None;

    match extraction.steps {
        None => notes.push("No step count could be extracted from the screenshot.".to_string()),
        Some(extracted) => {
            let diff = extracted.saturating_sub(steps_claimed).saturating_abs();
            difference = Some(diff);
            verified = diff <= tolerance;
        }
    }

    // Dates are compared literally; calendar normalization stays upstream.
    if let Some(date) = &extraction.date {
        if date != for_date {
            notes.push(format!(
                "Screenshot date {date} differs from claimed date {for_date}."
            ));
        }
    }

    if !verified {
        if let Some(diff) = difference {
            notes.push(format!(
                "Difference of {diff} steps exceeds tolerance of {tolerance}."
            ));
        }
    }

    let notes = if notes.is_empty() {
        if verified {
            "Verification succeeded.".to_string()
        } else {
            "Verification failed without details.".to_string()
        }
    } else {
        notes.join(" ")
    };

    Evaluation {
        verified,
        tolerance,
        difference,
        notes,
    }
}
