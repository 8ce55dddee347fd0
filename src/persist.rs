//! Verdict persistence and the append-only audit trail.
//!
//! The verdict write is the only mutation of member-visible state. The audit
//! append is best-effort by contract: once an evaluation exists it is always
//! attempted, and a failed insert is logged and swallowed so the verdict
//! response never depends on the audit table.

use crate::error::{Error, Result};
use crate::evaluate::Evaluation;
use crate::extract::Extraction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// Action recorded on every automatic verification.
pub const AUDIT_ACTION: &str = "verification.auto";

/// Submission row fields the service reads.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    /// Row id.
    pub id: String,
    /// League the submission belongs to, when assigned.
    pub league_id: Option<String>,
}

/// Fields written back to a submission row.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictUpdate {
    /// Whether the claim was accepted.
    pub verified: bool,
    /// Tolerance applied when deciding.
    pub tolerance_used: i64,
    /// Kilometers the model read, if any.
    pub extracted_km: Option<f64>,
    /// Calories the model read, if any.
    pub extracted_calories: Option<f64>,
    /// Verdict notes enriched with what the model reported.
    pub verification_notes: String,
}

/// One append-only audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Principal the action is attributed to.
    pub actor_id: String,
    /// Action name, [`AUDIT_ACTION`] for this service.
    pub action: String,
    /// Submission the action touched, when known.
    pub target_id: Option<String>,
    /// Full snapshot of the decision.
    pub details: serde_json::Value,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Snapshot one verification decision.
    #[must_use]
    pub fn for_verification(
        actor_id: &str,
        request_id: &str,
        submission_id: Option<&str>,
        league_id: Option<&str>,
        evaluation: &Evaluation,
        extraction: &Extraction,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: AUDIT_ACTION.to_string(),
            target_id: submission_id.map(ToString::to_string),
            details: json!({
                "request_id": request_id,
                "league_id": league_id,
                "submission_id": submission_id,
                "verified": evaluation.verified,
                "tolerance_used": evaluation.tolerance,
                "difference": evaluation.difference,
                "notes": evaluation.notes,
                "extracted": {
                    "steps": extraction.steps,
                    "km": extraction.km,
                    "calories": extraction.calories,
                    "date": extraction.date,
                },
            }),
            created_at: Utc::now(),
        }
    }
}

/// Row store holding submissions and the audit log.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Load a submission row, `None` when no row matches.
    ///
    /// # Errors
    ///
    /// Returns an error when the lookup itself fails.
    async fn find_submission(&self, id: &str) -> Result<Option<SubmissionRecord>>;

    /// Write the verdict fields onto the submission row.
    ///
    /// # Errors
    ///
    /// Returns an error when the update is rejected.
    async fn apply_verdict(&self, id: &str, update: &VerdictUpdate) -> Result<()>;

    /// Append one audit row.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert is rejected.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
}

/// League the verdict ended up attributed to.
#[derive(Debug, Clone)]
pub struct PersistedVerdict {
    /// Payload league, else the submission row's league, else none.
    pub league_id: Option<String>,
}

/// Write the verdict onto the submission row.
///
/// # Errors
///
/// Returns [`Error::SubmissionNotFound`] when no row matches and
/// [`Error::PersistenceFailed`] when the update is rejected; lookup
/// transport faults pass through unchanged.
pub async fn persist_verdict(
    store: &dyn SubmissionStore,
    submission_id: &str,
    league_id: Option<&str>,
    evaluation: &Evaluation,
    extraction: &Extraction,
) -> Result<PersistedVerdict> {
    let record = store.find_submission(submission_id).await?.ok_or_else(|| {
        Error::SubmissionNotFound(format!("submission {submission_id} does not exist"))
    })?;

    let update = VerdictUpdate {
        verified: evaluation.verified,
        tolerance_used: evaluation.tolerance,
        extracted_km: extraction.km,
        extracted_calories: extraction.calories,
        verification_notes: build_verification_notes(&evaluation.notes, extraction),
    };

    store
        .apply_verdict(submission_id, &update)
        .await
        .map_err(|e| match e {
            Error::PersistenceFailed(_) => e,
            other => Error::PersistenceFailed(other.to_string()),
        })?;

    Ok(PersistedVerdict {
        league_id: league_id
            .map(ToString::to_string)
            .or_else(|| record.league_id.clone()),
    })
}

/// Verdict notes with the model's own readings appended.
#[must_use]
pub fn build_verification_notes(base: &str, extraction: &Extraction) -> String {
    let mut parts = vec![base.to_string()];
    if let Some(steps) = extraction.steps {
        parts.push(format!("Model steps: {steps}"));
    }
    if let Some(date) = &extraction.date {
        parts.push(format!("Model date: {date}"));
    }
    parts.join(" ")
}

/// Append an audit row, swallowing failures.
pub async fn record_audit(store: &dyn SubmissionStore, entry: &AuditEntry) {
    if let Err(e) = store.append_audit(entry).await {
        error!(action = %entry.action, target_id = ?entry.target_id, "audit.insert_failed: {e}");
    }
}
