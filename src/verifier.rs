//! The verification pipeline.
//!
//! [`VerificationService`] owns the policy cache, the quota store and the
//! collaborator trait objects, and drives one claim through the stages:
//! resolve the actor, read the policy, charge the actor and global budgets,
//! fetch the proof, run the extraction, evaluate, persist when a submission
//! id was supplied, and append the audit entry. Any stage failure
//! short-circuits the stages after it, with one exception: once an
//! evaluation exists the audit append always runs, even when the verdict
//! write failed.

use crate::error::{Error, Result};
use crate::evaluate::{evaluate, Evaluation};
use crate::extract::{ActivityExtractor, Extraction, ExtractionRequest};
use crate::identity::{resolve_actor, IdentityProvider};
use crate::persist::{persist_verdict, record_audit, AuditEntry, SubmissionStore};
use crate::policy::PolicyCache;
use crate::proofs::{fetch_proof, ProofStore};
use crate::quota::{QuotaStore, GLOBAL_KEY};
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// A validated verification request.
#[derive(Debug, Clone)]
pub struct VerifyPayload {
    /// Claimed step count, floored to a whole number, always positive.
    pub steps: i64,
    /// Date the claim is for, `YYYY-MM-DD`.
    pub for_date: String,
    /// Object path of the proof screenshot.
    pub proof_path: String,
    /// League to attribute the verdict to.
    pub league_id: Option<String>,
    /// Submission row to persist the verdict onto.
    pub submission_id: Option<String>,
    /// Explicit actor override for trusted callers.
    pub requester_id: Option<String>,
}

impl VerifyPayload {
    /// Validate a decoded JSON body field by field.
    ///
    /// Empty strings in the optional id fields count as absent, matching
    /// what form-layer callers send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] naming the offending field.
    pub fn parse(body: &Value) -> Result<Self> {
        let Some(object) = body.as_object() else {
            return Err(Error::InvalidPayload(
                "request body must be a JSON object".to_string(),
            ));
        };

        let steps = object
            .get("steps")
            .and_then(Value::as_f64)
            .filter(|f| f.is_finite())
            .map(|f| f.floor() as i64)
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                Error::InvalidPayload("`steps` must be a positive number".to_string())
            })?;

        let for_date = object
            .get("for_date")
            .and_then(Value::as_str)
            .filter(|s| is_date_shaped(s))
            .ok_or_else(|| {
                Error::InvalidPayload("`for_date` must be a YYYY-MM-DD string".to_string())
            })?;
        if NaiveDate::parse_from_str(for_date, "%Y-%m-%d").is_err() {
            return Err(Error::InvalidPayload(
                "`for_date` must be a real calendar date".to_string(),
            ));
        }

        let proof_path = object
            .get("proof_path")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::InvalidPayload("`proof_path` must be a non-empty string".to_string())
            })?;

        Ok(Self {
            steps,
            for_date: for_date.to_string(),
            proof_path: proof_path.to_string(),
            league_id: optional_uuid(object, "league_id")?,
            submission_id: optional_uuid(object, "submission_id")?,
            requester_id: optional_string(object, "requester_id")?,
        })
    }
}

fn is_date_shaped(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| match i {
                4 | 7 => *b == b'-',
                _ => b.is_ascii_digit(),
            })
}

fn optional_uuid(
    object: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => {
            Uuid::parse_str(s)
                .map_err(|_| Error::InvalidPayload(format!("`{key}` must be a UUID")))?;
            Ok(Some(s.clone()))
        }
        Some(_) => Err(Error::InvalidPayload(format!("`{key}` must be a UUID"))),
    }
}

fn optional_string(
    object: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::InvalidPayload(format!("`{key}` must be a string"))),
    }
}

/// What a completed verification produced.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    /// Actor the request was attributed to.
    pub actor: String,
    /// League the verdict ended up attributed to.
    pub league_id: Option<String>,
    /// The verdict.
    pub evaluation: Evaluation,
    /// What the model read off the screenshot.
    pub extraction: Extraction,
    /// Whether a submission row was updated.
    pub persisted: bool,
}

/// Drives one verification request through every stage.
pub struct VerificationService {
    policy: PolicyCache,
    quota: QuotaStore,
    proofs: Arc<dyn ProofStore>,
    extractor: Arc<dyn ActivityExtractor>,
    submissions: Arc<dyn SubmissionStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl VerificationService {
    /// Assemble the pipeline from its parts.
    #[must_use]
    pub fn new(
        policy: PolicyCache,
        quota: QuotaStore,
        proofs: Arc<dyn ProofStore>,
        extractor: Arc<dyn ActivityExtractor>,
        submissions: Arc<dyn SubmissionStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            policy,
            quota,
            proofs,
            extractor,
            submissions,
            identity,
        }
    }

    /// Run one validated claim through the pipeline.
    ///
    /// # Errors
    ///
    /// Propagates the first failing stage. A persistence failure is
    /// surfaced only after the audit entry has been appended.
    pub async fn verify(
        &self,
        request_id: &str,
        payload: &VerifyPayload,
        authorization: Option<&str>,
    ) -> Result<VerifyOutcome> {
        let actor = resolve_actor(
            self.identity.as_ref(),
            payload.requester_id.as_deref(),
            authorization,
        )
        .await;

        let policy = self.policy.current().await;

        self.quota
            .check_and_consume(&actor, policy.per_minute, policy.per_hour)?;
        self.quota.check_and_consume(
            GLOBAL_KEY,
            policy.global_per_minute,
            policy.global_per_hour,
        )?;

        let (image, content_type) = fetch_proof(self.proofs.as_ref(), &payload.proof_path).await?;

        let extraction_request = ExtractionRequest {
            request_id: request_id.to_string(),
            steps_claimed: payload.steps,
            for_date: payload.for_date.clone(),
            image,
            content_type,
            model: policy.model.clone(),
        };
        let extraction = self.extractor.extract(&extraction_request).await?;

        let evaluation = evaluate(payload.steps, &payload.for_date, &extraction);

        let mut persisted = false;
        let mut league_id = payload.league_id.clone();
        let mut persist_error = None;

        if let Some(submission_id) = payload.submission_id.as_deref() {
            match persist_verdict(
                self.submissions.as_ref(),
                submission_id,
                payload.league_id.as_deref(),
                &evaluation,
                &extraction,
            )
            .await
            {
                Ok(outcome) => {
                    persisted = true;
                    league_id = outcome.league_id;
                }
                Err(e) => persist_error = Some(e),
            }
        }

        let entry = AuditEntry::for_verification(
            &actor,
            request_id,
            payload.submission_id.as_deref(),
            league_id.as_deref(),
            &evaluation,
            &extraction,
        );
        record_audit(self.submissions.as_ref(), &entry).await;

        if let Some(e) = persist_error {
            return Err(e);
        }

        Ok(VerifyOutcome {
            actor,
            league_id,
            evaluation,
            extraction,
            persisted,
        })
    }
}
