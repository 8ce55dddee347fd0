//! Vision model extraction of activity totals from a screenshot.
//!
//! The extractor sends one prompt plus the inline image to the generative
//! language endpoint and expects a small JSON object back. Models wrap JSON
//! in prose or markdown fences often enough that the reply is recovered by
//! slicing from the first `{` to the last `}`; anything unparseable becomes
//! an empty [`Extraction`] rather than an error, and the verdict logic turns
//! that into an unverified claim. Only transport failures, non-2xx statuses
//! and the deadline are errors.

use crate::config::GeminiConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Fields the model managed to read off the screenshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extraction {
    /// Step count, rounded when the model emits a float.
    pub steps: Option<i64>,
    /// Distance in kilometers.
    pub km: Option<f64>,
    /// Calories burned.
    pub calories: Option<f64>,
    /// Date displayed on the screenshot, as written.
    pub date: Option<String>,
}

/// One extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Request id carried through for log correlation.
    pub request_id: String,
    /// Steps the member claims to have walked.
    pub steps_claimed: i64,
    /// Date the claim is for, `YYYY-MM-DD`.
    pub for_date: String,
    /// Screenshot bytes.
    pub image: Bytes,
    /// MIME type submitted with the image.
    pub content_type: String,
    /// Model resource name from the active policy.
    pub model: String,
}

/// Reads activity totals from a screenshot.
#[async_trait]
pub trait ActivityExtractor: Send + Sync {
    /// Run one extraction under the provider's deadline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExtractionFailed`] when the endpoint rejects the
    /// call and [`Error::ExtractionTimeout`] when the deadline lapses.
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction>;
}

/// [`ActivityExtractor`] backed by the generative language REST endpoint.
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiExtractor {
    /// Build an extractor from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to build extraction client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }
}

#[async_trait]
impl ActivityExtractor for GeminiExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction> {
        let url = format!(
            "{}/v1beta/{}:generateContent?key={}",
            self.api_base, request.model, self.api_key
        );
        let body = build_request_body(request);

        let call = async {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::ExtractionFailed(format!("extraction call failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let detail: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(200)
                    .collect();
                return Err(Error::ExtractionFailed(format!(
                    "extraction endpoint returned {status}: {detail}"
                )));
            }

            response
                .json::<GenerateResponse>()
                .await
                .map_err(|e| Error::ExtractionFailed(format!("malformed extraction reply: {e}")))
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => {
                let text = first_candidate_text(&reply).unwrap_or_default();
                let extraction = parse_model_text(text);
                debug!(
                    request_id = %request.request_id,
                    raw = %text,
                    extraction = ?extraction,
                    "verification.gemini_response"
                );
                Ok(extraction)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::ExtractionTimeout {
                elapsed_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "topP")]
    top_p: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ReplyPart>>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    text: Option<String>,
}

fn build_request_body(request: &ExtractionRequest) -> GenerateRequest {
    let prompt = format!(
        "The user states they walked {} steps on {}. From the attached screenshot, \
         extract the actual steps, distance in kilometers, calories, and the date \
         displayed. Respond strictly as JSON with keys steps, km, calories, date.",
        request.steps_claimed, request.for_date
    );

    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![
                Part {
                    text: Some(prompt),
                    inline_data: None,
                },
                Part {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: request.content_type.clone(),
                        data: BASE64.encode(&request.image),
                    }),
                },
            ],
        }],
        generation_config: GenerationConfig {
            temperature: 0.2,
            top_p: 0.8,
        },
    }
}

fn first_candidate_text(reply: &GenerateResponse) -> Option<&str> {
    reply
        .candidates
        .as_ref()?
        .first()?
        .content
        .as_ref()?
        .parts
        .as_ref()?
        .first()?
        .text
        .as_deref()
}

/// Recover the JSON object embedded in a model reply and project it onto
/// typed fields. Everything that cannot be read confidently comes back as
/// `None`.
#[must_use]
pub fn parse_model_text(text: &str) -> Extraction {
    let Some(json) = slice_json_object(text) else {
        return Extraction::default();
    };
    let Ok(value) = serde_json::from_str::<Value>(json) else {
        return Extraction::default();
    };

    Extraction {
        steps: read_rounded_i64(&value, "steps"),
        km: value.get("km").and_then(Value::as_f64),
        calories: value.get("calories").and_then(Value::as_f64),
        date: value
            .get("date")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string),
    }
}

fn slice_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Ceiling on a believable daily step reading.
const MAX_READABLE_STEPS: i64 = 1_000_000;

/// Models sometimes answer `10250.0` for an integer field. Readings outside
/// `0..=MAX_READABLE_STEPS` come back absent, the same as a wrong type.
fn read_rounded_i64(value: &Value, key: &str) -> Option<i64> {
    let field = value.get(key)?;
    field
        .as_i64()
        .or_else(|| field.as_f64().map(|f| f.round() as i64))
        .filter(|n| (0..=MAX_READABLE_STEPS).contains(n))
}
