//! Test harness for the end-to-end suite.
//!
//! Boots the production router on `127.0.0.1:0` with in-memory stand-ins
//! behind every collaborator trait, so tests exercise the full HTTP surface
//! without Supabase or Gemini credentials.

use async_trait::async_trait;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepgate::extract::{ActivityExtractor, ExtractionRequest};
use stepgate::identity::IdentityProvider;
use stepgate::persist::{AuditEntry, SubmissionRecord, SubmissionStore, VerdictUpdate};
use stepgate::policy::{PolicyCache, SettingsSource};
use stepgate::proofs::{ProofArtifact, ProofStore};
use stepgate::quota::QuotaStore;
use stepgate::server;
use stepgate::{Error, Extraction, VerificationService, VerifyPolicy};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

/// Error type for test harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Submission id seeded into the in-memory store by default.
pub const SUBMISSION_ID: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
/// League the seeded submission belongs to.
pub const LEAGUE_ID: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";
/// Storage path the seeded proof screenshot lives under.
pub const PROOF_PATH: &str = "alice/2026-03-01.png";
/// Bearer token the in-memory identity provider recognises.
pub const KNOWN_TOKEN: &str = "token-alice";
/// User id [`KNOWN_TOKEN`] resolves to.
pub const KNOWN_USER: &str = "alice-user";

/// Settings source backed by a plain map.
pub struct MemorySettings {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsSource for MemorySettings {
    async fn fetch_all(&self) -> stepgate::Result<HashMap<String, String>> {
        Ok(self.entries.lock().clone())
    }
}

/// Proof store backed by a plain map.
pub struct MemoryProofs {
    artifacts: Mutex<HashMap<String, ProofArtifact>>,
}

impl MemoryProofs {
    /// Seed a fake PNG under `path`.
    pub fn insert_png(&self, path: &str) {
        self.artifacts.lock().insert(
            path.to_string(),
            ProofArtifact {
                bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\nfake"),
                content_type: Some("image/png".to_string()),
            },
        );
    }
}

#[async_trait]
impl ProofStore for MemoryProofs {
    async fn download(&self, path: &str) -> stepgate::Result<ProofArtifact> {
        self.artifacts
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ProofUnavailable(format!("no object at {path}")))
    }
}

enum ScriptedReply {
    Extraction(Extraction),
    Failure(String),
}

/// Extractor that answers from a script instead of calling a model.
pub struct ScriptedExtractor {
    reply: Mutex<ScriptedReply>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    fn with_extraction(extraction: Extraction) -> Self {
        Self {
            reply: Mutex::new(ScriptedReply::Extraction(extraction)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replace the scripted reply with a successful extraction.
    pub fn set_extraction(&self, extraction: Extraction) {
        *self.reply.lock() = ScriptedReply::Extraction(extraction);
    }

    /// Replace the scripted reply with an extraction failure.
    pub fn set_failure(&self, message: &str) {
        *self.reply.lock() = ScriptedReply::Failure(message.to_string());
    }

    /// Number of extraction calls observed so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivityExtractor for ScriptedExtractor {
    async fn extract(&self, _request: &ExtractionRequest) -> stepgate::Result<Extraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.reply.lock() {
            ScriptedReply::Extraction(extraction) => Ok(extraction.clone()),
            ScriptedReply::Failure(message) => Err(Error::ExtractionFailed(message.clone())),
        }
    }
}

/// Submission store backed by plain maps, with switchable update failures.
pub struct MemorySubmissions {
    records: Mutex<HashMap<String, SubmissionRecord>>,
    updates: Mutex<Vec<(String, VerdictUpdate)>>,
    audits: Mutex<Vec<AuditEntry>>,
    fail_updates: AtomicBool,
}

impl MemorySubmissions {
    fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            updates: Mutex::new(Vec::new()),
            audits: Mutex::new(Vec::new()),
            fail_updates: AtomicBool::new(false),
        }
    }

    /// Seed a submission row.
    pub fn insert(&self, id: &str, league_id: Option<&str>) {
        self.records.lock().insert(
            id.to_string(),
            SubmissionRecord {
                id: id.to_string(),
                league_id: league_id.map(ToString::to_string),
            },
        );
    }

    /// Make every subsequent verdict update fail.
    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    /// Verdict updates applied so far, as `(submission_id, update)` pairs.
    #[must_use]
    pub fn updates(&self) -> Vec<(String, VerdictUpdate)> {
        self.updates.lock().clone()
    }

    /// Audit entries appended so far.
    #[must_use]
    pub fn audits(&self) -> Vec<AuditEntry> {
        self.audits.lock().clone()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissions {
    async fn find_submission(&self, id: &str) -> stepgate::Result<Option<SubmissionRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn apply_verdict(&self, id: &str, update: &VerdictUpdate) -> stepgate::Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::PersistenceFailed("update rejected".to_string()));
        }
        self.updates.lock().push((id.to_string(), update.clone()));
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> stepgate::Result<()> {
        self.audits.lock().push(entry.clone());
        Ok(())
    }
}

/// Identity provider that knows a single bearer token.
pub struct MemoryIdentity;

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn resolve_user(&self, token: &str) -> Option<String> {
        (token == KNOWN_TOKEN).then(|| KNOWN_USER.to_string())
    }
}

/// Knobs for a harness instance.
pub struct HarnessOptions {
    /// Policy used where the settings source has nothing to say.
    pub defaults: VerifyPolicy,
    /// Rows served by the in-memory settings source.
    pub settings: Vec<(String, String)>,
    /// Whether to seed [`SUBMISSION_ID`] into the submission store.
    pub seed_submission: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            defaults: VerifyPolicy {
                model: "models/gemini-2.5-flash".to_string(),
                per_minute: 100,
                per_hour: 1000,
                global_per_minute: 1000,
                global_per_hour: 10_000,
            },
            settings: Vec::new(),
            seed_submission: true,
        }
    }
}

/// A running service instance plus handles to its in-memory collaborators.
pub struct TestHarness {
    /// Base URL of the running server.
    pub base_url: String,
    /// HTTP client pointed at the server.
    pub client: reqwest::Client,
    /// In-memory proof store.
    pub proofs: Arc<MemoryProofs>,
    /// In-memory submission store.
    pub submissions: Arc<MemorySubmissions>,
    /// Scripted extractor, present unless a custom extractor was supplied.
    pub scripted: Option<Arc<ScriptedExtractor>>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<stepgate::Result<()>>,
}

impl TestHarness {
    /// Boot a harness with default options and a scripted extractor whose
    /// reading sits within tolerance of a 10000 step claim.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(HarnessOptions::default()).await
    }

    /// Boot a harness with the given options and a scripted extractor.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn spawn_with(options: HarnessOptions) -> Result<Self> {
        let scripted = Arc::new(ScriptedExtractor::with_extraction(Extraction {
            steps: Some(10_100),
            km: Some(7.4),
            calories: Some(410.0),
            date: Some("2026-03-01".to_string()),
        }));
        let mut harness = Self::spawn_with_extractor(scripted.clone(), options).await?;
        harness.scripted = Some(scripted);
        Ok(harness)
    }

    /// Boot a harness around a caller-supplied extractor.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn spawn_with_extractor(
        extractor: Arc<dyn ActivityExtractor>,
        options: HarnessOptions,
    ) -> Result<Self> {
        let settings = Arc::new(MemorySettings {
            entries: Mutex::new(options.settings.into_iter().collect()),
        });
        let proofs = Arc::new(MemoryProofs {
            artifacts: Mutex::new(HashMap::new()),
        });
        proofs.insert_png(PROOF_PATH);
        let submissions = Arc::new(MemorySubmissions::new());
        if options.seed_submission {
            submissions.insert(SUBMISSION_ID, Some(LEAGUE_ID));
        }

        let policy = PolicyCache::new(settings, options.defaults, Duration::from_secs(60));
        let service = VerificationService::new(
            policy,
            QuotaStore::new(128),
            proofs.clone(),
            extractor,
            submissions.clone(),
            Arc::new(MemoryIdentity),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(server::serve(listener, Arc::new(service), async move {
            let _ = rx.await;
        }));
        info!("test server listening on {addr}");

        Ok(Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            proofs,
            submissions,
            scripted: None,
            shutdown: Some(shutdown),
            server,
        })
    }

    /// Full URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Post a JSON body to `/v1/verify`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    pub async fn post_verify(&self, body: &Value) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.url("/v1/verify"))
            .json(body)
            .send()
            .await?)
    }

    /// Stop the server and wait for it to exit.
    pub async fn teardown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.server.await;
        info!("test server stopped");
    }
}

/// A complete verify request body for the seeded submission.
#[must_use]
pub fn seeded_body(steps: i64) -> Value {
    json!({
        "steps": steps,
        "for_date": "2026-03-01",
        "proof_path": PROOF_PATH,
        "submission_id": SUBMISSION_ID,
        "league_id": LEAGUE_ID,
        "requester_id": KNOWN_USER,
    })
}

/// Spawn an HTTP endpoint that accepts connections and never answers.
///
/// Drives the extraction deadline in the real Gemini client.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn silent_http_endpoint() -> Result<(String, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0_u8; 1024];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    Ok((format!("http://{addr}"), handle))
}

/// Spawn a stand-in for the Gemini API that answers any `generateContent`
/// call with a single candidate whose text is `reply_text`.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn canned_gemini_endpoint(reply_text: &str) -> Result<(String, JoinHandle<()>)> {
    let text = reply_text.to_string();
    let app = Router::new().route(
        "/v1beta/*rest",
        post(move || async move {
            axum::Json(json!({
                "candidates": [
                    {"content": {"parts": [{"text": text}]}}
                ]
            }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_body_shape() {
        let body = seeded_body(10_000);
        assert_eq!(body["steps"], 10_000);
        assert_eq!(body["submission_id"], SUBMISSION_ID);
        assert_eq!(body["proof_path"], PROOF_PATH);
    }

    #[test]
    fn test_harness_error_display() {
        let err = HarnessError::Io(std::io::Error::other("bind failed"));
        assert!(err.to_string().contains("bind failed"));
    }
}
