//! Proof screenshot retrieval from object storage.
//!
//! Whatever the backend reports, a proof that cannot be produced as a
//! non-empty byte payload surfaces as [`Error::ProofUnavailable`]. The
//! content type prefers stored metadata and falls back to the file
//! extension; an unrecognized extension still ships as an octet stream and
//! the extraction endpoint is left to cope.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Raw object returned by a storage backend.
#[derive(Debug, Clone)]
pub struct ProofArtifact {
    /// Object payload.
    pub bytes: Bytes,
    /// Content type recorded by the backend, if any.
    pub content_type: Option<String>,
}

/// Object storage holding proof screenshots.
#[async_trait]
pub trait ProofStore: Send + Sync {
    /// Download the object at `path` within the proofs bucket.
    ///
    /// # Errors
    ///
    /// Returns an error when the object cannot be served.
    async fn download(&self, path: &str) -> Result<ProofArtifact>;
}

/// Fetch a proof and resolve the content type it will be submitted with.
///
/// # Errors
///
/// Returns [`Error::ProofUnavailable`] for any download failure and for
/// empty payloads.
pub async fn fetch_proof(store: &dyn ProofStore, path: &str) -> Result<(Bytes, String)> {
    let artifact = store.download(path).await.map_err(|e| match e {
        Error::ProofUnavailable(_) => e,
        other => Error::ProofUnavailable(format!("download of {path} failed: {other}")),
    })?;

    if artifact.bytes.is_empty() {
        return Err(Error::ProofUnavailable(format!("proof object {path} is empty")));
    }

    let content_type = artifact
        .content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| content_type_for_path(path).to_string());

    Ok((artifact.bytes, content_type))
}

/// Content type guessed from the file extension.
#[must_use]
pub fn content_type_for_path(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}
