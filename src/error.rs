//! Error types for stepgate.
//!
//! The enum is closed: every failure a verification request can hit maps to
//! exactly one variant, and the HTTP boundary matches on it exhaustively so
//! a new variant cannot ship without a response mapping.

use thiserror::Error;

/// Result type alias for stepgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors that can occur in stepgate.
#[derive(Debug, Error)]
pub enum Error {
    /// Request payload failed validation. The message names the field.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Caller presented a credential that could not be accepted.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// A quota tier denied the request.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the denying window resets.
        retry_after_secs: u64,
    },

    /// The proof screenshot is missing, empty or unreadable.
    #[error("proof unavailable: {0}")]
    ProofUnavailable(String),

    /// The extraction endpoint rejected the call or returned garbage.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// The extraction call did not complete within the deadline.
    #[error("extraction timed out after {elapsed_ms}ms")]
    ExtractionTimeout {
        /// Milliseconds the call was allowed to run.
        elapsed_ms: u64,
    },

    /// A submission id was supplied but no matching row exists.
    #[error("submission not found: {0}")]
    SubmissionNotFound(String),

    /// The verdict row update was rejected by the row store.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// A collaborator call failed in transit (row store, storage, auth).
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
