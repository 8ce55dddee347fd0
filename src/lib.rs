//! Screenshot-backed step count verification for walking leagues.
//!
//! Members self-report a daily step count together with a fitness-app
//! screenshot. Stepgate is the service that decides whether the count can be
//! trusted: it rate-limits the caller across per-actor and global budgets,
//! downloads the screenshot from object storage, asks a vision model to read
//! the displayed totals, compares the claim with the extraction under a
//! tolerance policy, persists the verdict and appends an audit record.
//!
//! # Architecture
//!
//! - [`quota`] - fixed-window request budgets keyed by actor, plus a global key
//! - [`policy`] - TTL-cached verification policy sourced from site settings
//! - [`proofs`] - proof screenshot retrieval from object storage
//! - [`extract`] - vision model call under a deadline, tolerant JSON recovery
//! - [`evaluate`] - pure tolerance arithmetic and verdict assembly
//! - [`persist`] - verdict row update and append-only audit trail
//! - [`identity`] - principal resolution for quota keys and audit actors
//! - [`verifier`] - the request pipeline tying the stages together
//! - [`server`] - the axum HTTP boundary
//! - [`supabase`] - one REST client implementing the collaborator traits
//!
//! Everything a request needs is injected through traits, so the whole
//! pipeline runs against in-memory collaborators in tests.

pub mod config;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod identity;
pub mod persist;
pub mod policy;
pub mod proofs;
pub mod quota;
pub mod server;
pub mod supabase;
pub mod verifier;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use evaluate::Evaluation;
pub use extract::Extraction;
pub use policy::VerifyPolicy;
pub use verifier::{VerificationService, VerifyOutcome, VerifyPayload};
