//! Principal resolution for quota keys and audit attribution.
//!
//! Resolution never fails: an explicit `requester_id` wins, then the user
//! behind the bearer credential, then the [`SYSTEM_ACTOR`] sentinel. The
//! service runs behind a trusted caller that has already authenticated the
//! session, and the global quota tier bounds what an unattributed caller
//! can spend.

use async_trait::async_trait;

/// Actor recorded when no principal can be resolved.
pub const SYSTEM_ACTOR: &str = "system";

/// Resolves the user behind a bearer credential.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// User id for `token`, `None` when the token is rejected.
    async fn resolve_user(&self, token: &str) -> Option<String>;
}

/// Resolve the actor id for one request.
pub async fn resolve_actor(
    provider: &dyn IdentityProvider,
    requester_id: Option<&str>,
    authorization: Option<&str>,
) -> String {
    if let Some(requester) = requester_id {
        if !requester.is_empty() {
            return requester.to_string();
        }
    }

    if let Some(header) = authorization {
        if let Some(token) = header.strip_prefix("Bearer ") {
            if let Some(user) = provider.resolve_user(token).await {
                return user;
            }
        }
    }

    SYSTEM_ACTOR.to_string()
}
