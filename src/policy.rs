//! Verification policy sourced from site settings.
//!
//! Operators tune the model name and quota ceilings through a key/value
//! settings table without redeploying. A successful fetch is reused for a
//! full TTL; a failed fetch logs a warning, keeps serving the last good
//! snapshot and leaves the load timestamp untouched, so the next request
//! tries the source again. Policy lookups never fail. The mutex is only
//! held to swap the snapshot, never across the fetch await.

use crate::config::ServiceConfig;
use crate::quota::{Clock, SystemClock};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const KEY_MODEL: &str = "gemini_model";
const KEY_PER_MINUTE: &str = "verify_per_minute";
const KEY_PER_HOUR: &str = "verify_per_hour";
const KEY_GLOBAL_PER_MINUTE: &str = "verify_global_per_minute";
const KEY_GLOBAL_PER_HOUR: &str = "verify_global_per_hour";

/// Source of the raw settings map, usually the `site_settings` table.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Fetch every settings row as a key/value map.
    async fn fetch_all(&self) -> Result<HashMap<String, String>>;
}

/// Effective verification policy for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyPolicy {
    /// Vision model resource name.
    pub model: String,
    /// Per-actor requests per minute. Zero or below disables the tier.
    pub per_minute: i64,
    /// Per-actor requests per hour.
    pub per_hour: i64,
    /// Service-wide requests per minute.
    pub global_per_minute: i64,
    /// Service-wide requests per hour.
    pub global_per_hour: i64,
}

impl VerifyPolicy {
    /// Build the compiled-in default policy from the service configuration.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            model: config.gemini.model.clone(),
            per_minute: config.limits.per_minute,
            per_hour: config.limits.per_hour,
            global_per_minute: config.limits.global_per_minute,
            global_per_hour: config.limits.global_per_hour,
        }
    }
}

struct CacheState {
    loaded_at_ms: u64,
    map: HashMap<String, String>,
}

/// TTL-gated cache resolving [`VerifyPolicy`] from a [`SettingsSource`].
pub struct PolicyCache {
    source: Arc<dyn SettingsSource>,
    defaults: VerifyPolicy,
    ttl_ms: u64,
    state: Mutex<CacheState>,
    clock: Arc<dyn Clock>,
}

impl PolicyCache {
    /// Create a cache over `source` with the given defaults and TTL.
    #[must_use]
    pub fn new(source: Arc<dyn SettingsSource>, defaults: VerifyPolicy, ttl: Duration) -> Self {
        Self::with_clock(source, defaults, ttl, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit time source.
    #[must_use]
    pub fn with_clock(
        source: Arc<dyn SettingsSource>,
        defaults: VerifyPolicy,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            defaults,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            state: Mutex::new(CacheState {
                loaded_at_ms: 0,
                map: HashMap::new(),
            }),
            clock,
        }
    }

    /// Resolve the policy in force right now.
    ///
    /// Refreshes the snapshot when the TTL since the last successful load
    /// has lapsed; a failed refresh logs a warning, keeps serving the
    /// previous snapshot and is tried again on the next call. Concurrent
    /// refreshes may race, in which case the last writer wins.
    pub async fn current(&self) -> VerifyPolicy {
        let now = self.clock.now_ms();
        let needs_refresh = {
            let state = self.state.lock();
            state.loaded_at_ms == 0 || now.saturating_sub(state.loaded_at_ms) >= self.ttl_ms
        };

        if needs_refresh {
            match self.source.fetch_all().await {
                Ok(map) => {
                    let mut state = self.state.lock();
                    state.map = map;
                    state.loaded_at_ms = now;
                }
                Err(e) => {
                    warn!("settings fetch failed, keeping cached policy: {e}");
                }
            }
        }

        let state = self.state.lock();
        self.resolve(&state.map)
    }

    fn resolve(&self, map: &HashMap<String, String>) -> VerifyPolicy {
        let model = map
            .get(KEY_MODEL)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map_or_else(|| self.defaults.model.clone(), ToString::to_string);

        VerifyPolicy {
            model,
            per_minute: parse_limit(map.get(KEY_PER_MINUTE), self.defaults.per_minute),
            per_hour: parse_limit(map.get(KEY_PER_HOUR), self.defaults.per_hour),
            global_per_minute: parse_limit(
                map.get(KEY_GLOBAL_PER_MINUTE),
                self.defaults.global_per_minute,
            ),
            global_per_hour: parse_limit(
                map.get(KEY_GLOBAL_PER_HOUR),
                self.defaults.global_per_hour,
            ),
        }
    }
}

/// Parse a stored ceiling. Zero is meaningful (it disables the tier), so
/// only absent, non-numeric or negative values fall back.
fn parse_limit(value: Option<&String>, fallback: i64) -> i64 {
    match value {
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(n) if n >= 0 => n,
            _ => fallback,
        },
        None => fallback,
    }
}
