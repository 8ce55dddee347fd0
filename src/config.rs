//! Configuration for stepgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Supabase collaborator endpoints and keys.
    #[serde(default)]
    pub supabase: SupabaseConfig,

    /// Vision extraction configuration.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Compiled-in quota ceilings, overridable per key via site settings.
    #[serde(default)]
    pub limits: LimitConfig,

    /// How long a fetched policy stays fresh, in milliseconds.
    #[serde(default = "default_settings_ttl_ms")]
    pub settings_ttl_ms: u64,

    /// Upper bound on distinct quota keys tracked at once.
    #[serde(default = "default_max_tracked_actors")]
    pub max_tracked_actors: usize,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Supabase endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`.
    #[serde(default)]
    pub url: String,

    /// Service-role key used for row store and storage access.
    #[serde(default)]
    pub service_role_key: String,

    /// Anon key forwarded on identity lookups.
    #[serde(default)]
    pub anon_key: String,

    /// Storage bucket holding proof screenshots.
    #[serde(default = "default_proofs_bucket")]
    pub proofs_bucket: String,
}

/// Vision extraction endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key for the generative language endpoint.
    #[serde(default)]
    pub api_key: String,

    /// Model resource name, e.g. `models/gemini-2.5-flash`.
    #[serde(default = "default_model")]
    pub model: String,

    /// Endpoint base URL. Overridden in tests.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Deadline for one extraction call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Quota ceilings. Values of zero or below disable the tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Per-actor requests per minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: i64,

    /// Per-actor requests per hour.
    #[serde(default = "default_per_hour")]
    pub per_hour: i64,

    /// Service-wide requests per minute.
    #[serde(default = "default_global_per_minute")]
    pub global_per_minute: i64,

    /// Service-wide requests per hour.
    #[serde(default = "default_global_per_hour")]
    pub global_per_hour: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            supabase: SupabaseConfig::default(),
            gemini: GeminiConfig::default(),
            limits: LimitConfig::default(),
            settings_ttl_ms: default_settings_ttl_ms(),
            max_tracked_actors: default_max_tracked_actors(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_role_key: String::new(),
            anon_key: String::new(),
            proofs_bucket: default_proofs_bucket(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            api_base: default_api_base(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
            global_per_minute: default_global_per_minute(),
            global_per_hour: default_global_per_hour(),
        }
    }
}

/// Conventional per-user configuration file location.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "stepgate")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("stepgate.toml"))
}

fn default_bind() -> SocketAddr {
    std::net::SocketAddr::from(([127, 0, 0, 1], 8787))
}

fn default_proofs_bucket() -> String {
    "proofs".to_string()
}

fn default_model() -> String {
    "models/gemini-2.5-flash".to_string()
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

const fn default_timeout_ms() -> u64 {
    15_000
}

const fn default_settings_ttl_ms() -> u64 {
    60_000
}

const fn default_max_tracked_actors() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_per_minute() -> i64 {
    6
}

const fn default_per_hour() -> i64 {
    60
}

const fn default_global_per_minute() -> i64 {
    30
}

const fn default_global_per_hour() -> i64 {
    240
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check that the settings required to serve traffic are present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing setting.
    pub fn validate(&self) -> crate::Result<()> {
        if self.supabase.url.is_empty() {
            return Err(crate::Error::Config("supabase.url is required".to_string()));
        }
        if self.supabase.service_role_key.is_empty() {
            return Err(crate::Error::Config(
                "supabase.service_role_key is required".to_string(),
            ));
        }
        if self.gemini.api_key.is_empty() {
            return Err(crate::Error::Config("gemini.api_key is required".to_string()));
        }
        if self.gemini.timeout_ms == 0 {
            return Err(crate::Error::Config(
                "gemini.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
