//! Command-line interface definition.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use stepgate::ServiceConfig;

/// Screenshot-backed step count verification service.
#[derive(Parser, Debug)]
#[command(name = "stepgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address the HTTP server binds to.
    #[arg(long, short, env = "STEPGATE_BIND")]
    pub bind: Option<SocketAddr>,

    /// Supabase project base URL.
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase service-role key for row and storage access.
    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    pub supabase_service_role_key: Option<String>,

    /// Supabase anon key forwarded on identity lookups.
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_anon_key: Option<String>,

    /// Storage bucket holding proof screenshots.
    #[arg(long, env = "PROOFS_BUCKET")]
    pub proofs_bucket: Option<String>,

    /// API key for the vision extraction endpoint.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Vision model resource name.
    #[arg(long, env = "GEMINI_MODEL")]
    pub gemini_model: Option<String>,

    /// Extraction deadline in milliseconds.
    #[arg(long, env = "VERIFY_TIMEOUT_MS")]
    pub verify_timeout_ms: Option<u64>,

    /// Default per-actor requests per minute.
    #[arg(long, env = "VERIFY_LIMIT_PER_MINUTE")]
    pub limit_per_minute: Option<i64>,

    /// Default per-actor requests per hour.
    #[arg(long, env = "VERIFY_LIMIT_PER_HOUR")]
    pub limit_per_hour: Option<i64>,

    /// Default service-wide requests per minute.
    #[arg(long, env = "VERIFY_LIMIT_PER_MINUTE_GLOBAL")]
    pub limit_per_minute_global: Option<i64>,

    /// Default service-wide requests per hour.
    #[arg(long, env = "VERIFY_LIMIT_PER_HOUR_GLOBAL")]
    pub limit_per_hour_global: Option<i64>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Convert CLI arguments into a `ServiceConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<ServiceConfig> {
        // Start from an explicit file, the conventional location, or defaults
        let mut config = if let Some(ref path) = self.config {
            ServiceConfig::from_file(path)?
        } else {
            let default_path = stepgate::config::default_config_path();
            if default_path.exists() {
                ServiceConfig::from_file(&default_path)?
            } else {
                ServiceConfig::default()
            }
        };

        // Override with CLI arguments
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(url) = self.supabase_url {
            config.supabase.url = url;
        }
        if let Some(key) = self.supabase_service_role_key {
            config.supabase.service_role_key = key;
        }
        if let Some(key) = self.supabase_anon_key {
            config.supabase.anon_key = key;
        }
        if let Some(bucket) = self.proofs_bucket {
            config.supabase.proofs_bucket = bucket;
        }
        if let Some(key) = self.gemini_api_key {
            config.gemini.api_key = key;
        }
        if let Some(model) = self.gemini_model {
            config.gemini.model = model;
        }
        if let Some(timeout_ms) = self.verify_timeout_ms {
            config.gemini.timeout_ms = timeout_ms;
        }
        if let Some(limit) = self.limit_per_minute {
            config.limits.per_minute = limit;
        }
        if let Some(limit) = self.limit_per_hour {
            config.limits.per_hour = limit;
        }
        if let Some(limit) = self.limit_per_minute_global {
            config.limits.global_per_minute = limit;
        }
        if let Some(limit) = self.limit_per_hour_global {
            config.limits.global_per_hour = limit;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
