//! Supabase adapter implementing the collaborator traits over REST.
//!
//! One client talks to three surfaces of the same project: PostgREST for
//! rows (`/rest/v1`), object storage (`/storage/v1`) and auth
//! (`/auth/v1`). Row and storage calls authenticate with the service-role
//! key; identity lookups forward the caller's own bearer token together
//! with the anon key.

use crate::config::SupabaseConfig;
use crate::error::{Error, Result};
use crate::identity::IdentityProvider;
use crate::persist::{AuditEntry, SubmissionRecord, SubmissionStore, VerdictUpdate};
use crate::policy::SettingsSource;
use crate::proofs::{ProofArtifact, ProofStore};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// REST client for the row store, object storage and auth endpoints.
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    service_role_key: String,
    anon_key: String,
    proofs_bucket: String,
}

#[derive(Debug, Deserialize)]
struct SettingsRow {
    key: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionRow {
    id: String,
    league_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Option<String>,
}

impl SupabaseClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build supabase client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
            anon_key: config.anon_key.clone(),
            proofs_bucket: config.proofs_bucket.clone(),
        })
    }

    fn rest_url(&self, table_and_query: &str) -> String {
        format!("{}/rest/v1/{table_and_query}", self.base_url)
    }

    fn storage_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{path}",
            self.base_url, self.proofs_bucket
        )
    }

    fn auth_url(&self) -> String {
        format!("{}/auth/v1/user", self.base_url)
    }

    fn with_service_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }
}

#[async_trait]
impl SettingsSource for SupabaseClient {
    async fn fetch_all(&self) -> Result<HashMap<String, String>> {
        let url = self.rest_url("site_settings?select=key,value");
        let response = self
            .with_service_key(self.client.get(url))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("settings fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Storage(format!("settings fetch returned {status}")));
        }

        let rows: Vec<SettingsRow> = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("settings rows unreadable: {e}")))?;

        Ok(settings_map(rows))
    }
}

#[async_trait]
impl ProofStore for SupabaseClient {
    async fn download(&self, path: &str) -> Result<ProofArtifact> {
        let response = self
            .with_service_key(self.client.get(self.storage_url(path)))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("proof download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProofUnavailable(format!(
                "storage returned {status} for {path}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("proof body unreadable: {e}")))?;

        Ok(ProofArtifact {
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl SubmissionStore for SupabaseClient {
    async fn find_submission(&self, id: &str) -> Result<Option<SubmissionRecord>> {
        let url = self.rest_url(&format!("submissions?id=eq.{id}&select=id,league_id"));
        let response = self
            .with_service_key(self.client.get(url))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("submission lookup failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "submission lookup returned {status}"
            )));
        }

        let rows: Vec<SubmissionRow> = response
            .json()
            .await
            .map_err(|e| Error::Storage(format!("submission row unreadable: {e}")))?;

        Ok(rows.into_iter().next().map(|row| SubmissionRecord {
            id: row.id,
            league_id: row.league_id,
        }))
    }

    async fn apply_verdict(&self, id: &str, update: &VerdictUpdate) -> Result<()> {
        let url = self.rest_url(&format!("submissions?id=eq.{id}"));
        let response = self
            .with_service_key(self.client.patch(url))
            .header("Prefer", "return=minimal")
            .json(update)
            .send()
            .await
            .map_err(|e| Error::PersistenceFailed(format!("verdict update failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::PersistenceFailed(format!(
                "verdict update returned {status}"
            )));
        }
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let response = self
            .with_service_key(self.client.post(self.rest_url("audit_log")))
            .header("Prefer", "return=minimal")
            .json(entry)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("audit insert failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Storage(format!("audit insert returned {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn resolve_user(&self, token: &str) -> Option<String> {
        let response = self
            .client
            .get(self.auth_url())
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        response.json::<AuthUser>().await.ok()?.id
    }
}

fn settings_map(rows: Vec<SettingsRow>) -> HashMap<String, String> {
    rows.into_iter()
        .filter_map(|row| row.value.map(|value| (row.key, value)))
        .collect()
}
