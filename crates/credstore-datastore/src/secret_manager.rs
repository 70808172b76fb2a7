use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use credstore_core::config::SecretManagerConfig;
use credstore_core::error::{CredstoreError, Result};
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::rest::{not_found_as, resource_id, GoogleApi};
use crate::{BackendKind, Datastore};

/// Google Secret Manager. Each document is a secret; each update adds a
/// version, and older versions are destroyed when `prune_versions` is set
/// (Secret Manager bills per active version).
pub struct SecretManager {
    api: GoogleApi,
    project: String,
    prune_versions: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretVersion {
    name: String,
    #[serde(default)]
    state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSecretsResponse {
    #[serde(default)]
    secrets: Vec<Secret>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct Secret {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVersionsResponse {
    #[serde(default)]
    versions: Vec<SecretVersion>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct AccessResponse {
    payload: Payload,
}

#[derive(Deserialize)]
struct Payload {
    data: String,
}

impl SecretManager {
    pub fn new(config: &SecretManagerConfig, project: &str, auth: Arc<dyn TokenSource>) -> Self {
        Self {
            api: GoogleApi::new("secret manager", &config.endpoint, auth),
            project: project.to_string(),
            prune_versions: config.prune_versions,
        }
    }

    fn url(&self, tail: &[&str]) -> Result<Url> {
        let mut segments = vec!["v1", "projects", self.project.as_str()];
        segments.extend_from_slice(tail);
        self.api.url(&segments)
    }

    async fn create_secret(&self, key: &str) -> Result<()> {
        let url = self.url(&["secrets"])?;
        let req = self
            .api
            .request(Method::POST, url)
            .query(&[("secretId", key)])
            .json(&json!({ "replication": { "automatic": {} } }));

        match self.api.send(req).await {
            Ok(_) => {
                info!(key, "created secret");
                Ok(())
            }
            // someone else created it first; the version can still be added
            Err(CredstoreError::Http { status: 409, .. }) => {
                warn!(key, "secret already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn add_version(&self, key: &str, value: &str) -> Result<SecretVersion> {
        let url = self.url(&["secrets", &format!("{key}:addVersion")])?;
        let req = self
            .api
            .request(Method::POST, url)
            .json(&json!({ "payload": { "data": STANDARD.encode(value.as_bytes()) } }));
        self.api.send_json(req).await
    }

    /// Add a version, creating the secret first if it does not exist yet.
    async fn store_document(&self, key: &str, value: &str) -> Result<SecretVersion> {
        match self.add_version(key, value).await {
            Err(e) if e.is_not_found() => {
                self.create_secret(key).await?;
                self.add_version(key, value).await
            }
            other => other,
        }
    }

    async fn enabled_versions(&self, key: &str) -> Result<Vec<SecretVersion>> {
        let url = self.url(&["secrets", key, "versions"])?;
        let mut versions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .api
                .request(Method::GET, url.clone())
                .query(&[("filter", "state:ENABLED")]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }

            let page: ListVersionsResponse = self.api.send_json(req).await?;
            versions.extend(page.versions);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(versions)
    }

    /// Destroy a single version of a secret. The secret itself survives.
    pub async fn destroy_version(&self, key: &str, version: &str) -> Result<()> {
        validate_secret_id(key)?;
        let url = self.url(&["secrets", key, "versions", &format!("{version}:destroy")])?;
        let req = self.api.request(Method::POST, url).json(&json!({}));
        self.api
            .send(req)
            .await
            .map_err(not_found_as(&format!("{key}/versions/{version}")))?;
        Ok(())
    }

    /// Destroy every enabled version older than `keep`.
    async fn prune(&self, key: &str, keep: &SecretVersion) -> Result<usize> {
        let Some(keep_number) = version_number(&keep.name) else {
            warn!(key, version = %keep.name, "unparseable version name, not pruning");
            return Ok(0);
        };

        let mut destroyed = 0;
        for version in self.enabled_versions(key).await? {
            match version_number(&version.name) {
                Some(n) if n < keep_number => {
                    self.destroy_version(key, &n.to_string()).await?;
                    destroyed += 1;
                }
                Some(_) => {}
                None => warn!(key, version = %version.name, "skipping unparseable version"),
            }
        }
        Ok(destroyed)
    }
}

#[async_trait]
impl Datastore for SecretManager {
    fn kind(&self) -> BackendKind {
        BackendKind::SecretManager
    }

    /// Newest enabled version; the `latest` alias can name a destroyed one.
    async fn get_document(&self, key: &str) -> Result<String> {
        validate_secret_id(key)?;
        let newest = self
            .enabled_versions(key)
            .await
            .map_err(not_found_as(key))?
            .iter()
            .filter_map(|v| version_number(&v.name))
            .max()
            .ok_or_else(|| CredstoreError::NotFound(key.to_string()))?;

        let url = self.url(&["secrets", key, "versions", &format!("{newest}:access")])?;
        let req = self.api.request(Method::GET, url);
        let resp: AccessResponse = self.api.send_json(req).await.map_err(not_found_as(key))?;

        let bytes = STANDARD
            .decode(resp.payload.data)
            .map_err(|e| CredstoreError::Backend(format!("secret payload base64 decode failed: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| CredstoreError::Backend(format!("secret payload is not utf-8: {e}")))
    }

    async fn update_document(&self, key: &str, value: &str) -> Result<()> {
        validate_secret_id(key)?;
        let version = self.store_document(key, value).await?;
        debug!(key, version = %version.name, state = %version.state, "added secret version");

        if self.prune_versions {
            let destroyed = self.prune(key, &version).await?;
            if destroyed > 0 {
                debug!(key, destroyed, "pruned old secret versions");
            }
        }
        Ok(())
    }

    async fn delete_document(&self, key: &str) -> Result<()> {
        validate_secret_id(key)?;
        let url = self.url(&["secrets", key])?;
        let req = self.api.request(Method::DELETE, url);
        self.api.send(req).await.map_err(not_found_as(key))?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>> {
        let url = self.url(&["secrets"])?;
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.api.request(Method::GET, url.clone());
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }

            let page: ListSecretsResponse = self.api.send_json(req).await?;
            keys.extend(page.secrets.iter().map(|s| resource_id(&s.name).to_string()));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(keys)
    }
}

/// Numeric id of a version resource name (`.../versions/7` → 7).
fn version_number(name: &str) -> Option<u64> {
    resource_id(name).parse().ok()
}

/// Secret ids: 1-255 characters of `[A-Za-z0-9_-]`.
fn validate_secret_id(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 255 {
        return Err(CredstoreError::invalid_key(key, "secret ids must be 1-255 characters"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(CredstoreError::invalid_key(
            key,
            format!("{c:?} is not allowed in secret ids"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_number() {
        assert_eq!(version_number("projects/123/secrets/abc/versions/7"), Some(7));
        assert_eq!(version_number("projects/123/secrets/abc/versions/latest"), None);
    }

    #[test]
    fn test_validate_secret_id() {
        assert!(validate_secret_id("dXNlckBleGFtcGxlLmNvbQ").is_ok());
        assert!(validate_secret_id("token_1-a").is_ok());
        assert!(validate_secret_id("").is_err());
        assert!(validate_secret_id("user@example.com").is_err());
        assert!(validate_secret_id(&"a".repeat(256)).is_err());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_io() {
        // endpoint is unroutable; validation must fail first
        let store = SecretManager::new(
            &SecretManagerConfig {
                endpoint: "http://127.0.0.1:1".to_string(),
                prune_versions: true,
            },
            "westley",
            Arc::new(crate::auth::StaticToken::new("t")),
        );
        let err = store.update_document("a/b", "{}").await.unwrap_err();
        assert!(matches!(err, CredstoreError::InvalidKey { .. }));
    }
}
