//! Bearer tokens for the Google APIs behind the remote datastores.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use credstore_core::config::AuthConfig;
use credstore_core::error::{CredstoreError, Result};
use credstore_core::types::now_unix;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Supplies an OAuth access token for each API call.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, e.g. from `gcloud auth print-access-token`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// The Firestore and Storage emulators accept any bearer token.
pub fn emulator_token() -> Arc<dyn TokenSource> {
    Arc::new(StaticToken::new("owner"))
}

struct CachedToken {
    token: String,
    expiry: i64,
}

impl CachedToken {
    /// Refresh 60 seconds before actual expiry.
    fn is_fresh(&self) -> bool {
        now_unix() < self.expiry - 60
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

async fn cached_token<F, Fut>(cache: &Mutex<Option<CachedToken>>, fetch: F) -> Result<String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedToken>>,
{
    let mut guard = cache.lock().await;
    if let Some(cached) = guard.as_ref().filter(|c| c.is_fresh()) {
        return Ok(cached.token.clone());
    }
    let fresh = fetch().await?;
    let token = fresh.token.clone();
    *guard = Some(fresh);
    Ok(token)
}

async fn read_token_response(resp: reqwest::Response, what: &str) -> Result<CachedToken> {
    let status = resp.status().as_u16();
    let text = resp
        .text()
        .await
        .map_err(|e| CredstoreError::Auth(format!("{what} read failed: {e}")))?;

    if status != 200 {
        return Err(CredstoreError::Http { status, body: text });
    }

    let parsed: TokenResponse = serde_json::from_str(&text)
        .map_err(|e| CredstoreError::Auth(format!("{what} parse failed: {e}")))?;

    Ok(CachedToken {
        token: parsed.access_token,
        expiry: now_unix() + parsed.expires_in,
    })
}

/// gcloud `authorized_user` credentials: trades the refresh token for
/// short-lived access tokens.
pub struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_url: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    refresh_token: String,
}

impl AuthorizedUser {
    pub fn new(client_id: String, client_secret: String, refresh_token: String) -> Self {
        Self {
            client_id,
            client_secret,
            refresh_token,
            token_url: TOKEN_URL.to_string(),
            http: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    /// Point the refresh at a different token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CredstoreError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_str(content)
            .map_err(|e| CredstoreError::Config(format!("invalid credentials file: {e}")))?;

        if file.kind != "authorized_user" {
            return Err(CredstoreError::Config(format!(
                "unsupported credentials type {:?}; set CREDSTORE_ACCESS_TOKEN instead",
                file.kind
            )));
        }
        if file.refresh_token.is_empty() {
            return Err(CredstoreError::Config(
                "credentials file has no refresh_token".to_string(),
            ));
        }

        Ok(Self::new(file.client_id, file.client_secret, file.refresh_token))
    }

    async fn refresh(&self) -> Result<CachedToken> {
        debug!("refreshing access token");
        let params = [
            ("refresh_token", self.refresh_token.as_str()),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("grant_type", "refresh_token"),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| CredstoreError::Auth(format!("token refresh failed: {e}")))?;

        read_token_response(resp, "token refresh").await
    }
}

#[async_trait]
impl TokenSource for AuthorizedUser {
    async fn access_token(&self) -> Result<String> {
        cached_token(&self.cached, || self.refresh()).await
    }
}

/// Default service account of the GCE / Cloud Run instance we run on.
pub struct MetadataServer {
    url: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataServer {
    pub fn new() -> Self {
        Self::with_url(METADATA_TOKEN_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken> {
        debug!("fetching access token from metadata server");
        let resp = self
            .http
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                CredstoreError::Auth(format!(
                    "metadata server unreachable ({e}); configure an access token or credentials file"
                ))
            })?;

        read_token_response(resp, "metadata token").await
    }
}

impl Default for MetadataServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenSource for MetadataServer {
    async fn access_token(&self) -> Result<String> {
        cached_token(&self.cached, || self.fetch()).await
    }
}

/// Pick a token source: explicit token, then credentials file (configured
/// or gcloud's well-known location), then the metadata server.
pub fn token_source_from_config(config: &AuthConfig) -> Result<Arc<dyn TokenSource>> {
    if !config.access_token.is_empty() {
        return Ok(Arc::new(StaticToken::new(config.access_token.clone())));
    }

    let file = if config.credentials_file.is_empty() {
        well_known_credentials().filter(|p| p.exists())
    } else {
        Some(PathBuf::from(&config.credentials_file))
    };

    match file {
        Some(path) => {
            debug!(path = %path.display(), "using application default credentials");
            Ok(Arc::new(AuthorizedUser::from_file(&path)?))
        }
        None => Ok(Arc::new(MetadataServer::new())),
    }
}

fn well_known_credentials() -> Option<PathBuf> {
    let dir = match std::env::var_os("CLOUDSDK_CONFIG") {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(std::env::var_os("HOME")?).join(".config").join("gcloud"),
    };
    Some(dir.join("application_default_credentials.json"))
}
