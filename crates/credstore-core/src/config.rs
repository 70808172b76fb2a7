use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CredstoreError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Google Cloud project that owns the secrets / collection.
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub secret_manager: SecretManagerConfig,
    #[serde(default)]
    pub firestore: FirestoreConfig,
    #[serde(default)]
    pub cloud_storage: CloudStorageConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

/// How the tool authenticates itself to Google APIs.
/// An explicit access token wins over a credentials file; with neither,
/// the GCE metadata server is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub access_token: String,
    /// gcloud application-default credentials (`authorized_user` JSON).
    #[serde(default)]
    pub credentials_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretManagerConfig {
    #[serde(default = "default_secret_manager_endpoint")]
    pub endpoint: String,
    /// Destroy older versions after every update.
    #[serde(default = "default_prune_versions")]
    pub prune_versions: bool,
}

fn default_secret_manager_endpoint() -> String {
    "https://secretmanager.googleapis.com".to_string()
}

fn default_prune_versions() -> bool {
    true
}

impl Default for SecretManagerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_secret_manager_endpoint(),
            prune_versions: default_prune_versions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirestoreConfig {
    #[serde(default = "default_firestore_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Talking to the local emulator: skip real credentials.
    #[serde(default)]
    pub emulator: bool,
}

fn default_firestore_endpoint() -> String {
    "https://firestore.googleapis.com".to_string()
}

fn default_database() -> String {
    "(default)".to_string()
}

fn default_collection() -> String {
    "administration".to_string()
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_firestore_endpoint(),
            database: default_database(),
            collection: default_collection(),
            emulator: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudStorageConfig {
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    /// Prepended to every object name, e.g. `tokens/`.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub emulator: bool,
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

impl Default for CloudStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_storage_endpoint(),
            bucket: String::new(),
            prefix: String::new(),
            emulator: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_path")]
    pub path: String,
}

fn default_local_path() -> String {
    "datastore".to_string()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

impl Config {
    /// Load config: defaults → credstore.toml → env vars (env wins).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| CredstoreError::Config(format!("failed to read config: {e}")))?;
            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CredstoreError::Config(format!("failed to parse config: {e}")))
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("CREDSTORE_PROJECT").or_else(|| get("GOOGLE_CLOUD_PROJECT")) {
            self.project = v;
        }
        if let Some(v) = get("CREDSTORE_ACCESS_TOKEN") {
            self.auth.access_token = v;
        }
        if let Some(v) = get("GOOGLE_APPLICATION_CREDENTIALS") {
            self.auth.credentials_file = v;
        }
        if let Some(v) = get("CREDSTORE_BUCKET") {
            self.cloud_storage.bucket = v;
        }

        // Emulators speak plain http and ignore credentials
        if let Some(host) = get("FIRESTORE_EMULATOR_HOST") {
            self.firestore.endpoint = with_scheme(&host);
            self.firestore.emulator = true;
        }
        if let Some(host) = get("STORAGE_EMULATOR_HOST") {
            self.cloud_storage.endpoint = with_scheme(&host);
            self.cloud_storage.emulator = true;
        }
    }
}

fn with_scheme(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}
