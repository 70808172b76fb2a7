pub mod auth;
pub mod cloud_storage;
pub mod firestore;
pub mod local_file;
pub mod rest;
pub mod secret_manager;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use credstore_core::config::Config;
use credstore_core::error::{CredstoreError, Result};
use credstore_core::types::Document;

use crate::cloud_storage::CloudStorage;
use crate::firestore::Firestore;
use crate::local_file::LocalFile;
use crate::secret_manager::SecretManager;

/// Storage contract shared by every backend.
///
/// Keys are used verbatim; callers that hold raw identifiers (emails) should
/// run them through `credstore_core::key::encode_key` first.
#[async_trait]
pub trait Datastore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Fetch the value stored under `key`, or `NotFound`.
    async fn get_document(&self, key: &str) -> Result<String>;

    /// Create the document if absent, otherwise replace its value.
    async fn update_document(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the document, or `NotFound` if there was nothing to remove.
    async fn delete_document(&self, key: &str) -> Result<()>;

    /// Every key currently stored.
    async fn list_documents(&self) -> Result<Vec<String>>;

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for key in self.list_documents().await? {
            match self.get_document(&key).await {
                Ok(value) => documents.push(Document { key, value }),
                // deleted between list and get
                Err(CredstoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(documents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Firestore,
    SecretManager,
    CloudStorage,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Firestore => write!(f, "firestore"),
            Self::SecretManager => write!(f, "secret_manager"),
            Self::CloudStorage => write!(f, "cloud_storage"),
        }
    }
}

/// Build the datastore for `kind` from configuration.
pub fn open_datastore(kind: BackendKind, config: &Config) -> Result<Arc<dyn Datastore>> {
    match kind {
        BackendKind::Local => Ok(Arc::new(LocalFile::new(PathBuf::from(&config.local.path)))),
        BackendKind::Firestore => {
            let project = require_project(config)?;
            let auth = if config.firestore.emulator {
                auth::emulator_token()
            } else {
                auth::token_source_from_config(&config.auth)?
            };
            Ok(Arc::new(Firestore::new(&config.firestore, project, auth)))
        }
        BackendKind::SecretManager => {
            let project = require_project(config)?;
            let auth = auth::token_source_from_config(&config.auth)?;
            Ok(Arc::new(SecretManager::new(&config.secret_manager, project, auth)))
        }
        BackendKind::CloudStorage => {
            if config.cloud_storage.bucket.is_empty() {
                return Err(CredstoreError::Config(
                    "cloud storage needs a bucket (--bucket or [cloud_storage] bucket)".to_string(),
                ));
            }
            let auth = if config.cloud_storage.emulator {
                auth::emulator_token()
            } else {
                auth::token_source_from_config(&config.auth)?
            };
            Ok(Arc::new(CloudStorage::new(&config.cloud_storage, auth)))
        }
    }
}

fn require_project(config: &Config) -> Result<&str> {
    if config.project.is_empty() {
        return Err(CredstoreError::Config(
            "no project configured (--project, CREDSTORE_PROJECT or `project` in config)"
                .to_string(),
        ));
    }
    Ok(&config.project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_requires_project() {
        let config = Config::default();
        for kind in [BackendKind::Firestore, BackendKind::SecretManager] {
            let err = open_datastore(kind, &config).err().unwrap();
            assert!(matches!(err, CredstoreError::Config(_)), "{kind}");
        }
    }

    #[test]
    fn test_open_cloud_storage_requires_bucket() {
        let mut config = Config::default();
        config.auth.access_token = "token".to_string();
        let err = open_datastore(BackendKind::CloudStorage, &config).err().unwrap();
        assert!(err.to_string().contains("bucket"));

        config.cloud_storage.bucket = "buttercup".to_string();
        let store = open_datastore(BackendKind::CloudStorage, &config).unwrap();
        assert_eq!(store.kind(), BackendKind::CloudStorage);
    }

    #[test]
    fn test_open_local() {
        let store = open_datastore(BackendKind::Local, &Config::default()).unwrap();
        assert_eq!(store.kind(), BackendKind::Local);
    }
}
