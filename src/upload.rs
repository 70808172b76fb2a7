//! Read a credential file and store it in the selected datastore.

use credstore_core::config::Config;
use credstore_core::error::{CredstoreError, Result};
use credstore_core::key::encode_key;
use credstore_datastore::auth;
use credstore_datastore::cloud_storage::CloudStorage;
use credstore_datastore::Datastore;
use serde_json::Value;
use tracing::info;

pub struct UploadRequest {
    pub key: String,
    pub email: Option<String>,
    pub encode_key: bool,
}

/// Contents of a local path or a `gs://bucket/object` URI.
pub async fn load_source(source: &str, config: &Config) -> Result<String> {
    if source.starts_with("gs://") {
        let auth = if config.cloud_storage.emulator {
            auth::emulator_token()
        } else {
            auth::token_source_from_config(&config.auth)?
        };
        let storage = CloudStorage::new(&config.cloud_storage, auth);
        return storage.read_uri(source).await;
    }
    tokio::fs::read_to_string(source)
        .await
        .map_err(|e| CredstoreError::Io(format!("read {source}: {e}")))
}

/// Parse the source as JSON and stamp objects with an `email` field.
pub fn prepare_document(contents: &str, email: &str) -> Result<String> {
    let mut document: Value = serde_json::from_str(contents)
        .map_err(|e| CredstoreError::Json(format!("source is not valid JSON: {e}")))?;
    match document.as_object_mut() {
        Some(fields) => {
            fields.insert("email".to_string(), Value::String(email.to_string()));
            serde_json::to_string(&document)
                .map_err(|e| CredstoreError::Json(format!("encode document: {e}")))
        }
        None => Ok(contents.to_string()),
    }
}

/// Store `contents` and return the key it was stored under.
pub async fn upload(store: &dyn Datastore, request: &UploadRequest, contents: &str) -> Result<String> {
    // `--email` wins; otherwise the raw, unencoded key
    let email = request.email.as_deref().unwrap_or(&request.key);
    let document = prepare_document(contents, email)?;
    let key = if request.encode_key {
        encode_key(&request.key)?
    } else {
        request.key.clone()
    };

    store.update_document(&key, &document).await?;
    info!(backend = %store.kind(), key = %key, "stored document");
    Ok(key)
}
