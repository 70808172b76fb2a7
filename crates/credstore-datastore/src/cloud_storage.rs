use std::sync::Arc;

use async_trait::async_trait;
use credstore_core::config::CloudStorageConfig;
use credstore_core::error::{CredstoreError, Result};
use reqwest::{Method, Url};
use serde::Deserialize;
use tracing::debug;

use crate::auth::TokenSource;
use crate::rest::{not_found_as, GoogleApi};
use crate::{BackendKind, Datastore};

/// Google Cloud Storage, one object per key in a bucket.
pub struct CloudStorage {
    api: GoogleApi,
    bucket: String,
    prefix: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListObjectsResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectResource {
    name: String,
}

impl CloudStorage {
    pub fn new(config: &CloudStorageConfig, auth: Arc<dyn TokenSource>) -> Self {
        Self::for_bucket(&config.endpoint, &config.bucket, &config.prefix, auth)
    }

    pub fn for_bucket(
        endpoint: &str,
        bucket: &str,
        prefix: &str,
        auth: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            api: GoogleApi::new("cloud storage", endpoint, auth),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        }
    }

    fn object_name(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn object_url(&self, bucket: &str, object: &str) -> Result<Url> {
        self.api.url(&["storage", "v1", "b", bucket, "o", object])
    }

    async fn read_object(&self, bucket: &str, object: &str) -> Result<String> {
        let req = self
            .api
            .request(Method::GET, self.object_url(bucket, object)?)
            .query(&[("alt", "media")]);
        self.api.send(req).await.map_err(not_found_as(object))
    }

    /// Fetch `gs://bucket/object` with this client's endpoint and
    /// credentials; the bucket need not be the configured one.
    pub async fn read_uri(&self, uri: &str) -> Result<String> {
        let (bucket, object) = parse_gs_uri(uri)?;
        self.read_object(bucket, object).await
    }
}

#[async_trait]
impl Datastore for CloudStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::CloudStorage
    }

    async fn get_document(&self, key: &str) -> Result<String> {
        validate_object_key(key)?;
        self.read_object(&self.bucket, &self.object_name(key))
            .await
            .map_err(not_found_as(key))
    }

    async fn update_document(&self, key: &str, value: &str) -> Result<()> {
        validate_object_key(key)?;
        let name = self.object_name(key);
        let url = self.api.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        let req = self
            .api
            .request(Method::POST, url)
            .query(&[("uploadType", "media"), ("name", name.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(value.to_string());
        self.api.send(req).await?;
        debug!(bucket = %self.bucket, object = %name, "uploaded object");
        Ok(())
    }

    async fn delete_document(&self, key: &str) -> Result<()> {
        validate_object_key(key)?;
        let req = self
            .api
            .request(Method::DELETE, self.object_url(&self.bucket, &self.object_name(key))?);
        self.api.send(req).await.map_err(not_found_as(key))?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>> {
        let url = self.api.url(&["storage", "v1", "b", &self.bucket, "o"])?;
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.api.request(Method::GET, url.clone());
            if !self.prefix.is_empty() {
                req = req.query(&[("prefix", &self.prefix)]);
            }
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }

            let page: ListObjectsResponse = self.api.send_json(req).await?;
            keys.extend(
                page.items
                    .iter()
                    .filter_map(|o| o.name.strip_prefix(self.prefix.as_str()))
                    .filter(|k| !k.is_empty())
                    .map(|k| k.to_string()),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(keys)
    }
}

/// Split `gs://bucket/path/to/object` into `("bucket", "path/to/object")`.
pub fn parse_gs_uri(uri: &str) -> Result<(&str, &str)> {
    let rest = uri
        .strip_prefix("gs://")
        .ok_or_else(|| CredstoreError::Config(format!("not a gs:// uri: {uri}")))?;
    match rest.split_once('/') {
        Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => Ok((bucket, object)),
        _ => Err(CredstoreError::Config(format!(
            "gs:// uri needs a bucket and an object: {uri}"
        ))),
    }
}

fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 1024 {
        return Err(CredstoreError::invalid_key(key, "object names must be 1-1024 bytes"));
    }
    if key.contains('\r') || key.contains('\n') {
        return Err(CredstoreError::invalid_key(key, "object names cannot contain newlines"));
    }
    if key == "." || key == ".." {
        return Err(CredstoreError::invalid_key(key, "reserved object name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn test_parse_gs_uri() {
        assert_eq!(
            parse_gs_uri("gs://buttercup/tokens/luke.json").unwrap(),
            ("buttercup", "tokens/luke.json")
        );
        assert!(parse_gs_uri("gs://buttercup").is_err());
        assert!(parse_gs_uri("gs:///object").is_err());
        assert!(parse_gs_uri("/tmp/token.json").is_err());
    }

    #[test]
    fn test_object_names_use_prefix() {
        let store = CloudStorage::for_bucket(
            "https://storage.googleapis.com",
            "buttercup",
            "tokens/",
            Arc::new(StaticToken::new("t")),
        );
        let name = store.object_name("abc");
        assert_eq!(name, "tokens/abc");
        assert_eq!(
            store.object_url("buttercup", &name).unwrap().as_str(),
            "https://storage.googleapis.com/storage/v1/b/buttercup/o/tokens%2Fabc"
        );
    }

    #[test]
    fn test_validate_object_key() {
        assert!(validate_object_key("dXNlckBleGFtcGxlLmNvbQ").is_ok());
        assert!(validate_object_key("a\nb").is_err());
        assert!(validate_object_key("").is_err());
    }
}
