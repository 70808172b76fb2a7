use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use credstore_core::config::FirestoreConfig;
use credstore_core::error::{CredstoreError, Result};
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::json;

use crate::auth::TokenSource;
use crate::rest::{not_found_as, resource_id, GoogleApi};
use crate::{BackendKind, Datastore};

const PAGE_SIZE: &str = "300";

/// Cloud Firestore, one document per key in a single collection.
pub struct Firestore {
    api: GoogleApi,
    project: String,
    database: String,
    collection: String,
}

#[derive(Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    next_page_token: Option<String>,
}

impl Firestore {
    pub fn new(config: &FirestoreConfig, project: &str, auth: Arc<dyn TokenSource>) -> Self {
        Self {
            api: GoogleApi::new("firestore", &config.endpoint, auth),
            project: project.to_string(),
            database: config.database.clone(),
            collection: config.collection.clone(),
        }
    }

    fn collection_url(&self) -> Result<Url> {
        self.api.url(&[
            "v1",
            "projects",
            &self.project,
            "databases",
            &self.database,
            "documents",
            &self.collection,
        ])
    }

    fn document_url(&self, key: &str) -> Result<Url> {
        let mut url = self.collection_url()?;
        url.path_segments_mut()
            .map_err(|_| CredstoreError::Config("invalid firestore endpoint".to_string()))?
            .push(key);
        Ok(url)
    }
}

#[async_trait]
impl Datastore for Firestore {
    fn kind(&self) -> BackendKind {
        BackendKind::Firestore
    }

    async fn get_document(&self, key: &str) -> Result<String> {
        validate_document_id(key)?;
        let req = self.api.request(Method::GET, self.document_url(key)?);
        let doc: FirestoreDocument = self.api.send_json(req).await.map_err(not_found_as(key))?;

        doc.fields
            .get("value")
            .and_then(|v| v["stringValue"].as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                CredstoreError::Backend(format!("document {} has no string `value` field", doc.name))
            })
    }

    async fn update_document(&self, key: &str, value: &str) -> Result<()> {
        validate_document_id(key)?;
        // PATCH without an update mask replaces the whole document,
        // creating it when missing.
        let body = json!({ "fields": { "value": { "stringValue": value } } });
        let req = self
            .api
            .request(Method::PATCH, self.document_url(key)?)
            .json(&body);
        self.api.send(req).await?;
        Ok(())
    }

    async fn delete_document(&self, key: &str) -> Result<()> {
        validate_document_id(key)?;
        // Plain deletes succeed on missing documents; the precondition
        // turns that into a 404.
        let req = self
            .api
            .request(Method::DELETE, self.document_url(key)?)
            .query(&[("currentDocument.exists", "true")]);
        self.api.send(req).await.map_err(not_found_as(key))?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>> {
        let url = self.collection_url()?;
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .api
                .request(Method::GET, url.clone())
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }

            let page: ListDocumentsResponse = self.api.send_json(req).await?;
            keys.extend(page.documents.iter().map(|d| resource_id(&d.name).to_string()));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(keys)
    }
}

fn validate_document_id(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 1500 {
        return Err(CredstoreError::invalid_key(key, "document ids must be 1-1500 bytes"));
    }
    if key.contains('/') {
        return Err(CredstoreError::invalid_key(key, "document ids cannot contain '/'"));
    }
    if key == "." || key == ".." {
        return Err(CredstoreError::invalid_key(key, "reserved document id"));
    }
    if key.len() >= 4 && key.starts_with("__") && key.ends_with("__") {
        return Err(CredstoreError::invalid_key(key, "ids matching __.*__ are reserved"));
    }
    Ok(())
}
