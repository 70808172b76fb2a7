use std::sync::Arc;

use credstore_core::error::{CredstoreError, Result};
use reqwest::{Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::TokenSource;

/// Authorized JSON/REST access to one Google API.
pub struct GoogleApi {
    service: &'static str,
    endpoint: String,
    auth: Arc<dyn TokenSource>,
    http: reqwest::Client,
}

impl GoogleApi {
    pub fn new(service: &'static str, endpoint: &str, auth: Arc<dyn TokenSource>) -> Self {
        Self {
            service,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth,
            http: reqwest::Client::new(),
        }
    }

    /// Endpoint joined with `segments`, each percent-encoded as a single
    /// path segment (a `/` inside a segment becomes `%2F`).
    pub fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            CredstoreError::Config(format!("invalid {} endpoint {:?}: {e}", self.service, self.endpoint))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                CredstoreError::Config(format!("invalid {} endpoint {:?}", self.service, self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// Send with a bearer token. Any non-2xx status becomes
    /// `CredstoreError::Http` carrying the response body unchanged.
    pub async fn send(&self, req: RequestBuilder) -> Result<String> {
        let token = self.auth.access_token().await?;
        let request = req
            .bearer_auth(&token)
            .build()
            .map_err(|e| CredstoreError::Request(format!("{} request build failed: {e}", self.service)))?;

        debug!(
            service = self.service,
            method = %request.method(),
            path = request.url().path(),
            "api call"
        );

        let resp = self
            .http
            .execute(request)
            .await
            .map_err(|e| CredstoreError::Request(format!("{} request failed: {e}", self.service)))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            CredstoreError::Request(format!("{} response read failed: {e}", self.service))
        })?;

        if !status.is_success() {
            return Err(CredstoreError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    pub async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let text = self.send(req).await?;
        serde_json::from_str(&text)
            .map_err(|e| CredstoreError::Backend(format!("{} json parse failed: {e}", self.service)))
    }
}

/// Translate a backend 404 into `NotFound(key)`; other errors pass through.
pub fn not_found_as(key: &str) -> impl FnOnce(CredstoreError) -> CredstoreError + '_ {
    move |e| {
        if e.is_not_found() {
            CredstoreError::NotFound(key.to_string())
        } else {
            e
        }
    }
}

/// Last segment of a resource name: `projects/p/secrets/abc` → `abc`.
pub fn resource_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
