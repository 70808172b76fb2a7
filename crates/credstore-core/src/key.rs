//! Key encoding for identifiers such as email addresses.
//!
//! Secret Manager only accepts `[A-Za-z0-9_-]` in secret ids, Firestore
//! forbids `/` in document ids and object names treat `/` as a directory
//! separator. Base64 with the URL-safe alphabet and no padding satisfies all
//! of them, and also hides which credential belongs to which user at a
//! glance. The encoded form is the permanent lookup key, so it is never
//! decoded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::{CredstoreError, Result};

pub fn encode_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(CredstoreError::invalid_key(key, "cannot encode an empty key"));
    }
    Ok(URL_SAFE_NO_PAD.encode(key.as_bytes()))
}
