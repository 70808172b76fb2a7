use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredstoreError {
    /// The requested document does not exist in the backing store.
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("http error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("request error: {0}")]
    Request(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("json error: {0}")]
    Json(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl CredstoreError {
    pub fn invalid_key(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// True for `NotFound`, and for a backend's raw 404 before an adapter
    /// has translated it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Http { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, CredstoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(CredstoreError::NotFound("abc".to_string()).is_not_found());
        assert!(CredstoreError::Http {
            status: 404,
            body: String::new()
        }
        .is_not_found());
        assert!(!CredstoreError::Http {
            status: 403,
            body: "denied".to_string()
        }
        .is_not_found());
    }

    #[test]
    fn test_display() {
        let e = CredstoreError::invalid_key("a/b", "contains '/'");
        assert_eq!(e.to_string(), "invalid key \"a/b\": contains '/'");
    }
}
