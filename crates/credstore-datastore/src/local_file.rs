//! Development-only datastore: one JSON file per key on local disk.
//! Nothing here is encrypted or access controlled.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use credstore_core::error::{CredstoreError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, warn};

use crate::{BackendKind, Datastore};

pub struct LocalFile {
    root_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
}

impl LocalFile {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn path_for_key(&self, key: &str) -> Result<PathBuf> {
        validate_file_key(key)?;
        Ok(self.root_dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl Datastore for LocalFile {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get_document(&self, key: &str) -> Result<String> {
        let path = self.path_for_key(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredstoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(CredstoreError::Io(format!("read {}: {e}", path.display()))),
        };

        let record: Record = serde_json::from_slice(&bytes)
            .map_err(|e| CredstoreError::Json(format!("decode {}: {e}", path.display())))?;
        if record.key != key {
            return Err(CredstoreError::Backend(format!(
                "record key mismatch in {}",
                path.display()
            )));
        }
        Ok(record.value)
    }

    async fn update_document(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for_key(key)?;
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| CredstoreError::Io(format!("create {}: {e}", self.root_dir.display())))?;

        let record = Record {
            key: key.to_string(),
            value: value.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| CredstoreError::Json(format!("encode record: {e}")))?;
        write_atomic(&path, &bytes).await?;
        debug!(path = %path.display(), "wrote document");
        Ok(())
    }

    async fn delete_document(&self, key: &str) -> Result<()> {
        let path = self.path_for_key(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CredstoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(CredstoreError::Io(format!("remove {}: {e}", path.display()))),
        }
    }

    async fn list_documents(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CredstoreError::Io(format!(
                    "list {}: {e}",
                    self.root_dir.display()
                )))
            }
        };

        let mut keys = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(CredstoreError::Io(format!("list entry: {e}"))),
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => keys.push(stem.to_string()),
                None => warn!(path = %path.display(), "skipping non utf-8 file name"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Keys become file names, so nothing that could leave `root_dir`.
fn validate_file_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CredstoreError::invalid_key(key, "empty key"));
    }
    if key == "." || key == ".." {
        return Err(CredstoreError::invalid_key(key, "reserved file name"));
    }
    if key.contains(['/', '\\', '\0']) {
        return Err(CredstoreError::invalid_key(
            key,
            "path separators are not allowed in file keys",
        ));
    }
    Ok(())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut f = options
            .open(&tmp)
            .await
            .map_err(|e| CredstoreError::Io(format!("create {}: {e}", tmp.display())))?;

        // mode() only applies on creation; a leftover tmp file keeps its own
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            f.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| CredstoreError::Io(format!("chmod {}: {e}", tmp.display())))?;
        }

        f.write_all(bytes)
            .await
            .map_err(|e| CredstoreError::Io(format!("write {}: {e}", tmp.display())))?;
        f.flush()
            .await
            .map_err(|e| CredstoreError::Io(format!("flush {}: {e}", tmp.display())))?;
    }
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| CredstoreError::Io(format!("rename {}: {e}", tmp.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use credstore_core::key::encode_key;

    fn store() -> (tempfile::TempDir, LocalFile) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFile::new(dir.path().join("datastore"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_round_trip_encoded_email() {
        let (_dir, store) = store();
        let key = encode_key("user@example.com").unwrap();

        store.update_document(&key, r#"{"a":1}"#).await.unwrap();
        assert_eq!(store.get_document(&key).await.unwrap(), r#"{"a":1}"#);
        assert_eq!(store.list_documents().await.unwrap(), vec![key.clone()]);

        store.delete_document(&key).await.unwrap();
        assert!(matches!(
            store.get_document(&key).await,
            Err(CredstoreError::NotFound(_))
        ));
        assert!(store.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_value() {
        let (_dir, store) = store();
        store.update_document("k", "first").await.unwrap();
        store.update_document("k", "second").await.unwrap();
        assert_eq!(store.get_document("k").await.unwrap(), "second");
        assert_eq!(store.list_documents().await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_documents() {
        let (_dir, store) = store();
        // directory not created yet
        assert!(store.list_documents().await.unwrap().is_empty());
        assert!(matches!(
            store.get_document("nope").await,
            Err(CredstoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_document("nope").await,
            Err(CredstoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_ignores_other_files() {
        let (_dir, store) = store();
        store.update_document("b", "2").await.unwrap();
        store.update_document("a", "1").await.unwrap();
        std::fs::write(store.root_dir().join("notes.txt"), "hi").unwrap();
        assert_eq!(store.list_documents().await.unwrap(), vec!["a", "b"]);

        let all = store.get_all_documents().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "a");
        assert_eq!(all[0].value, "1");
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, store) = store();
        for key in ["../escape", "a/b", "..", "", "a\\b"] {
            assert!(
                matches!(
                    store.update_document(key, "x").await,
                    Err(CredstoreError::InvalidKey { .. })
                ),
                "{key:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_renamed_file_detected() {
        let (_dir, store) = store();
        store.update_document("a", "1").await.unwrap();
        std::fs::rename(
            store.root_dir().join("a.json"),
            store.root_dir().join("b.json"),
        )
        .unwrap();
        assert!(matches!(
            store.get_document("b").await,
            Err(CredstoreError::Backend(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_leftover_tmp_file_tightened() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = store();
        std::fs::create_dir_all(store.root_dir()).unwrap();
        let tmp = store.root_dir().join("a.json.tmp");
        std::fs::write(&tmp, "stale").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.update_document("a", "1").await.unwrap();

        let mode = std::fs::metadata(store.root_dir().join("a.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!tmp.exists());
        assert_eq!(store.get_document("a").await.unwrap(), "1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, store) = store();
        store.update_document("a", "1").await.unwrap();
        let mode = std::fs::metadata(store.root_dir().join("a.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
