use clap::{ArgGroup, Parser};
use credstore_core::config::Config;
use credstore_datastore::BackendKind;

/// Upload one JSON credential file into a datastore backend.
#[derive(Parser, Debug)]
#[command(name = "key-upload", version)]
#[command(about = "Store a JSON credential document under a (optionally encoded) key", long_about = None)]
#[command(group(
    ArgGroup::new("backend")
        .required(true)
        .multiple(false)
        .args(["local", "firestore", "secret_manager", "cloud_storage"])
))]
pub struct Args {
    /// Google Cloud project (overrides config)
    #[arg(long)]
    pub project: Option<String>,

    /// Email stored in the document's `email` field (defaults to the key)
    #[arg(long)]
    pub email: Option<String>,

    /// Bucket for --cloud_storage (overrides config)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Source JSON: a local path or gs://bucket/object
    #[arg(long)]
    pub file: String,

    /// Key to store the document under
    #[arg(long)]
    pub key: String,

    /// Base64-encode the key before storing
    #[arg(long = "encode_key")]
    pub encode_key: bool,

    /// Write to local JSON files (development only)
    #[arg(long)]
    pub local: bool,

    #[arg(long)]
    pub firestore: bool,

    #[arg(long = "secret_manager")]
    pub secret_manager: bool,

    #[arg(long = "cloud_storage")]
    pub cloud_storage: bool,

    /// Configuration file
    #[arg(long, env = "CREDSTORE_CONFIG", default_value = "credstore.toml")]
    pub config: String,
}

impl Args {
    pub fn backend(&self) -> BackendKind {
        if self.firestore {
            BackendKind::Firestore
        } else if self.secret_manager {
            BackendKind::SecretManager
        } else if self.cloud_storage {
            BackendKind::CloudStorage
        } else {
            BackendKind::Local
        }
    }

    /// Flags win over the config file and environment.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(project) = self.project.as_ref().filter(|p| !p.is_empty()) {
            config.project = project.clone();
        }
        if let Some(bucket) = self.bucket.as_ref().filter(|b| !b.is_empty()) {
            config.cloud_storage.bucket = bucket.clone();
        }
    }
}
