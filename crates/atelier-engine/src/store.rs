//! Durable object storage behind one capability trait: bytes + path +
//! content type in, public URL out.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::transport::{HttpRequest, HttpTransport, TransportError};
use crate::util::truncate_text;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no artifact store configured")]
    NotConfigured,
    #[error("refusing to store outside the bucket: {0}")]
    InvalidPath(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub trait ArtifactStore: Send + Sync {
    fn name(&self) -> &str;

    /// Writes `bytes` at `path` and returns a publicly resolvable URL.
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String, StorageError>;
}

fn check_relative(path: &str) -> Result<(), StorageError> {
    let candidate = Path::new(path);
    let clean = !path.is_empty()
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if clean {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

/// Directory-backed store, served by something else at `public_base_url`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim().trim_end_matches('/').to_string(),
        }
    }
}

impl ArtifactStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<String, StorageError> {
        check_relative(path)?;
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&target, bytes).map_err(|source| StorageError::Io {
            path: target.clone(),
            source,
        })?;
        Ok(format!("{}/{}", self.public_base_url, path))
    }
}

/// Bucket-style HTTP object store (`POST {base}/object/{bucket}/{path}`).
pub struct HttpObjectStore {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    bucket: String,
    token: SecretString,
    public_base_url: String,
}

impl HttpObjectStore {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        bucket: &str,
        token: SecretString,
        public_base_url: Option<&str>,
    ) -> Self {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let bucket = bucket.trim().trim_matches('/').to_string();
        let public_base_url = public_base_url
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("{base_url}/object/public/{bucket}"));
        Self {
            transport,
            base_url,
            bucket,
            token,
            public_base_url,
        }
    }
}

impl ArtifactStore for HttpObjectStore {
    fn name(&self) -> &str {
        "http"
    }

    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String, StorageError> {
        check_relative(path)?;
        let url = format!("{}/object/{}/{}", self.base_url, self.bucket, path);
        let request = HttpRequest::post_bytes(url, bytes.to_vec(), content_type)
            .header(
                "Authorization",
                format!("Bearer {}", self.token.expose_secret()),
            )
            .header("x-upsert", "false");
        let reply = self.transport.send(&request)?;
        if !reply.is_success() {
            return Err(StorageError::Rejected {
                status: reply.status,
                body: truncate_text(&reply.body_text(), 512),
            });
        }
        Ok(format!("{}/{}", self.public_base_url, path))
    }
}

/// Store used when nothing is configured; every write fails so the finalizer
/// degrades to inline references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl ArtifactStore for NullStore {
    fn name(&self) -> &str {
        "none"
    }

    fn put(&self, _path: &str, _bytes: &[u8], _content_type: &str) -> Result<String, StorageError> {
        Err(StorageError::NotConfigured)
    }
}
