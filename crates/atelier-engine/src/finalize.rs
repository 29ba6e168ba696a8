//! Result Finalizer: turns whatever the provider handed back into bytes,
//! persists them under the owner's scope and returns a stable reference.
//!
//! Storage is best-effort. When the store fails the caller still gets the
//! artifact back as `StoredArtifactRef::Inline`, and the failure is logged
//! and recorded as a `storage_degraded` event.

use std::sync::Arc;

use atelier_contracts::events::{EventKind, EventLog, EventPayload};
use atelier_contracts::request::{mime_for_url, owner_scope, MediaClass};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::store::ArtifactStore;
use crate::transport::{HttpRequest, HttpTransport};
use crate::util::{short_hash, timestamp_millis, truncate_text};

/// Media as returned by a provider, before it has been turned into bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    Bytes {
        data: Vec<u8>,
        content_type: Option<String>,
    },
    /// Base64 payload (a bare string or a `data:` URI).
    Encoded {
        data: String,
        content_type: Option<String>,
    },
    Url {
        url: String,
        content_type: Option<String>,
    },
}

/// Finished binary result, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// What the caller gets back. `Hosted` is durable; `Inline` means storage
/// failed and the artifact travels as a self-contained data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum StoredArtifactRef {
    Hosted {
        url: String,
        path: String,
        content_type: String,
        size: usize,
    },
    Inline {
        data_uri: String,
        content_type: String,
        size: usize,
        reason: String,
    },
}

impl StoredArtifactRef {
    /// URL or data URI, whichever this reference carries.
    pub fn reference(&self) -> &str {
        match self {
            StoredArtifactRef::Hosted { url, .. } => url,
            StoredArtifactRef::Inline { data_uri, .. } => data_uri,
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, StoredArtifactRef::Hosted { .. })
    }

    pub fn content_type(&self) -> &str {
        match self {
            StoredArtifactRef::Hosted { content_type, .. }
            | StoredArtifactRef::Inline { content_type, .. } => content_type,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            StoredArtifactRef::Hosted { size, .. } | StoredArtifactRef::Inline { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalizeError {
    #[error("failed to fetch artifact from {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("artifact fetch from {url} returned {status}: {body}")]
    FetchStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("artifact base64 decode failed: {0}")]
    Decode(String),
    #[error("provider returned an empty artifact")]
    Empty,
}

pub struct Finalizer {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn ArtifactStore>,
    events: EventLog,
}

impl Finalizer {
    pub fn new(transport: Arc<dyn HttpTransport>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            transport,
            store,
            events: EventLog::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Decodes or downloads `source` into bytes with a best-known content
    /// type. Remote URLs are fetched without credentials.
    pub fn resolve(&self, source: ArtifactSource, class: MediaClass) -> Result<Artifact, FinalizeError> {
        let (bytes, declared) = match source {
            ArtifactSource::Bytes { data, content_type } => (data, content_type),
            ArtifactSource::Encoded { data, content_type } => {
                let (payload, uri_mime) = split_data_uri(&data);
                let bytes = BASE64
                    .decode(payload.trim().as_bytes())
                    .map_err(|err| FinalizeError::Decode(err.to_string()))?;
                (bytes, content_type.or(uri_mime))
            }
            ArtifactSource::Url { url, content_type } => {
                let reply = self
                    .transport
                    .send(&HttpRequest::get(url.as_str()))
                    .map_err(|err| FinalizeError::Fetch {
                        url: url.clone(),
                        message: err.message,
                    })?;
                if !reply.is_success() {
                    return Err(FinalizeError::FetchStatus {
                        url,
                        status: reply.status,
                        body: truncate_text(&reply.body_text(), 512),
                    });
                }
                let declared = content_type
                    .or_else(|| reply.content_type.clone().filter(|_| reply.is_binary_media()))
                    .or_else(|| mime_for_url(&url).map(str::to_string));
                (reply.body, declared)
            }
        };
        if bytes.is_empty() {
            return Err(FinalizeError::Empty);
        }
        let content_type = sniff_content_type(&bytes)
            .map(str::to_string)
            .or(declared.map(|value| strip_mime_params(&value)))
            .unwrap_or_else(|| class.default_mime().to_string());
        Ok(Artifact {
            bytes,
            content_type,
        })
    }

    pub fn finalize(
        &self,
        source: ArtifactSource,
        owner: Option<&str>,
        class: MediaClass,
    ) -> Result<StoredArtifactRef, FinalizeError> {
        let artifact = self.resolve(source, class)?;
        Ok(self.persist(artifact, owner, class))
    }

    /// Never fails: a store error degrades to an inline reference.
    pub fn persist(&self, artifact: Artifact, owner: Option<&str>, class: MediaClass) -> StoredArtifactRef {
        let path = storage_path(owner, class, &artifact);
        let size = artifact.bytes.len();
        match self.store.put(&path, &artifact.bytes, &artifact.content_type) {
            Ok(url) => {
                info!(store = self.store.name(), path = %path, size, "artifact stored");
                self.emit(EventKind::ArtifactStored, &path, &artifact.content_type, size, None);
                StoredArtifactRef::Hosted {
                    url,
                    path,
                    content_type: artifact.content_type,
                    size,
                }
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(store = self.store.name(), path = %path, error = %reason, "artifact storage failed; returning inline artifact");
                self.emit(
                    EventKind::StorageDegraded,
                    &path,
                    &artifact.content_type,
                    size,
                    Some(&reason),
                );
                StoredArtifactRef::Inline {
                    data_uri: format!(
                        "data:{};base64,{}",
                        artifact.content_type,
                        BASE64.encode(&artifact.bytes)
                    ),
                    content_type: artifact.content_type,
                    size,
                    reason,
                }
            }
        }
    }

    fn emit(&self, kind: EventKind, path: &str, content_type: &str, size: usize, reason: Option<&str>) {
        let mut payload = EventPayload::new();
        payload.insert("path".to_string(), Value::String(path.to_string()));
        payload.insert(
            "content_type".to_string(),
            Value::String(content_type.to_string()),
        );
        payload.insert("size".to_string(), Value::from(size));
        if let Some(reason) = reason {
            payload.insert("reason".to_string(), Value::String(reason.to_string()));
        }
        if let Err(err) = self.events.emit(kind, payload) {
            warn!(error = %err, "failed to write job event");
        }
    }
}

/// `{owner}/{images|videos|audio}/{millis}-{hash}.{ext}`
pub fn storage_path(owner: Option<&str>, class: MediaClass, artifact: &Artifact) -> String {
    format!(
        "{}/{}/{}-{}.{}",
        owner_scope(owner),
        class.storage_segment(),
        timestamp_millis(),
        short_hash(&artifact.bytes),
        extension_for(&artifact.content_type, class)
    )
}

fn split_data_uri(raw: &str) -> (&str, Option<String>) {
    let Some(rest) = raw.trim().strip_prefix("data:") else {
        return (raw, None);
    };
    match rest.split_once(',') {
        Some((header, data)) => {
            let mime = header
                .split(';')
                .next()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            (data, mime)
        }
        None => (raw, None),
    }
}

fn strip_mime_params(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_ascii_lowercase()
}

/// Magic-byte sniffing for the formats providers actually return.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF8") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" {
        match &bytes[8..12] {
            b"WEBP" => return Some("image/webp"),
            b"WAVE" => return Some("audio/wav"),
            _ => {}
        }
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        if &bytes[8..10] == b"qt" {
            return Some("video/quicktime");
        }
        return Some("video/mp4");
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    if bytes.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if bytes.starts_with(b"ID3") || bytes.starts_with(&[0xFF, 0xFB]) || bytes.starts_with(&[0xFF, 0xF3]) {
        return Some("audio/mpeg");
    }
    None
}

fn extension_for(content_type: &str, class: MediaClass) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        _ => match class {
            MediaClass::Image => "png",
            MediaClass::Video => "mp4",
            MediaClass::Audio => "mp3",
        },
    }
}
