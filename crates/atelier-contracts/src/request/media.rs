use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Reference media supplied with a request: inline base64 bytes or a
/// remote URL. Serialized as a single string (`data:` URI or URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaRef {
    Inline { mime: String, data: String },
    Url(String),
}

impl MediaRef {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if let Some((header, data)) = rest.split_once(',') {
                let mime = header
                    .trim_end_matches(";base64")
                    .split(';')
                    .next()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or("application/octet-stream");
                return MediaRef::Inline {
                    mime: mime.to_string(),
                    data: data.trim().to_string(),
                };
            }
        }
        MediaRef::Url(trimmed.to_string())
    }

    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        MediaRef::Inline {
            mime: mime.to_string(),
            data: BASE64.encode(bytes),
        }
    }

    pub fn mime(&self) -> Option<&str> {
        match self {
            MediaRef::Inline { mime, .. } => Some(mime.as_str()),
            MediaRef::Url(url) => mime_for_url(url),
        }
    }

    /// Value usable wherever a provider accepts "a URL": the remote URL
    /// itself, or a self-contained `data:` URI for inline media.
    pub fn as_uri(&self) -> String {
        match self {
            MediaRef::Inline { mime, data } => format!("data:{mime};base64,{data}"),
            MediaRef::Url(url) => url.clone(),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, MediaRef::Inline { .. })
    }
}

impl From<String> for MediaRef {
    fn from(value: String) -> Self {
        MediaRef::parse(&value)
    }
}

impl From<MediaRef> for String {
    fn from(value: MediaRef) -> Self {
        value.as_uri()
    }
}

pub fn mime_for_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "mov" => Some("video/quicktime"),
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "ogg" => Some("audio/ogg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{mime_for_url, MediaRef};

    #[test]
    fn parse_splits_data_uri() {
        let media = MediaRef::parse("data:image/png;base64,aGVsbG8=");
        assert_eq!(
            media,
            MediaRef::Inline {
                mime: "image/png".to_string(),
                data: "aGVsbG8=".to_string(),
            }
        );
        assert_eq!(media.as_uri(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn parse_keeps_remote_urls() {
        let media = MediaRef::parse(" https://cdn.example.com/a/clip.MP4?sig=1 ");
        assert_eq!(
            media,
            MediaRef::Url("https://cdn.example.com/a/clip.MP4?sig=1".to_string())
        );
        assert_eq!(media.mime(), Some("video/mp4"));
    }

    #[test]
    fn unknown_extension_has_no_mime() {
        assert_eq!(mime_for_url("https://example.com/blob"), None);
    }

    #[test]
    fn serializes_as_plain_string() -> anyhow::Result<()> {
        let media = MediaRef::from_bytes("audio/wav", b"RIFF");
        let encoded = serde_json::to_string(&media)?;
        assert_eq!(encoded, "\"data:audio/wav;base64,UklGRg==\"");
        let decoded: MediaRef = serde_json::from_str(&encoded)?;
        assert_eq!(decoded, media);
        Ok(())
    }
}
