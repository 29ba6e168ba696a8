//! Normalizes provider response bodies into one `ArtifactSource`.

use serde_json::Value;

use crate::finalize::ArtifactSource;

/// First media item found in a provider response, if any.
///
/// Understands Gemini `generateContent` parts, Imagen predictions, Veo
/// operation responses and fal queue results. Anything else falls back to
/// a scan for media-looking URLs.
pub fn extract_media(body: &Value) -> Option<ArtifactSource> {
    if let Some(response) = body.get("response").filter(|value| value.is_object()) {
        if let Some(found) = extract_media(response) {
            return Some(found);
        }
    }
    gemini_inline(body)
        .or_else(|| imagen_prediction(body))
        .or_else(|| veo_sample(body))
        .or_else(|| fal_media(body))
        .or_else(|| first_media_url(body))
}

/// Provider-reported failure on a completed job or a text-only reply.
pub fn extract_error(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    match error {
        Value::Null => None,
        Value::String(text) => Some(text.clone()).filter(|text| !text.trim().is_empty()),
        Value::Object(map) => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            match map.get("code") {
                Some(code) => Some(format!("{message} (code {code})")),
                None => Some(message),
            }
        }
        other => Some(other.to_string()),
    }
}

/// Text parts of a Gemini reply, used to explain why no image came back.
pub fn extract_text(body: &Value) -> Option<String> {
    let mut out = Vec::new();
    for candidate in body
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        for part in candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
        }
        if out.is_empty() {
            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                out.push(format!("finish reason {reason}"));
            }
        }
    }
    if out.is_empty() {
        if let Some(reason) = body
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            out.push(format!("prompt blocked: {reason}"));
        }
    }
    if out.is_empty() {
        return None;
    }
    Some(out.join(" "))
}

fn gemini_inline(body: &Value) -> Option<ArtifactSource> {
    for candidate in body.get("candidates").and_then(Value::as_array)? {
        for part in candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            return Some(ArtifactSource::Encoded {
                data: data.to_string(),
                content_type: inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }
    None
}

fn imagen_prediction(body: &Value) -> Option<ArtifactSource> {
    body.get("predictions")
        .and_then(Value::as_array)?
        .iter()
        .find_map(encoded_sample)
}

fn encoded_sample(item: &Value) -> Option<ArtifactSource> {
    let data = item
        .get("bytesBase64Encoded")
        .or_else(|| item.get("imageBytes"))
        .and_then(Value::as_str)
        .filter(|data| !data.is_empty())?;
    Some(ArtifactSource::Encoded {
        data: data.to_string(),
        content_type: item
            .get("mimeType")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn veo_sample(body: &Value) -> Option<ArtifactSource> {
    if let Some(samples) = body
        .pointer("/generateVideoResponse/generatedSamples")
        .or_else(|| body.get("generatedSamples"))
        .and_then(Value::as_array)
    {
        for sample in samples {
            let Some(video) = sample.get("video") else {
                continue;
            };
            if let Some(found) = encoded_sample(video) {
                return Some(found);
            }
            if let Some(uri) = video.get("uri").and_then(Value::as_str) {
                return Some(ArtifactSource::Url {
                    url: uri.to_string(),
                    content_type: video
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
    }
    for video in body.get("videos").and_then(Value::as_array)? {
        if let Some(found) = encoded_sample(video) {
            return Some(found);
        }
        if let Some(uri) = video.get("gcsUri").and_then(Value::as_str) {
            return Some(ArtifactSource::Url {
                url: uri.to_string(),
                content_type: video
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }
    None
}

fn fal_media(body: &Value) -> Option<ArtifactSource> {
    for key in ["video", "audio_file", "audio", "image"] {
        if let Some(found) = body.get(key).and_then(file_object) {
            return Some(found);
        }
    }
    body.get("images")
        .and_then(Value::as_array)?
        .iter()
        .find_map(file_object)
}

fn file_object(value: &Value) -> Option<ArtifactSource> {
    match value {
        Value::String(url) if is_http(url) => Some(ArtifactSource::Url {
            url: url.trim().to_string(),
            content_type: None,
        }),
        Value::Object(map) => {
            let url = map.get("url").and_then(Value::as_str).filter(|url| is_http(url))?;
            Some(ArtifactSource::Url {
                url: url.trim().to_string(),
                content_type: map
                    .get("content_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        }
        _ => None,
    }
}

fn first_media_url(value: &Value) -> Option<ArtifactSource> {
    match value {
        Value::String(url) => {
            let mime = atelier_contracts::request::mime_for_url(url)?;
            is_http(url).then(|| ArtifactSource::Url {
                url: url.trim().to_string(),
                content_type: Some(mime.to_string()),
            })
        }
        Value::Array(rows) => rows.iter().find_map(first_media_url),
        Value::Object(map) => {
            if let Some(found) = map.get("url").and_then(first_media_url) {
                return Some(found);
            }
            ["output", "outputs", "result", "data"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(first_media_url)
        }
        _ => None,
    }
}

fn is_http(url: &str) -> bool {
    let trimmed = url.trim();
    trimmed.starts_with("https://") || trimmed.starts_with("http://")
}
