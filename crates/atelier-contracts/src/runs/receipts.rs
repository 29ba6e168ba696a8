use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::request::GenerationRequest;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

const OMITTED: &str = "<omitted>";
const REDACTED: &str = "<redacted>";

/// Everything a receipt records about one finished generation.
#[derive(Debug, Clone)]
pub struct ReceiptRecord<'a> {
    pub request: &'a GenerationRequest,
    pub target: &'a str,
    pub instruction: &'a str,
    pub provider_request: &'a Value,
    pub attempts: &'a Value,
    pub handle: Option<&'a Value>,
    pub stored: &'a Value,
    pub warnings: &'a [String],
}

pub fn build_receipt(record: &ReceiptRecord<'_>) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&serde_json::to_value(record.request).unwrap_or(Value::Null)),
    );
    root.insert(
        "target".to_string(),
        Value::String(record.target.to_string()),
    );
    root.insert(
        "instruction".to_string(),
        Value::String(record.instruction.to_string()),
    );
    root.insert(
        "provider_request".to_string(),
        sanitize_payload(record.provider_request),
    );
    root.insert("attempts".to_string(), sanitize_payload(record.attempts));
    root.insert(
        "handle".to_string(),
        record.handle.cloned().unwrap_or(Value::Null),
    );
    root.insert("stored".to_string(), sanitize_payload(record.stored));
    root.insert(
        "warnings".to_string(),
        Value::Array(record.warnings.iter().cloned().map(Value::String).collect()),
    );
    root.insert(
        "ts".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
    );
    Value::Object(root)
}

pub fn receipt_path(dir: &Path, stamp_millis: i64) -> PathBuf {
    dir.join(format!("receipt-{stamp_millis}.json"))
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Strips media bytes and anything credential-shaped before a payload is
/// written to disk.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) => {
            if text.starts_with("data:") {
                Value::String(OMITTED.to_string())
            } else {
                value.clone()
            }
        }
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "data" | "b64_json" | "bytesbase64encoded" | "imagebytes" | "image_bytes"
                ) {
                    out.insert(key.clone(), Value::String(OMITTED.to_string()));
                    continue;
                }
                if matches!(
                    lowered.as_str(),
                    "key" | "api_key" | "authorization" | "token" | "secret"
                ) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        build_receipt, receipt_path, sanitize_payload, write_receipt, ReceiptRecord,
        RECEIPT_SCHEMA_VERSION,
    };
    use crate::request::{GenerationKind, GenerationRequest, MediaRef};

    #[test]
    fn sanitize_omits_media_and_redacts_secrets() {
        let cleaned = sanitize_payload(&json!({
            "contents": [{ "parts": [{ "inlineData": { "mimeType": "image/png", "data": "AAAA" } }] }],
            "image_url": "data:image/png;base64,AAAA",
            "Authorization": "Key abc",
            "prompt": "forest"
        }));
        assert_eq!(
            cleaned["contents"][0]["parts"][0]["inlineData"]["data"],
            json!("<omitted>")
        );
        assert_eq!(
            cleaned["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            json!("image/png")
        );
        assert_eq!(cleaned["image_url"], json!("<omitted>"));
        assert_eq!(cleaned["Authorization"], json!("<redacted>"));
        assert_eq!(cleaned["prompt"], json!("forest"));
    }

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = receipt_path(temp.path(), 1_700_000_000_000);

        let request = GenerationRequest::new(GenerationKind::Inpaint, "add a lantern")
            .with_base(MediaRef::from_bytes("image/png", b"png"))
            .with_owner("user-1");
        let provider_request = json!({ "endpoint": "models/x:generateContent" });
        let attempts = json!([{ "credential": "gemini#1", "status": 200 }]);
        let stored = json!({ "storage": "hosted", "url": "https://cdn.example.com/a.png" });
        let warnings = vec!["note".to_string()];

        let payload = build_receipt(&ReceiptRecord {
            request: &request,
            target: "gemini-2.5-flash-image",
            instruction: "Inpaint the masked region",
            provider_request: &provider_request,
            attempts: &attempts,
            handle: None,
            stored: &stored,
            warnings: &warnings,
        });
        write_receipt(&path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["prompt"], json!("add a lantern"));
        assert_eq!(parsed["request"]["inputs"]["base"][0], json!("<omitted>"));
        assert_eq!(parsed["target"], json!("gemini-2.5-flash-image"));
        assert_eq!(parsed["stored"]["url"], json!("https://cdn.example.com/a.png"));
        assert_eq!(parsed["handle"], Value::Null);
        assert!(path.ends_with("receipt-1700000000000.json"));
        Ok(())
    }
}
