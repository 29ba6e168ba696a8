mod kind;
mod media;
mod vocab;

pub use kind::{GenerationKind, MediaClass};
pub use media::{mime_for_url, MediaRef};
pub use vocab::{CameraMotion, Direction};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ANONYMOUS_OWNER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MediaInputs {
    #[serde(default)]
    pub base: Vec<MediaRef>,
    pub mask: Option<MediaRef>,
    pub audio: Option<MediaRef>,
}

impl MediaInputs {
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.mask.is_none() && self.audio.is_none()
    }
}

/// A structured creative request as entered by the user. Tuning parameters
/// are an open object; keys the compiler does not know are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    #[serde(default)]
    pub prompt: String,
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub inputs: MediaInputs,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub owner: Option<String>,
}

impl GenerationRequest {
    pub fn new(kind: GenerationKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            negative_prompt: None,
            inputs: MediaInputs::default(),
            params: Map::new(),
            owner: None,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_base(mut self, media: MediaRef) -> Self {
        self.inputs.base.push(media);
        self
    }

    pub fn with_mask(mut self, media: MediaRef) -> Self {
        self.inputs.mask = Some(media);
        self
    }

    pub fn with_audio(mut self, media: MediaRef) -> Self {
        self.inputs.audio = Some(media);
        self
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Storage namespace for this request's artifacts. Characters outside
    /// `[A-Za-z0-9_-]` are replaced so the owner can never escape its prefix.
    pub fn owner_scope(&self) -> String {
        owner_scope(self.owner.as_deref())
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.negative_prompt
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

pub fn owner_scope(owner: Option<&str>) -> String {
    let cleaned: String = owner
        .unwrap_or_default()
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        return ANONYMOUS_OWNER.to_string();
    }
    cleaned
}

/// Non-finite values ("NaN", "inf") read as absent.
pub fn parse_value_to_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().trim_end_matches(['s', '%']).parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|number| number.is_finite())
}

pub fn parse_value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|raw| raw.round() as i64)),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
