//! Request Compiler: `GenerationRequest` + `TargetSpec` → instruction text and
//! provider payload. Pure, no I/O, never fails.

use atelier_contracts::catalog::{DispatchMode, PayloadShape, TargetSpec};
use atelier_contracts::request::{
    parse_value_to_f64, parse_value_to_i64, value_as_text, CameraMotion, Direction,
    GenerationKind, GenerationRequest, MediaClass, MediaRef,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::util::push_unique_warning;

const GENERIC_TEMPLATE: &str = "High quality creative render with coherent composition and fine detail.";

const GEMINI_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];
const IMAGEN_RATIOS: &[&str] = &["1:1", "3:4", "4:3", "9:16", "16:9"];
const VIDEO_RATIOS: &[&str] = &["16:9", "9:16", "1:1"];
const VEO_RATIOS: &[&str] = &["16:9", "9:16"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPayload {
    pub target: String,
    pub family: String,
    pub kind: GenerationKind,
    pub mode: DispatchMode,
    pub shape: PayloadShape,
    /// Provider path relative to the pool endpoint.
    pub path: String,
    pub instruction: String,
    pub body: Value,
    pub ignored_params: Vec<String>,
    pub warnings: Vec<String>,
}

impl CompiledPayload {
    /// Provider fields the target needs that this payload lacks. Empty when
    /// the request carried every input its kind needs.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required: Vec<(&'static str, Option<&Value>)> = match self.shape {
            PayloadShape::GeminiContent => vec![
                ("contents", self.body.pointer("/contents/0/parts/0")),
                ("generationConfig", self.body.get("generationConfig")),
            ],
            PayloadShape::ImagenPredict => vec![
                ("instances", self.body.pointer("/instances/0/prompt")),
                ("parameters", self.body.get("parameters")),
            ],
            PayloadShape::VeoPredict => {
                let mut fields = vec![
                    ("instances", self.body.pointer("/instances/0/prompt")),
                    ("parameters", self.body.pointer("/parameters/durationSeconds")),
                ];
                if self.kind == GenerationKind::ImageToVideo {
                    fields.push(("image", self.body.pointer("/instances/0/image")));
                }
                fields
            }
            PayloadShape::FalInput => match self.kind {
                GenerationKind::LipSync => vec![
                    ("video_url", self.body.get("video_url")),
                    ("audio_url", self.body.get("audio_url")),
                ],
                GenerationKind::ImageToVideo => vec![
                    ("prompt", self.body.get("prompt")),
                    ("image_url", self.body.get("image_url")),
                    ("duration", self.body.get("duration")),
                ],
                GenerationKind::Sound => vec![
                    ("prompt", self.body.get("prompt")),
                    ("seconds_total", self.body.get("seconds_total")),
                ],
                _ => vec![
                    ("prompt", self.body.get("prompt")),
                    ("duration", self.body.get("duration")),
                ],
            },
            PayloadShape::Dryrun => vec![("prompt", self.body.get("prompt"))],
        };
        required
            .into_iter()
            .filter(|(_, value)| value.map(Value::is_null).unwrap_or(true))
            .map(|(name, _)| name)
            .collect()
    }

    /// Summary written into receipts (bodies are sanitized by the writer).
    pub fn provider_request(&self) -> Value {
        json!({
            "target": self.target,
            "path": self.path,
            "payload": self.body,
        })
    }
}

/// Typed view of the open `params` object. Keys are matched after
/// camelCase → snake_case normalization; anything else lands in `ignored`.
#[derive(Debug, Clone, Default)]
struct TuningParams {
    strength: Option<f64>,
    duration: Option<f64>,
    aspect_ratio: Option<String>,
    direction: Option<Direction>,
    expansion_amount: Option<f64>,
    camera_motion: Option<CameraMotion>,
    style: Option<String>,
    seed: Option<i64>,
    resolution: Option<String>,
    voice: Option<String>,
    ignored: Vec<String>,
}

impl TuningParams {
    fn read(params: &Map<String, Value>, warnings: &mut Vec<String>) -> Self {
        let mut out = TuningParams::default();
        for (raw_key, value) in params {
            match normalize_key(raw_key).as_str() {
                "strength" => {
                    // Accept both 0..1 and percentages.
                    out.strength = parse_value_to_f64(value).map(|raw| {
                        let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
                        scaled.clamp(0.0, 1.0)
                    });
                }
                "duration" | "duration_seconds" => out.duration = parse_value_to_f64(value),
                "aspect_ratio" | "ratio" => out.aspect_ratio = value_as_text(value),
                "direction" => {
                    let text = value_as_text(value).unwrap_or_default();
                    out.direction = Direction::parse(&text);
                    if out.direction.is_none() {
                        push_unique_warning(
                            warnings,
                            format!("Unknown direction '{text}'; extending on all sides."),
                        );
                    }
                }
                "expansion_amount" | "amount" => out.expansion_amount = parse_value_to_f64(value),
                "camera_motion" | "motion" => {
                    let text = value_as_text(value).unwrap_or_default();
                    out.camera_motion = CameraMotion::parse(&text);
                    if out.camera_motion.is_none() {
                        push_unique_warning(
                            warnings,
                            format!("Unknown camera motion '{text}' ignored."),
                        );
                    }
                }
                "style" => out.style = value_as_text(value),
                "seed" => out.seed = parse_value_to_i64(value),
                "resolution" | "scale" => out.resolution = value_as_text(value),
                "voice" => out.voice = value_as_text(value),
                _ => out.ignored.push(raw_key.clone()),
            }
        }
        out
    }

    fn expansion_percent(&self) -> u32 {
        self.expansion_amount.unwrap_or(50.0).clamp(10.0, 200.0).round() as u32
    }
}

fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for ch in raw.trim().chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn compile(request: &GenerationRequest, target: &TargetSpec) -> CompiledPayload {
    let mut warnings = Vec::new();
    let params = TuningParams::read(&request.params, &mut warnings);
    let instruction = render_instruction(request, &params, target.shape);

    let (path, body) = match target.shape {
        PayloadShape::GeminiContent => gemini_body(request, target, &params, &instruction, &mut warnings),
        PayloadShape::ImagenPredict => imagen_body(request, target, &params, &instruction, &mut warnings),
        PayloadShape::VeoPredict => veo_body(request, target, &params, &instruction, &mut warnings),
        PayloadShape::FalInput => fal_body(request, target, &params, &instruction, &mut warnings),
        PayloadShape::Dryrun => dryrun_body(request, target, &params, &instruction),
    };

    if !params.ignored.is_empty() {
        tracing::debug!(name = %target.name, ignored = ?params.ignored, "ignoring unknown tuning params");
    }

    CompiledPayload {
        target: target.name.clone(),
        family: target.family.clone(),
        kind: request.kind.clone(),
        mode: target.mode,
        shape: target.shape,
        path,
        instruction,
        body,
        ignored_params: params.ignored,
        warnings,
    }
}

fn render_instruction(
    request: &GenerationRequest,
    params: &TuningParams,
    shape: PayloadShape,
) -> String {
    let prompt = request.prompt.trim();
    let subject = if prompt.is_empty() {
        "the scene as it is"
    } else {
        prompt
    };
    let mut text = match &request.kind {
        GenerationKind::TextToImage => format!("{subject}. Crisp, well-lit, high quality image."),
        GenerationKind::ImageEdit => format!(
            "Edit the provided image: {subject}. Apply a {} change and keep everything not mentioned unchanged.",
            strength_word(params.strength)
        ),
        GenerationKind::Inpaint => format!(
            "Inpaint the masked region of the provided image: {subject}. Seamlessly blend with the surroundings and match the lighting, perspective and texture of the original."
        ),
        GenerationKind::Outpaint => {
            let direction = params.direction.unwrap_or(Direction::Around);
            format!(
                "Extend the provided image toward the {} by about {}% of its size: {subject}. Continue the existing scene with no visible seams, matching lighting and perspective.",
                direction.describe(),
                params.expansion_percent()
            )
        }
        GenerationKind::StyleTransfer => {
            let style = params.style.as_deref().unwrap_or(subject);
            format!(
                "Restyle the provided image in the style of {style}. Keep the original composition and subjects; apply the style with {} intensity.",
                strength_word(params.strength)
            )
        }
        GenerationKind::Upscale => format!(
            "Upscale the provided image to {} resolution, recovering fine detail without changing composition or colours. {subject}.",
            params.resolution.as_deref().unwrap_or("2x")
        ),
        GenerationKind::TextToVideo => format!("{subject}. Cinematic, smooth motion."),
        GenerationKind::ImageToVideo => {
            format!("Animate the provided image: {subject}. Keep the subject consistent with the source frame.")
        }
        GenerationKind::LipSync => format!(
            "Synchronize the speaker's lip movements with the provided audio track. {subject}."
        ),
        GenerationKind::Sound => {
            let mut line = format!("{subject}. Clean, well-mixed audio.");
            if let Some(voice) = params.voice.as_deref() {
                line.push_str(&format!(" Voice: {voice}."));
            }
            line
        }
        GenerationKind::Custom(_) => format!("{subject}. {GENERIC_TEMPLATE}"),
    };

    if let Some(style) = params.style.as_deref() {
        if !matches!(request.kind, GenerationKind::StyleTransfer) {
            text.push_str(&format!(" Style: {style}."));
        }
    }
    if let Some(motion) = params.camera_motion {
        if request.kind.media_class() == MediaClass::Video {
            text.push_str(&format!(" Camera: {}.", motion.describe()));
        }
    }
    // Gemini has no negative-prompt field, so it rides in the instruction.
    if shape == PayloadShape::GeminiContent {
        if let Some(negative) = request.negative_prompt() {
            text.push_str(&format!(" Avoid: {negative}."));
        }
    }
    text
}

fn strength_word(strength: Option<f64>) -> &'static str {
    match strength.unwrap_or(0.5) {
        value if value < 0.35 => "subtle",
        value if value < 0.7 => "moderate",
        _ => "strong",
    }
}

fn gemini_body(
    request: &GenerationRequest,
    target: &TargetSpec,
    params: &TuningParams,
    instruction: &str,
    warnings: &mut Vec<String>,
) -> (String, Value) {
    let mut parts = Vec::new();
    for media in &request.inputs.base {
        parts.push(gemini_media_part(media, "image/png"));
    }
    if let Some(mask) = request.inputs.mask.as_ref() {
        parts.push(json!({
            "text": "The next image is the edit mask: white marks the region to change, black must stay untouched."
        }));
        parts.push(gemini_media_part(mask, "image/png"));
    }
    parts.push(json!({ "text": instruction }));

    let mut generation_config = Map::new();
    generation_config.insert("responseModalities".to_string(), json!(["IMAGE", "TEXT"]));
    if let Some(ratio) = params
        .aspect_ratio
        .as_deref()
        .and_then(|raw| snap_ratio(raw, GEMINI_RATIOS, warnings))
    {
        generation_config.insert("imageConfig".to_string(), json!({ "aspectRatio": ratio }));
    }
    if let Some(seed) = params.seed {
        generation_config.insert("seed".to_string(), json!(seed));
    }

    (
        format!("models/{}:generateContent", target.route(&request.kind)),
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": Value::Object(generation_config),
        }),
    )
}

fn gemini_media_part(media: &MediaRef, fallback_mime: &str) -> Value {
    match media {
        MediaRef::Inline { mime, data } => json!({
            "inlineData": { "mimeType": mime, "data": data }
        }),
        MediaRef::Url(url) => json!({
            "fileData": {
                "mimeType": media.mime().unwrap_or(fallback_mime),
                "fileUri": url,
            }
        }),
    }
}

fn imagen_body(
    request: &GenerationRequest,
    target: &TargetSpec,
    params: &TuningParams,
    instruction: &str,
    warnings: &mut Vec<String>,
) -> (String, Value) {
    let mut parameters = Map::new();
    parameters.insert("sampleCount".to_string(), json!(1));
    if let Some(ratio) = params
        .aspect_ratio
        .as_deref()
        .and_then(|raw| snap_ratio(raw, IMAGEN_RATIOS, warnings))
    {
        parameters.insert("aspectRatio".to_string(), json!(ratio));
    }
    if let Some(negative) = request.negative_prompt() {
        parameters.insert("negativePrompt".to_string(), json!(negative));
    }
    if !request.inputs.is_empty() {
        push_unique_warning(
            warnings,
            format!("{} ignores reference media.", target.name),
        );
    }
    (
        format!("models/{}:predict", target.route(&request.kind)),
        json!({
            "instances": [{ "prompt": instruction }],
            "parameters": Value::Object(parameters),
        }),
    )
}

fn veo_body(
    request: &GenerationRequest,
    target: &TargetSpec,
    params: &TuningParams,
    instruction: &str,
    warnings: &mut Vec<String>,
) -> (String, Value) {
    let mut instance = Map::new();
    instance.insert("prompt".to_string(), json!(instruction));
    if let Some(media) = request.inputs.base.first() {
        let image = match media {
            MediaRef::Inline { mime, data } => json!({
                "bytesBase64Encoded": data,
                "mimeType": mime,
            }),
            MediaRef::Url(url) => json!({
                "gcsUri": url,
                "mimeType": media.mime().unwrap_or("image/png"),
            }),
        };
        instance.insert("image".to_string(), image);
    }

    let duration = params.duration.unwrap_or(8.0);
    let clamped = duration.clamp(4.0, 8.0).round() as u32;
    if (duration - f64::from(clamped)).abs() >= 0.5 {
        push_unique_warning(
            warnings,
            format!("{} supports 4-8 second clips; duration set to {clamped}s.", target.name),
        );
    }
    let mut parameters = Map::new();
    parameters.insert("durationSeconds".to_string(), json!(clamped));
    parameters.insert("sampleCount".to_string(), json!(1));
    parameters.insert(
        "aspectRatio".to_string(),
        json!(params
            .aspect_ratio
            .as_deref()
            .and_then(|raw| snap_ratio(raw, VEO_RATIOS, warnings))
            .unwrap_or("16:9")),
    );
    if let Some(negative) = request.negative_prompt() {
        parameters.insert("negativePrompt".to_string(), json!(negative));
    }
    if let Some(seed) = params.seed {
        parameters.insert("seed".to_string(), json!(seed));
    }

    (
        format!("models/{}:predictLongRunning", target.route(&request.kind)),
        json!({
            "instances": [Value::Object(instance)],
            "parameters": Value::Object(parameters),
        }),
    )
}

fn fal_body(
    request: &GenerationRequest,
    target: &TargetSpec,
    params: &TuningParams,
    instruction: &str,
    warnings: &mut Vec<String>,
) -> (String, Value) {
    let mut body = Map::new();
    match request.kind {
        GenerationKind::LipSync => {
            if let Some(video) = request.inputs.base.first() {
                body.insert("video_url".to_string(), json!(video.as_uri()));
            }
            if let Some(audio) = request.inputs.audio.as_ref() {
                body.insert("audio_url".to_string(), json!(audio.as_uri()));
            }
        }
        GenerationKind::Sound => {
            body.insert("prompt".to_string(), json!(instruction));
            let seconds = params.duration.unwrap_or(10.0).clamp(1.0, 47.0).round() as u32;
            body.insert("seconds_total".to_string(), json!(seconds));
        }
        _ => {
            body.insert("prompt".to_string(), json!(instruction));
            body.insert(
                "duration".to_string(),
                json!(snap_clip_seconds(params.duration)),
            );
            body.insert(
                "aspect_ratio".to_string(),
                json!(params
                    .aspect_ratio
                    .as_deref()
                    .and_then(|raw| snap_ratio(raw, VIDEO_RATIOS, warnings))
                    .unwrap_or("16:9")),
            );
            if let Some(image) = request.inputs.base.first() {
                body.insert("image_url".to_string(), json!(image.as_uri()));
            }
            if let Some(negative) = request.negative_prompt() {
                body.insert("negative_prompt".to_string(), json!(negative));
            }
        }
    }
    if let Some(seed) = params.seed {
        body.insert("seed".to_string(), json!(seed));
    }
    (target.route(&request.kind), Value::Object(body))
}

fn dryrun_body(
    request: &GenerationRequest,
    target: &TargetSpec,
    params: &TuningParams,
    instruction: &str,
) -> (String, Value) {
    (
        target.route(&request.kind),
        json!({
            "prompt": instruction,
            "kind": request.kind.label(),
            "seed": params.seed,
            "aspect_ratio": params.aspect_ratio,
        }),
    )
}

/// Clip services only render 5 s or 10 s clips.
fn snap_clip_seconds(duration: Option<f64>) -> &'static str {
    match duration {
        Some(value) if value >= 7.5 => "10",
        _ => "5",
    }
}

/// Snaps `"16:9"`, `"1024x768"`, `"portrait"` and friends onto the closest
/// ratio in `allowed`.
fn snap_ratio(raw: &str, allowed: &[&'static str], warnings: &mut Vec<String>) -> Option<&'static str> {
    let normalized = raw.trim().to_ascii_lowercase();
    let target_ratio = match normalized.as_str() {
        "" => return None,
        "portrait" | "tall" => 9.0 / 16.0,
        "landscape" | "wide" => 16.0 / 9.0,
        "square" => 1.0,
        _ => {
            let Some((left, right)) = normalized
                .split_once(':')
                .or_else(|| normalized.split_once('x'))
            else {
                push_unique_warning(warnings, format!("Unrecognized aspect ratio '{raw}' ignored."));
                return None;
            };
            let (Ok(left), Ok(right)) = (left.trim().parse::<f64>(), right.trim().parse::<f64>()) else {
                push_unique_warning(warnings, format!("Unrecognized aspect ratio '{raw}' ignored."));
                return None;
            };
            if left <= 0.0 || right <= 0.0 {
                return None;
            }
            left / right
        }
    };

    let nearest = allowed.iter().copied().min_by(|a, b| {
        let da = (ratio_value(a).ln() - target_ratio.ln()).abs();
        let db = (ratio_value(b).ln() - target_ratio.ln()).abs();
        da.total_cmp(&db)
    })?;
    if ratio_value(nearest) != target_ratio && normalized != nearest {
        push_unique_warning(
            warnings,
            format!("Aspect ratio '{raw}' snapped to {nearest}."),
        );
    }
    Some(nearest)
}

fn ratio_value(ratio: &str) -> f64 {
    ratio
        .split_once(':')
        .and_then(|(left, right)| Some(left.parse::<f64>().ok()? / right.parse::<f64>().ok()?))
        .unwrap_or(1.0)
}
