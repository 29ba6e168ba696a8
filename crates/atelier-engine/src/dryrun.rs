use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::compiler::CompiledPayload;

const BASE_EDGE: u32 = 512;

/// Local stand-in for an image provider: a solid-colour PNG whose colour is
/// derived from the compiled instruction and seed.
pub fn render(payload: &CompiledPayload) -> Result<Vec<u8>, image::ImageError> {
    let prompt = payload
        .body
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or(payload.instruction.as_str());
    let seed = payload.body.get("seed").and_then(Value::as_i64).unwrap_or_default();
    let (width, height) = dims_for_ratio(payload.body.get("aspect_ratio").and_then(Value::as_str));

    let (r, g, b) = color_from_prompt(prompt, seed as u64);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn dims_for_ratio(ratio: Option<&str>) -> (u32, u32) {
    let parsed = ratio.and_then(|raw| {
        let (left, right) = raw.trim().split_once(':')?;
        let left = left.trim().parse::<f64>().ok()?;
        let right = right.trim().parse::<f64>().ok()?;
        (left > 0.0 && right > 0.0).then_some(left / right)
    });
    match parsed {
        Some(value) if value >= 1.0 => (BASE_EDGE, snap_multiple((f64::from(BASE_EDGE) / value) as u32, 8)),
        Some(value) => (snap_multiple((f64::from(BASE_EDGE) * value) as u32, 8), BASE_EDGE),
        None => (BASE_EDGE, BASE_EDGE),
    }
}

fn snap_multiple(value: u32, multiple: u32) -> u32 {
    ((value / multiple).max(1)) * multiple
}
