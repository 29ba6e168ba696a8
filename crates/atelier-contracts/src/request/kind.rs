use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Creative operation requested by the caller.
///
/// Parsing is total: labels outside the built-in vocabulary become
/// `Custom` and are rendered with the generic template downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GenerationKind {
    TextToImage,
    ImageEdit,
    Inpaint,
    Outpaint,
    StyleTransfer,
    Upscale,
    TextToVideo,
    ImageToVideo,
    LipSync,
    Sound,
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaClass {
    Image,
    Video,
    Audio,
}

impl MediaClass {
    pub fn storage_segment(self) -> &'static str {
        match self {
            MediaClass::Image => "images",
            MediaClass::Video => "videos",
            MediaClass::Audio => "audio",
        }
    }

    pub fn default_mime(self) -> &'static str {
        match self {
            MediaClass::Image => "image/png",
            MediaClass::Video => "video/mp4",
            MediaClass::Audio => "audio/mpeg",
        }
    }
}

impl GenerationKind {
    pub const BUILTIN: [GenerationKind; 10] = [
        GenerationKind::TextToImage,
        GenerationKind::ImageEdit,
        GenerationKind::Inpaint,
        GenerationKind::Outpaint,
        GenerationKind::StyleTransfer,
        GenerationKind::Upscale,
        GenerationKind::TextToVideo,
        GenerationKind::ImageToVideo,
        GenerationKind::LipSync,
        GenerationKind::Sound,
    ];

    pub fn parse(raw: &str) -> Self {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['_', ' '], "-");
        match normalized.as_str() {
            "text-to-image" | "txt2img" | "t2i" | "image" | "generate" => {
                GenerationKind::TextToImage
            }
            "image-edit" | "edit" => GenerationKind::ImageEdit,
            "inpaint" | "inpainting" => GenerationKind::Inpaint,
            "outpaint" | "outpainting" | "expand" => GenerationKind::Outpaint,
            "style-transfer" | "style" | "restyle" => GenerationKind::StyleTransfer,
            "upscale" | "super-resolution" => GenerationKind::Upscale,
            "text-to-video" | "t2v" | "video" => GenerationKind::TextToVideo,
            "image-to-video" | "i2v" | "animate" => GenerationKind::ImageToVideo,
            "lip-sync" | "lipsync" => GenerationKind::LipSync,
            "sound" | "audio" | "sfx" | "sound-effect" => GenerationKind::Sound,
            _ => GenerationKind::Custom(normalized),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            GenerationKind::TextToImage => "text-to-image",
            GenerationKind::ImageEdit => "image-edit",
            GenerationKind::Inpaint => "inpaint",
            GenerationKind::Outpaint => "outpaint",
            GenerationKind::StyleTransfer => "style-transfer",
            GenerationKind::Upscale => "upscale",
            GenerationKind::TextToVideo => "text-to-video",
            GenerationKind::ImageToVideo => "image-to-video",
            GenerationKind::LipSync => "lip-sync",
            GenerationKind::Sound => "sound",
            GenerationKind::Custom(label) => label.as_str(),
        }
    }

    pub fn media_class(&self) -> MediaClass {
        match self {
            GenerationKind::TextToVideo | GenerationKind::ImageToVideo | GenerationKind::LipSync => {
                MediaClass::Video
            }
            GenerationKind::Sound => MediaClass::Audio,
            _ => MediaClass::Image,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, GenerationKind::Custom(_))
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GenerationKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(GenerationKind::parse(s))
    }
}

impl Serialize for GenerationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for GenerationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(GenerationKind::parse(&raw))
    }
}
