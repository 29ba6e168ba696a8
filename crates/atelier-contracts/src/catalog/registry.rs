use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::request::GenerationKind;

/// How a target returns its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Artifact comes back in the HTTP response.
    Sync,
    /// Response carries an operation name polled directly by URL.
    Operation,
    /// Response carries a credential-scoped queue request id.
    Queue,
}

impl DispatchMode {
    pub fn is_async(self) -> bool {
        !matches!(self, DispatchMode::Sync)
    }
}

/// Provider payload layout the compiler produces for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    GeminiContent,
    ImagenPredict,
    VeoPredict,
    FalInput,
    Dryrun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Wall time the policy may spend sleeping before it reports a timeout.
    pub fn budget(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::new(Duration::from_secs(5), 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub family: String,
    pub model: String,
    pub kinds: Vec<GenerationKind>,
    pub accepts_custom: bool,
    pub mode: DispatchMode,
    pub shape: PayloadShape,
    /// Append the kind label to the model route (`{model}/{kind}`).
    pub kind_routes: bool,
    pub poll: PollPolicy,
}

impl TargetSpec {
    pub fn supports(&self, kind: &GenerationKind) -> bool {
        if kind.is_custom() {
            return self.accepts_custom;
        }
        self.kinds.iter().any(|item| item == kind)
    }

    pub fn route(&self, kind: &GenerationKind) -> String {
        if self.kind_routes && !kind.is_custom() {
            return format!("{}/{}", self.model, kind.label());
        }
        self.model.clone()
    }
}

#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: IndexMap<String, TargetSpec>,
}

impl TargetRegistry {
    pub fn new(targets: Option<IndexMap<String, TargetSpec>>) -> Self {
        Self {
            targets: targets.unwrap_or_else(default_targets),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &TargetSpec> {
        self.targets.values()
    }

    pub fn by_kind(&self, kind: &GenerationKind) -> Vec<TargetSpec> {
        self.targets
            .values()
            .filter(|target| target.supports(kind))
            .cloned()
            .collect()
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_targets() -> IndexMap<String, TargetSpec> {
    use GenerationKind::*;

    let mut map = IndexMap::new();
    let image_kinds = [
        TextToImage,
        ImageEdit,
        Inpaint,
        Outpaint,
        StyleTransfer,
        Upscale,
    ];
    let video_poll = PollPolicy::new(Duration::from_secs(10), 60);
    let queue_poll = PollPolicy::new(Duration::from_secs(5), 120);

    let mut insert = |name: &str,
                      family: &str,
                      model: &str,
                      kinds: &[GenerationKind],
                      accepts_custom: bool,
                      mode: DispatchMode,
                      shape: PayloadShape,
                      kind_routes: bool,
                      poll: PollPolicy| {
        map.insert(
            name.to_string(),
            TargetSpec {
                name: name.to_string(),
                family: family.to_string(),
                model: model.to_string(),
                kinds: kinds.to_vec(),
                accepts_custom,
                mode,
                shape,
                kind_routes,
                poll,
            },
        );
    };

    insert(
        "gemini-2.5-flash-image",
        "gemini",
        "gemini-2.5-flash-image",
        &image_kinds,
        true,
        DispatchMode::Sync,
        PayloadShape::GeminiContent,
        false,
        PollPolicy::default(),
    );
    insert(
        "imagen-4",
        "gemini",
        "imagen-4.0-generate-001",
        &[TextToImage],
        false,
        DispatchMode::Sync,
        PayloadShape::ImagenPredict,
        false,
        PollPolicy::default(),
    );
    insert(
        "veo-3",
        "gemini",
        "veo-3.0-generate-001",
        &[TextToVideo, ImageToVideo],
        false,
        DispatchMode::Operation,
        PayloadShape::VeoPredict,
        false,
        video_poll,
    );
    insert(
        "fal-ai/kling-video",
        "fal",
        "fal-ai/kling-video/v2.1/standard",
        &[TextToVideo, ImageToVideo],
        false,
        DispatchMode::Queue,
        PayloadShape::FalInput,
        true,
        queue_poll,
    );
    insert(
        "fal-ai/sync-lipsync",
        "fal",
        "fal-ai/sync-lipsync",
        &[LipSync],
        false,
        DispatchMode::Queue,
        PayloadShape::FalInput,
        false,
        queue_poll,
    );
    insert(
        "fal-ai/stable-audio",
        "fal",
        "fal-ai/stable-audio",
        &[Sound],
        false,
        DispatchMode::Queue,
        PayloadShape::FalInput,
        false,
        PollPolicy::new(Duration::from_secs(3), 60),
    );
    insert(
        "dryrun-image",
        "dryrun",
        "dryrun-image",
        &image_kinds,
        true,
        DispatchMode::Sync,
        PayloadShape::Dryrun,
        false,
        PollPolicy::default(),
    );

    map
}
