use std::fmt;

use super::registry::{TargetRegistry, TargetSpec};
use crate::request::GenerationKind;

/// Why the selected target is not the one the caller named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// No target was named.
    Default,
    UnknownTarget(String),
    /// The named target exists but cannot serve this kind.
    KindNotSupported(String),
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Default => write!(f, "no target named; picked the first configured one"),
            Fallback::UnknownTarget(name) => write!(f, "unknown target '{name}'"),
            Fallback::KindNotSupported(name) => write!(f, "target '{name}' cannot serve this kind"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetSelection {
    pub target: TargetSpec,
    pub requested: Option<String>,
    pub fallback: Option<Fallback>,
    /// Targets that support the kind but were passed over as unusable.
    pub skipped: Vec<String>,
}

impl TargetSelection {
    pub fn fallback_reason(&self) -> Option<String> {
        self.fallback.as_ref().map(|fallback| match self.skipped.as_slice() {
            [] => fallback.to_string(),
            skipped => format!("{fallback} (skipped unconfigured: {})", skipped.join(", ")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no target supports kind '{kind}'")]
    Unsupported { kind: String },
    #[error("every target for kind '{kind}' needs an unconfigured provider family ({})", .skipped.join(", "))]
    Unconfigured { kind: String, skipped: Vec<String> },
}

#[derive(Debug, Clone, Default)]
pub struct TargetSelector {
    pub registry: TargetRegistry,
}

impl TargetSelector {
    pub fn new(registry: TargetRegistry) -> Self {
        Self { registry }
    }

    /// A named target that supports `kind` is returned even when `usable`
    /// rejects it, so the caller can say why it cannot run. Otherwise the
    /// first usable target for `kind` wins, in catalog order.
    pub fn select(
        &self,
        requested: Option<&str>,
        kind: &GenerationKind,
        usable: impl Fn(&TargetSpec) -> bool,
    ) -> Result<TargetSelection, SelectionError> {
        let fallback = match requested.map(|name| (name, self.registry.get(name))) {
            Some((_, Some(target))) if target.supports(kind) => {
                return Ok(TargetSelection {
                    target: target.clone(),
                    requested: requested.map(str::to_string),
                    fallback: None,
                    skipped: Vec::new(),
                });
            }
            Some((name, Some(_))) => Fallback::KindNotSupported(name.to_string()),
            Some((name, None)) => Fallback::UnknownTarget(name.to_string()),
            None => Fallback::Default,
        };

        let (usable_targets, skipped): (Vec<TargetSpec>, Vec<TargetSpec>) =
            self.registry.by_kind(kind).into_iter().partition(|target| usable(target));
        let skipped: Vec<String> = skipped.into_iter().map(|target| target.name).collect();
        match usable_targets.into_iter().next() {
            Some(target) => Ok(TargetSelection {
                target,
                requested: requested.map(str::to_string),
                fallback: Some(fallback),
                skipped,
            }),
            None if skipped.is_empty() => Err(SelectionError::Unsupported {
                kind: kind.to_string(),
            }),
            None => Err(SelectionError::Unconfigured {
                kind: kind.to_string(),
                skipped,
            }),
        }
    }
}
