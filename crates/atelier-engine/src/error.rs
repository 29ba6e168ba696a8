use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::finalize::FinalizeError;
use crate::jobs::{JobError, JobHandle};
use crate::orchestrator::JobTicket;

/// Everything an orchestration call can fail with. Storage failures are not
/// here: they degrade to `StoredArtifactRef::Inline`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("{0}")]
    NoTarget(String),
    #[error("target '{target}' needs the {family} provider family, which has no credentials configured")]
    FamilyUnavailable { target: String, family: String },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Job(#[from] JobError),
    /// The await budget ran out; `ticket` is what `check` needs to resume.
    #[error("{source}")]
    TimedOut {
        ticket: Box<JobTicket>,
        source: JobError,
    },
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error("{target} returned no media: {detail}")]
    NoMedia { target: String, detail: String },
    #[error("dryrun render failed: {0}")]
    Render(#[from] image::ImageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl OrchestrationError {
    /// Rate-limit failures get a "retry later" message rather than a
    /// permanent-failure one.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            OrchestrationError::Dispatch(err) => err.is_rate_limited(),
            OrchestrationError::Job(err) => err.is_rate_limited(),
            _ => false,
        }
    }

    /// The job may still finish provider-side.
    pub fn is_timed_out(&self) -> bool {
        match self {
            OrchestrationError::TimedOut { .. } => true,
            OrchestrationError::Job(err) => err.is_timed_out(),
            _ => false,
        }
    }

    pub fn retained_handle(&self) -> Option<&JobHandle> {
        match self {
            OrchestrationError::TimedOut { ticket, .. } => Some(&ticket.handle),
            OrchestrationError::Job(err) => err.handle(),
            _ => None,
        }
    }

    /// Complete ticket for a job that may still finish.
    pub fn ticket(&self) -> Option<&JobTicket> {
        match self {
            OrchestrationError::TimedOut { ticket, .. } => Some(ticket),
            _ => None,
        }
    }
}
