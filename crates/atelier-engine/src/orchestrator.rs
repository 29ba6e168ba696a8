//! compile → dispatch or submit/await → finalize, for one request at a time.
//!
//! The orchestrator holds no per-request state; concurrent calls share only
//! read-only pools, the transport and the store.

use std::path::PathBuf;
use std::sync::Arc;

use atelier_contracts::catalog::{
    DispatchMode, PayloadShape, PollPolicy, TargetRegistry, TargetSelection, TargetSelector,
    TargetSpec,
};
use atelier_contracts::events::{EventKind, EventLog, EventPayload};
use atelier_contracts::request::{GenerationRequest, MediaClass};
use atelier_contracts::runs::receipts::{build_receipt, receipt_path, write_receipt, ReceiptRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::compiler::{compile, CompiledPayload};
use crate::config::{Config, PollOverride, StorageConfig};
use crate::dispatch::Dispatcher;
use crate::dryrun;
use crate::error::OrchestrationError;
use crate::extract::{extract_error, extract_media, extract_text};
use crate::finalize::{ArtifactSource, Finalizer, StoredArtifactRef};
use crate::jobs::{is_transient, CancelToken, JobError, JobHandle, JobTracker, PollStatus};
use crate::pool::CredentialPool;
use crate::store::{ArtifactStore, HttpObjectStore, LocalStore, NullStore};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::util::truncate_text;

const DRYRUN_FAMILY: &str = "dryrun";

/// Selected target plus its compiled payload.
#[derive(Debug, Clone)]
pub struct Plan {
    pub selection: TargetSelection,
    pub payload: CompiledPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generation {
    pub target: String,
    pub artifact: StoredArtifactRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<JobHandle>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PathBuf>,
}

/// What a caller keeps while an async job runs; enough for `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub handle: JobHandle,
    pub target: String,
    pub owner: Option<String>,
    pub media: MediaClass,
}

impl JobTicket {
    fn new(handle: JobHandle, target: &TargetSpec, request: &GenerationRequest) -> Self {
        Self {
            handle,
            target: target.name.clone(),
            owner: request.owner.clone(),
            media: request.kind.media_class(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    Completed(Generation),
    Processing(JobTicket),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusReport {
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<StoredArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusReport {
    fn pending() -> Self {
        Self {
            done: false,
            artifact_url: None,
            artifact: None,
            error: None,
        }
    }

    fn finished(artifact: StoredArtifactRef) -> Self {
        Self {
            done: true,
            artifact_url: Some(artifact.reference().to_string()),
            artifact: Some(artifact),
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            done: true,
            artifact_url: None,
            artifact: None,
            error: Some(message),
        }
    }
}

pub struct Orchestrator {
    selector: TargetSelector,
    pools: Vec<CredentialPool>,
    dispatcher: Dispatcher,
    tracker: JobTracker,
    finalizer: Finalizer,
    events: EventLog,
    receipts_dir: Option<PathBuf>,
    poll: PollOverride,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn ArtifactStore>,
        pools: Vec<CredentialPool>,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&transport));
        Self {
            selector: TargetSelector::default(),
            pools,
            tracker: JobTracker::new(dispatcher.clone()),
            dispatcher,
            finalizer: Finalizer::new(transport, store),
            events: EventLog::disabled(),
            receipts_dir: None,
            poll: PollOverride::default(),
        }
    }

    pub fn from_config(config: Config) -> Result<Self, OrchestrationError> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        let store: Arc<dyn ArtifactStore> = match config.storage {
            StorageConfig::None => {
                warn!("no artifact store configured; artifacts will be returned inline");
                Arc::new(NullStore)
            }
            StorageConfig::Local {
                dir,
                public_base_url,
            } => Arc::new(LocalStore::new(dir, &public_base_url)),
            StorageConfig::Http {
                url,
                bucket,
                token,
                public_base_url,
            } => Arc::new(HttpObjectStore::new(
                Arc::clone(&transport),
                &url,
                &bucket,
                token,
                public_base_url.as_deref(),
            )),
        };
        let mut orchestrator = Self::new(transport, store, config.pools)
            .with_poll_override(config.poll)
            .with_receipts_dir(config.receipts_dir);
        if let Some(path) = config.events_path {
            orchestrator = orchestrator.with_events(EventLog::open_new_session(path));
        }
        Ok(orchestrator)
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.tracker = self.tracker.with_events(events.clone());
        self.finalizer = self.finalizer.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn with_registry(mut self, registry: TargetRegistry) -> Self {
        self.selector = TargetSelector::new(registry);
        self
    }

    pub fn with_receipts_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.receipts_dir = dir;
        self
    }

    pub fn with_poll_override(mut self, poll: PollOverride) -> Self {
        self.poll = poll;
        self
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.selector.registry
    }

    pub fn is_family_available(&self, family: &str) -> bool {
        family == DRYRUN_FAMILY || self.pool(family).is_some()
    }

    fn pool(&self, family: &str) -> Option<&CredentialPool> {
        self.pools.iter().find(|pool| pool.family() == family)
    }

    fn require_pool(&self, target: &TargetSpec) -> Result<&CredentialPool, OrchestrationError> {
        self.pool(&target.family)
            .ok_or_else(|| OrchestrationError::FamilyUnavailable {
                target: target.name.clone(),
                family: target.family.clone(),
            })
    }

    pub fn policy_for(&self, target: &TargetSpec) -> PollPolicy {
        PollPolicy {
            interval_ms: self.poll.interval_ms.unwrap_or(target.poll.interval_ms),
            max_attempts: self
                .poll
                .max_attempts
                .unwrap_or(target.poll.max_attempts)
                .max(1),
        }
    }

    /// Picks a target (falling back when the requested one cannot serve the
    /// kind) and compiles the request for it.
    pub fn plan(
        &self,
        request: &GenerationRequest,
        requested_target: Option<&str>,
    ) -> Result<Plan, OrchestrationError> {
        let selection = self
            .selector
            .select(requested_target, &request.kind, |target| {
                self.is_family_available(&target.family)
            })
            .map_err(|err| OrchestrationError::NoTarget(err.to_string()))?;
        let fallback_reason = selection.fallback_reason();
        if let Some(reason) = fallback_reason.as_deref() {
            info!(kind = %request.kind, selected = %selection.target.name, reason, "target fallback");
        }
        let payload = compile(request, &selection.target);

        let mut event = EventPayload::new();
        event.insert("kind".to_string(), json!(request.kind.label()));
        event.insert("target".to_string(), json!(selection.target.name));
        event.insert("requested".to_string(), json!(selection.requested));
        event.insert("fallback_reason".to_string(), json!(fallback_reason));
        event.insert("ignored_params".to_string(), json!(payload.ignored_params));
        self.emit(EventKind::TargetSelected, event);

        Ok(Plan { selection, payload })
    }

    /// Runs a request to completion and returns the stored artifact.
    pub fn generate(
        &self,
        request: &GenerationRequest,
        requested_target: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Generation, OrchestrationError> {
        let plan = self.plan(request, requested_target)?;
        let target = &plan.selection.target;
        if target.mode == DispatchMode::Sync {
            return self.complete_sync(request, &plan);
        }
        let pool = self.require_pool(target)?;
        let (handle, source) = self
            .tracker
            .submit_and_await(&plan.payload, pool, self.policy_for(target), cancel)
            .map_err(|err| match err {
                JobError::TimedOut { handle, attempts } => OrchestrationError::TimedOut {
                    ticket: Box::new(JobTicket::new(handle.clone(), target, request)),
                    source: JobError::TimedOut { handle, attempts },
                },
                other => other.into(),
            })?;
        let artifact = self.finalizer.finalize(
            source,
            request.owner.as_deref(),
            request.kind.media_class(),
        )?;
        Ok(self.finish(request, &plan, artifact, Some(handle), Value::Null))
    }

    /// Sync targets complete immediately; async targets return a ticket to
    /// pass to `check`.
    pub fn submit(
        &self,
        request: &GenerationRequest,
        requested_target: Option<&str>,
    ) -> Result<Submission, OrchestrationError> {
        let plan = self.plan(request, requested_target)?;
        let target = &plan.selection.target;
        if target.mode == DispatchMode::Sync {
            return Ok(Submission::Completed(self.complete_sync(request, &plan)?));
        }
        let pool = self.require_pool(target)?;
        let handle = self.tracker.submit(&plan.payload, pool)?;
        Ok(Submission::Processing(JobTicket::new(handle, target, request)))
    }

    /// One manual status check with a retained handle.
    pub fn check(&self, ticket: &JobTicket) -> Result<JobStatusReport, OrchestrationError> {
        let family = ticket.handle.family();
        let pool = self
            .pool(family)
            .ok_or_else(|| OrchestrationError::FamilyUnavailable {
                target: ticket.target.clone(),
                family: family.to_string(),
            })?;
        match self.tracker.poll_once(&ticket.handle, pool) {
            Ok(PollStatus::Pending) => Ok(JobStatusReport::pending()),
            Ok(PollStatus::Done(body)) => {
                let source = self.tracker.collect(&ticket.handle, &body, pool)?;
                let artifact = self
                    .finalizer
                    .finalize(source, ticket.owner.as_deref(), ticket.media)?;
                Ok(JobStatusReport::finished(artifact))
            }
            Ok(PollStatus::Failed(message)) => Ok(JobStatusReport::failed(message)),
            Err(err) if is_transient(&err) => {
                warn!(job = ticket.handle.id(), error = %err, "status check failed; job still pending");
                Ok(JobStatusReport::pending())
            }
            Err(err) => Err(JobError::Poll {
                handle: ticket.handle.clone(),
                source: err,
            }
            .into()),
        }
    }

    fn complete_sync(&self, request: &GenerationRequest, plan: &Plan) -> Result<Generation, OrchestrationError> {
        let (source, attempts) = self.run_sync(&plan.payload)?;
        let artifact = self.finalizer.finalize(
            source,
            request.owner.as_deref(),
            request.kind.media_class(),
        )?;
        Ok(self.finish(request, plan, artifact, None, attempts))
    }

    fn run_sync(&self, payload: &CompiledPayload) -> Result<(ArtifactSource, Value), OrchestrationError> {
        if payload.shape == PayloadShape::Dryrun {
            let data = dryrun::render(payload)?;
            return Ok((
                ArtifactSource::Bytes {
                    data,
                    content_type: Some("image/png".to_string()),
                },
                json!([{ "credential": DRYRUN_FAMILY, "endpoint": "local", "status": 200, "outcome": "success" }]),
            ));
        }

        let target = self
            .registry()
            .get(&payload.target)
            .cloned()
            .ok_or_else(|| OrchestrationError::NoTarget(format!("Unknown target '{}'.", payload.target)))?;
        let pool = self.require_pool(&target)?;
        let response = self.dispatcher.dispatch_sync(payload, pool)?;
        let attempts = response.attempts_json();

        let mut event = EventPayload::new();
        event.insert("target".to_string(), json!(payload.target));
        event.insert("attempts".to_string(), attempts.clone());
        self.emit(EventKind::DispatchCompleted, event);

        if response.reply.is_binary_media() {
            return Ok((
                ArtifactSource::Bytes {
                    content_type: response.reply.content_type.clone(),
                    data: response.reply.body,
                },
                attempts,
            ));
        }
        let body = response.json(pool.family())?;
        let Some(source) = extract_media(&body) else {
            let detail = extract_text(&body)
                .or_else(|| extract_error(&body))
                .unwrap_or_else(|| truncate_text(&body.to_string(), 512));
            return Err(OrchestrationError::NoMedia {
                target: payload.target.clone(),
                detail,
            });
        };
        Ok((source, attempts))
    }

    fn finish(
        &self,
        request: &GenerationRequest,
        plan: &Plan,
        artifact: StoredArtifactRef,
        handle: Option<JobHandle>,
        attempts: Value,
    ) -> Generation {
        let receipt = self.write_receipt(request, plan, &artifact, handle.as_ref(), &attempts);
        Generation {
            target: plan.selection.target.name.clone(),
            artifact,
            handle,
            warnings: plan.payload.warnings.clone(),
            receipt,
        }
    }

    fn write_receipt(
        &self,
        request: &GenerationRequest,
        plan: &Plan,
        artifact: &StoredArtifactRef,
        handle: Option<&JobHandle>,
        attempts: &Value,
    ) -> Option<PathBuf> {
        let dir = self.receipts_dir.as_ref()?;
        let handle_json = handle.map(JobHandle::to_json);
        let stored = serde_json::to_value(artifact).unwrap_or(Value::Null);
        let provider_request = plan.payload.provider_request();
        let payload = build_receipt(&ReceiptRecord {
            request,
            target: &plan.selection.target.name,
            instruction: &plan.payload.instruction,
            provider_request: &provider_request,
            attempts,
            handle: handle_json.as_ref(),
            stored: &stored,
            warnings: &plan.payload.warnings,
        });
        let path = receipt_path(dir, chrono::Utc::now().timestamp_millis());
        match write_receipt(&path, &payload) {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to write receipt");
                None
            }
        }
    }

    fn emit(&self, kind: EventKind, payload: EventPayload) {
        if let Err(err) = self.events.emit(kind, payload) {
            warn!(error = %err, "failed to write job event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use atelier_contracts::request::{GenerationKind, GenerationRequest, MediaClass, MediaRef};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::{json, Value};

    use super::{JobTicket, Orchestrator, Submission};
    use crate::config::PollOverride;
    use crate::error::OrchestrationError;
    use crate::finalize::StoredArtifactRef;
    use crate::jobs::{CancelToken, JobHandle};
    use crate::pool::{AuthStyle, Credential, CredentialPool, Endpoint};
    use crate::store::NullStore;
    use crate::testing::{MemoryStore, ScriptedTransport, PNG_BYTES};
    use crate::transport::{HttpReply, Method};

    fn gemini_pool() -> CredentialPool {
        CredentialPool::new(
            "gemini",
            vec![Credential::new("gemini#1", "g-1"), Credential::new("gemini#2", "g-2")],
            vec![
                Endpoint::new("platform", "https://platform.test/v1", AuthStyle::Header("x-goog-api-key".to_string())),
                Endpoint::new("direct", "https://gen.test/v1beta", AuthStyle::Query("key".to_string())),
            ],
        )
        .expect("gemini pool")
    }

    fn fal_pool() -> CredentialPool {
        CredentialPool::new(
            "fal",
            vec![Credential::new("fal#1", "f-1")],
            vec![Endpoint::new("queue", "https://queue.test", AuthStyle::KeyPrefix)],
        )
        .expect("fal pool")
    }

    fn no_wait() -> PollOverride {
        PollOverride {
            interval_ms: Some(0),
            max_attempts: None,
        }
    }

    fn gemini_image_reply() -> HttpReply {
        HttpReply::json(
            200,
            &json!({ "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(PNG_BYTES) } }
            ]}}]}),
        )
    }

    #[test]
    fn outpaint_end_to_end_stores_one_artifact() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Post,
            "platform.test/v1/models/gemini-2.5-flash-image:generateContent",
            vec![gemini_image_reply()],
        ));
        let store = Arc::new(MemoryStore::new("https://media.test"));
        let orchestrator = Orchestrator::new(transport.clone(), store.clone(), vec![gemini_pool()]);
        let request = GenerationRequest::new(GenerationKind::Outpaint, "extend with forest")
            .with_base(MediaRef::from_bytes("image/png", PNG_BYTES))
            .with_param("direction", "right")
            .with_param("expansionAmount", 50)
            .with_owner("artist-1");

        let plan = orchestrator.plan(&request, None)?;
        assert!(plan.payload.instruction.contains("right"));
        assert!(plan.payload.instruction.contains("no visible seams"));

        let generation = orchestrator.generate(&request, None, &CancelToken::new())?;

        assert_eq!(generation.target, "gemini-2.5-flash-image");
        let StoredArtifactRef::Hosted { url, path, .. } = &generation.artifact else {
            panic!("expected hosted artifact, got {:?}", generation.artifact);
        };
        assert!(path.starts_with("artist-1/images/"));
        assert_eq!(url, &format!("https://media.test/{path}"));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn text_to_video_queue_end_to_end() -> anyhow::Result<()> {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(
                    Method::Post,
                    "queue.test/fal-ai/kling-video/v2.1/standard/text-to-video",
                    vec![HttpReply::json(200, &json!({
                        "request_id": "req-1",
                        "status_url": "https://queue.test/fal-ai/kling-video/requests/req-1/status",
                        "response_url": "https://queue.test/fal-ai/kling-video/requests/req-1"
                    }))],
                )
                .on(
                    Method::Get,
                    "requests/req-1/status",
                    vec![
                        HttpReply::json(200, &json!({ "status": "IN_QUEUE" })),
                        HttpReply::json(200, &json!({ "status": "IN_PROGRESS" })),
                        HttpReply::json(200, &json!({ "status": "COMPLETED" })),
                    ],
                )
                .on(
                    Method::Get,
                    "requests/req-1",
                    vec![HttpReply::json(200, &json!({ "video": { "url": "https://cdn.test/clip.mp4", "content_type": "video/mp4" } }))],
                )
                .on(
                    Method::Get,
                    "cdn.test/clip.mp4",
                    vec![HttpReply::bytes(200, "video/mp4", b"\0\0\0\x18ftypisomclip".to_vec())],
                ),
        );
        let store = Arc::new(MemoryStore::new("https://media.test"));
        let orchestrator = Orchestrator::new(transport.clone(), store.clone(), vec![fal_pool()])
            .with_poll_override(no_wait());
        let request = GenerationRequest::new(GenerationKind::TextToVideo, "tide rolling in").with_param("duration", 10);

        let generation = orchestrator.generate(&request, None, &CancelToken::new())?;

        assert_eq!(generation.target, "fal-ai/kling-video");
        assert!(generation.artifact.is_durable());
        assert_eq!(generation.artifact.content_type(), "video/mp4");
        assert!(generation.artifact.reference().contains("/videos/"));
        assert!(matches!(generation.handle, Some(JobHandle::Queue { .. })));
        assert_eq!(transport.count("requests/req-1/status"), 3);
        assert_eq!(transport.count("cdn.test/clip.mp4"), 1);
        let submit = &transport.requests()[0];
        assert_eq!(submit.header_value("Authorization"), Some("Key f-1"));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn submit_then_check_with_retained_operation_handle() -> anyhow::Result<()> {
        let operation = "models/veo-3.0-generate-001/operations/op-7";
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(
                    Method::Post,
                    ":predictLongRunning",
                    vec![HttpReply::json(200, &json!({ "name": operation }))],
                )
                .on(
                    Method::Get,
                    "operations/op-7",
                    vec![
                        HttpReply::json(200, &json!({ "name": operation, "done": false })),
                        HttpReply::json(200, &json!({ "name": operation, "done": true, "response": {
                            "generateVideoResponse": { "generatedSamples": [
                                { "video": { "uri": "https://gen.test/v1beta/files/op7:download?alt=media" } }
                            ]}
                        }})),
                    ],
                )
                .on(
                    Method::Get,
                    "files/op7:download",
                    vec![HttpReply::bytes(200, "video/mp4", b"\0\0\0\x18ftypisomveo".to_vec())],
                ),
        );
        let store = Arc::new(MemoryStore::new("https://media.test"));
        let orchestrator = Orchestrator::new(transport.clone(), store.clone(), vec![gemini_pool()]);
        let request = GenerationRequest::new(GenerationKind::TextToVideo, "waves").with_owner("u1");

        let Submission::Processing(ticket) = orchestrator.submit(&request, Some("veo-3"))? else {
            panic!("veo should be asynchronous");
        };
        let round_trip: JobTicket = serde_json::from_value(serde_json::to_value(&ticket)?)?;
        assert_eq!(round_trip, ticket);
        assert_eq!(ticket.media, MediaClass::Video);

        let first = orchestrator.check(&ticket)?;
        assert!(!first.done);
        let second = orchestrator.check(&ticket)?;
        assert!(second.done);
        assert!(second.error.is_none());
        let artifact_url = second.artifact_url.clone().unwrap_or_default();
        assert!(artifact_url.starts_with("https://media.test/u1/videos/"));

        let download = transport
            .requests()
            .into_iter()
            .find(|request| request.url.contains("files/op7:download"))
            .expect("download request");
        assert!(download.header_value("x-goog-api-key").is_some() || download.query_value("key").is_some());
        Ok(())
    }

    #[test]
    fn timed_out_job_keeps_handle_for_later_check() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(Method::Post, ":predictLongRunning", vec![HttpReply::json(200, &json!({ "name": "operations/slow" }))])
                .on(Method::Get, "operations/slow", vec![HttpReply::json(200, &json!({ "done": false }))]),
        );
        let orchestrator = Orchestrator::new(transport, Arc::new(NullStore), vec![gemini_pool()])
            .with_poll_override(PollOverride {
                interval_ms: Some(0),
                max_attempts: Some(2),
            });

        let err = orchestrator
            .generate(
                &GenerationRequest::new(GenerationKind::TextToVideo, "waves").with_owner("artist-9"),
                Some("veo-3"),
                &CancelToken::new(),
            )
            .unwrap_err();

        assert!(err.is_timed_out());
        let handle = JobHandle::Operation {
            family: "gemini".to_string(),
            name: "operations/slow".to_string(),
        };
        assert_eq!(err.retained_handle(), Some(&handle));
        let ticket = err.ticket().cloned().expect("timed-out generate carries a ticket");
        assert_eq!(ticket.handle, handle);
        assert_eq!(ticket.target, "veo-3");
        assert_eq!(ticket.owner.as_deref(), Some("artist-9"));
        assert_eq!(ticket.media, MediaClass::Video);

        let report = orchestrator.check(&ticket).expect("check with the timed-out ticket");
        assert!(!report.done);
    }

    #[test]
    fn rate_limits_are_reported_distinctly() {
        let transport = Arc::new(ScriptedTransport::new().on(Method::Post, "", vec![HttpReply::text(429, "quota")]));
        let orchestrator = Orchestrator::new(transport.clone(), Arc::new(NullStore), vec![gemini_pool()]);

        let err = orchestrator
            .generate(
                &GenerationRequest::new(GenerationKind::TextToImage, "cat"),
                Some("imagen-4"),
                &CancelToken::new(),
            )
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert!(!err.is_timed_out());
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn missing_family_is_unavailable_not_silently_rerouted() {
        let orchestrator = Orchestrator::new(Arc::new(ScriptedTransport::new()), Arc::new(NullStore), Vec::new());

        let err = orchestrator
            .submit(&GenerationRequest::new(GenerationKind::TextToVideo, "x"), Some("veo-3"))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::FamilyUnavailable { ref family, .. } if family == "gemini"));

        let err = orchestrator
            .submit(&GenerationRequest::new(GenerationKind::Sound, "rain"), None)
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::NoTarget(ref message) if message.contains("fal-ai/stable-audio")));
    }

    #[test]
    fn text_only_reply_is_no_media_with_model_explanation() {
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Post,
            "platform.test",
            vec![HttpReply::json(200, &json!({ "candidates": [{ "content": { "parts": [{ "text": "I can't help with that." }] } }] }))],
        ));
        let orchestrator = Orchestrator::new(transport, Arc::new(NullStore), vec![gemini_pool()]);
        let err = orchestrator
            .generate(&GenerationRequest::new(GenerationKind::TextToImage, "x"), None, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::NoMedia { ref detail, .. } if detail.contains("can't help")));
    }

    #[test]
    fn dryrun_without_store_degrades_and_writes_receipt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let orchestrator = Orchestrator::new(Arc::new(ScriptedTransport::new()), Arc::new(NullStore), Vec::new())
            .with_receipts_dir(Some(temp.path().join("receipts")));

        let generation = orchestrator.generate(
            &GenerationRequest::new(GenerationKind::Custom("zine-cover".to_string()), "bold type"),
            None,
            &CancelToken::new(),
        )?;

        assert_eq!(generation.target, "dryrun-image");
        assert!(!generation.artifact.is_durable());
        assert!(generation.artifact.reference().starts_with("data:image/png;base64,"));
        let receipt_path = generation.receipt.clone().expect("receipt written");
        let receipt: Value = serde_json::from_str(&std::fs::read_to_string(receipt_path)?)?;
        assert_eq!(receipt["target"], json!("dryrun-image"));
        assert_eq!(receipt["stored"]["storage"], json!("inline"));
        assert_eq!(receipt["stored"]["data_uri"], json!("<omitted>"));
        Ok(())
    }
}
