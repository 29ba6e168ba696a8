//! Asynchronous Job Tracker.
//!
//! A job is submitted once, then polled on a fixed interval until it is
//! done, failed, or the attempt budget runs out. Two handle shapes exist:
//!
//! - `Operation`: a provider-global operation name; any credential in the
//!   pool may poll it, so polls go through normal failover.
//! - `Queue`: a request id scoped to the submitting credential; polls are
//!   pinned to the pair that submitted.
//!
//! Job state lives only in the polling loop. Abandoning the loop leaves the
//! provider-side job running; the retained handle allows a later check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use atelier_contracts::catalog::{DispatchMode, PollPolicy};
use atelier_contracts::events::{EventKind, EventLog, EventPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::compiler::CompiledPayload;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::extract::{extract_error, extract_media};
use crate::finalize::ArtifactSource;
use crate::pool::{CredentialPool, PairIndex};
use crate::transport::HttpRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobHandle {
    Operation {
        family: String,
        name: String,
    },
    Queue {
        family: String,
        request_id: String,
        status_url: String,
        response_url: String,
        pair: PairIndex,
    },
}

impl JobHandle {
    pub fn family(&self) -> &str {
        match self {
            JobHandle::Operation { family, .. } | JobHandle::Queue { family, .. } => family,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            JobHandle::Operation { name, .. } => name,
            JobHandle::Queue { request_id, .. } => request_id,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Polling,
    Done,
    Failed,
    TimedOut,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending,
    Done(Value),
    Failed(String),
}

/// Cooperative cancellation flag shared with whoever may abandon the wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    #[error("{target} is a synchronous target and has no job to track")]
    SyncTarget { target: String },
    #[error("job submission failed: {0}")]
    Submit(#[source] DispatchError),
    #[error("{family} accepted the job but returned no handle: {body}")]
    MissingHandle { family: String, body: String },
    #[error("polling job {} failed: {source}", .handle.id())]
    Poll {
        handle: JobHandle,
        #[source]
        source: DispatchError,
    },
    #[error("job {} failed: {message}", .handle.id())]
    Failed { handle: JobHandle, message: String },
    #[error("job {} still running after {attempts} polls; it may still complete", .handle.id())]
    TimedOut { handle: JobHandle, attempts: u32 },
    #[error("stopped waiting for job {}", .handle.id())]
    Cancelled { handle: JobHandle },
    #[error("job {} completed without media: {detail}", .handle.id())]
    NoMedia { handle: JobHandle, detail: String },
    #[error("fetching result of job {} failed: {source}", .handle.id())]
    Fetch {
        handle: JobHandle,
        #[source]
        source: DispatchError,
    },
}

impl JobError {
    /// Handle the caller can keep for a later manual check.
    pub fn handle(&self) -> Option<&JobHandle> {
        match self {
            JobError::Poll { handle, .. }
            | JobError::Failed { handle, .. }
            | JobError::TimedOut { handle, .. }
            | JobError::Cancelled { handle }
            | JobError::NoMedia { handle, .. }
            | JobError::Fetch { handle, .. } => Some(handle),
            JobError::SyncTarget { .. } | JobError::Submit(_) | JobError::MissingHandle { .. } => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, JobError::TimedOut { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            JobError::Submit(err) | JobError::Poll { source: err, .. } | JobError::Fetch { source: err, .. } => {
                err.is_rate_limited()
            }
            _ => false,
        }
    }
}

/// Poll failures that count against the budget instead of ending the job.
pub(crate) fn is_transient(err: &DispatchError) -> bool {
    match err {
        DispatchError::Transport { .. } | DispatchError::InvalidJson { .. } => true,
        DispatchError::Upstream { status, .. } => *status >= 500 || *status == 429,
        DispatchError::AllProvidersFailed { rate_limited, .. } => *rate_limited,
        DispatchError::UnknownPair { .. } => false,
    }
}

#[derive(Clone)]
pub struct JobTracker {
    dispatcher: Dispatcher,
    events: EventLog,
}

impl JobTracker {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            events: EventLog::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Sends the compiled payload once and turns the reply into a handle.
    pub fn submit(&self, payload: &CompiledPayload, pool: &CredentialPool) -> Result<JobHandle, JobError> {
        if !payload.mode.is_async() {
            return Err(JobError::SyncTarget {
                target: payload.target.clone(),
            });
        }
        let response = self
            .dispatcher
            .dispatch_sync(payload, pool)
            .map_err(JobError::Submit)?;
        let body = response.json(pool.family()).map_err(JobError::Submit)?;
        let missing = || JobError::MissingHandle {
            family: pool.family().to_string(),
            body: crate::util::truncate_text(&body.to_string(), 512),
        };

        let handle = match payload.mode {
            DispatchMode::Operation => {
                let name = body
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|name| !name.trim().is_empty())
                    .ok_or_else(missing)?;
                JobHandle::Operation {
                    family: pool.family().to_string(),
                    name: name.trim().to_string(),
                }
            }
            DispatchMode::Queue => {
                let request_id = body
                    .get("request_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(missing)?
                    .trim()
                    .to_string();
                let app_url = queue_app_url(&response.url);
                let status_url = body
                    .get("status_url")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{app_url}/requests/{request_id}/status"));
                let response_url = body
                    .get("response_url")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{app_url}/requests/{request_id}"));
                JobHandle::Queue {
                    family: pool.family().to_string(),
                    request_id,
                    status_url,
                    response_url,
                    pair: response.served_by,
                }
            }
            DispatchMode::Sync => {
                return Err(JobError::SyncTarget {
                    target: payload.target.clone(),
                })
            }
        };

        info!(family = handle.family(), job = handle.id(), target_name = %payload.target, "job submitted");
        let mut event = EventPayload::new();
        event.insert("target".to_string(), Value::String(payload.target.clone()));
        event.insert("handle".to_string(), handle.to_json());
        event.insert("state".to_string(), state_value(JobState::Submitted));
        self.emit(EventKind::JobSubmitted, event);
        Ok(handle)
    }

    /// One status check through the handle's strategy.
    pub fn poll_once(&self, handle: &JobHandle, pool: &CredentialPool) -> Result<PollStatus, DispatchError> {
        match handle {
            JobHandle::Operation { name, .. } => {
                let body = self.dispatcher.get(name, pool)?.json(pool.family())?;
                if !body.get("done").and_then(Value::as_bool).unwrap_or(false) {
                    return Ok(PollStatus::Pending);
                }
                if let Some(message) = extract_error(&body) {
                    return Ok(PollStatus::Failed(message));
                }
                Ok(PollStatus::Done(body))
            }
            JobHandle::Queue {
                status_url,
                response_url,
                pair,
                ..
            } => {
                let status_body = self
                    .dispatcher
                    .send_with(pool, *pair, HttpRequest::get(status_url.as_str()))?
                    .json(pool.family())?;
                if extract_media(&status_body).is_some() {
                    return Ok(PollStatus::Done(status_body));
                }
                let status = status_body
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                match status.as_str() {
                    "COMPLETED" | "OK" | "SUCCEEDED" => {}
                    "FAILED" | "ERROR" | "CANCELLED" => {
                        return Ok(PollStatus::Failed(
                            extract_error(&status_body).unwrap_or_else(|| format!("queue reported {status}")),
                        ));
                    }
                    _ => return Ok(PollStatus::Pending),
                }
                if let Some(message) = extract_error(&status_body) {
                    return Ok(PollStatus::Failed(message));
                }
                let result = self
                    .dispatcher
                    .send_with(pool, *pair, HttpRequest::get(response_url.as_str()))?
                    .json(pool.family())?;
                if extract_media(&result).is_some() {
                    return Ok(PollStatus::Done(result));
                }
                match extract_error(&result).or_else(|| result.get("detail").map(Value::to_string)) {
                    Some(message) => Ok(PollStatus::Failed(message)),
                    // Completed without the media field yet; treat as still running.
                    None => Ok(PollStatus::Pending),
                }
            }
        }
    }

    /// Bounded poll loop: sleep, poll, repeat, at most `policy.max_attempts`
    /// times. Transient poll failures are absorbed into the budget.
    pub fn await_job(
        &self,
        handle: &JobHandle,
        pool: &CredentialPool,
        policy: PollPolicy,
        cancel: &CancelToken,
    ) -> Result<Value, JobError> {
        let cancelled = || {
            info!(job = handle.id(), "stopped waiting; provider-side job left running");
            let mut event = EventPayload::new();
            event.insert("handle".to_string(), handle.to_json());
            self.emit(EventKind::JobCancelled, event);
            JobError::Cancelled {
                handle: handle.clone(),
            }
        };

        for attempt in 1..=policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            thread::sleep(policy.interval());
            if cancel.is_cancelled() {
                return Err(cancelled());
            }

            match self.poll_once(handle, pool) {
                Ok(PollStatus::Pending) => {
                    debug!(job = handle.id(), attempt, max_attempts = policy.max_attempts, "job still running");
                    self.emit_poll(handle, attempt, JobState::Polling, None);
                }
                Ok(PollStatus::Done(body)) => {
                    info!(job = handle.id(), attempt, "job done");
                    self.emit_poll(handle, attempt, JobState::Done, None);
                    return Ok(body);
                }
                Ok(PollStatus::Failed(message)) => {
                    warn!(job = handle.id(), attempt, error = %message, "job failed");
                    self.emit_poll(handle, attempt, JobState::Failed, Some(&message));
                    return Err(JobError::Failed {
                        handle: handle.clone(),
                        message,
                    });
                }
                Err(err) if is_transient(&err) => {
                    warn!(job = handle.id(), attempt, error = %err, "poll failed; will retry");
                    self.emit_poll(handle, attempt, JobState::Polling, Some(&err.to_string()));
                }
                Err(err) => {
                    warn!(job = handle.id(), attempt, error = %err, "poll failed permanently");
                    self.emit_poll(handle, attempt, JobState::Failed, Some(&err.to_string()));
                    return Err(JobError::Poll {
                        handle: handle.clone(),
                        source: err,
                    });
                }
            }
        }

        warn!(job = handle.id(), attempts = policy.max_attempts, "job timed out; handle retained");
        self.emit_poll(handle, policy.max_attempts, JobState::TimedOut, None);
        Err(JobError::TimedOut {
            handle: handle.clone(),
            attempts: policy.max_attempts,
        })
    }

    /// Pulls the media out of a completed job. Result URLs under one of the
    /// pool's endpoints need credentials and are downloaded here; anything
    /// else is left for the finalizer.
    pub fn collect(&self, handle: &JobHandle, body: &Value, pool: &CredentialPool) -> Result<ArtifactSource, JobError> {
        let Some(source) = extract_media(body) else {
            return Err(JobError::NoMedia {
                handle: handle.clone(),
                detail: crate::util::truncate_text(&body.to_string(), 512),
            });
        };
        let ArtifactSource::Url { url, content_type } = &source else {
            return Ok(source);
        };
        if !pool.owns_url(url) {
            return Ok(source);
        }
        let fetched = match handle {
            JobHandle::Operation { .. } => self.dispatcher.get(url, pool),
            JobHandle::Queue { pair, .. } => self
                .dispatcher
                .send_with(pool, *pair, HttpRequest::get(url.as_str())),
        }
        .map_err(|source| JobError::Fetch {
            handle: handle.clone(),
            source,
        })?;
        Ok(ArtifactSource::Bytes {
            content_type: content_type
                .clone()
                .or_else(|| fetched.reply.content_type.clone().filter(|_| fetched.reply.is_binary_media())),
            data: fetched.reply.body,
        })
    }

    pub fn submit_and_await(
        &self,
        payload: &CompiledPayload,
        pool: &CredentialPool,
        policy: PollPolicy,
        cancel: &CancelToken,
    ) -> Result<(JobHandle, ArtifactSource), JobError> {
        let handle = self.submit(payload, pool)?;
        let body = self.await_job(&handle, pool, policy, cancel)?;
        let source = self.collect(&handle, &body, pool)?;
        Ok((handle, source))
    }

    fn emit_poll(&self, handle: &JobHandle, attempt: u32, state: JobState, error: Option<&str>) {
        let kind = match state {
            JobState::Done => EventKind::JobCompleted,
            JobState::Failed => EventKind::JobFailed,
            JobState::TimedOut => EventKind::JobTimedOut,
            JobState::Submitted | JobState::Polling => EventKind::JobPolled,
        };
        let mut event = EventPayload::new();
        event.insert("handle".to_string(), handle.to_json());
        event.insert("attempt".to_string(), Value::from(attempt));
        event.insert("state".to_string(), state_value(state));
        if let Some(error) = error {
            event.insert("error".to_string(), Value::String(error.to_string()));
        }
        self.emit(kind, event);
    }

    fn emit(&self, kind: EventKind, payload: EventPayload) {
        if let Err(err) = self.events.emit(kind, payload) {
            warn!(error = %err, "failed to write job event");
        }
    }
}

fn state_value(state: JobState) -> Value {
    serde_json::to_value(state).unwrap_or(Value::Null)
}

/// `https://queue/fal-ai/kling-video/v2.1/standard/text-to-video` →
/// `https://queue/fal-ai/kling-video`; queue status lives under the app id.
fn queue_app_url(submit_url: &str) -> String {
    let Some((scheme, rest)) = submit_url.split_once("://") else {
        return submit_url.trim_end_matches('/').to_string();
    };
    let mut segments = rest.split('/');
    let host = segments.next().unwrap_or_default();
    let app: Vec<&str> = segments.filter(|segment| !segment.is_empty()).take(2).collect();
    if app.is_empty() {
        return format!("{scheme}://{host}");
    }
    format!("{scheme}://{host}/{}", app.join("/"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use atelier_contracts::catalog::{PollPolicy, TargetRegistry};
    use atelier_contracts::events::EventLog;
    use atelier_contracts::request::{GenerationKind, GenerationRequest};
    use serde_json::{json, Value};

    use super::{queue_app_url, CancelToken, JobError, JobHandle, JobTracker, PollStatus};
    use crate::compiler::compile;
    use crate::dispatch::Dispatcher;
    use crate::finalize::ArtifactSource;
    use crate::pool::{AuthStyle, Credential, CredentialPool, Endpoint, PairIndex};
    use crate::testing::ScriptedTransport;
    use crate::transport::{HttpReply, Method};

    fn gemini_pool() -> CredentialPool {
        CredentialPool::new(
            "gemini",
            vec![Credential::new("gemini#1", "g-1"), Credential::new("gemini#2", "g-2")],
            vec![Endpoint::new("direct", "https://gen.test/v1beta", AuthStyle::Query("key".to_string()))],
        )
        .expect("pool")
    }

    fn fal_pool() -> CredentialPool {
        CredentialPool::new(
            "fal",
            vec![Credential::new("fal#1", "f-1"), Credential::new("fal#2", "f-2")],
            vec![Endpoint::new("queue", "https://queue.test", AuthStyle::KeyPrefix)],
        )
        .expect("pool")
    }

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::ZERO, max_attempts)
    }

    fn operation() -> JobHandle {
        JobHandle::Operation {
            family: "gemini".to_string(),
            name: "models/veo/operations/op-1".to_string(),
        }
    }

    #[test]
    fn operation_done_on_third_poll_of_ten() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Get,
            "operations/op-1",
            vec![
                HttpReply::json(200, &json!({ "name": "op-1" })),
                HttpReply::json(200, &json!({ "name": "op-1", "done": false })),
                HttpReply::json(200, &json!({ "name": "op-1", "done": true, "response": { "videos": [{ "bytesBase64Encoded": "AAAA" }] } })),
            ],
        ));
        let tracker = JobTracker::new(Dispatcher::new(transport.clone()));

        let body = tracker.await_job(&operation(), &gemini_pool(), fast(10), &CancelToken::new())?;

        assert_eq!(body["done"], json!(true));
        assert_eq!(transport.count("operations/op-1"), 3);
        Ok(())
    }

    #[test]
    fn never_finishing_job_times_out_not_fails() {
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Get,
            "operations/op-1",
            vec![HttpReply::json(200, &json!({ "done": false }))],
        ));
        let tracker = JobTracker::new(Dispatcher::new(transport.clone()));

        let err = tracker
            .await_job(&operation(), &gemini_pool(), fast(5), &CancelToken::new())
            .unwrap_err();

        assert!(err.is_timed_out());
        assert_eq!(err.handle(), Some(&operation()));
        assert_eq!(transport.count("operations/op-1"), 5);
    }

    #[test]
    fn transport_hiccups_are_absorbed_within_budget() -> anyhow::Result<()> {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_sequence(
                    Method::Get,
                    "operations/op-1",
                    vec![
                        Err("connection reset".to_string()),
                        Ok(HttpReply::text(503, "busy")),
                        Ok(HttpReply::json(200, &json!({ "done": true, "response": { "videos": [{ "bytesBase64Encoded": "AAAA" }] } }))),
                    ],
                ),
        );
        let tracker = JobTracker::new(Dispatcher::new(transport.clone()));
        let body = tracker.await_job(&operation(), &gemini_pool(), fast(4), &CancelToken::new())?;
        assert_eq!(body["done"], json!(true));
        Ok(())
    }

    #[test]
    fn provider_error_on_done_job_is_failed() {
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Get,
            "operations/op-1",
            vec![HttpReply::json(200, &json!({ "done": true, "error": { "message": "blocked by safety filter" } }))],
        ));
        let tracker = JobTracker::new(Dispatcher::new(transport));
        let err = tracker
            .await_job(&operation(), &gemini_pool(), fast(5), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, JobError::Failed { ref message, .. } if message == "blocked by safety filter"));
        assert!(!err.is_timed_out());
    }

    #[test]
    fn bad_request_during_poll_is_terminal() {
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Get,
            "operations/op-1",
            vec![HttpReply::text(400, "malformed name")],
        ));
        let tracker = JobTracker::new(Dispatcher::new(transport.clone()));
        let err = tracker
            .await_job(&operation(), &gemini_pool(), fast(5), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, JobError::Poll { .. }));
        assert_eq!(transport.count("operations/op-1"), 1);
    }

    #[test]
    fn cancelled_wait_stops_before_polling() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventLog::open(temp.path().join("events.jsonl"), "s");
        let transport = Arc::new(ScriptedTransport::new());
        let tracker = JobTracker::new(Dispatcher::new(transport.clone())).with_events(events);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = tracker
            .await_job(&operation(), &gemini_pool(), fast(5), &cancel)
            .unwrap_err();

        assert!(matches!(err, JobError::Cancelled { .. }));
        assert!(transport.requests().is_empty());
        let content = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        let event: Value = serde_json::from_str(content.lines().next().unwrap_or("{}"))?;
        assert_eq!(event["type"], json!("job_cancelled"));
        Ok(())
    }

    #[test]
    fn queue_submission_pins_polls_to_submitting_credential() -> anyhow::Result<()> {
        let registry = TargetRegistry::default();
        let target = registry.get("fal-ai/kling-video").cloned().expect("target");
        let payload = compile(
            &GenerationRequest::new(GenerationKind::TextToVideo, "waves").with_param("duration", 10),
            &target,
        );
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_with_secret(Method::Post, "queue.test/fal-ai/kling-video", "f-1", vec![HttpReply::text(429, "quota")])
                .on_with_secret(
                    Method::Post,
                    "queue.test/fal-ai/kling-video",
                    "f-2",
                    vec![HttpReply::json(200, &json!({ "request_id": "req-9" }))],
                )
                .on_with_secret(
                    Method::Get,
                    "requests/req-9/status",
                    "f-2",
                    vec![
                        HttpReply::json(200, &json!({ "status": "IN_QUEUE" })),
                        HttpReply::json(200, &json!({ "status": "COMPLETED" })),
                    ],
                )
                .on_with_secret(
                    Method::Get,
                    "requests/req-9",
                    "f-2",
                    vec![HttpReply::json(200, &json!({ "video": { "url": "https://cdn.test/out.mp4" } }))],
                ),
        );
        let tracker = JobTracker::new(Dispatcher::new(transport.clone()));
        let pool = fal_pool();

        let handle = tracker.submit(&payload, &pool)?;
        assert_eq!(
            handle,
            JobHandle::Queue {
                family: "fal".to_string(),
                request_id: "req-9".to_string(),
                status_url: "https://queue.test/fal-ai/kling-video/requests/req-9/status".to_string(),
                response_url: "https://queue.test/fal-ai/kling-video/requests/req-9".to_string(),
                pair: PairIndex {
                    credential: 1,
                    endpoint: 0
                },
            }
        );
        assert_eq!(tracker.poll_once(&handle, &pool)?, PollStatus::Pending);
        let body = tracker.await_job(&handle, &pool, fast(3), &CancelToken::new())?;
        let source = tracker.collect(&handle, &body, &pool)?;
        assert_eq!(
            source,
            ArtifactSource::Url {
                url: "https://cdn.test/out.mp4".to_string(),
                content_type: None,
            }
        );
        assert!(transport
            .requests()
            .iter()
            .filter(|request| request.url.contains("/requests/"))
            .all(|request| request.header_value("authorization") == Some("Key f-2")));
        Ok(())
    }

    #[test]
    fn operation_results_under_pool_endpoints_are_fetched_with_credentials() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Get,
            "files/abc:download",
            vec![HttpReply::bytes(200, "video/mp4", b"movie".to_vec())],
        ));
        let tracker = JobTracker::new(Dispatcher::new(transport.clone()));
        let body = json!({ "done": true, "response": { "generateVideoResponse": { "generatedSamples": [
            { "video": { "uri": "https://gen.test/v1beta/files/abc:download?alt=media" } }
        ]}}});

        let source = tracker.collect(&operation(), &body, &gemini_pool())?;

        assert_eq!(
            source,
            ArtifactSource::Bytes {
                data: b"movie".to_vec(),
                content_type: Some("video/mp4".to_string()),
            }
        );
        assert_eq!(transport.requests()[0].query_value("key"), Some("g-1"));
        Ok(())
    }

    #[test]
    fn sync_targets_cannot_be_submitted() {
        let registry = TargetRegistry::default();
        let target = registry.get("imagen-4").cloned().expect("target");
        let payload = compile(&GenerationRequest::new(GenerationKind::TextToImage, "x"), &target);
        let tracker = JobTracker::new(Dispatcher::new(Arc::new(ScriptedTransport::new())));
        assert!(matches!(
            tracker.submit(&payload, &gemini_pool()),
            Err(JobError::SyncTarget { .. })
        ));
    }

    #[test]
    fn app_url_keeps_owner_and_app() {
        assert_eq!(
            queue_app_url("https://queue.fal.run/fal-ai/kling-video/v2.1/standard/text-to-video"),
            "https://queue.fal.run/fal-ai/kling-video"
        );
        assert_eq!(queue_app_url("https://queue.fal.run/fal-ai/stable-audio"), "https://queue.fal.run/fal-ai/stable-audio");
    }
}
