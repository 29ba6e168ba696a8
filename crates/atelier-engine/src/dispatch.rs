//! Synchronous dispatch with ordered failover across a credential pool.
//!
//! Credentials are walked outer, endpoints inner, one request per pair:
//! - 2xx wins immediately
//! - 429 skips the rest of that credential's endpoints
//! - 401/403/404 moves on to the next endpoint
//! - anything else (including network errors) is terminal
//!
//! No pair is tried twice and there is no sleep between attempts.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::compiler::CompiledPayload;
use crate::pool::{CredentialPool, Endpoint, PairIndex};
use crate::transport::{HttpReply, HttpRequest, HttpTransport, TransportError};
use crate::util::truncate_text;

const ERROR_BODY_CHARS: usize = 512;

/// Classification of one attempt's result; the failover loop only ever
/// branches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Success,
    /// Quota for this credential is gone; try the next credential.
    CredentialExhausted,
    /// Auth or route mismatch for this endpoint; try the next endpoint.
    EndpointMismatch,
    Terminal,
}

impl DispatchOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => DispatchOutcome::Success,
            429 => DispatchOutcome::CredentialExhausted,
            401 | 403 | 404 => DispatchOutcome::EndpointMismatch,
            _ => DispatchOutcome::Terminal,
        }
    }

    pub fn classify(result: &Result<HttpReply, TransportError>) -> Self {
        match result {
            Ok(reply) => Self::from_status(reply.status),
            Err(_) => DispatchOutcome::Terminal,
        }
    }
}

/// One HTTP call against one (credential, endpoint) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchAttempt {
    pub credential: String,
    pub endpoint: String,
    pub url: String,
    pub status: Option<u16>,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub reply: HttpReply,
    pub served_by: PairIndex,
    pub url: String,
    pub attempts: Vec<DispatchAttempt>,
}

impl ProviderResponse {
    pub fn json(&self, family: &str) -> Result<Value, DispatchError> {
        self.reply
            .parse_json()
            .map_err(|err| DispatchError::InvalidJson {
                family: family.to_string(),
                message: err.to_string(),
            })
    }

    pub fn attempts_json(&self) -> Value {
        serde_json::to_value(&self.attempts).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{family} request failed ({status}): {body}")]
    Upstream {
        family: String,
        status: u16,
        body: String,
    },
    #[error("{family} request failed: {message}")]
    Transport {
        family: String,
        message: String,
        timeout: bool,
    },
    #[error("all {attempts} {family} credential/endpoint pairs failed{}", exhaustion_detail(.last_status, .last_body))]
    AllProvidersFailed {
        family: String,
        attempts: usize,
        rate_limited: bool,
        last_status: Option<u16>,
        last_body: String,
    },
    #[error("{family} returned invalid JSON payload: {message}")]
    InvalidJson { family: String, message: String },
    #[error("{family} pool has no credential/endpoint pair {index:?}")]
    UnknownPair { family: String, index: PairIndex },
}

impl DispatchError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            DispatchError::AllProvidersFailed { rate_limited, .. } => *rate_limited,
            DispatchError::Upstream { status, .. } => *status == 429,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn HttpTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn dispatch_sync(
        &self,
        payload: &CompiledPayload,
        pool: &CredentialPool,
    ) -> Result<ProviderResponse, DispatchError> {
        self.post_json(&payload.path, &payload.body, pool)
    }

    pub fn post_json(
        &self,
        path: &str,
        body: &Value,
        pool: &CredentialPool,
    ) -> Result<ProviderResponse, DispatchError> {
        self.failover(pool, |endpoint| {
            HttpRequest::post_json(endpoint.url(path), body.clone())
        })
    }

    /// GET with the same failover rules; `path_or_url` may be relative to
    /// each endpoint or absolute.
    pub fn get(
        &self,
        path_or_url: &str,
        pool: &CredentialPool,
    ) -> Result<ProviderResponse, DispatchError> {
        self.failover(pool, |endpoint| HttpRequest::get(endpoint.url(path_or_url)))
    }

    /// Single attempt pinned to one pair, for credential-scoped handles.
    pub fn send_with(
        &self,
        pool: &CredentialPool,
        index: PairIndex,
        request: HttpRequest,
    ) -> Result<ProviderResponse, DispatchError> {
        let family = pool.family();
        let Some((credential, endpoint)) = pool.pair(index) else {
            return Err(DispatchError::UnknownPair {
                family: family.to_string(),
                index,
            });
        };
        let request = endpoint.auth.apply(request, credential);
        let result = self.transport.send(&request);
        let outcome = DispatchOutcome::classify(&result);
        let attempt = DispatchAttempt {
            credential: credential.label().to_string(),
            endpoint: endpoint.label.clone(),
            url: request.url.clone(),
            status: result.as_ref().ok().map(|reply| reply.status),
            outcome,
        };
        debug!(family, url = %request.url, status = ?attempt.status, "pinned request");

        let reply = result.map_err(|err| transport_error(family, err))?;
        if outcome != DispatchOutcome::Success {
            return Err(DispatchError::Upstream {
                family: family.to_string(),
                status: reply.status,
                body: truncate_text(&reply.body_text(), ERROR_BODY_CHARS),
            });
        }
        Ok(ProviderResponse {
            reply,
            served_by: index,
            url: request.url,
            attempts: vec![attempt],
        })
    }

    fn failover(
        &self,
        pool: &CredentialPool,
        build: impl Fn(&Endpoint) -> HttpRequest,
    ) -> Result<ProviderResponse, DispatchError> {
        let family = pool.family();
        let mut attempts: Vec<DispatchAttempt> = Vec::new();
        let mut rate_limited = false;
        let mut last_status = None;
        let mut last_body = String::new();
        let mut exhausted_credential = None;

        for (index, credential, endpoint) in pool.pairs() {
            if exhausted_credential == Some(index.credential) {
                continue;
            }
            let request = endpoint.auth.apply(build(endpoint), credential);
            let result = self.transport.send(&request);
            let outcome = DispatchOutcome::classify(&result);
            attempts.push(DispatchAttempt {
                credential: credential.label().to_string(),
                endpoint: endpoint.label.clone(),
                url: request.url.clone(),
                status: result.as_ref().ok().map(|reply| reply.status),
                outcome,
            });
            debug!(
                family,
                credential = credential.label(),
                endpoint = %endpoint.label,
                url = %request.url,
                ?outcome,
                "dispatch attempt"
            );

            let reply = match result {
                Ok(reply) => reply,
                Err(err) => {
                    error!(family, url = %request.url, error = %err.message, "dispatch transport failure");
                    return Err(transport_error(family, err));
                }
            };

            match outcome {
                DispatchOutcome::Success => {
                    return Ok(ProviderResponse {
                        reply,
                        served_by: index,
                        url: request.url,
                        attempts,
                    });
                }
                DispatchOutcome::CredentialExhausted => {
                    warn!(family, credential = credential.label(), "credential rate limited; skipping its endpoints");
                    rate_limited = true;
                    last_status = Some(reply.status);
                    last_body = truncate_text(&reply.body_text(), ERROR_BODY_CHARS);
                    exhausted_credential = Some(index.credential);
                }
                DispatchOutcome::EndpointMismatch => {
                    warn!(family, endpoint = %endpoint.label, status = reply.status, "endpoint rejected request; trying next endpoint");
                    last_status = Some(reply.status);
                    last_body = truncate_text(&reply.body_text(), ERROR_BODY_CHARS);
                }
                DispatchOutcome::Terminal => {
                    let body = truncate_text(&reply.body_text(), ERROR_BODY_CHARS);
                    error!(family, status = reply.status, body = %body, "dispatch failed");
                    return Err(DispatchError::Upstream {
                        family: family.to_string(),
                        status: reply.status,
                        body,
                    });
                }
            }
        }

        error!(family, attempts = attempts.len(), rate_limited, "all credential/endpoint pairs failed");
        Err(DispatchError::AllProvidersFailed {
            family: family.to_string(),
            attempts: attempts.len(),
            rate_limited,
            last_status,
            last_body,
        })
    }
}

fn exhaustion_detail(last_status: &Option<u16>, last_body: &str) -> String {
    match last_status {
        Some(status) => format!(" (last status {status}): {last_body}"),
        None => String::new(),
    }
}

fn transport_error(family: &str, err: TransportError) -> DispatchError {
    DispatchError::Transport {
        family: family.to_string(),
        message: err.to_string(),
        timeout: err.timeout,
    }
}
