//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::store::{ArtifactStore, StorageError};
use crate::transport::{HttpReply, HttpRequest, HttpTransport, Method, TransportError};

/// 1x1 transparent PNG.
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

struct Route {
    method: Method,
    fragment: String,
    secret: Option<String>,
    replies: VecDeque<Result<HttpReply, String>>,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        if self.method != request.method || !request.url.contains(&self.fragment) {
            return false;
        }
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };
        request.headers.iter().any(|(_, value)| value.contains(secret))
            || request.query.iter().any(|(_, value)| value == secret)
    }

    /// Pops the next reply; the last one repeats.
    fn next(&mut self) -> Result<HttpReply, String> {
        if self.replies.len() > 1 {
            if let Some(reply) = self.replies.pop_front() {
                return reply;
            }
        }
        self.replies
            .front()
            .cloned()
            .unwrap_or_else(|| Err("route has no replies".to_string()))
    }
}

/// Transport that answers from scripted routes, first match wins.
/// Unmatched requests get a 500.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: Method, fragment: &str, replies: Vec<HttpReply>) -> Self {
        self.push(method, fragment, None, replies.into_iter().map(Ok).collect())
    }

    pub fn on_with_secret(self, method: Method, fragment: &str, secret: &str, replies: Vec<HttpReply>) -> Self {
        self.push(
            method,
            fragment,
            Some(secret.to_string()),
            replies.into_iter().map(Ok).collect(),
        )
    }

    pub fn on_error(self, method: Method, fragment: &str, message: &str) -> Self {
        self.push(method, fragment, None, vec![Err(message.to_string())])
    }

    pub fn on_sequence(self, method: Method, fragment: &str, replies: Vec<Result<HttpReply, String>>) -> Self {
        self.push(method, fragment, None, replies)
    }

    fn push(
        self,
        method: Method,
        fragment: &str,
        secret: Option<String>,
        replies: Vec<Result<HttpReply, String>>,
    ) -> Self {
        self.routes.lock().expect("routes lock").push(Route {
            method,
            fragment: fragment.to_string(),
            secret,
            replies: replies.into(),
        });
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().expect("seen lock").clone()
    }

    pub fn count(&self, fragment: &str) -> usize {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpReply, TransportError> {
        self.seen.lock().expect("seen lock").push(request.clone());
        let mut routes = self.routes.lock().expect("routes lock");
        let Some(route) = routes.iter_mut().find(|route| route.matches(request)) else {
            return Ok(HttpReply::text(500, "unscripted request"));
        };
        route.next().map_err(|message| TransportError {
            url: request.url.clone(),
            message,
            timeout: false,
        })
    }
}

/// In-memory artifact store; URLs are `{public_base}/{path}`.
pub struct MemoryStore {
    public_base: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(public_base: &str) -> Self {
        Self {
            public_base: public_base.trim_end_matches('/').to_string(),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("objects lock").get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().expect("objects lock").len()
    }
}

impl ArtifactStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<String, StorageError> {
        self.objects
            .lock()
            .expect("objects lock")
            .insert(path.to_string(), bytes.to_vec());
        Ok(format!("{}/{path}", self.public_base))
    }
}

pub struct FailingStore;

impl ArtifactStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    fn put(&self, _path: &str, _bytes: &[u8], _content_type: &str) -> Result<String, StorageError> {
        Err(StorageError::Rejected {
            status: 503,
            body: "bucket unavailable".to_string(),
        })
    }
}
