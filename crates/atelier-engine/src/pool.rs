//! Credential/endpoint pool for one provider family.
//!
//! The pool is built once at startup and only read afterwards; the
//! dispatcher walks it credential-outer, endpoint-inner.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::transport::HttpRequest;

#[derive(Clone)]
pub struct Credential {
    label: String,
    secret: Arc<SecretString>,
}

impl Credential {
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: Arc::new(SecretString::from(secret.into())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Where the credential goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// `Authorization: Key <secret>`
    KeyPrefix,
    /// `<name>: <secret>`
    Header(String),
    /// `?<name>=<secret>`
    Query(String),
}

impl AuthStyle {
    pub fn apply(&self, request: HttpRequest, credential: &Credential) -> HttpRequest {
        let secret = credential.expose();
        match self {
            AuthStyle::Bearer => request.header("Authorization", format!("Bearer {secret}")),
            AuthStyle::KeyPrefix => request.header("Authorization", format!("Key {secret}")),
            AuthStyle::Header(name) => request.header(name, secret),
            AuthStyle::Query(name) => request.query(name, secret),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub label: String,
    pub base_url: String,
    pub auth: AuthStyle,
}

impl Endpoint {
    pub fn new(label: impl Into<String>, base_url: &str, auth: AuthStyle) -> Self {
        Self {
            label: label.into(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Absolute URLs pass through untouched; anything else is joined onto
    /// the base URL.
    pub fn url(&self, path: &str) -> String {
        let trimmed = path.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return trimmed.to_string();
        }
        format!("{}/{}", self.base_url, trimmed.trim_start_matches('/'))
    }

    pub fn owns(&self, url: &str) -> bool {
        url.starts_with(&format!("{}/", self.base_url))
    }
}

/// Position of one (credential, endpoint) pair inside a pool. Handles store
/// this instead of the secret itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairIndex {
    pub credential: usize,
    pub endpoint: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("provider family '{family}' has no credentials")]
    NoCredentials { family: String },
    #[error("provider family '{family}' has no endpoints")]
    NoEndpoints { family: String },
}

#[derive(Debug, Clone)]
pub struct CredentialPool {
    family: String,
    credentials: Vec<Credential>,
    endpoints: Vec<Endpoint>,
}

impl CredentialPool {
    pub fn new(
        family: impl Into<String>,
        credentials: Vec<Credential>,
        endpoints: Vec<Endpoint>,
    ) -> Result<Self, PoolError> {
        let family = family.into();
        if credentials.is_empty() {
            return Err(PoolError::NoCredentials { family });
        }
        if endpoints.is_empty() {
            return Err(PoolError::NoEndpoints { family });
        }
        Ok(Self {
            family,
            credentials,
            endpoints,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn pair(&self, index: PairIndex) -> Option<(&Credential, &Endpoint)> {
        Some((
            self.credentials.get(index.credential)?,
            self.endpoints.get(index.endpoint)?,
        ))
    }

    /// Every (credential, endpoint) pair, credential-outer, endpoint-inner.
    /// This is the failover order.
    pub fn pairs(&self) -> impl Iterator<Item = (PairIndex, &Credential, &Endpoint)> {
        self.credentials
            .iter()
            .enumerate()
            .flat_map(move |(credential_idx, credential)| {
                self.endpoints
                    .iter()
                    .enumerate()
                    .map(move |(endpoint_idx, endpoint)| {
                        (
                            PairIndex {
                                credential: credential_idx,
                                endpoint: endpoint_idx,
                            },
                            credential,
                            endpoint,
                        )
                    })
            })
    }

    pub fn owns_url(&self, url: &str) -> bool {
        self.endpoints.iter().any(|endpoint| endpoint.owns(url))
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthStyle, Credential, CredentialPool, Endpoint, PairIndex, PoolError};
    use crate::transport::HttpRequest;

    fn pool() -> CredentialPool {
        CredentialPool::new(
            "gemini",
            vec![Credential::new("a", "key-a"), Credential::new("b", "key-b")],
            vec![
                Endpoint::new("platform", "https://platform.example.com/v1/", AuthStyle::Header("x-goog-api-key".to_string())),
                Endpoint::new("direct", "https://direct.example.com/v1beta", AuthStyle::Query("key".to_string())),
            ],
        )
        .expect("pool")
    }

    #[test]
    fn pairs_iterate_credentials_outer_endpoints_inner() {
        let order: Vec<(usize, usize)> = pool()
            .pairs()
            .map(|(index, _, _)| (index.credential, index.endpoint))
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn debug_output_never_contains_secret() {
        let rendered = format!("{:?}", pool());
        assert!(!rendered.contains("key-a"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn endpoint_url_joins_relative_and_keeps_absolute() {
        let pool = pool();
        let (_, platform) = pool
            .pair(PairIndex {
                credential: 0,
                endpoint: 0,
            })
            .expect("pair");
        assert_eq!(
            platform.url("/models/m:generateContent"),
            "https://platform.example.com/v1/models/m:generateContent"
        );
        assert_eq!(
            platform.url("https://cdn.example.com/x.mp4"),
            "https://cdn.example.com/x.mp4"
        );
        assert!(pool.owns_url("https://direct.example.com/v1beta/files/abc:download"));
        assert!(!pool.owns_url("https://direct.example.com/v1betamax"));
    }

    #[test]
    fn auth_styles_place_secret_outside_url() {
        let pool = pool();
        let (credential, endpoint) = pool
            .pair(PairIndex {
                credential: 1,
                endpoint: 1,
            })
            .expect("pair");
        let request = endpoint
            .auth
            .apply(HttpRequest::get(endpoint.url("operations/1")), credential);
        assert_eq!(request.query_value("key"), Some("key-b"));
        assert!(!request.url.contains("key-b"));

        let bearer = AuthStyle::KeyPrefix.apply(HttpRequest::get("https://q"), credential);
        assert_eq!(bearer.header_value("authorization"), Some("Key key-b"));
    }

    #[test]
    fn empty_pools_are_rejected() {
        let err = CredentialPool::new("fal", Vec::new(), Vec::new()).unwrap_err();
        assert_eq!(
            err,
            PoolError::NoCredentials {
                family: "fal".to_string()
            }
        );
    }
}
