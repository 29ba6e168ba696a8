//! Process configuration, read once from the environment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::pool::{AuthStyle, Credential, CredentialPool, Endpoint, PoolError};

pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_FAL_QUEUE_BASE: &str = "https://queue.fal.run";
const DEFAULT_TIMEOUT_S: f64 = 120.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a number, got '{value}'")]
    InvalidNumber { key: String, value: String },
    #[error("storage configuration incomplete: {missing} is required")]
    IncompleteStorage { missing: &'static str },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    None,
    Local {
        dir: PathBuf,
        public_base_url: String,
    },
    Http {
        url: String,
        bucket: String,
        token: SecretString,
        public_base_url: Option<String>,
    },
}

/// Poll policy overrides applied on top of every target's own policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOverride {
    pub interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pools: Vec<CredentialPool>,
    pub storage: StorageConfig,
    pub poll: PollOverride,
    pub events_path: Option<PathBuf>,
    pub receipts_dir: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();
        let get = |key: &str| vars.get(key).map(|value| value.trim().to_string());

        let mut pools = Vec::new();

        let gemini_keys = collect_keys(&vars, "GEMINI_API_KEY", "ATELIER_GEMINI_KEYS");
        if gemini_keys.is_empty() {
            tracing::warn!(family = "gemini", "no credentials configured; family disabled");
        } else {
            let mut endpoints = Vec::new();
            if let Some(platform) = get("GEMINI_PLATFORM_BASE") {
                endpoints.push(Endpoint::new(
                    "platform",
                    &platform,
                    AuthStyle::Header("x-goog-api-key".to_string()),
                ));
            }
            endpoints.push(Endpoint::new(
                "direct",
                &get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_GEMINI_BASE.to_string()),
                AuthStyle::Query("key".to_string()),
            ));
            pools.push(CredentialPool::new(
                "gemini",
                labelled("gemini", gemini_keys),
                endpoints,
            )?);
        }

        let fal_keys = collect_keys(&vars, "FAL_KEY", "ATELIER_FAL_KEYS");
        if fal_keys.is_empty() {
            tracing::warn!(family = "fal", "no credentials configured; family disabled");
        } else {
            pools.push(CredentialPool::new(
                "fal",
                labelled("fal", fal_keys),
                vec![Endpoint::new(
                    "queue",
                    &get("FAL_QUEUE_BASE").unwrap_or_else(|| DEFAULT_FAL_QUEUE_BASE.to_string()),
                    AuthStyle::KeyPrefix,
                )],
            )?);
        }

        let public_base_url = get("ATELIER_PUBLIC_BASE_URL");
        let storage = if let Some(url) = get("ATELIER_STORAGE_URL") {
            StorageConfig::Http {
                url,
                bucket: get("ATELIER_STORAGE_BUCKET").ok_or(ConfigError::IncompleteStorage {
                    missing: "ATELIER_STORAGE_BUCKET",
                })?,
                token: SecretString::from(get("ATELIER_STORAGE_TOKEN").ok_or(
                    ConfigError::IncompleteStorage {
                        missing: "ATELIER_STORAGE_TOKEN",
                    },
                )?),
                public_base_url,
            }
        } else if let Some(dir) = get("ATELIER_STORAGE_DIR") {
            StorageConfig::Local {
                dir: PathBuf::from(dir),
                public_base_url: public_base_url.ok_or(ConfigError::IncompleteStorage {
                    missing: "ATELIER_PUBLIC_BASE_URL",
                })?,
            }
        } else {
            StorageConfig::None
        };

        let poll = PollOverride {
            interval_ms: parse_number::<u64>(&vars, "ATELIER_POLL_INTERVAL_MS")?,
            max_attempts: parse_number::<u32>(&vars, "ATELIER_POLL_MAX_ATTEMPTS")?,
        };
        let timeout_s = parse_finite(&vars, "ATELIER_REQUEST_TIMEOUT_S")?
            .unwrap_or(DEFAULT_TIMEOUT_S)
            .clamp(5.0, 600.0);

        Ok(Self {
            pools,
            storage,
            poll,
            events_path: get("ATELIER_EVENTS_PATH").map(PathBuf::from),
            receipts_dir: get("ATELIER_RECEIPTS_DIR").map(PathBuf::from),
            request_timeout: Duration::from_secs_f64(timeout_s),
        })
    }
}

/// `PREFIX`, `PREFIX_2`, `PREFIX_3`, … in numeric order, then the comma
/// list. Duplicates are dropped.
fn collect_keys(vars: &BTreeMap<String, String>, prefix: &str, list_key: &str) -> Vec<String> {
    let mut numbered: Vec<(u32, String)> = vars
        .iter()
        .filter_map(|(key, value)| {
            if key == prefix {
                return Some((1, value.trim().to_string()));
            }
            let suffix = key.strip_prefix(prefix)?.strip_prefix('_')?;
            let index = suffix.parse::<u32>().ok()?;
            Some((index, value.trim().to_string()))
        })
        .collect();
    numbered.sort_by_key(|(index, _)| *index);

    let mut keys: Vec<String> = Vec::new();
    let listed = vars
        .get(list_key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    for key in numbered.into_iter().map(|(_, key)| key).chain(listed) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn labelled(family: &str, keys: Vec<String>) -> Vec<Credential> {
    keys.into_iter()
        .enumerate()
        .map(|(idx, key)| Credential::new(format!("{family}#{}", idx + 1), key))
        .collect()
}

fn parse_number<T: std::str::FromStr>(
    vars: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: raw.clone(),
        })
}

fn parse_finite(vars: &BTreeMap<String, String>, key: &str) -> Result<Option<f64>, ConfigError> {
    match parse_number::<f64>(vars, key)? {
        Some(value) if !value.is_finite() => Err(ConfigError::InvalidNumber {
            key: key.to_string(),
            value: vars.get(key).cloned().unwrap_or_default(),
        }),
        parsed => Ok(parsed),
    }
}
