pub use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::error::{ChatFlowError, CoreResult};

/// HTTP client configuration (timeouts, pooling). Timeout policy lives
/// here, in the transport layer; the protocol engine imposes none of its
/// own.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_stream() -> bool {
    true
}

/// On-disk configuration: where to send requests and how.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileConfig {
    /// Full URL of the chat-completion route, e.g.
    /// `https://api.openai.com/v1/chat/completions`.
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Name of the environment variable that contains the API key.
    /// Absent means the endpoint needs no credential.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub http: HttpCfg,
}

impl FileConfig {
    /// Load a FileConfig from a file path (JSON or TOML by extension). If
    /// the extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(ChatFlowError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| ChatFlowError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| ChatFlowError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| ChatFlowError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| ChatFlowError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s).map_err(|e| ChatFlowError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Build a per-request configuration, resolving the credential from
    /// the configured environment variable. Naming a variable that is not
    /// set is a configuration error; naming none means "no credential".
    pub fn request_config(&self) -> CoreResult<RequestConfig> {
        let credential = match &self.api_key_env {
            Some(var) => match env::var(var) {
                Ok(value) => Some(SecretString::from(value)),
                Err(_) => {
                    return Err(ChatFlowError::Config(format!(
                        "credential env var '{var}' is not set"
                    )));
                }
            },
            None => None,
        };
        Ok(RequestConfig {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            stream: self.stream,
            credential,
        })
    }
}

/// Everything one request needs. Supplied per session; the engine never
/// mutates it.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub endpoint: String,
    pub model: String,
    pub stream: bool,
    pub credential: Option<SecretString>,
}

impl RequestConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            stream: true,
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: SecretString) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn non_streaming(mut self) -> Self {
        self.stream = false;
        self
    }
}
