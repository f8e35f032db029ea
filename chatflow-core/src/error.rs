use thiserror::Error;

/// Core error type for chatflow.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChatFlowError {
    /// Bad endpoint, missing credential, empty model id. Fails before
    /// anything reaches the transport and is never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection-level failure: DNS, reset, mid-stream drop, 5xx.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by endpoint")]
    RateLimited { retry_after: Option<u64> },

    /// Non-2xx status that is neither a rate limit nor a server outage.
    #[error("endpoint returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Fatal decode failure (non-streaming response body). Malformed
    /// stream fragments are logged and dropped instead of raising this.
    #[error("decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatFlowError {
    /// Stable label for telemetry and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Transport(_) => "transport",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "upstream",
            Self::Decode(_) => "decode",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ChatFlowError>;
