/// Failures that end a generation attempt.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("rate limited by the generation service")]
    RateLimited,

    #[error("generation quota exhausted")]
    QuotaExceeded,

    #[error("generation service returned status {0}")]
    Status(u16),

    #[error("generation service returned no response body")]
    MissingBody,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generation cancelled")]
    Cancelled,
}

impl ChatError {
    /// Non-2xx, missing body and network-level failures.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ChatError::Status(_) | ChatError::MissingBody | ChatError::Transport(_)
        )
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
