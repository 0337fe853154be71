//! Failure taxonomy shared by the relay components.

use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates failures surfaced by config loading, updates, and commands.
pub enum RelayError {
    #[error("fetch failed for '{url}': {detail}")]
    Fetch {
        url: String,
        status: Option<u16>,
        detail: String,
    },
    #[error("invalid document: {0}")]
    Parse(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("downloaded artifact rejected: {0}")]
    InvalidArtifact(String),
    #[error("artifact replace failed: {0}")]
    Replace(String),
    #[error("sender {sender} is not authorized to run {command}")]
    Authorization { sender: String, command: String },
}

impl RelayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch_error",
            Self::Parse(_) => "parse_error",
            Self::Config(_) => "config_error",
            Self::InvalidArtifact(_) => "invalid_artifact_error",
            Self::Replace(_) => "replace_error",
            Self::Authorization { .. } => "authorization_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Outcome of a failed platform delivery.
pub enum DeliveryError {
    /// The platform asked the caller to wait before trying again.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("{kind}: {detail}")]
    Failed { kind: String, detail: String },
}

impl DeliveryError {
    pub fn failed(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}
